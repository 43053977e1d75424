//! Scope (visualisation) sample adapter.
//!
//! The decode thread appends timestamped chunks of interleaved output-rate samples; the
//! control thread extracts a fixed-length mono window aligned to what the output is
//! rendering *now*. Decoding runs ahead of rendering, so the newest data is not what the
//! listener hears.
//!
//! Timestamps are output frame indices, which keeps the alignment arithmetic
//! exact and two extractions at the same clock identical.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

struct Chunk {
    start_frame: u64,
    samples: Vec<f32>,
}

struct Inner {
    chunks: VecDeque<Chunk>,
    buffered_frames: usize,
}

pub struct ScopeAdapter {
    channels: usize,
    max_frames: usize,
    inner: Mutex<Inner>,
}

impl ScopeAdapter {
    /// `max_frames` bounds memory when nobody extracts for a while.
    pub fn new(channels: usize, max_frames: usize) -> Self {
        Self {
            channels: channels.max(1),
            max_frames: max_frames.max(1),
            inner: Mutex::new(Inner {
                chunks: VecDeque::new(),
                buffered_frames: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn buffered_frames(&self) -> usize {
        self.lock().buffered_frames
    }

    /// Append interleaved samples whose first frame sits at `start_frame`.
    pub fn push(&self, start_frame: u64, samples: &[f32]) {
        let frames = samples.len() / self.channels;
        if frames == 0 {
            return;
        }
        let mut g = self.lock();
        g.chunks.push_back(Chunk {
            start_frame,
            samples: samples[..frames * self.channels].to_vec(),
        });
        g.buffered_frames += frames;
        while g.buffered_frames > self.max_frames && g.chunks.len() > 1 {
            if let Some(old) = g.chunks.pop_front() {
                g.buffered_frames -= old.samples.len() / self.channels;
            }
        }
    }

    pub fn clear(&self) {
        let mut g = self.lock();
        g.chunks.clear();
        g.buffered_frames = 0;
    }

    /// Extract `n` mono samples aligned to `clock_frame`.
    ///
    /// Returns `None` (without touching the buffer) when fewer than `n` frames are buffered.
    /// On success, data older than the alignment point is discarded.
    pub fn extract(&self, clock_frame: u64, n: usize) -> Option<Vec<f32>> {
        if n == 0 {
            return Some(Vec::new());
        }
        let mut g = self.lock();
        let total = g.buffered_frames;
        if total < n {
            return None;
        }

        let oldest = g.chunks.front()?.start_frame;
        let last = g.chunks.back()?;
        let newest = last.start_frame + (last.samples.len() / self.channels) as u64 - 1;

        // factor = share of the buffered span still ahead of the output clock.
        let span = newest.saturating_sub(oldest);
        let factor = if span == 0 {
            1.0
        } else {
            (newest as f64 - clock_frame as f64) / span as f64
        };
        let offset = ((1.0 - factor.clamp(0.0, 1.0)) * span as f64).round() as usize;
        let offset = offset.min(total - n);

        let channels = self.channels;
        let out: Vec<f32> = g
            .chunks
            .iter()
            .flat_map(|c| c.samples.chunks_exact(channels))
            .skip(offset)
            .take(n)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect();

        discard_front(&mut g, offset, channels);
        Some(out)
    }
}

fn discard_front(g: &mut Inner, mut frames: usize, channels: usize) {
    g.buffered_frames -= frames;
    while frames > 0 {
        let Some(front) = g.chunks.front_mut() else {
            break;
        };
        let len = front.samples.len() / channels;
        if len <= frames {
            frames -= len;
            g.chunks.pop_front();
        } else {
            front.samples.drain(..frames * channels);
            front.start_frame += frames as u64;
            frames = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Stereo ramp where frame `i` holds `(i, i + 1)`.
    fn stereo_ramp(start: u64, frames: usize) -> Vec<f32> {
        (0..frames)
            .flat_map(|i| {
                let v = (start as usize + i) as f32;
                [v, v + 1.0]
            })
            .collect()
    }

    #[test]
    fn not_enough_data_returns_none() {
        let scope = ScopeAdapter::new(2, 10_000);
        scope.push(0, &stereo_ramp(0, 3));
        assert!(scope.extract(0, 4).is_none());
        assert_eq!(scope.buffered_frames(), 3);
    }

    #[test]
    fn window_starts_at_output_clock() {
        let scope = ScopeAdapter::new(2, 10_000);
        scope.push(100, &stereo_ramp(100, 50));
        scope.push(150, &stereo_ramp(150, 50));
        let out = scope.extract(120, 4).unwrap();
        assert_eq!(out, vec![120.5, 121.5, 122.5, 123.5]);
        // Everything before frame 120 is gone.
        assert_eq!(scope.buffered_frames(), 80);
    }

    #[test]
    fn clock_outside_buffer_is_clamped() {
        let scope = ScopeAdapter::new(2, 10_000);
        scope.push(100, &stereo_ramp(100, 10));
        let early = scope.extract(0, 4).unwrap();
        assert_eq!(early[0], 100.5);

        let scope = ScopeAdapter::new(2, 10_000);
        scope.push(100, &stereo_ramp(100, 10));
        let late = scope.extract(10_000, 4).unwrap();
        assert_eq!(late, vec![106.5, 107.5, 108.5, 109.5]);
    }

    #[test]
    fn repeated_extraction_without_new_data_is_identical() {
        let scope = ScopeAdapter::new(2, 100_000);
        scope.push(0, &stereo_ramp(0, 700));
        scope.push(700, &stereo_ramp(700, 700));
        let first = scope.extract(333, 512).unwrap();
        let second = scope.extract(333, 512).unwrap();
        assert_eq!(first.len(), 512);
        assert_eq!(first, second);
    }

    #[test]
    fn memory_is_bounded() {
        let scope = ScopeAdapter::new(1, 100);
        for i in 0..10u64 {
            scope.push(i * 40, &[0.0; 40]);
        }
        assert!(scope.buffered_frames() <= 100);
        scope.clear();
        assert_eq!(scope.buffered_frames(), 0);
    }
}

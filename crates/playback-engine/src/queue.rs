//! Bounded queue of interleaved samples between a decode thread and the output callback.
//!
//! Each pipeline owns one queue:
//! - its decode thread pushes (blocking when full, so decode never races far ahead)
//! - the output callback drains it without blocking
//!
//! Closing the queue makes shutdown deterministic: blocked pushes return, and the consumer
//! sees end-of-stream once the remaining samples are drained.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub struct SampleQueue {
    channels: usize,
    inner: Mutex<QueueInner>,
    cv: Condvar,
    max_buffered_samples: usize,
    low_watermark_ms: AtomicU64,
}

struct QueueInner {
    queue: VecDeque<f32>,
    done: bool,
    generation: u64,
}

/// Compute a queue capacity in **samples** for a `(rate, channels, seconds)` target.
///
/// Non-finite or non-positive `buffer_seconds` falls back to two seconds.
pub fn calc_max_buffered_samples(rate_hz: u32, channels: usize, buffer_seconds: f32) -> usize {
    let secs = if buffer_seconds.is_finite() && buffer_seconds > 0.0 {
        buffer_seconds
    } else {
        2.0
    };

    let frames = (rate_hz as f32 * secs).ceil() as usize;
    frames.saturating_mul(channels)
}

impl SampleQueue {
    pub fn new(channels: usize, max_buffered_samples: usize) -> Self {
        let channels = channels.max(1);
        Self {
            channels,
            inner: Mutex::new(QueueInner {
                queue: VecDeque::new(),
                done: false,
                generation: 0,
            }),
            cv: Condvar::new(),
            max_buffered_samples: max_buffered_samples.max(channels),
            low_watermark_ms: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn max_frames(&self) -> usize {
        self.max_buffered_samples / self.channels
    }

    /// Current buffered frames (best-effort snapshot).
    pub fn len_frames(&self) -> usize {
        self.lock().queue.len() / self.channels
    }

    pub fn is_done(&self) -> bool {
        self.lock().done
    }

    /// Closed and fully drained.
    pub fn is_exhausted(&self) -> bool {
        let g = self.lock();
        g.done && g.queue.is_empty()
    }

    /// Mark the queue as finished and wake all waiters. Idempotent.
    pub fn close(&self) {
        let mut g = self.lock();
        g.done = true;
        drop(g);
        self.cv.notify_all();
    }

    /// Drop everything buffered (used when seeking).
    ///
    /// Pushes that were blocked on a full queue before the flush stop early so stale
    /// pre-seek audio does not land after the flush.
    pub fn flush(&self) {
        let mut g = self.lock();
        g.queue.clear();
        g.generation = g.generation.wrapping_add(1);
        drop(g);
        self.cv.notify_all();
    }

    /// Push interleaved samples, blocking while the queue is full.
    ///
    /// Returns `false` if the queue was closed or flushed before everything was pushed.
    pub fn push_blocking(&self, samples: &[f32]) -> bool {
        let mut offset = 0;
        let generation = self.lock().generation;

        while offset < samples.len() {
            let mut g = self.lock();

            while g.queue.len() >= self.max_buffered_samples
                && !g.done
                && g.generation == generation
            {
                g = self.cv.wait(g).unwrap_or_else(|e| e.into_inner());
            }
            if g.done || g.generation != generation {
                return false;
            }

            let room = self.max_buffered_samples - g.queue.len();
            let take = room.min(samples.len() - offset);
            g.queue.extend(&samples[offset..offset + take]);
            offset += take;

            drop(g);
            self.cv.notify_all();
        }
        true
    }

    /// Pop up to `max_frames` whole frames without blocking.
    ///
    /// Returns `None` when nothing is buffered.
    pub fn pop_available(&self, max_frames: usize) -> Option<Vec<f32>> {
        let mut g = self.lock();

        let available_frames = g.queue.len() / self.channels;
        let take_samples = available_frames.min(max_frames) * self.channels;
        if take_samples == 0 {
            return None;
        }

        let out: Vec<f32> = g.queue.drain(..take_samples).collect();
        let queued = g.queue.len();
        drop(g);
        self.cv.notify_all();
        self.log_low_watermark(queued);
        Some(out)
    }

    fn log_low_watermark(&self, queued: usize) {
        let threshold = (self.max_buffered_samples / 8).max(self.channels * 16);
        if queued > 0 && queued < threshold {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_else(|_| Duration::from_millis(0))
                .as_millis() as u64;
            let last = self.low_watermark_ms.load(Ordering::Relaxed);
            if now.saturating_sub(last) > 1000 {
                self.low_watermark_ms.store(now, Ordering::Relaxed);
                tracing::debug!(
                    queued_samples = queued,
                    threshold_samples = threshold,
                    "sample queue low watermark"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn calc_max_buffered_samples_fallbacks() {
        assert_eq!(calc_max_buffered_samples(48_000, 2, 2.0), 192_000);
        assert_eq!(calc_max_buffered_samples(48_000, 2, -1.0), 192_000);
        assert_eq!(calc_max_buffered_samples(48_000, 2, f32::NAN), 192_000);
        assert_eq!(calc_max_buffered_samples(48_000, 2, f32::INFINITY), 192_000);
    }

    #[test]
    fn pop_available_empty() {
        let q = SampleQueue::new(2, 16);
        assert!(q.pop_available(4).is_none());
    }

    #[test]
    fn pop_available_returns_whole_frames() {
        let q = SampleQueue::new(2, 64);
        assert!(q.push_blocking(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]));
        let out = q.pop_available(2).unwrap();
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0]);
        let out = q.pop_available(8).unwrap();
        assert_eq!(out, vec![5.0, 6.0]);
        assert_eq!(q.len_frames(), 0);
    }

    #[test]
    fn close_unblocks_a_full_push() {
        let q = Arc::new(SampleQueue::new(1, 4));
        let q_push = q.clone();
        let handle = thread::spawn(move || q_push.push_blocking(&[0.0; 16]));
        while q.len_frames() < 4 {
            thread::yield_now();
        }
        q.close();
        assert!(!handle.join().unwrap());
        assert!(q.is_done());
        assert!(!q.is_exhausted());
    }

    #[test]
    fn flush_drops_buffered_and_aborts_blocked_push() {
        let q = Arc::new(SampleQueue::new(1, 4));
        let q_push = q.clone();
        let handle = thread::spawn(move || q_push.push_blocking(&[1.0; 16]));
        while q.len_frames() < 4 {
            thread::yield_now();
        }
        q.flush();
        assert!(!handle.join().unwrap());
        assert_eq!(q.len_frames(), 0);
        assert!(q.push_blocking(&[2.0, 2.0]));
        assert_eq!(q.pop_available(8).unwrap(), vec![2.0, 2.0]);
    }

    #[test]
    fn exhausted_after_close_and_drain() {
        let q = SampleQueue::new(2, 16);
        q.push_blocking(&[0.5, 0.5]);
        q.close();
        assert!(!q.is_exhausted());
        q.pop_available(1);
        assert!(q.is_exhausted());
    }
}

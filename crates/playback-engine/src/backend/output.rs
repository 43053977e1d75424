//! Playback stage (CPAL output stream).
//!
//! Builds one CPAL output stream shared by every pipeline. The callback:
//! - drains each connected, unpaused voice without blocking
//! - mixes `sample * voice gain`, then applies the master gain
//! - converts `f32` samples to the device sample format
//! - reports end-of-stream and stream errors as [`BackendEvent`]s

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Result, anyhow};
use cpal::traits::DeviceTrait;
use crossbeam_channel::Sender;

use super::{BackendEvent, Voice};
use crate::arena::PipelineId;
use crate::volume::VolumeControl;

/// Voices currently wired into the output, shared with the callback.
#[derive(Clone, Default)]
pub(crate) struct Mixer {
    voices: Arc<Mutex<Vec<(PipelineId, Arc<Voice>)>>>,
}

impl Mixer {
    fn lock(&self) -> MutexGuard<'_, Vec<(PipelineId, Arc<Voice>)>> {
        self.voices.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn connect(&self, id: PipelineId, voice: Arc<Voice>) {
        let mut voices = self.lock();
        voices.retain(|(existing, _)| *existing != id);
        voices.push((id, voice));
    }

    pub(crate) fn disconnect(&self, id: PipelineId) {
        self.lock().retain(|(existing, _)| *existing != id);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Render `frames` frames of `channels` interleaved audio into `mix`.
    ///
    /// Returns the ids whose queue ran dry after being closed, each reported once.
    pub(crate) fn render(&self, mix: &mut [f32], channels: usize, master: f32) -> Vec<PipelineId> {
        mix.fill(0.0);
        let frames = mix.len() / channels.max(1);
        let mut ended = Vec::new();

        let voices = self.lock();
        for (id, voice) in voices.iter() {
            if voice.is_paused() {
                continue;
            }
            let gain = voice.volume.get();
            if let Some(samples) = voice.queue.pop_available(frames) {
                for (dst, src) in mix.iter_mut().zip(samples.iter()) {
                    *dst += src * gain;
                }
                voice.clock.advance((samples.len() / channels.max(1)) as u64);
            }
            if voice.take_end_of_stream() {
                ended.push(*id);
            }
        }
        drop(voices);

        if master != 1.0 {
            for s in mix.iter_mut() {
                *s *= master;
            }
        }
        ended
    }
}

/// Build a CPAL output stream that renders `mixer`.
///
/// Each callback pulls from the voices in slices of at most `refill_max_frames` frames.
pub(crate) fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    refill_max_frames: usize,
    mixer: Mixer,
    master: VolumeControl,
    events: Sender<BackendEvent>,
) -> Result<cpal::Stream> {
    let refill = refill_max_frames;
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, refill, mixer, master, events),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, refill, mixer, master, events),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, refill, mixer, master, events),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, refill, mixer, master, events),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    refill_max_frames: usize,
    mixer: Mixer,
    master: VolumeControl,
    events: Sender<BackendEvent>,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels = (config.channels as usize).max(1);
    let slice_samples = refill_max_frames.max(1) * channels;
    let mut mix: Vec<f32> = Vec::new();

    let events_err = events.clone();
    let err_fn = move |err: cpal::StreamError| {
        tracing::warn!("stream error: {err}");
        let _ = events_err.send(BackendEvent::OutputError {
            message: err.to_string(),
        });
    };

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            let gain = master.get();
            for out in data.chunks_mut(slice_samples) {
                mix.resize(out.len(), 0.0);
                let ended = mixer.render(&mut mix, channels, gain);
                for (dst, src) in out.iter_mut().zip(mix.iter()) {
                    *dst = <T as cpal::Sample>::from_sample::<f32>(*src);
                }
                for id in ended {
                    let _ = events.send(BackendEvent::EndOfStream { id });
                }
            }
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::backend::OutputFormat;

    fn ids(n: usize) -> Vec<PipelineId> {
        let mut arena = Arena::new();
        (0..n)
            .map(|_| arena.try_insert_with::<()>(|_| Ok(())).unwrap())
            .collect()
    }

    fn voice() -> Arc<Voice> {
        let v = Arc::new(Voice::new(
            OutputFormat {
                rate_hz: 1000,
                channels: 2,
            },
            1.0,
        ));
        v.set_paused(false);
        v
    }

    #[test]
    fn render_mixes_voices_with_their_gain() {
        let ids = ids(2);
        let mixer = Mixer::default();
        let a = voice();
        let b = voice();
        a.queue.push_blocking(&[0.5; 4]);
        b.queue.push_blocking(&[0.5; 4]);
        b.volume.set(0.5);
        mixer.connect(ids[0], a.clone());
        mixer.connect(ids[1], b);

        let mut mix = vec![0.0; 4];
        let ended = mixer.render(&mut mix, 2, 1.0);
        assert!(ended.is_empty());
        assert_eq!(mix, vec![0.75; 4]);
        assert_eq!(a.clock.frames(), 2);
    }

    #[test]
    fn render_skips_paused_and_applies_master() {
        let ids = ids(2);
        let mixer = Mixer::default();
        let a = voice();
        let b = voice();
        a.queue.push_blocking(&[1.0; 4]);
        b.queue.push_blocking(&[1.0; 4]);
        b.set_paused(true);
        mixer.connect(ids[0], a);
        mixer.connect(ids[1], b.clone());

        let mut mix = vec![0.0; 4];
        mixer.render(&mut mix, 2, 0.25);
        assert_eq!(mix, vec![0.25; 4]);
        assert_eq!(b.queue.len_frames(), 2);
    }

    #[test]
    fn underrun_pads_with_silence_and_reports_end_once() {
        let ids = ids(1);
        let mixer = Mixer::default();
        let a = voice();
        a.queue.push_blocking(&[1.0, 1.0]);
        a.queue.close();
        mixer.connect(ids[0], a);

        let mut mix = vec![0.0; 6];
        let ended = mixer.render(&mut mix, 2, 1.0);
        assert_eq!(mix, vec![1.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(ended, vec![ids[0]]);
        assert!(mixer.render(&mut mix, 2, 1.0).is_empty());
    }

    #[test]
    fn disconnect_removes_voice() {
        let ids = ids(1);
        let mixer = Mixer::default();
        mixer.connect(ids[0], voice());
        mixer.connect(ids[0], voice());
        assert_eq!(mixer.len(), 1);
        mixer.disconnect(ids[0]);
        assert_eq!(mixer.len(), 0);
    }
}

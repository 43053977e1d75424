//! Streaming audio decode stage.
//!
//! Uses Symphonia to:
//! - probe the input container/codec
//! - decode packets into interleaved `f32` samples
//! - map channels and resample into the shared output format
//! - push samples into the pipeline's voice queue and scope adapter
//!
//! Everything runs on one background thread per pipeline. The thread reports back only through
//! [`BackendEvent`]s and exits when its queue is closed.

use std::collections::BTreeMap;
use std::fs::File;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey};
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

use super::resample::StreamResampler;
use super::{BackendEvent, DecodeRequest, DecodeStage, MediaInput, OutputFormat, Voice, ms_to_frames};
use crate::arena::PipelineId;
use crate::config::PlaybackConfig;
use crate::scope::ScopeAdapter;

enum DecodeCommand {
    Seek(u64),
    Stop,
}

/// Handle to a running decode thread.
pub(crate) struct NativeDecode {
    id: PipelineId,
    cmd_tx: Sender<DecodeCommand>,
    voice: Arc<Voice>,
    stopped: bool,
}

impl NativeDecode {
    pub(crate) fn spawn(request: DecodeRequest, playback: PlaybackConfig) -> Result<Self> {
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let id = request.id;
        let voice = request.voice.clone();
        // Detached: a stream read may still be blocked when the pipeline goes away, and the
        // thread exits on its own once its queue or stream buffer is stopped.
        thread::Builder::new()
            .name(format!("decode-{id}"))
            .spawn(move || decode_thread_main(request, playback, cmd_rx))
            .context("spawn decode thread")?;
        Ok(Self {
            id,
            cmd_tx,
            voice,
            stopped: false,
        })
    }
}

impl DecodeStage for NativeDecode {
    fn seek(&mut self, ms: u64) {
        let _ = self.cmd_tx.send(DecodeCommand::Seek(ms));
        // Unblocks a push waiting on a full queue so the thread sees the command.
        self.voice.queue.flush();
        self.voice.clock.set_ms(ms);
    }

    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        let _ = self.cmd_tx.send(DecodeCommand::Stop);
        self.voice.queue.close();
        tracing::debug!(pipeline = %self.id, "decode stage stopped");
    }
}

impl Drop for NativeDecode {
    fn drop(&mut self) {
        self.stop();
    }
}

struct DecodeLoop {
    id: PipelineId,
    format: OutputFormat,
    voice: Arc<Voice>,
    scope: Arc<ScopeAdapter>,
    events: Sender<BackendEvent>,
    cmd_rx: Receiver<DecodeCommand>,
    /// Output-rate frame index of the next frame pushed.
    written_frames: u64,
}

fn decode_thread_main(request: DecodeRequest, playback: PlaybackConfig, cmd_rx: Receiver<DecodeCommand>) {
    let DecodeRequest {
        id,
        input,
        ext_hint,
        format,
        voice,
        scope,
        events,
    } = request;

    let mut state = DecodeLoop {
        id,
        format,
        voice,
        scope,
        events,
        cmd_rx,
        written_frames: 0,
    };

    if let Err(e) = state.run(input, ext_hint, &playback) {
        tracing::warn!(pipeline = %id, "decoder thread error: {e:#}");
        let _ = state.events.send(BackendEvent::DecodeError {
            id,
            message: format!("{e:#}"),
        });
    }
    state.voice.queue.close();
}

impl DecodeLoop {
    fn run(&mut self, input: MediaInput, ext_hint: Option<String>, playback: &PlaybackConfig) -> Result<()> {
        let source: Box<dyn MediaSource> = match input {
            MediaInput::File(path) => {
                Box::new(File::open(&path).with_context(|| format!("open {:?}", path))?)
            }
            MediaInput::Stream(reader) => Box::new(reader),
        };

        let mut hint = Hint::new();
        if let Some(ext) = ext_hint.as_deref().filter(|s| !s.is_empty()) {
            hint.with_extension(ext);
        }

        let mss = MediaSourceStream::new(source, Default::default());
        let mut probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .context("probe source")?;

        let mut tags = BTreeMap::new();
        if let Some(rev) = probed.metadata.get().as_ref().and_then(|m| m.current()) {
            collect_tags(rev, &mut tags);
        }
        let mut format = probed.format;
        if let Some(rev) = format.metadata().current() {
            collect_tags(rev, &mut tags);
        }

        let track = format
            .default_track()
            .ok_or_else(|| anyhow!("No default audio track"))?;
        let track_id = track.id;
        let codec_params: CodecParameters = track.codec_params.clone();

        let src_channels = codec_params
            .channels
            .ok_or_else(|| anyhow!("Unknown channels"))?
            .count();
        let src_rate = codec_params
            .sample_rate
            .ok_or_else(|| anyhow!("Unknown sample rate"))?;

        let length_ms = duration_ms_from_codec_params(&codec_params);
        tracing::info!(
            pipeline = %self.id,
            codec = codec_name_from_params(&codec_params).unwrap_or("unknown"),
            channels = src_channels,
            rate_hz = src_rate,
            length_ms = ?length_ms,
            "source"
        );
        let _ = self.events.send(BackendEvent::Ready {
            id: self.id,
            length_ms,
            source_rate_hz: src_rate,
            source_channels: src_channels,
        });
        if !tags.is_empty() {
            let _ = self.events.send(BackendEvent::Metadata { id: self.id, tags });
        }

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .context("create decoder")?;

        let mut resampler = if src_rate == self.format.rate_hz {
            tracing::info!(rate_hz = src_rate, "resample skipped");
            None
        } else {
            Some(StreamResampler::new(
                src_rate,
                self.format.rate_hz,
                self.format.channels,
                playback.chunk_frames,
            )?)
        };

        loop {
            match self.cmd_rx.try_recv() {
                Ok(DecodeCommand::Stop) | Err(TryRecvError::Disconnected) => return Ok(()),
                Ok(DecodeCommand::Seek(ms)) => {
                    self.seek(format.as_mut(), decoder.as_mut(), resampler.as_mut(), track_id, ms);
                    continue;
                }
                Err(TryRecvError::Empty) => {}
            }
            if self.voice.queue.is_done() {
                return Ok(());
            }

            let packet = match format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(anyhow!("read packet: {e}")),
            };
            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(e)) => {
                    tracing::debug!(pipeline = %self.id, "skipping corrupt packet: {e}");
                    continue;
                }
                Err(e) => return Err(anyhow!("decode: {e}")),
            };

            let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, *decoded.spec());
            sample_buf.copy_interleaved_ref(decoded);
            let mapped = map_channels(sample_buf.samples(), src_channels, self.format.channels);

            let out = match resampler.as_mut() {
                Some(rs) => rs.process(&mapped)?,
                None => mapped,
            };
            self.push(&out);
        }

        if let Some(rs) = resampler.as_mut() {
            let tail = rs.finish()?;
            self.push(&tail);
        }
        tracing::debug!(pipeline = %self.id, frames = self.written_frames, "decode finished");
        Ok(())
    }

    fn push(&mut self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }
        let frames = (samples.len() / self.format.channels) as u64;
        self.scope.push(self.written_frames, samples);
        self.written_frames += frames;
        // `false` means flushed by a seek or closed by stop; the loop picks up either.
        let _ = self.voice.queue.push_blocking(samples);
    }

    fn seek(
        &mut self,
        format: &mut dyn FormatReader,
        decoder: &mut dyn Decoder,
        resampler: Option<&mut StreamResampler>,
        track_id: u32,
        ms: u64,
    ) {
        let time = Time::new(ms / 1000, (ms % 1000) as f64 / 1000.0);
        let seeked = format.seek(
            SeekMode::Accurate,
            SeekTo::Time {
                time,
                track_id: Some(track_id),
            },
        );
        decoder.reset();
        if let Some(rs) = resampler {
            rs.reset();
        }
        self.voice.queue.flush();
        self.scope.clear();

        match seeked {
            Ok(_) => {
                tracing::debug!(pipeline = %self.id, ms, "seeked");
                self.written_frames = ms_to_frames(ms, self.format.rate_hz);
                self.voice.clock.set_ms(ms);
            }
            Err(e) => {
                tracing::warn!(pipeline = %self.id, ms, "seek failed: {e}");
                // The queue was flushed, so the next pushed frame is the next one decoded.
                self.voice.clock.set_frames(self.written_frames);
                let _ = self.events.send(BackendEvent::SeekFailed {
                    id: self.id,
                    ms,
                    message: e.to_string(),
                });
            }
        }
    }
}

/// Map interleaved `src_channels` audio onto `dst_channels`.
///
/// - mono → N: duplicate channel 0
/// - stereo → mono: average L/R
/// - otherwise: copy matching channels, repeat the last source channel for extra outputs
pub(crate) fn map_channels(src: &[f32], src_channels: usize, dst_channels: usize) -> Vec<f32> {
    let src_channels = src_channels.max(1);
    if src_channels == dst_channels {
        return src.to_vec();
    }
    let frames = src.len() / src_channels;
    let mut out = Vec::with_capacity(frames * dst_channels);
    for frame in src.chunks_exact(src_channels) {
        for ch in 0..dst_channels {
            let v = match (src_channels, dst_channels) {
                (2, 1) => 0.5 * (frame[0] + frame[1]),
                (1, _) => frame[0],
                _ => frame[ch.min(src_channels - 1)],
            };
            out.push(v);
        }
    }
    out
}

fn collect_tags(rev: &MetadataRevision, out: &mut BTreeMap<String, String>) {
    for tag in rev.tags() {
        let key = match tag.std_key {
            Some(StandardTagKey::TrackTitle) => "title".to_string(),
            Some(StandardTagKey::Artist) => "artist".to_string(),
            Some(StandardTagKey::Album) => "album".to_string(),
            Some(StandardTagKey::Genre) => "genre".to_string(),
            Some(StandardTagKey::TrackNumber) => "track".to_string(),
            Some(StandardTagKey::Date) => "date".to_string(),
            _ => tag.key.to_ascii_lowercase(),
        };
        out.entry(key).or_insert_with(|| tag.value.to_string());
    }
}

/// Best-effort duration in milliseconds from codec metadata.
///
/// Returns `None` if the container does not provide total frames or sample rate.
fn duration_ms_from_codec_params(codec_params: &CodecParameters) -> Option<u64> {
    let frames = codec_params.n_frames?;
    let rate = codec_params.sample_rate? as u64;
    if rate == 0 {
        return None;
    }
    Some(frames.saturating_mul(1000) / rate)
}

/// Best-effort codec label for logs.
fn codec_name_from_params(params: &CodecParameters) -> Option<&'static str> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name)
}

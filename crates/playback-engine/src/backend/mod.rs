//! Boundary between the pipeline manager and an audio library.
//!
//! A backend supplies two kinds of stages:
//! - one shared [`OutputStage`] that mixes every connected [`Voice`] into the device
//! - one [`DecodeStage`] per pipeline that fills its voice from a file or stream
//!
//! Stages run on threads the manager does not own. They never touch manager state; everything
//! they have to say travels as a [`BackendEvent`] over a crossbeam channel drained by the control
//! thread.

pub mod native;

mod decode;
mod output;
mod resample;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam_channel::Sender;

use crate::arena::PipelineId;
use crate::error::Result;
use crate::queue::{SampleQueue, calc_max_buffered_samples};
use crate::scope::ScopeAdapter;
use crate::stream_buffer::StreamReader;
use crate::volume::VolumeControl;

pub use native::NativeBackend;

/// Fixed format of the shared output; every voice is rendered in it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputFormat {
    pub rate_hz: u32,
    pub channels: usize,
}

/// Rendered position of one voice, in output frames.
#[derive(Debug)]
pub struct RenderClock {
    rate_hz: u32,
    frames: AtomicU64,
}

impl RenderClock {
    pub fn new(rate_hz: u32) -> Self {
        Self {
            rate_hz: rate_hz.max(1),
            frames: AtomicU64::new(0),
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn advance(&self, frames: u64) {
        self.frames.fetch_add(frames, Ordering::Relaxed);
    }

    pub fn set_frames(&self, frames: u64) {
        self.frames.store(frames, Ordering::Relaxed);
    }

    pub fn set_ms(&self, ms: u64) {
        self.frames
            .store(ms_to_frames(ms, self.rate_hz), Ordering::Relaxed);
    }

    pub fn position_ms(&self) -> u64 {
        self.frames().saturating_mul(1000) / self.rate_hz as u64
    }
}

pub fn ms_to_frames(ms: u64, rate_hz: u32) -> u64 {
    ms.saturating_mul(rate_hz as u64) / 1000
}

/// Per-pipeline render state shared with the output callback.
///
/// The decode stage fills `queue`; the output drains it scaled by `volume`. The pipeline's fade
/// writes `volume` once per tick.
pub struct Voice {
    pub queue: SampleQueue,
    pub volume: VolumeControl,
    pub clock: RenderClock,
    paused: AtomicBool,
    eos_sent: AtomicBool,
}

impl Voice {
    /// New voice, paused, sized for `buffer_seconds` of output.
    pub fn new(format: OutputFormat, buffer_seconds: f32) -> Self {
        let max_samples = calc_max_buffered_samples(format.rate_hz, format.channels, buffer_seconds);
        Self {
            queue: SampleQueue::new(format.channels, max_samples),
            volume: VolumeControl::default(),
            clock: RenderClock::new(format.rate_hz),
            paused: AtomicBool::new(true),
            eos_sent: AtomicBool::new(false),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    /// Returns `true` exactly once, the first time the drained queue is observed.
    pub fn take_end_of_stream(&self) -> bool {
        self.queue.is_exhausted() && !self.eos_sent.swap(true, Ordering::AcqRel)
    }
}

/// Result of asking a server what a locator serves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Audio; the optional extension is a decoder hint.
    Audio { ext_hint: Option<String> },
    /// Reachable but not something we can play.
    Unsupported { content_type: String },
    Failed { message: String },
}

/// Messages from foreign threads to the control thread.
#[derive(Clone, Debug, PartialEq)]
pub enum BackendEvent {
    /// The decoder probed its source.
    Ready {
        id: PipelineId,
        length_ms: Option<u64>,
        source_rate_hz: u32,
        source_channels: usize,
    },
    /// Tags found in the container.
    Metadata {
        id: PipelineId,
        tags: BTreeMap<String, String>,
    },
    /// The voice's queue was closed and fully rendered.
    EndOfStream { id: PipelineId },
    DecodeError { id: PipelineId, message: String },
    /// A seek was refused by the decoder; the pipeline keeps playing.
    SeekFailed {
        id: PipelineId,
        ms: u64,
        message: String,
    },
    /// The network fetch feeding a pipeline failed.
    StreamError { id: PipelineId, message: String },
    /// The shared output failed while rendering.
    OutputError { message: String },
    /// A content-type probe finished.
    ProbeFinished { ticket: u64, outcome: ProbeOutcome },
}

/// Where a decode stage reads its bytes from.
pub enum MediaInput {
    File(PathBuf),
    Stream(StreamReader),
}

/// Everything a backend needs to start decoding one pipeline.
pub struct DecodeRequest {
    pub id: PipelineId,
    pub input: MediaInput,
    pub ext_hint: Option<String>,
    pub format: OutputFormat,
    pub voice: Arc<Voice>,
    pub scope: Arc<ScopeAdapter>,
    pub events: Sender<BackendEvent>,
}

pub trait AudioBackend: Send {
    fn name(&self) -> &str;

    /// Whether two voices can be rendered at once.
    fn supports_crossfade(&self) -> bool;

    /// Build the shared output. Errors leave nothing running.
    fn open_output(
        &mut self,
        device: Option<&str>,
        events: Sender<BackendEvent>,
    ) -> Result<Box<dyn OutputStage>>;

    /// Start a decode stage feeding `request.voice`.
    fn open_decoder(&mut self, request: DecodeRequest) -> Result<Box<dyn DecodeStage>>;
}

pub trait OutputStage {
    fn format(&self) -> OutputFormat;

    fn device_name(&self) -> Option<String> {
        None
    }

    fn connect(&mut self, id: PipelineId, voice: Arc<Voice>) -> Result<()>;

    fn disconnect(&mut self, id: PipelineId);

    /// Master gain applied after the per-voice gain.
    fn set_master_gain(&mut self, gain: f32);
}

pub trait DecodeStage {
    /// Restart decoding at `ms` and drop queued audio.
    fn seek(&mut self, ms: u64);

    /// Stop decoding and close the voice queue. Idempotent.
    fn stop(&mut self);
}

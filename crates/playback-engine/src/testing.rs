//! In-memory backend for manager and controller tests.
//!
//! Nothing renders: tests move the render clock by hand and inject events through the same
//! channel the native backend's threads use.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crossbeam_channel::Sender;

use crate::arena::PipelineId;
use crate::backend::{AudioBackend, BackendEvent, DecodeRequest, DecodeStage, OutputFormat, OutputStage, Voice};
use crate::error::{EngineError, Result};

pub(crate) const FAKE_FORMAT: OutputFormat = OutputFormat {
    rate_hz: 48_000,
    channels: 2,
};

#[derive(Default)]
struct FakeState {
    fail_output: bool,
    no_crossfade: bool,
    length_ms: Option<u64>,
    voices: BTreeMap<PipelineId, Arc<Voice>>,
    seeks: Vec<(PipelineId, u64)>,
    outputs_opened: usize,
    decoders_opened: usize,
    master_gain: Option<f32>,
    events: Option<Sender<BackendEvent>>,
}

/// Test-side switches and probes shared with a [`FakeBackend`].
#[derive(Clone, Default)]
pub(crate) struct FakeControl {
    inner: Arc<Mutex<FakeState>>,
}

impl FakeControl {
    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn backend(&self) -> Box<dyn AudioBackend> {
        Box::new(FakeBackend {
            control: self.clone(),
        })
    }

    pub(crate) fn set_fail_output(&self, fail: bool) {
        self.lock().fail_output = fail;
    }

    pub(crate) fn set_no_crossfade(&self, no_crossfade: bool) {
        self.lock().no_crossfade = no_crossfade;
    }

    /// Length announced in the `Ready` event of every decoder opened from now on.
    pub(crate) fn set_length_ms(&self, length_ms: Option<u64>) {
        self.lock().length_ms = length_ms;
    }

    pub(crate) fn voice(&self, id: PipelineId) -> Option<Arc<Voice>> {
        self.lock().voices.get(&id).cloned()
    }

    pub(crate) fn connected(&self) -> Vec<PipelineId> {
        self.lock().voices.keys().copied().collect()
    }

    pub(crate) fn seeks(&self) -> Vec<(PipelineId, u64)> {
        self.lock().seeks.clone()
    }

    pub(crate) fn outputs_opened(&self) -> usize {
        self.lock().outputs_opened
    }

    pub(crate) fn decoders_opened(&self) -> usize {
        self.lock().decoders_opened
    }

    pub(crate) fn master_gain(&self) -> Option<f32> {
        self.lock().master_gain
    }

    /// Send an event as if a backend thread had raised it.
    pub(crate) fn inject(&self, event: BackendEvent) {
        if let Some(tx) = self.lock().events.clone() {
            let _ = tx.send(event);
        }
    }
}

pub(crate) struct FakeBackend {
    control: FakeControl,
}

impl AudioBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    fn supports_crossfade(&self) -> bool {
        !self.control.lock().no_crossfade
    }

    fn open_output(
        &mut self,
        _device: Option<&str>,
        events: Sender<BackendEvent>,
    ) -> Result<Box<dyn OutputStage>> {
        let mut state = self.control.lock();
        if state.fail_output {
            return Err(EngineError::Configuration("no output device".into()));
        }
        state.outputs_opened += 1;
        state.events = Some(events);
        Ok(Box::new(FakeOutput {
            control: self.control.clone(),
        }))
    }

    fn open_decoder(&mut self, request: DecodeRequest) -> Result<Box<dyn DecodeStage>> {
        let length_ms = {
            let mut state = self.control.lock();
            state.decoders_opened += 1;
            state.length_ms
        };
        let _ = request.events.send(BackendEvent::Ready {
            id: request.id,
            length_ms,
            source_rate_hz: request.format.rate_hz,
            source_channels: request.format.channels,
        });
        Ok(Box::new(FakeDecode {
            id: request.id,
            voice: request.voice,
            control: self.control.clone(),
        }))
    }
}

struct FakeOutput {
    control: FakeControl,
}

impl OutputStage for FakeOutput {
    fn format(&self) -> OutputFormat {
        FAKE_FORMAT
    }

    fn connect(&mut self, id: PipelineId, voice: Arc<Voice>) -> Result<()> {
        self.control.lock().voices.insert(id, voice);
        Ok(())
    }

    fn disconnect(&mut self, id: PipelineId) {
        self.control.lock().voices.remove(&id);
    }

    fn set_master_gain(&mut self, gain: f32) {
        self.control.lock().master_gain = Some(gain);
    }
}

impl Drop for FakeOutput {
    fn drop(&mut self) {
        self.control.lock().voices.clear();
    }
}

struct FakeDecode {
    id: PipelineId,
    voice: Arc<Voice>,
    control: FakeControl,
}

impl DecodeStage for FakeDecode {
    fn seek(&mut self, ms: u64) {
        self.control.lock().seeks.push((self.id, ms));
        self.voice.queue.flush();
        self.voice.clock.set_ms(ms);
    }

    fn stop(&mut self) {
        self.voice.queue.close();
    }
}

//! One per-track decode chain.
//!
//! A pipeline owns its decode stage, the voice the shared output renders, the scope adapter the
//! decoder feeds, and for network sources the stream buffer plus the fetch job filling it.
//! Pipelines are created and destroyed only by the manager on the control thread.

use std::collections::BTreeMap;
use std::sync::Arc;

use crossbeam_channel::Sender;

use crate::arena::PipelineId;
use crate::backend::{AudioBackend, BackendEvent, DecodeRequest, DecodeStage, MediaInput, OutputFormat, Voice};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::fade::Fade;
use crate::fetch::{FetchConfig, StreamFetcher};
use crate::locator::Locator;
use crate::scope::ScopeAdapter;
use crate::stream_buffer::{StreamBuffer, StreamReader};

/// Network half of a streamed pipeline.
struct StreamSource {
    buffer: Arc<StreamBuffer>,
    fetcher: StreamFetcher,
}

pub(crate) struct Pipeline {
    pub locator: Locator,
    decoder: Box<dyn DecodeStage>,
    pub voice: Arc<Voice>,
    pub scope: Arc<ScopeAdapter>,
    pub fade: Fade,
    /// The voice rendered its last sample.
    pub eos: bool,
    pub length_ms: Option<u64>,
    pub tags: BTreeMap<String, String>,
    stream: Option<StreamSource>,
}

impl Pipeline {
    /// Build the decode side of a pipeline. The voice is not yet connected to any output.
    pub(crate) fn build(
        id: PipelineId,
        locator: &Locator,
        ext_hint: Option<String>,
        backend: &mut dyn AudioBackend,
        format: OutputFormat,
        config: &EngineConfig,
        events: Sender<BackendEvent>,
    ) -> Result<Self> {
        let voice = Arc::new(Voice::new(format, config.playback.buffer_seconds));
        let scope = Arc::new(ScopeAdapter::new(format.channels, format.rate_hz as usize * 2));

        let (input, stream) = match locator {
            Locator::File(path) => {
                if !path.is_file() {
                    return Err(EngineError::NotFound(path.display().to_string()));
                }
                (MediaInput::File(path.clone()), None)
            }
            Locator::Stream(url) => {
                let (flow_tx, flow_rx) = crossbeam_channel::unbounded();
                let buffer = Arc::new(StreamBuffer::new(&config.stream_buffer, flow_tx));
                let fetcher = StreamFetcher::spawn(
                    id,
                    url.clone(),
                    buffer.clone(),
                    flow_rx,
                    events.clone(),
                    FetchConfig::default(),
                )
                .map_err(|e| EngineError::Stream(format!("{e:#}")))?;
                let reader = StreamReader::new(buffer.clone());
                (MediaInput::Stream(reader), Some(StreamSource { buffer, fetcher }))
            }
        };

        let decoder = backend.open_decoder(DecodeRequest {
            id,
            input,
            ext_hint,
            format,
            voice: voice.clone(),
            scope: scope.clone(),
            events,
        })?;

        Ok(Self {
            locator: locator.clone(),
            decoder,
            voice,
            scope,
            fade: Fade::NoFade,
            eos: false,
            length_ms: None,
            tags: BTreeMap::new(),
            stream,
        })
    }

    /// Start a fade and write its opening gain so the first rendered buffer already uses it.
    pub(crate) fn set_fade(&mut self, fade: Fade) {
        self.fade = fade;
        self.apply_fade_volume();
    }

    pub(crate) fn apply_fade_volume(&self) {
        self.voice.volume.set(self.fade.volume() as f32);
    }

    pub(crate) fn seek(&mut self, ms: u64) {
        self.decoder.seek(ms);
    }

    pub(crate) fn position_ms(&self) -> u64 {
        self.voice.clock.position_ms()
    }

    pub(crate) fn stream_buffer(&self) -> Option<&StreamBuffer> {
        self.stream.as_ref().map(|s| s.buffer.as_ref())
    }

    /// Stop the fetch job and the decoder. The voice must already be disconnected.
    pub(crate) fn shutdown(&mut self) {
        if let Some(stream) = &self.stream {
            stream.fetcher.cancel();
        }
        self.decoder.stop();
    }
}

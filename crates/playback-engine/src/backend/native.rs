//! CPAL + Symphonia + Rubato implementation of [`AudioBackend`].

use std::sync::Arc;

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::Sender;

use super::decode::NativeDecode;
use super::output::{Mixer, build_output_stream};
use super::{AudioBackend, BackendEvent, DecodeRequest, DecodeStage, OutputFormat, OutputStage, Voice};
use crate::arena::PipelineId;
use crate::config::PlaybackConfig;
use crate::device;
use crate::error::{EngineError, Result};
use crate::volume::VolumeControl;

pub struct NativeBackend {
    playback: PlaybackConfig,
}

impl NativeBackend {
    pub fn new(playback: PlaybackConfig) -> Self {
        Self { playback }
    }
}

impl AudioBackend for NativeBackend {
    fn name(&self) -> &str {
        "native"
    }

    fn supports_crossfade(&self) -> bool {
        true
    }

    fn open_output(
        &mut self,
        device_name: Option<&str>,
        events: Sender<BackendEvent>,
    ) -> Result<Box<dyn OutputStage>> {
        let configuration = |e: anyhow::Error| EngineError::Configuration(format!("{e:#}"));

        let host = cpal::default_host();
        let device = device::pick_device(&host, device_name).map_err(configuration)?;
        let config = device::pick_output_config(&device).map_err(configuration)?;
        let mut stream_config: cpal::StreamConfig = config.clone().into();
        if let Some(buf) = device::pick_buffer_size(&config) {
            stream_config.buffer_size = buf;
        }
        let name = device.description().ok().map(|d| d.name().to_string());
        let format = OutputFormat {
            rate_hz: stream_config.sample_rate,
            channels: stream_config.channels as usize,
        };

        let mixer = Mixer::default();
        let master = VolumeControl::default();
        let stream = build_output_stream(
            &device,
            &stream_config,
            config.sample_format(),
            self.playback.refill_max_frames,
            mixer.clone(),
            master.clone(),
            events,
        )
        .map_err(configuration)?;
        stream
            .play()
            .map_err(|e| EngineError::Configuration(format!("start output stream: {e}")))?;

        tracing::info!(
            device = name.as_deref().unwrap_or("unknown"),
            rate_hz = format.rate_hz,
            channels = format.channels,
            sample_format = ?config.sample_format(),
            buffer_size = ?stream_config.buffer_size,
            "output opened"
        );

        Ok(Box::new(NativeOutput {
            _stream: stream,
            mixer,
            master,
            format,
            name,
        }))
    }

    fn open_decoder(&mut self, request: DecodeRequest) -> Result<Box<dyn DecodeStage>> {
        let decode = NativeDecode::spawn(request, self.playback.clone())
            .map_err(|e| EngineError::Decode(format!("{e:#}")))?;
        Ok(Box::new(decode))
    }
}

struct NativeOutput {
    /// Dropping the stream closes the device.
    _stream: cpal::Stream,
    mixer: Mixer,
    master: VolumeControl,
    format: OutputFormat,
    name: Option<String>,
}

impl OutputStage for NativeOutput {
    fn format(&self) -> OutputFormat {
        self.format
    }

    fn device_name(&self) -> Option<String> {
        self.name.clone()
    }

    fn connect(&mut self, id: PipelineId, voice: Arc<Voice>) -> Result<()> {
        self.mixer.connect(id, voice);
        Ok(())
    }

    fn disconnect(&mut self, id: PipelineId) {
        self.mixer.disconnect(id);
    }

    fn set_master_gain(&mut self, gain: f32) {
        self.master.set(gain);
    }
}

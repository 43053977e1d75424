//! Pipeline manager.
//!
//! Owns the shared output and every live pipeline, and is the only place pipeline state
//! changes. Everything here runs on the control thread:
//! - `load`/`play`/`pause`/`stop`/`seek` come from the controller
//! - `tick` advances fades and schedules destruction of finished fade-outs
//! - `handle_event` applies what backend threads reported
//!
//! Notifications are queued as [`EngineEvent`]s in the order they happen and drained by the
//! controller.

use std::collections::VecDeque;

use crossbeam_channel::Sender;
use engine_types::{EngineState, EngineStatus, ErrorKind, FadePhase, PlaybackEndReason};

use crate::arena::{Arena, PipelineId};
use crate::backend::{AudioBackend, BackendEvent, OutputStage};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::fade::{Fade, FadeStep};
use crate::locator::Locator;
use crate::observer::EngineEvent;
use crate::pipeline::Pipeline;
use crate::volume::percent_to_gain;

pub struct PipelineManager {
    config: EngineConfig,
    backend: Box<dyn AudioBackend>,
    events: Sender<BackendEvent>,
    /// Present exactly while the output chain is filled.
    output: Option<Box<dyn OutputStage>>,
    pipelines: Arena<Pipeline>,
    current: Option<PipelineId>,
    state: EngineState,
    volume: u8,
    last_error: Option<(ErrorKind, String)>,
    end_reason: Option<PlaybackEndReason>,
    notices: VecDeque<EngineEvent>,
    last_scope: Vec<f32>,
    last_stall: Option<u8>,
}

impl PipelineManager {
    pub fn new(
        config: EngineConfig,
        backend: Box<dyn AudioBackend>,
        events: Sender<BackendEvent>,
    ) -> Self {
        let last_scope = vec![0.0; config.scope_len];
        Self {
            config,
            backend,
            events,
            output: None,
            pipelines: Arena::new(),
            current: None,
            state: EngineState::Empty,
            volume: 100,
            last_error: None,
            end_reason: None,
            notices: VecDeque::new(),
            last_scope,
            last_stall: None,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_filled(&self) -> bool {
        self.output.is_some()
    }

    pub fn current(&self) -> Option<PipelineId> {
        self.current
    }

    pub fn live_count(&self) -> usize {
        self.pipelines.len()
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    pub fn last_error(&self) -> Option<&(ErrorKind, String)> {
        self.last_error.as_ref()
    }

    pub fn backend_supports_crossfade(&self) -> bool {
        self.backend.supports_crossfade()
    }

    pub fn fade_phase(&self, id: PipelineId) -> Option<FadePhase> {
        self.pipelines.get(id).map(|p| p.fade.phase())
    }

    /// Remaining progress of a pipeline's active fade (`0.0` when not fading).
    pub fn fade_progress(&self, id: PipelineId) -> Option<f64> {
        self.pipelines.get(id).map(|p| p.fade.progress())
    }

    /// Gain currently written to a pipeline's volume stage.
    pub fn pipeline_volume(&self, id: PipelineId) -> Option<f32> {
        self.pipelines.get(id).map(|p| p.voice.volume.get())
    }

    pub fn drain_notices(&mut self) -> Vec<EngineEvent> {
        self.notices.drain(..).collect()
    }

    /// (Re)build the shared output and reattach live voices to it.
    ///
    /// On failure nothing stays wired, a configuration error is recorded and the engine enters
    /// [`EngineState::Error`].
    pub fn create_shared_output(&mut self) -> bool {
        if self.output.take().is_some() {
            tracing::debug!("dropping previous output");
        }

        let mut output = match self
            .backend
            .open_output(self.config.device.as_deref(), self.events.clone())
        {
            Ok(output) => output,
            Err(e) => {
                self.report(e);
                self.set_state(EngineState::Error);
                return false;
            }
        };

        output.set_master_gain(percent_to_gain(self.volume));
        for (id, pipeline) in self.pipelines.iter() {
            if let Err(e) = output.connect(id, pipeline.voice.clone()) {
                tracing::warn!(pipeline = %id, "reconnect to new output failed: {e}");
            }
        }
        tracing::info!(
            backend = self.backend.name(),
            device = output.device_name().as_deref().unwrap_or("default"),
            "shared output ready"
        );
        self.output = Some(output);
        if self.state == EngineState::Error {
            self.set_state(EngineState::Empty);
        }
        true
    }

    /// Create a pipeline for `locator` and make it current.
    ///
    /// When `allow_crossfade` is set and a track is playing, the current pipeline fades out
    /// while the new one fades in. Otherwise every live pipeline is destroyed first.
    pub fn load(
        &mut self,
        locator: &Locator,
        ext_hint: Option<String>,
        allow_crossfade: bool,
    ) -> Option<PipelineId> {
        if self.output.is_none() && !self.create_shared_output() {
            return None;
        }

        let crossfading = allow_crossfade
            && self.state == EngineState::Playing
            && self.current.is_some_and(|id| self.pipelines.contains(id));
        if crossfading {
            let stopping: Vec<PipelineId> = self
                .pipelines
                .iter()
                .filter(|(_, p)| matches!(p.fade, Fade::FadeOut(_)))
                .map(|(id, _)| id)
                .collect();
            for id in stopping {
                self.destroy(id);
            }
        } else {
            self.destroy_all();
        }

        let format = self.output.as_ref()?.format();
        let built = self.pipelines.try_insert_with(|id| {
            Pipeline::build(
                id,
                locator,
                ext_hint,
                self.backend.as_mut(),
                format,
                &self.config,
                self.events.clone(),
            )
        });
        let id = match built {
            Ok(id) => id,
            Err(e) => {
                self.report(e);
                self.after_failed_load(crossfading);
                return None;
            }
        };

        let voice = self.pipelines.get(id).map(|p| p.voice.clone())?;
        let connected = match self.output.as_mut() {
            Some(output) => output.connect(id, voice),
            None => Err(EngineError::Configuration("output vanished".into())),
        };
        if let Err(e) = connected {
            self.report(e);
            self.destroy(id);
            self.after_failed_load(crossfading);
            return None;
        }

        let crossfade_ms = self.config.crossfade.length_ms;
        let fade = if crossfading {
            Fade::xfade_in(crossfade_ms)
        } else if self.config.fade_in_enabled() {
            Fade::fade_in(self.config.fade_in_ms)
        } else {
            Fade::NoFade
        };
        if let Some(pipeline) = self.pipelines.get_mut(id) {
            pipeline.set_fade(fade);
        }

        if crossfading {
            if let Some(old) = self.current.and_then(|old| self.pipelines.get_mut(old)) {
                old.set_fade(Fade::xfade_out(crossfade_ms));
                old.voice.volume.set(1.0);
            }
        }

        tracing::info!(pipeline = %id, locator = %locator, crossfade = crossfading, "pipeline loaded");
        self.current = Some(id);
        self.end_reason = None;
        self.last_stall = None;
        if !crossfading {
            self.set_state(EngineState::Idle);
        }
        Some(id)
    }

    fn after_failed_load(&mut self, crossfading: bool) {
        if !crossfading {
            self.current = None;
            if self.state.has_track() {
                self.set_state(EngineState::Empty);
            }
        }
    }

    /// Start rendering the current pipeline, optionally from `offset_ms`.
    pub fn play(&mut self, offset_ms: Option<u64>) -> bool {
        if self.output.is_none() {
            tracing::debug!("play ignored: output not filled");
            return false;
        }
        let Some(current) = self.current.and_then(|id| self.pipelines.get_mut(id)) else {
            return false;
        };
        if let Some(ms) = offset_ms {
            current.seek(ms);
        }
        self.set_paused_all(false);
        self.set_state(EngineState::Playing);
        true
    }

    pub fn pause(&mut self) {
        if self.state != EngineState::Playing {
            return;
        }
        self.set_paused_all(true);
        self.set_state(EngineState::Paused);
    }

    pub fn resume(&mut self) {
        if self.state != EngineState::Paused {
            return;
        }
        self.set_paused_all(false);
        self.set_state(EngineState::Playing);
    }

    fn set_paused_all(&self, paused: bool) {
        for (_, pipeline) in self.pipelines.iter() {
            pipeline.voice.set_paused(paused);
        }
    }

    /// Stop playback; fades out when configured and something is audible.
    pub fn stop(&mut self) {
        if self.pipelines.is_empty() && self.current.is_none() {
            return;
        }
        if self.config.fade_out_ms > 0 && self.state == EngineState::Playing {
            let fade_out_ms = self.config.fade_out_ms;
            for id in self.pipelines.ids() {
                if let Some(pipeline) = self.pipelines.get_mut(id) {
                    if !pipeline.fade.is_departing() {
                        pipeline.set_fade(Fade::fade_out(fade_out_ms));
                    }
                }
            }
        } else {
            self.destroy_all();
        }
        self.current = None;
        self.end_reason = Some(PlaybackEndReason::Stopped);
        self.set_state(EngineState::Empty);
    }

    pub fn seek(&mut self, ms: u64) {
        if let Some(pipeline) = self.current.and_then(|id| self.pipelines.get_mut(id)) {
            tracing::debug!(ms, "seek");
            pipeline.seek(ms);
        }
    }

    pub fn position_ms(&self) -> Option<u64> {
        self.current_pipeline().map(Pipeline::position_ms)
    }

    pub fn length_ms(&self) -> Option<u64> {
        self.current_pipeline().and_then(|p| p.length_ms)
    }

    /// Set the master volume; returns the stored percent.
    pub fn set_volume(&mut self, percent: u8) -> u8 {
        self.volume = percent.min(100);
        if let Some(output) = self.output.as_mut() {
            output.set_master_gain(percent_to_gain(self.volume));
        }
        self.notices.push_back(EngineEvent::Volume(self.volume));
        self.volume
    }

    /// Advance every fade by one tick and destroy pipelines whose fade-out finished.
    pub fn tick(&mut self) {
        if self.state != EngineState::Paused {
            let tick_ms = self.config.tick_interval_ms;
            let mut departed = Vec::new();
            for id in self.pipelines.ids() {
                let Some(pipeline) = self.pipelines.get_mut(id) else {
                    continue;
                };
                match pipeline.fade.advance(tick_ms) {
                    FadeStep::Idle => {}
                    FadeStep::Ramping => pipeline.apply_fade_volume(),
                    FadeStep::Arrived => pipeline.voice.volume.set(1.0),
                    FadeStep::Departed => departed.push(id),
                }
            }
            for id in departed {
                tracing::debug!(pipeline = %id, "fade-out finished");
                self.destroy(id);
            }
            self.finish_if_drained();
        }
        self.poll_stream_status();
    }

    /// Apply one event raised by a backend thread.
    ///
    /// Events for pipelines that no longer exist are dropped.
    pub fn handle_event(&mut self, event: BackendEvent) {
        match event {
            BackendEvent::Ready {
                id,
                length_ms,
                source_rate_hz,
                source_channels,
            } => {
                if let Some(pipeline) = self.pipelines.get_mut(id) {
                    tracing::debug!(
                        pipeline = %id,
                        length_ms = ?length_ms,
                        source_rate_hz,
                        source_channels,
                        "pipeline ready"
                    );
                    pipeline.length_ms = length_ms;
                }
            }
            BackendEvent::Metadata { id, tags } => {
                let Some(pipeline) = self.pipelines.get_mut(id) else {
                    return;
                };
                pipeline.tags.extend(tags.clone());
                if self.current == Some(id) && !tags.is_empty() {
                    self.notices.push_back(EngineEvent::Metadata(tags));
                }
            }
            BackendEvent::EndOfStream { id } => self.end_of_stream(id),
            BackendEvent::DecodeError { id, message } => {
                if !self.pipelines.contains(id) {
                    return;
                }
                let was_current = self.current == Some(id);
                self.report(EngineError::Decode(message));
                self.destroy(id);
                if was_current {
                    self.end_track(PlaybackEndReason::Error);
                }
            }
            BackendEvent::SeekFailed { id, ms, message } => {
                if self.pipelines.contains(id) {
                    self.report(EngineError::Seek { ms, message });
                }
            }
            BackendEvent::StreamError { id, message } => {
                if self.pipelines.contains(id) {
                    self.report(EngineError::Stream(message));
                }
            }
            BackendEvent::OutputError { message } => {
                if self.output.is_none() {
                    return;
                }
                self.destroy_all();
                self.output = None;
                self.report(EngineError::OutputRuntime(message));
                self.end_track(PlaybackEndReason::Error);
            }
            BackendEvent::ProbeFinished { ticket, .. } => {
                tracing::debug!(ticket, "probe reply reached the manager; ignoring");
            }
        }
    }

    fn end_of_stream(&mut self, id: PipelineId) {
        let Some(pipeline) = self.pipelines.get_mut(id) else {
            return;
        };
        if pipeline.eos {
            return;
        }
        pipeline.eos = true;
        if pipeline.fade.is_departing() {
            tracing::debug!(pipeline = %id, "end of stream while fading out");
            return;
        }
        tracing::info!(pipeline = %id, "end of stream");
        self.destroy(id);
        self.finish_if_drained();
    }

    /// Report the natural end once the last pipeline of a loaded track is gone.
    fn finish_if_drained(&mut self) {
        if self.current.is_none() && self.pipelines.is_empty() && self.state.has_track() {
            self.end_track(PlaybackEndReason::Eof);
        }
    }

    fn end_track(&mut self, reason: PlaybackEndReason) {
        self.current = None;
        self.end_reason = Some(reason);
        self.notices.push_back(EngineEvent::TrackEnded(reason));
        if self.state != EngineState::Error {
            self.set_state(EngineState::Empty);
        }
    }

    /// A deferred load failed before creating a pipeline. With nothing else audible the
    /// track counts as ended so the caller can move on.
    pub(crate) fn abandon_load(&mut self) {
        if self.pipelines.is_empty() {
            self.end_reason = Some(PlaybackEndReason::Error);
            self.notices
                .push_back(EngineEvent::TrackEnded(PlaybackEndReason::Error));
        }
    }

    /// Detach a pipeline from the output, stop its stages and free its slot.
    pub fn destroy(&mut self, id: PipelineId) {
        let Some(mut pipeline) = self.pipelines.remove(id) else {
            return;
        };
        if let Some(output) = self.output.as_mut() {
            output.disconnect(id);
        }
        pipeline.shutdown();
        if self.current == Some(id) {
            self.current = None;
        }
        tracing::debug!(pipeline = %id, live = self.pipelines.len(), "pipeline destroyed");
    }

    fn destroy_all(&mut self) {
        for id in self.pipelines.ids() {
            self.destroy(id);
        }
    }

    /// Mono snapshot aligned to the current pipeline's output clock.
    ///
    /// Returns the previous snapshot while not enough audio is buffered.
    pub fn scope(&mut self) -> Vec<f32> {
        if let Some(pipeline) = self.current.and_then(|id| self.pipelines.get(id)) {
            let clock = pipeline.voice.clock.frames();
            if let Some(snapshot) = pipeline.scope.extract(clock, self.config.scope_len) {
                self.last_scope = snapshot;
            }
        }
        self.last_scope.clone()
    }

    pub fn status(&self) -> EngineStatus {
        let current = self.current_pipeline();
        EngineStatus {
            state: self.state,
            now_playing: current.map(|p| p.locator.to_string()),
            position_ms: current.map(Pipeline::position_ms),
            length_ms: current.and_then(|p| p.length_ms),
            volume: self.volume,
            muted: false,
            live_pipelines: self.pipelines.len(),
            buffer_fill_percent: current
                .and_then(Pipeline::stream_buffer)
                .map(|b| fill_percent(b.fill_ratio())),
            backend: Some(self.backend.name().to_string()),
            device: self.output.as_ref().and_then(|o| o.device_name()),
            last_error: self.last_error.as_ref().map(|(_, msg)| msg.clone()),
            end_reason: self.end_reason,
        }
    }

    /// Tear down every pipeline and the output.
    pub fn shutdown(&mut self) {
        self.destroy_all();
        self.output = None;
        self.current = None;
        self.set_state(EngineState::Empty);
    }

    /// Shut down the active backend, then make `backend` the active one.
    pub fn replace_backend(&mut self, backend: Box<dyn AudioBackend>) {
        self.shutdown();
        tracing::info!(from = self.backend.name(), to = backend.name(), "backend swapped");
        self.backend = backend;
    }

    /// Record an error and queue its notification.
    pub(crate) fn report(&mut self, err: EngineError) {
        let kind = err.kind();
        let message = err.to_string();
        tracing::warn!(kind = ?kind, "{message}");
        self.last_error = Some((kind, message.clone()));
        self.notices.push_back(EngineEvent::Error { kind, message });
    }

    fn set_state(&mut self, new: EngineState) {
        let old = self.state;
        if old == new {
            return;
        }
        tracing::info!(state = ?new, previous = ?old, "state changed");
        self.state = new;
        self.notices.push_back(EngineEvent::StateChanged { new, old });
    }

    fn current_pipeline(&self) -> Option<&Pipeline> {
        self.current.and_then(|id| self.pipelines.get(id))
    }

    fn poll_stream_status(&mut self) {
        let stalled = self
            .current_pipeline()
            .and_then(Pipeline::stream_buffer)
            .filter(|b| b.is_buffering() && !b.is_stopped())
            .map(|b| fill_percent(b.fill_ratio()));
        match stalled {
            Some(percent) if self.last_stall != Some(percent) => {
                tracing::debug!(kind = ?ErrorKind::StreamStall, percent, "stream buffering");
                self.last_stall = Some(percent);
                self.notices
                    .push_back(EngineEvent::Status(format!("Buffering {percent}%")));
            }
            Some(_) => {}
            None => self.last_stall = None,
        }
    }
}

fn fill_percent(ratio: f32) -> u8 {
    (ratio.clamp(0.0, 1.0) * 100.0).round() as u8
}

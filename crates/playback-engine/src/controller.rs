//! Playback controller.
//!
//! Thin command layer over [`PipelineManager`]: validates locators, runs content-type probes for
//! opaque network locators, clamps seek and volume input, decides crossfade admission, and fans
//! notifications out to observers in the order they were produced.

use crossbeam_channel::{Receiver, Sender};
use engine_types::{EngineState, EngineStatus, PlaybackEndReason};

use crate::backend::{AudioBackend, BackendEvent, ProbeOutcome};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::locator::Locator;
use crate::manager::PipelineManager;
use crate::observer::{EngineEvent, EngineObserver, ObserverId};
use crate::probe::spawn_probe;

/// A track as the caller knows it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrackInfo {
    pub locator: String,
    pub title: Option<String>,
    /// Length in whole seconds when the caller's metadata has it.
    pub length_secs: Option<u64>,
}

impl TrackInfo {
    pub fn new(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            ..Self::default()
        }
    }
}

/// `true` when a track of `length_secs` leaves room for a crossfade at both ends.
pub fn crossfade_admitted(length_secs: u64, crossfade_ms: u64) -> bool {
    window_fits(length_secs.saturating_mul(1000), crossfade_ms)
}

fn window_fits(length_ms: u64, crossfade_ms: u64) -> bool {
    length_ms as i128 - 2 * crossfade_ms as i128 > 0
}

struct LoadedTrack {
    info: TrackInfo,
    locator: Locator,
}

struct PendingProbe {
    ticket: u64,
    info: TrackInfo,
    locator: Locator,
}

pub struct PlaybackController {
    config: EngineConfig,
    manager: PipelineManager,
    events_tx: Sender<BackendEvent>,
    events_rx: Receiver<BackendEvent>,
    observers: Vec<(ObserverId, Box<dyn EngineObserver>)>,
    next_observer: u64,
    track: Option<LoadedTrack>,
    pending_probe: Option<PendingProbe>,
    next_ticket: u64,
    pre_mute: Option<u8>,
    crossfade_requested: bool,
    last_position: Option<u64>,
}

impl PlaybackController {
    pub fn new(config: EngineConfig, backend: Box<dyn AudioBackend>) -> Self {
        let config = config.validate();
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let manager = PipelineManager::new(config.clone(), backend, events_tx.clone());
        Self {
            config,
            manager,
            events_tx,
            events_rx,
            observers: Vec::new(),
            next_observer: 0,
            track: None,
            pending_probe: None,
            next_ticket: 0,
            pre_mute: None,
            crossfade_requested: false,
            last_position: None,
        }
    }

    /// Receiving end of the backend event channel, for the control loop to select on.
    pub fn events(&self) -> Receiver<BackendEvent> {
        self.events_rx.clone()
    }

    pub fn manager(&self) -> &PipelineManager {
        &self.manager
    }

    pub fn state(&self) -> EngineState {
        self.manager.state()
    }

    pub fn attach(&mut self, observer: Box<dyn EngineObserver>) -> ObserverId {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push((id, observer));
        id
    }

    pub fn detach(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(existing, _)| *existing != id);
        self.observers.len() != before
    }

    pub fn load(&mut self, locator: &str) -> bool {
        self.load_track(TrackInfo::new(locator))
    }

    /// Load and start a track.
    ///
    /// Returns `false` when the locator is rejected up front. Opaque network locators return
    /// `true` immediately and finish loading once their content-type probe answers.
    pub fn load_track(&mut self, info: TrackInfo) -> bool {
        if let Some(stale) = self.pending_probe.take() {
            tracing::debug!(ticket = stale.ticket, "pending probe superseded");
        }

        let ok = self.begin_load(info);
        self.flush_notices();
        ok
    }

    fn begin_load(&mut self, info: TrackInfo) -> bool {
        let locator = match Locator::parse(&info.locator) {
            Ok(locator) => locator,
            Err(e) => {
                self.manager.report(e);
                return false;
            }
        };
        if let Some(path) = locator.as_path() {
            if !path.is_file() {
                self.manager
                    .report(EngineError::NotFound(path.display().to_string()));
                return false;
            }
        }

        let probe_url = match &locator {
            Locator::Stream(url) if locator.needs_probe() => Some(url.clone()),
            _ => None,
        };
        if let Some(url) = probe_url {
            self.next_ticket += 1;
            let ticket = self.next_ticket;
            if let Err(e) = spawn_probe(ticket, url.clone(), self.events_tx.clone()) {
                self.manager.report(EngineError::Stream(format!("{e:#}")));
                return false;
            }
            tracing::info!(ticket, url = %url, "probing content type");
            self.pending_probe = Some(PendingProbe {
                ticket,
                info,
                locator,
            });
            return true;
        }

        let ext_hint = locator.ext_hint();
        self.start(info, locator, ext_hint)
    }

    fn start(&mut self, info: TrackInfo, locator: Locator, ext_hint: Option<String>) -> bool {
        // A network track would fade in over an empty buffer.
        let allow_crossfade = !locator.is_stream() && self.crossfade_allowed();
        if self.manager.load(&locator, ext_hint, allow_crossfade).is_none() {
            return false;
        }
        self.track = Some(LoadedTrack { info, locator });
        self.crossfade_requested = false;
        self.last_position = None;
        self.manager.play(None)
    }

    /// Resume a paused track, restart the last track, or report that nothing is loaded.
    pub fn play(&mut self) {
        match self.manager.state() {
            EngineState::Paused => self.manager.resume(),
            EngineState::Playing => {}
            EngineState::Idle if self.manager.current().is_some() => {
                self.manager.play(None);
            }
            _ => match self.track.as_ref().map(|t| t.info.clone()) {
                Some(info) => {
                    self.load_track(info);
                }
                None => self.manager.report(EngineError::NoTrack),
            },
        }
        self.flush_notices();
    }

    pub fn pause(&mut self) {
        self.manager.pause();
        self.flush_notices();
    }

    pub fn stop(&mut self) {
        self.pending_probe = None;
        self.manager.stop();
        self.flush_notices();
    }

    pub fn play_pause(&mut self) {
        if self.manager.state() == EngineState::Playing {
            self.pause();
        } else {
            self.play();
        }
    }

    /// Seek to `ms`, clamped to `[0, length]`.
    pub fn seek(&mut self, ms: i64) {
        let target = self.clamp_position(ms, 0);
        self.manager.seek(target);
        self.flush_notices();
    }

    /// Seek by `delta_ms` from the current position, clamped to `[1, length]`.
    pub fn seek_relative(&mut self, delta_ms: i64) {
        let Some(position) = self.manager.position_ms() else {
            return;
        };
        let target = self.clamp_position(position as i64 + delta_ms, 1);
        self.manager.seek(target);
        self.flush_notices();
    }

    fn clamp_position(&self, ms: i64, min: i64) -> u64 {
        let ms = ms.max(min);
        match self.track_length_ms() {
            Some(length) => (ms as u64).min(length),
            None => ms as u64,
        }
    }

    /// Set the master volume; returns what the backend now uses.
    pub fn set_volume(&mut self, percent: i32) -> u8 {
        let actual = self.manager.set_volume(percent.clamp(0, 100) as u8);
        self.flush_notices();
        actual
    }

    pub fn volume(&self) -> u8 {
        self.manager.volume()
    }

    /// Toggle between silence and the last audible volume.
    pub fn mute(&mut self) {
        let volume = self.manager.volume();
        if volume > 0 {
            self.pre_mute = Some(volume);
            self.set_volume(0);
        } else if let Some(previous) = self.pre_mute.take() {
            self.set_volume(previous as i32);
        }
    }

    pub fn unmute(&mut self) {
        if self.manager.volume() == 0 {
            if let Some(previous) = self.pre_mute.take() {
                self.set_volume(previous as i32);
            }
        }
    }

    pub fn is_muted(&self) -> bool {
        self.manager.volume() == 0 && self.pre_mute.is_some()
    }

    /// Periodic work: advance fades, publish position, and request the next track early when
    /// the crossfade window opens.
    pub fn tick(&mut self) {
        self.manager.tick();
        self.flush_notices();

        if self.manager.state() != EngineState::Playing {
            return;
        }
        let Some(position) = self.manager.position_ms() else {
            return;
        };
        if self.last_position != Some(position) {
            self.last_position = Some(position);
            self.emit(EngineEvent::Position(position));
        }

        if self.crossfade_requested || !self.crossfade_allowed() {
            return;
        }
        let Some(length_ms) = self.crossfade_length_ms() else {
            return;
        };
        let remaining = length_ms as i128 - position as i128;
        if remaining < self.config.crossfade.length_ms as i128 {
            tracing::info!(position_ms = position, "crossfade window reached");
            self.crossfade_requested = true;
            self.emit(EngineEvent::TrackEnded(PlaybackEndReason::Crossfade));
        }
    }

    /// Apply an event from a backend thread.
    pub fn handle_event(&mut self, event: BackendEvent) {
        match event {
            BackendEvent::ProbeFinished { ticket, outcome } => {
                self.probe_finished(ticket, outcome)
            }
            other => self.manager.handle_event(other),
        }
        self.flush_notices();
    }

    /// Apply every event already queued by backend threads.
    pub fn pump_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
        }
    }

    fn probe_finished(&mut self, ticket: u64, outcome: ProbeOutcome) {
        let Some(pending) = self.pending_probe.take_if(|p| p.ticket == ticket) else {
            tracing::debug!(ticket, "stale probe reply dropped");
            return;
        };
        let started = match outcome {
            ProbeOutcome::Audio { ext_hint } => {
                self.start(pending.info, pending.locator, ext_hint)
            }
            ProbeOutcome::Unsupported { content_type } => {
                self.manager.report(EngineError::Decode(format!(
                    "unsupported content type {content_type:?} at {}",
                    pending.locator
                )));
                false
            }
            ProbeOutcome::Failed { message } => {
                self.manager.report(EngineError::Stream(message));
                false
            }
        };
        if !started {
            self.manager.abandon_load();
        }
    }

    /// Tear down the active backend and make `backend` the active one.
    pub fn swap_backend(&mut self, backend: Box<dyn AudioBackend>) {
        self.pending_probe = None;
        self.manager.replace_backend(backend);
        self.flush_notices();
    }

    pub fn status(&self) -> EngineStatus {
        let mut status = self.manager.status();
        if let Some(track) = &self.track {
            if status.now_playing.is_some() {
                status.now_playing = Some(
                    track
                        .info
                        .title
                        .clone()
                        .unwrap_or_else(|| track.locator.to_string()),
                );
            }
            if status.length_ms.is_none() {
                status.length_ms = track.info.length_secs.map(|s| s * 1000);
            }
        }
        status.muted = self.is_muted();
        status
    }

    pub fn scope(&mut self) -> Vec<f32> {
        self.manager.scope()
    }

    pub fn shutdown(&mut self) {
        self.pending_probe = None;
        self.manager.shutdown();
        self.flush_notices();
    }

    fn crossfade_allowed(&self) -> bool {
        let Some(track) = &self.track else {
            return false;
        };
        self.config.crossfade.enabled
            && self.manager.backend_supports_crossfade()
            && !track.locator.is_stream()
            && self
                .crossfade_length_ms()
                .is_some_and(|ms| window_fits(ms, self.config.crossfade.length_ms))
    }

    /// Track length for the crossfade window: the caller's metadata first, then the decoder's.
    fn crossfade_length_ms(&self) -> Option<u64> {
        self.track
            .as_ref()
            .and_then(|t| t.info.length_secs)
            .map(|secs| secs.saturating_mul(1000))
            .or_else(|| self.manager.length_ms())
    }

    fn track_length_ms(&self) -> Option<u64> {
        self.manager.length_ms().or_else(|| {
            self.track
                .as_ref()
                .and_then(|t| t.info.length_secs)
                .map(|s| s * 1000)
        })
    }

    fn flush_notices(&mut self) {
        for event in self.manager.drain_notices() {
            self.emit(event);
        }
    }

    fn emit(&mut self, event: EngineEvent) {
        for (_, observer) in self.observers.iter_mut() {
            event.dispatch(observer.as_mut());
        }
    }
}

//! Control thread.
//!
//! The controller, the manager and the shared output live on one thread. Callers talk to it
//! through a cloneable [`EngineHandle`] that posts [`Command`]s; backend events and the fade tick
//! are multiplexed into the same loop with `crossbeam_channel::select!`.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, Sender, select};
use engine_types::EngineStatus;

use crate::backend::AudioBackend;
use crate::config::EngineConfig;
use crate::controller::{PlaybackController, TrackInfo};
use crate::observer::{EngineObserver, ObserverId};

/// Commands accepted by the control thread.
pub enum Command {
    Load {
        track: TrackInfo,
        reply: Option<Sender<bool>>,
    },
    Play,
    Pause,
    Stop,
    PlayPause,
    Seek(i64),
    SeekRelative(i64),
    SetVolume {
        percent: i32,
        reply: Option<Sender<u8>>,
    },
    Mute,
    Unmute,
    Attach {
        observer: Box<dyn EngineObserver>,
        reply: Sender<ObserverId>,
    },
    Detach(ObserverId),
    SwapBackend(Box<dyn AudioBackend>),
    Status(Sender<EngineStatus>),
    Scope(Sender<Vec<f32>>),
    Shutdown,
}

/// Handle for posting commands to the control thread.
#[derive(Clone)]
pub struct EngineHandle {
    cmd_tx: Sender<Command>,
    join: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl EngineHandle {
    fn send(&self, cmd: Command) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| anyhow!("engine thread has exited"))
    }

    fn request<T>(&self, build: impl FnOnce(Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.send(build(tx))?;
        rx.recv().context("engine thread dropped the reply")
    }

    /// Load and start a track; see [`PlaybackController::load_track`].
    pub fn load(&self, track: TrackInfo) -> Result<bool> {
        self.request(|reply| Command::Load {
            track,
            reply: Some(reply),
        })
    }

    pub fn play(&self) -> Result<()> {
        self.send(Command::Play)
    }

    pub fn pause(&self) -> Result<()> {
        self.send(Command::Pause)
    }

    pub fn stop(&self) -> Result<()> {
        self.send(Command::Stop)
    }

    pub fn play_pause(&self) -> Result<()> {
        self.send(Command::PlayPause)
    }

    pub fn seek(&self, ms: i64) -> Result<()> {
        self.send(Command::Seek(ms))
    }

    pub fn seek_relative(&self, delta_ms: i64) -> Result<()> {
        self.send(Command::SeekRelative(delta_ms))
    }

    pub fn set_volume(&self, percent: i32) -> Result<u8> {
        self.request(|reply| Command::SetVolume {
            percent,
            reply: Some(reply),
        })
    }

    pub fn mute(&self) -> Result<()> {
        self.send(Command::Mute)
    }

    pub fn unmute(&self) -> Result<()> {
        self.send(Command::Unmute)
    }

    pub fn attach(&self, observer: Box<dyn EngineObserver>) -> Result<ObserverId> {
        self.request(|reply| Command::Attach { observer, reply })
    }

    pub fn detach(&self, id: ObserverId) -> Result<()> {
        self.send(Command::Detach(id))
    }

    pub fn swap_backend(&self, backend: Box<dyn AudioBackend>) -> Result<()> {
        self.send(Command::SwapBackend(backend))
    }

    pub fn status(&self) -> Result<EngineStatus> {
        self.request(Command::Status)
    }

    pub fn scope(&self) -> Result<Vec<f32>> {
        self.request(Command::Scope)
    }

    /// Stop the control thread and wait for it to tear everything down.
    pub fn shutdown(&self) -> Result<()> {
        let _ = self.cmd_tx.send(Command::Shutdown);
        let join = self
            .join
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(join) = join {
            join.join()
                .map_err(|_| anyhow!("engine thread panicked"))?;
        }
        Ok(())
    }
}

/// Spawn the control thread.
///
/// The controller is built on the new thread so output stages never cross threads.
pub fn spawn_engine(config: EngineConfig, backend: Box<dyn AudioBackend>) -> Result<EngineHandle> {
    let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
    let join = thread::Builder::new()
        .name("engine-control".into())
        .spawn(move || engine_thread_main(config, backend, cmd_rx))
        .context("spawn engine control thread")?;
    Ok(EngineHandle {
        cmd_tx,
        join: Arc::new(Mutex::new(Some(join))),
    })
}

fn engine_thread_main(config: EngineConfig, backend: Box<dyn AudioBackend>, cmd_rx: Receiver<Command>) {
    let tick_every = Duration::from_millis(config.tick_interval_ms.max(1));
    let mut controller = PlaybackController::new(config, backend);
    let events = controller.events();
    let ticker = crossbeam_channel::tick(tick_every);
    tracing::info!(tick_ms = tick_every.as_millis() as u64, "engine control thread started");

    loop {
        select! {
            recv(cmd_rx) -> cmd => match cmd {
                Ok(Command::Shutdown) | Err(_) => break,
                Ok(cmd) => apply(&mut controller, cmd),
            },
            recv(events) -> event => {
                if let Ok(event) = event {
                    controller.handle_event(event);
                }
            },
            recv(ticker) -> _ => controller.tick(),
        }
    }

    controller.shutdown();
    tracing::info!("engine control thread stopped");
}

fn apply(controller: &mut PlaybackController, cmd: Command) {
    match cmd {
        Command::Load { track, reply } => {
            let ok = controller.load_track(track);
            if let Some(reply) = reply {
                let _ = reply.send(ok);
            }
        }
        Command::Play => controller.play(),
        Command::Pause => controller.pause(),
        Command::Stop => controller.stop(),
        Command::PlayPause => controller.play_pause(),
        Command::Seek(ms) => controller.seek(ms),
        Command::SeekRelative(delta) => controller.seek_relative(delta),
        Command::SetVolume { percent, reply } => {
            let actual = controller.set_volume(percent);
            if let Some(reply) = reply {
                let _ = reply.send(actual);
            }
        }
        Command::Mute => controller.mute(),
        Command::Unmute => controller.unmute(),
        Command::Attach { observer, reply } => {
            let _ = reply.send(controller.attach(observer));
        }
        Command::Detach(id) => {
            controller.detach(id);
        }
        Command::SwapBackend(backend) => controller.swap_backend(backend),
        Command::Status(reply) => {
            let _ = reply.send(controller.status());
        }
        Command::Scope(reply) => {
            let _ = reply.send(controller.scope());
        }
        Command::Shutdown => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::{ChannelObserver, EngineEvent};
    use crate::testing::FakeControl;
    use engine_types::{EngineState, PlaybackEndReason};

    fn config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.tick_interval_ms = 5;
        config.scope_len = 16;
        config
    }

    #[test]
    fn handle_round_trips_commands() {
        let control = FakeControl::default();
        let engine = spawn_engine(config(), control.backend()).unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        engine.attach(Box::new(ChannelObserver::new(tx))).unwrap();

        let file = tempfile::Builder::new().suffix(".wav").tempfile().unwrap();
        let track = TrackInfo::new(file.path().display().to_string());
        assert!(engine.load(track).unwrap());
        assert_eq!(engine.set_volume(140).unwrap(), 100);
        assert_eq!(engine.scope().unwrap(), vec![0.0; 16]);

        let status = engine.status().unwrap();
        assert_eq!(status.state, EngineState::Playing);
        assert_eq!(status.live_pipelines, 1);

        engine.stop().unwrap();
        let status = engine.status().unwrap();
        assert_eq!(status.state, EngineState::Empty);
        assert_eq!(status.end_reason, Some(PlaybackEndReason::Stopped));

        engine.shutdown().unwrap();
        assert!(engine.status().is_err());
        let events: Vec<EngineEvent> = rx.try_iter().collect();
        assert!(events.contains(&EngineEvent::StateChanged {
            new: EngineState::Playing,
            old: EngineState::Idle,
        }));
    }

    #[test]
    fn backend_events_reach_the_control_thread() {
        let control = FakeControl::default();
        let engine = spawn_engine(config(), control.backend()).unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        engine.attach(Box::new(ChannelObserver::new(tx))).unwrap();

        let file = tempfile::Builder::new().suffix(".mp3").tempfile().unwrap();
        assert!(engine
            .load(TrackInfo::new(file.path().display().to_string()))
            .unwrap());
        let id = control.connected()[0];
        control.inject(crate::backend::BackendEvent::EndOfStream { id });

        let ended = rx
            .iter()
            .find(|e| matches!(e, EngineEvent::TrackEnded(_)))
            .unwrap();
        assert_eq!(ended, EngineEvent::TrackEnded(PlaybackEndReason::Eof));
        engine.shutdown().unwrap();
    }
}

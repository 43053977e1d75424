//! Player runtime.
//!
//! Lists devices, or plays a list of locators through the engine control thread while reading
//! single-letter commands from stdin.

use std::io::BufRead;
use std::thread;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, select};
use engine_types::PlaybackEndReason;
use playback_engine::{
    ChannelObserver, EngineConfig, EngineEvent, EngineHandle, NativeBackend, TrackInfo, device,
    spawn_engine,
};

const VOLUME_STEP: i32 = 5;
const SEEK_STEP_MS: i64 = 10_000;

/// List output devices and print them to stdout.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    let devices = device::list_device_infos(&host)?;
    if devices.is_empty() {
        println!("no output devices");
    }
    for d in devices {
        let marker = if d.is_default { "*" } else { " " };
        println!("{marker} {} ({}-{} Hz)", d.name, d.min_rate, d.max_rate);
    }
    Ok(())
}

/// Keyboard commands read from stdin.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserCommand {
    PlayPause,
    Stop,
    Next,
    VolumeUp,
    VolumeDown,
    Mute,
    SeekForward,
    SeekBack,
    Quit,
}

pub fn parse_command(line: &str) -> Option<UserCommand> {
    match line.trim() {
        "p" => Some(UserCommand::PlayPause),
        "s" => Some(UserCommand::Stop),
        "n" => Some(UserCommand::Next),
        "+" => Some(UserCommand::VolumeUp),
        "-" => Some(UserCommand::VolumeDown),
        "m" => Some(UserCommand::Mute),
        ">" => Some(UserCommand::SeekForward),
        "<" => Some(UserCommand::SeekBack),
        "q" => Some(UserCommand::Quit),
        _ => None,
    }
}

/// Locators in play order.
#[derive(Debug)]
pub struct Playlist {
    items: Vec<String>,
    next: usize,
}

impl Playlist {
    pub fn new(items: Vec<String>) -> Self {
        Self { items, next: 0 }
    }

    pub fn advance(&mut self) -> Option<&str> {
        let item = self.items.get(self.next)?;
        self.next += 1;
        Some(item)
    }

    pub fn is_finished(&self) -> bool {
        self.next >= self.items.len()
    }
}

/// What to do after the engine reports the end of a track.
#[derive(Debug, PartialEq, Eq)]
pub enum EndAction {
    /// Load the next locator.
    Advance,
    /// Nothing left; exit.
    Quit,
    Wait,
}

pub fn end_action(reason: PlaybackEndReason, playlist_finished: bool) -> EndAction {
    match reason {
        PlaybackEndReason::Stopped => EndAction::Wait,
        // The crossfade request comes early; the current track is still audible.
        PlaybackEndReason::Crossfade if playlist_finished => EndAction::Wait,
        PlaybackEndReason::Eof | PlaybackEndReason::Error if playlist_finished => EndAction::Quit,
        _ => EndAction::Advance,
    }
}

/// Play `locators` in order until the list ends or the user quits.
pub fn run_play(config: EngineConfig, locators: Vec<String>) -> Result<()> {
    let backend = Box::new(NativeBackend::new(config.playback.clone()));
    let engine = spawn_engine(config, backend)?;

    let (event_tx, event_rx) = crossbeam_channel::unbounded();
    engine.attach(Box::new(ChannelObserver::new(event_tx)))?;

    let (quit_tx, quit_rx) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = quit_tx.try_send(());
    })
    .context("install ctrl-c handler")?;

    let input_rx = spawn_stdin_reader()?;
    let mut playlist = Playlist::new(locators);
    load_next(&engine, &mut playlist)?;
    println!("commands: p=play/pause s=stop n=next +/-=volume m=mute >/<=seek q=quit");

    let result = control_loop(&engine, &mut playlist, &event_rx, &input_rx, &quit_rx);
    engine.shutdown()?;
    result
}

fn control_loop(
    engine: &EngineHandle,
    playlist: &mut Playlist,
    events: &Receiver<EngineEvent>,
    input: &Receiver<String>,
    quit: &Receiver<()>,
) -> Result<()> {
    loop {
        select! {
            recv(events) -> event => {
                let Ok(event) = event else { return Ok(()) };
                if let EngineEvent::TrackEnded(reason) = &event {
                    match end_action(*reason, playlist.is_finished()) {
                        EndAction::Advance => load_next(engine, playlist)?,
                        EndAction::Quit => return Ok(()),
                        EndAction::Wait => {}
                    }
                }
                log_event(&event);
            },
            recv(input) -> line => {
                let Ok(line) = line else { return Ok(()) };
                match parse_command(&line) {
                    Some(UserCommand::Quit) => return Ok(()),
                    Some(cmd) => apply_command(engine, playlist, cmd)?,
                    None if line.trim().is_empty() => {}
                    None => println!("unknown command: {}", line.trim()),
                }
            },
            recv(quit) -> _ => {
                tracing::info!("interrupted");
                return Ok(());
            },
        }
    }
}

fn apply_command(engine: &EngineHandle, playlist: &mut Playlist, cmd: UserCommand) -> Result<()> {
    match cmd {
        UserCommand::PlayPause => engine.play_pause(),
        UserCommand::Stop => engine.stop(),
        UserCommand::Next => load_next(engine, playlist),
        UserCommand::VolumeUp | UserCommand::VolumeDown => {
            let step = if cmd == UserCommand::VolumeUp {
                VOLUME_STEP
            } else {
                -VOLUME_STEP
            };
            let current = engine.status()?.volume as i32;
            let actual = engine.set_volume(current + step)?;
            println!("volume {actual}%");
            Ok(())
        }
        UserCommand::Mute => engine.mute(),
        UserCommand::SeekForward => engine.seek_relative(SEEK_STEP_MS),
        UserCommand::SeekBack => engine.seek_relative(-SEEK_STEP_MS),
        UserCommand::Quit => Ok(()),
    }
}

fn load_next(engine: &EngineHandle, playlist: &mut Playlist) -> Result<()> {
    while let Some(locator) = playlist.advance() {
        let locator = locator.to_string();
        if engine.load(TrackInfo::new(locator.clone()))? {
            tracing::info!(locator = %locator, "now playing");
            return Ok(());
        }
        tracing::warn!(locator = %locator, "skipping track that failed to load");
    }
    println!("end of playlist");
    Ok(())
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::StateChanged { new, old } => {
            tracing::info!(state = ?new, previous = ?old, "state")
        }
        EngineEvent::Position(_) => {}
        EngineEvent::Volume(percent) => tracing::debug!(percent, "volume"),
        EngineEvent::Metadata(tags) => {
            for (key, value) in tags {
                println!("{key}: {value}");
            }
        }
        EngineEvent::TrackEnded(reason) => tracing::info!(reason = ?reason, "track ended"),
        EngineEvent::Error { kind, message } => tracing::warn!(kind = ?kind, "{message}"),
        EngineEvent::Status(text) => tracing::info!("{text}"),
    }
}

fn spawn_stdin_reader() -> Result<Receiver<String>> {
    let (tx, rx) = crossbeam_channel::unbounded();
    thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .context("spawn stdin reader")?;
    Ok(rx)
}

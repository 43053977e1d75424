use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "player", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// Engine config file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Fade-in length for tracks started from silence (0 disables)
    #[arg(long)]
    pub fade_in_ms: Option<u64>,

    /// Fade-out length on stop (0 disables)
    #[arg(long)]
    pub fade_out_ms: Option<u64>,

    /// Crossfade between tracks of this length (0 disables)
    #[arg(long)]
    pub crossfade_ms: Option<u64>,

    /// Resampler input chunk size in frames (higher => more latency, lower => more overhead)
    #[arg(long)]
    pub chunk_frames: Option<usize>,

    /// Queue buffer target in seconds (per pipeline)
    #[arg(long)]
    pub buffer_seconds: Option<f32>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play local files or http(s) streams in order
    Play {
        /// Paths or URLs
        #[arg(required = true)]
        locators: Vec<String>,
    },

    /// List output devices
    Devices,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn play_takes_locators_and_overrides() {
        let args = Args::parse_from([
            "player",
            "--crossfade-ms",
            "3000",
            "--device",
            "usb",
            "play",
            "a.flac",
            "http://radio.example/live",
        ]);
        assert_eq!(args.crossfade_ms, Some(3000));
        assert_eq!(args.device.as_deref(), Some("usb"));
        match args.cmd {
            Some(Command::Play { locators }) => assert_eq!(locators.len(), 2),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn play_requires_a_locator() {
        assert!(Args::try_parse_from(["player", "play"]).is_err());
    }
}

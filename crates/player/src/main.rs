//! Player: a small CLI on top of the playback engine.
//!
//! Plays local files and http(s) streams in order, with fades and optional crossfades between
//! tracks, and reads single-letter commands from stdin while playing.

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use player::cli::{Args, Command};
use player::{config, runtime};

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,playback_engine=info,player=info")
        }))
        .init();

    if args.list_devices {
        return runtime::list_devices();
    }

    match &args.cmd {
        Some(Command::Devices) => runtime::list_devices(),
        Some(Command::Play { locators }) => {
            let config = config::resolve_config(&args)?;
            tracing::info!(
                tracks = locators.len(),
                crossfade = config.crossfade.enabled,
                "starting player"
            );
            runtime::run_play(config, locators.clone())
        }
        None => {
            Args::command().print_help()?;
            Ok(())
        }
    }
}

use anyhow::Result;

use crate::cli::Args;
use playback_engine::EngineConfig;

/// Engine config from `--config` (or defaults) with command-line overrides applied.
pub fn resolve_config(args: &Args) -> Result<EngineConfig> {
    let mut cfg = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    if let Some(device) = &args.device {
        cfg.device = Some(device.clone());
    }
    if let Some(ms) = args.fade_in_ms {
        cfg.fade_in_ms = ms;
    }
    if let Some(ms) = args.fade_out_ms {
        cfg.fade_out_ms = ms;
    }
    if let Some(ms) = args.crossfade_ms {
        cfg.crossfade.enabled = ms > 0;
        if ms > 0 {
            cfg.crossfade.length_ms = ms;
        }
    }
    if let Some(frames) = args.chunk_frames {
        cfg.playback.chunk_frames = frames;
    }
    if let Some(secs) = args.buffer_seconds {
        cfg.playback.buffer_seconds = secs;
    }
    Ok(cfg.validate())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    #[test]
    fn flags_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "fade_in_ms = 500\ndevice = \"Speakers\"\n[crossfade]\nenabled = false").unwrap();
        let path = file.path().display().to_string();
        let args = Args::parse_from([
            "player",
            "--config",
            path.as_str(),
            "--device",
            " DAC ",
            "--crossfade-ms",
            "4000",
            "devices",
        ]);
        let cfg = resolve_config(&args).unwrap();
        assert_eq!(cfg.fade_in_ms, 500);
        assert_eq!(cfg.device.as_deref(), Some("DAC"));
        assert!(cfg.crossfade.enabled);
        assert_eq!(cfg.crossfade.length_ms, 4000);
    }

    #[test]
    fn zero_crossfade_disables() {
        let args = Args::parse_from(["player", "--crossfade-ms", "0", "devices"]);
        let cfg = resolve_config(&args).unwrap();
        assert!(!cfg.crossfade.enabled);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let args = Args::parse_from(["player", "--config", "/no/such/player.toml", "devices"]);
        let err = resolve_config(&args).unwrap_err();
        assert!(format!("{err:#}").contains("read config"));
    }
}

//! Engine configuration.
//!
//! Loaded from TOML; every field has a default so an empty file is valid.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Playback tuning parameters shared by decode/resample/output stages.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Decoder/resampler chunk size in frames.
    pub chunk_frames: usize,
    /// Max frames pulled per output callback refill.
    pub refill_max_frames: usize,
    /// Target buffer duration for per-pipeline queue sizing.
    pub buffer_seconds: f32,
}

impl Default for PlaybackConfig {
    /// Defaults tuned for low-risk playback across common devices.
    fn default() -> Self {
        Self {
            chunk_frames: 1024,
            refill_max_frames: 4096,
            buffer_seconds: 2.0,
        }
    }
}

/// Crossfade between successive tracks.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CrossfadeConfig {
    pub enabled: bool,
    pub length_ms: u64,
}

impl Default for CrossfadeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            length_ms: 2500,
        }
    }
}

/// Byte buffer between a network fetch and the decoder.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct StreamBufferConfig {
    /// Fixed capacity in bytes.
    pub capacity: usize,
    /// Bytes that must be buffered before the stream counts as filled.
    pub min_fill: usize,
    /// Unread bytes above which the producer is suspended.
    pub high_water: usize,
    /// Unread bytes below which a suspended producer is resumed.
    pub resume_below: usize,
}

impl Default for StreamBufferConfig {
    fn default() -> Self {
        Self {
            capacity: 128 * 1024,
            min_fill: 32 * 1024,
            high_water: 96 * 1024,
            resume_below: 48 * 1024,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Output device substring; `None` selects the host default.
    pub device: Option<String>,
    /// Period of the control-thread tick.
    pub tick_interval_ms: u64,
    /// Fade-in length for a track started from silence (0 disables).
    pub fade_in_ms: u64,
    /// Fade-out length on stop (0 disables).
    pub fade_out_ms: u64,
    pub crossfade: CrossfadeConfig,
    pub stream_buffer: StreamBufferConfig,
    /// Number of mono samples returned by each scope snapshot.
    pub scope_len: usize,
    pub playback: PlaybackConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device: None,
            tick_interval_ms: 40,
            fade_in_ms: 0,
            fade_out_ms: 0,
            crossfade: CrossfadeConfig::default(),
            stream_buffer: StreamBufferConfig::default(),
            scope_len: 512,
            playback: PlaybackConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<EngineConfig>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg.validate())
    }

    /// Normalise values that would break tick or buffer arithmetic.
    pub fn validate(mut self) -> Self {
        self.tick_interval_ms = self.tick_interval_ms.max(1);
        self.scope_len = self.scope_len.max(1);
        self.device = self.device.and_then(|name| {
            let trimmed = name.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        });

        let sb = &mut self.stream_buffer;
        sb.capacity = sb.capacity.max(2);
        if sb.high_water == 0 || sb.high_water >= sb.capacity {
            sb.high_water = (sb.capacity * 3 / 4).max(1);
        }
        // A suspended producer never refills past high water.
        sb.min_fill = sb.min_fill.clamp(1, sb.high_water);
        if sb.resume_below >= sb.high_water {
            sb.resume_below = sb.high_water / 2;
        }
        sb.resume_below = sb.resume_below.max(1);
        self
    }

    /// Whether tracks started from silence ramp in.
    pub fn fade_in_enabled(&self) -> bool {
        self.fade_in_ms > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_uses_defaults() {
        let cfg: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.tick_interval_ms, 40);
        assert_eq!(cfg.scope_len, 512);
        assert!(!cfg.crossfade.enabled);
        assert_eq!(cfg.playback.chunk_frames, 1024);
    }

    #[test]
    fn nested_tables_parse() {
        let raw = r#"
            device = "USB"
            fade_in_ms = 800
            [crossfade]
            enabled = true
            length_ms = 5000
            [stream_buffer]
            capacity = 1000
            min_fill = 200
        "#;
        let cfg: EngineConfig = toml::from_str(raw).unwrap();
        assert_eq!(cfg.device.as_deref(), Some("USB"));
        assert_eq!(cfg.fade_in_ms, 800);
        assert!(cfg.crossfade.enabled);
        assert_eq!(cfg.crossfade.length_ms, 5000);
        assert_eq!(cfg.stream_buffer.capacity, 1000);
        assert_eq!(cfg.stream_buffer.min_fill, 200);
    }

    #[test]
    fn validate_repairs_thresholds() {
        let mut cfg = EngineConfig::default();
        cfg.tick_interval_ms = 0;
        cfg.device = Some("   ".into());
        cfg.stream_buffer = StreamBufferConfig {
            capacity: 100,
            min_fill: 500,
            high_water: 400,
            resume_below: 90,
        };
        let cfg = cfg.validate();
        assert_eq!(cfg.tick_interval_ms, 1);
        assert!(cfg.device.is_none());
        assert_eq!(cfg.stream_buffer.high_water, 75);
        assert_eq!(cfg.stream_buffer.min_fill, 75);
        assert_eq!(cfg.stream_buffer.resume_below, 37);
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "fade_out_ms = 1200\n").unwrap();
        let cfg = EngineConfig::load(&path).unwrap();
        assert_eq!(cfg.fade_out_ms, 1200);
    }

    #[test]
    fn load_reports_missing_file() {
        let err = EngineConfig::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(format!("{err:#}").contains("read config"));
    }
}

use serde::{Deserialize, Serialize};

/// Externally visible engine state.
///
/// Transitions are reported to observers as `(new, old)` pairs in the order they happen.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// Nothing is loaded.
    #[default]
    Empty,
    /// A track is loaded but not rendering.
    Idle,
    /// Output is paused in place.
    Paused,
    /// Output is rendering.
    Playing,
    /// The output chain could not be built; playback is blocked until reconfigured.
    Error,
}

impl EngineState {
    /// `true` for states in which a track is loaded.
    pub fn has_track(self) -> bool {
        matches!(self, EngineState::Idle | EngineState::Paused | EngineState::Playing)
    }
}

/// Classification used for error notifications.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Output device or a required stage cannot be constructed.
    Configuration,
    /// A single pipeline failed to decode.
    Decode,
    /// The shared output failed while rendering.
    OutputRuntime,
    /// A network source is buffering; informational only.
    StreamStall,
}

impl ErrorKind {
    /// Whether the error blocks playback until the user intervenes.
    pub fn is_blocking(self) -> bool {
        matches!(self, ErrorKind::Configuration)
    }
}

/// Reason why the last track stopped rendering.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackEndReason {
    /// Natural end of stream/file.
    Eof,
    /// Decoder or output error interrupted playback.
    Error,
    /// Playback was explicitly stopped by a command.
    Stopped,
    /// Advanced early into a crossfade with the next track.
    Crossfade,
}

/// Volume transition a pipeline is currently in.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FadePhase {
    NoFade,
    FadeIn,
    FadeOut,
    XfadeIn,
    XfadeOut,
}

/// Point-in-time engine status for UIs and logs.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct EngineStatus {
    /// Current engine state.
    pub state: EngineState,
    /// Locator (or title when known) of the current track.
    pub now_playing: Option<String>,
    /// Rendered position of the current track in milliseconds.
    pub position_ms: Option<u64>,
    /// Total length of the current track in milliseconds when known.
    pub length_ms: Option<u64>,
    /// Master volume percent (0..=100).
    pub volume: u8,
    /// `true` while muted.
    pub muted: bool,
    /// Number of pipelines currently alive (2 during a crossfade).
    pub live_pipelines: usize,
    /// Stream buffer fill in percent for network sources.
    pub buffer_fill_percent: Option<u8>,
    /// Name of the active backend.
    pub backend: Option<String>,
    /// Output device name, if known.
    pub device: Option<String>,
    /// Last error text, if any.
    pub last_error: Option<String>,
    /// How the previous track ended.
    pub end_reason: Option<PlaybackEndReason>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_state_serializes_snake_case() {
        let json = serde_json::to_string(&EngineState::Playing).unwrap();
        assert_eq!(json, "\"playing\"");
        let back: EngineState = serde_json::from_str("\"paused\"").unwrap();
        assert_eq!(back, EngineState::Paused);
    }

    #[test]
    fn only_configuration_errors_block() {
        assert!(ErrorKind::Configuration.is_blocking());
        assert!(!ErrorKind::Decode.is_blocking());
        assert!(!ErrorKind::OutputRuntime.is_blocking());
        assert!(!ErrorKind::StreamStall.is_blocking());
    }

    #[test]
    fn has_track_excludes_empty_and_error() {
        assert!(!EngineState::Empty.has_track());
        assert!(!EngineState::Error.has_track());
        assert!(EngineState::Idle.has_track());
        assert!(EngineState::Playing.has_track());
    }

    #[test]
    fn status_default_is_empty() {
        let status = EngineStatus::default();
        assert_eq!(status.state, EngineState::Empty);
        assert_eq!(status.live_pipelines, 0);
        assert!(status.end_reason.is_none());
    }
}

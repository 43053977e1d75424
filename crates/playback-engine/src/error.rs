//! Engine error type.
//!
//! Every variant maps onto one of the notification kinds in [`ErrorKind`]; callers that only
//! need to decide on recovery policy should match on [`EngineError::kind`].

use engine_types::ErrorKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Output device or a required processing stage cannot be constructed.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A single pipeline failed to probe or decode its source.
    #[error("decode error: {0}")]
    Decode(String),

    /// The shared output failed while rendering.
    #[error("output error: {0}")]
    OutputRuntime(String),

    /// Locator is empty or cannot be interpreted.
    #[error("invalid locator: {0:?}")]
    InvalidLocator(String),

    /// Local file does not exist.
    #[error("file not found: {0}")]
    NotFound(String),

    /// Play was requested with nothing to play.
    #[error("no track loaded")]
    NoTrack,

    /// The decoder could not reposition; playback continues from where it was.
    #[error("seek to {ms} ms failed: {message}")]
    Seek { ms: u64, message: String },

    /// Network stream transport failure.
    #[error("stream error: {0}")]
    Stream(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Notification kind used when this error is reported to observers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Configuration(_) => ErrorKind::Configuration,
            EngineError::OutputRuntime(_) => ErrorKind::OutputRuntime,
            EngineError::Decode(_)
            | EngineError::InvalidLocator(_)
            | EngineError::NotFound(_)
            | EngineError::NoTrack
            | EngineError::Seek { .. }
            | EngineError::Stream(_)
            | EngineError::Io(_) => ErrorKind::Decode,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_recovery_policy() {
        assert_eq!(
            EngineError::Configuration("no device".into()).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            EngineError::OutputRuntime("unplugged".into()).kind(),
            ErrorKind::OutputRuntime
        );
        assert_eq!(EngineError::NotFound("/x".into()).kind(), ErrorKind::Decode);
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert_eq!(EngineError::from(io).kind(), ErrorKind::Decode);
    }

    #[test]
    fn display_includes_detail() {
        let err = EngineError::InvalidLocator("".into());
        assert_eq!(err.to_string(), "invalid locator: \"\"");
    }
}

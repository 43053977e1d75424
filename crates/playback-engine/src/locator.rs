//! Track locators: local paths and network streams.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};

/// Extensions the decoder can open without asking the server what it is serving.
const AUDIO_EXTENSIONS: &[&str] = &[
    "flac", "mp3", "aac", "wav", "wave", "aif", "aiff", "ogg", "oga", "m4a",
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Locator {
    File(PathBuf),
    Stream(String),
}

impl Locator {
    /// Parse a user-supplied locator.
    ///
    /// `http(s)://` becomes a stream, `file://` and bare paths become files; anything else with a
    /// scheme is rejected.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(EngineError::InvalidLocator(raw.to_string()));
        }

        if let Some((scheme, rest)) = raw.split_once("://") {
            return match scheme.to_ascii_lowercase().as_str() {
                "http" | "https" => {
                    let host = rest.split(['/', '?', '#']).next().unwrap_or("");
                    if host.is_empty() {
                        Err(EngineError::InvalidLocator(raw.to_string()))
                    } else {
                        Ok(Locator::Stream(raw.to_string()))
                    }
                }
                "file" if !rest.is_empty() => Ok(Locator::File(PathBuf::from(rest))),
                _ => Err(EngineError::InvalidLocator(raw.to_string())),
            };
        }

        Ok(Locator::File(PathBuf::from(raw)))
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Locator::Stream(_))
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Locator::File(path) => Some(path),
            Locator::Stream(_) => None,
        }
    }

    /// Lowercase extension used as a container hint.
    pub fn ext_hint(&self) -> Option<String> {
        match self {
            Locator::File(path) => path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase()),
            Locator::Stream(url) => infer_ext_from_url(url),
        }
    }

    /// Network locator whose type cannot be told from its name.
    pub fn needs_probe(&self) -> bool {
        self.is_stream() && !self.ext_hint().is_some_and(|ext| is_audio_extension(&ext))
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::File(path) => write!(f, "{}", path.display()),
            Locator::Stream(url) => f.write_str(url),
        }
    }
}

pub fn is_audio_extension(ext: &str) -> bool {
    AUDIO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
}

/// Infer a file extension from the URL path if present.
pub fn infer_ext_from_url(url: &str) -> Option<String> {
    let tail = url.split(['?', '#']).next().unwrap_or(url);
    let tail = tail.split_once("://").map(|(_, rest)| rest).unwrap_or(tail);
    let (_, path) = tail.split_once('/')?;
    let file = path.rsplit('/').next().unwrap_or(path);
    let mut parts = file.rsplit('.');
    let ext = parts.next()?;
    if parts.next().is_some() && !ext.is_empty() {
        Some(ext.to_ascii_lowercase())
    } else {
        None
    }
}

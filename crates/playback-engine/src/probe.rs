//! Content-type probe for network locators whose name says nothing about the format.
//!
//! The probe runs on its own thread and answers with a [`BackendEvent::ProbeFinished`]
//! carrying the caller's ticket, so replies for superseded loads can be told apart and dropped.

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::Sender;

use crate::backend::{BackendEvent, ProbeOutcome};

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Start probing `url`; the answer arrives on `events`.
pub fn spawn_probe(ticket: u64, url: String, events: Sender<BackendEvent>) -> Result<()> {
    thread::Builder::new()
        .name(format!("probe-{ticket}"))
        .spawn(move || {
            let outcome = probe(&url);
            tracing::debug!(ticket, url = %url, outcome = ?outcome, "content probe finished");
            let _ = events.send(BackendEvent::ProbeFinished { ticket, outcome });
        })
        .context("spawn probe thread")?;
    Ok(())
}

fn probe(url: &str) -> ProbeOutcome {
    let resp = match ureq::head(url)
        .config()
        .timeout_per_call(Some(PROBE_TIMEOUT))
        .build()
        .call()
    {
        Ok(resp) => resp,
        Err(e) => {
            return ProbeOutcome::Failed {
                message: format!("content probe failed: {e}"),
            };
        }
    };
    let content_type = resp
        .headers()
        .get("Content-Type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    classify_content_type(content_type)
}

/// Map a `Content-Type` header onto a probe outcome.
///
/// A missing type or `application/octet-stream` is handed to the decoder without a hint.
pub fn classify_content_type(content_type: &str) -> ProbeOutcome {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    let ext = match mime.as_str() {
        "audio/mpeg" | "audio/mp3" => Some("mp3"),
        "audio/flac" | "audio/x-flac" => Some("flac"),
        "audio/ogg" | "application/ogg" | "audio/vorbis" => Some("ogg"),
        "audio/wav" | "audio/wave" | "audio/x-wav" => Some("wav"),
        "audio/aac" | "audio/aacp" => Some("aac"),
        "audio/aiff" | "audio/x-aiff" => Some("aiff"),
        "audio/mp4" | "audio/x-m4a" => Some("m4a"),
        "" | "application/octet-stream" => None,
        m if m.starts_with("audio/") => None,
        _ => {
            return ProbeOutcome::Unsupported {
                content_type: mime,
            };
        }
    };
    ProbeOutcome::Audio {
        ext_hint: ext.map(str::to_string),
    }
}

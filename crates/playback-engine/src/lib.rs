//! Crossfading playback engine.
//!
//! Modules:
//! - `controller`: command surface, crossfade admission, observer fan-out
//! - `manager`: pipeline lifecycle, fades, shared output, backend event handling
//! - `backend`: the audio-library boundary plus the CPAL/Symphonia implementation
//! - `stream_buffer` / `fetch` / `probe`: network sources
//! - `scope`: time-aligned visualisation snapshots
//! - `runtime`: the control thread and its command handle

pub mod arena;
pub mod backend;
pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod fade;
pub mod fetch;
pub mod locator;
pub mod manager;
pub mod observer;
mod pipeline;
pub mod probe;
pub mod queue;
pub mod runtime;
pub mod scope;
pub mod stream_buffer;
pub mod volume;

#[cfg(test)]
mod testing;

pub use backend::{AudioBackend, NativeBackend};
pub use config::EngineConfig;
pub use controller::{PlaybackController, TrackInfo};
pub use error::{EngineError, Result};
pub use observer::{ChannelObserver, EngineEvent, EngineObserver, ObserverId};
pub use runtime::{Command, EngineHandle, spawn_engine};

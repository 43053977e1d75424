//! Outbound notifications.

use std::collections::BTreeMap;

use crossbeam_channel::Sender;
use engine_types::{EngineState, ErrorKind, PlaybackEndReason};

/// One notification, in the order it happened.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    StateChanged { new: EngineState, old: EngineState },
    Position(u64),
    Volume(u8),
    Metadata(BTreeMap<String, String>),
    TrackEnded(PlaybackEndReason),
    Error { kind: ErrorKind, message: String },
    Status(String),
}

impl EngineEvent {
    /// Deliver this event to the matching observer callback.
    pub fn dispatch(&self, observer: &mut dyn EngineObserver) {
        match self {
            EngineEvent::StateChanged { new, old } => observer.state_changed(*new, *old),
            EngineEvent::Position(ms) => observer.position_changed(*ms),
            EngineEvent::Volume(percent) => observer.volume_changed(*percent),
            EngineEvent::Metadata(tags) => observer.metadata_discovered(tags),
            EngineEvent::TrackEnded(reason) => observer.track_ended(*reason),
            EngineEvent::Error { kind, message } => observer.error(*kind, message),
            EngineEvent::Status(text) => observer.status_message(text),
        }
    }
}

/// Receiver of engine notifications.
///
/// Callbacks run on the control thread; implementations must not block. Every method has an
/// empty default so observers only implement what they care about.
pub trait EngineObserver: Send {
    fn state_changed(&mut self, _new: EngineState, _old: EngineState) {}

    fn position_changed(&mut self, _ms: u64) {}

    fn volume_changed(&mut self, _percent: u8) {}

    fn metadata_discovered(&mut self, _tags: &BTreeMap<String, String>) {}

    fn track_ended(&mut self, _reason: PlaybackEndReason) {}

    fn error(&mut self, _kind: ErrorKind, _message: &str) {}

    fn status_message(&mut self, _text: &str) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(pub(crate) u64);

/// Forwards every notification as an [`EngineEvent`] to another thread.
pub struct ChannelObserver {
    tx: Sender<EngineEvent>,
}

impl ChannelObserver {
    pub fn new(tx: Sender<EngineEvent>) -> Self {
        Self { tx }
    }

    fn forward(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }
}

impl EngineObserver for ChannelObserver {
    fn state_changed(&mut self, new: EngineState, old: EngineState) {
        self.forward(EngineEvent::StateChanged { new, old });
    }

    fn position_changed(&mut self, ms: u64) {
        self.forward(EngineEvent::Position(ms));
    }

    fn volume_changed(&mut self, percent: u8) {
        self.forward(EngineEvent::Volume(percent));
    }

    fn metadata_discovered(&mut self, tags: &BTreeMap<String, String>) {
        self.forward(EngineEvent::Metadata(tags.clone()));
    }

    fn track_ended(&mut self, reason: PlaybackEndReason) {
        self.forward(EngineEvent::TrackEnded(reason));
    }

    fn error(&mut self, kind: ErrorKind, message: &str) {
        self.forward(EngineEvent::Error {
            kind,
            message: message.to_string(),
        });
    }

    fn status_message(&mut self, text: &str) {
        self.forward(EngineEvent::Status(text.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_observer_round_trips_every_event() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut observer = ChannelObserver::new(tx);
        let mut tags = BTreeMap::new();
        tags.insert("title".to_string(), "Intro".to_string());
        let events = vec![
            EngineEvent::StateChanged {
                new: EngineState::Idle,
                old: EngineState::Empty,
            },
            EngineEvent::Position(1200),
            EngineEvent::Volume(40),
            EngineEvent::Metadata(tags),
            EngineEvent::TrackEnded(PlaybackEndReason::Eof),
            EngineEvent::Error {
                kind: ErrorKind::Decode,
                message: "bad frame".into(),
            },
            EngineEvent::Status("Buffering 40%".into()),
        ];
        for event in &events {
            event.dispatch(&mut observer);
        }
        let received: Vec<EngineEvent> = rx.try_iter().collect();
        assert_eq!(received, events);
    }

    #[test]
    fn default_methods_ignore_events() {
        struct Quiet;
        impl EngineObserver for Quiet {}
        EngineEvent::Position(5).dispatch(&mut Quiet);
    }
}

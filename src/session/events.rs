use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Everything external collaborators can observe about a live session
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Connected,
    Disconnected,
    /// Decoded model audio was routed to playback
    AudioReceived { pcm: Vec<u8>, mime_type: String },
    TextReceived { content: String },
    UserTranscript { text: String, timestamp: DateTime<Utc> },
    AiTranscript { text: String, timestamp: DateTime<Utc> },
    /// A screen still was appended to the session
    ScreenCaptureTaken { id: String, width: u32, height: u32 },
    TurnComplete,
    Interrupted,
    Error { message: String },
    ListeningStart,
    ListeningStop,
    AiSpeakingStart,
    AiSpeakingStop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    AudioReceived,
    TextReceived,
    UserTranscript,
    AiTranscript,
    ScreenCaptureTaken,
    TurnComplete,
    Interrupted,
    Error,
    ListeningStart,
    ListeningStop,
    AiSpeakingStart,
    AiSpeakingStop,
}

impl SessionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SessionEvent::Connected => EventKind::Connected,
            SessionEvent::Disconnected => EventKind::Disconnected,
            SessionEvent::AudioReceived { .. } => EventKind::AudioReceived,
            SessionEvent::TextReceived { .. } => EventKind::TextReceived,
            SessionEvent::UserTranscript { .. } => EventKind::UserTranscript,
            SessionEvent::AiTranscript { .. } => EventKind::AiTranscript,
            SessionEvent::ScreenCaptureTaken { .. } => EventKind::ScreenCaptureTaken,
            SessionEvent::TurnComplete => EventKind::TurnComplete,
            SessionEvent::Interrupted => EventKind::Interrupted,
            SessionEvent::Error { .. } => EventKind::Error,
            SessionEvent::ListeningStart => EventKind::ListeningStart,
            SessionEvent::ListeningStop => EventKind::ListeningStop,
            SessionEvent::AiSpeakingStart => EventKind::AiSpeakingStart,
            SessionEvent::AiSpeakingStop => EventKind::AiSpeakingStop,
        }
    }
}

pub type HandlerId = u64;
type Handler = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

struct BusInner {
    next_id: HandlerId,
    /// Per-kind handler sets so one event's fan-out never touches another's
    handlers: HashMap<EventKind, Vec<(HandlerId, Handler)>>,
}

/// Typed publish/subscribe fan-out for session events.
///
/// Handlers run synchronously in subscription order; a panicking handler is
/// logged and the remaining handlers still run.
pub struct EventBus {
    inner: Mutex<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BusInner {
                next_id: 0,
                handlers: HashMap::new(),
            }),
        }
    }

    pub fn on(
        &self,
        kind: EventKind,
        handler: impl Fn(&SessionEvent) + Send + Sync + 'static,
    ) -> HandlerId {
        let mut inner = self.inner.lock().expect("event bus lock poisoned");
        let id = inner.next_id;
        inner.next_id += 1;
        inner
            .handlers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler; returns false if it was not subscribed.
    pub fn off(&self, kind: EventKind, id: HandlerId) -> bool {
        let mut inner = self.inner.lock().expect("event bus lock poisoned");
        match inner.handlers.get_mut(&kind) {
            Some(handlers) => {
                let before = handlers.len();
                handlers.retain(|(hid, _)| *hid != id);
                handlers.len() != before
            }
            None => false,
        }
    }

    pub fn emit(&self, event: &SessionEvent) {
        let handlers: Vec<Handler> = {
            let inner = self.inner.lock().expect("event bus lock poisoned");
            inner
                .handlers
                .get(&event.kind())
                .map(|hs| hs.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default()
        };

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                warn!("Event handler panicked for {:?}; continuing", event.kind());
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn emit_reaches_only_matching_kind() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits_clone = Arc::clone(&hits);
        bus.on(EventKind::TurnComplete, move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&SessionEvent::TurnComplete);
        bus.emit(&SessionEvent::Interrupted);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn off_unsubscribes() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits_clone = Arc::clone(&hits);
        let id = bus.on(EventKind::Connected, move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert!(bus.off(EventKind::Connected, id));
        assert!(!bus.off(EventKind::Connected, id));

        bus.emit(&SessionEvent::Connected);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_handler_does_not_block_others() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        bus.on(EventKind::Error, |_| panic!("bad handler"));
        let hits_clone = Arc::clone(&hits);
        bus.on(EventKind::Error, move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&SessionEvent::Error {
            message: "x".to_string(),
        });

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}

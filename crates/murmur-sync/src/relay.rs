//! Tag-keyed handler table for gameplay events.
//!
//! The relay is the only seam between the sync core and gameplay code:
//! systems register one handler per [`EventTag`] and the core calls it when
//! a matching event arrives. Unregistered tags are a silent no-op.

use std::collections::HashMap;

use murmur_net::{ChatMessage, DomainEvent, EventTag};

/// Handler invoked for events with one tag.
///
/// Implemented for any `FnMut(&DomainEvent) + Send` closure.
pub trait EventHandler: Send {
    fn handle(&mut self, event: &DomainEvent);
}

impl<F> EventHandler for F
where
    F: FnMut(&DomainEvent) + Send,
{
    fn handle(&mut self, event: &DomainEvent) {
        (self)(event)
    }
}

/// Registration table from [`EventTag`] to one handler.
#[derive(Default)]
pub struct EventRelay {
    handlers: HashMap<EventTag, Box<dyn EventHandler>>,
}

impl std::fmt::Debug for EventRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRelay")
            .field("registered", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl EventRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handler` for `tag`, replacing any previous one.
    pub fn register(&mut self, tag: EventTag, handler: impl EventHandler + 'static) {
        if self.handlers.insert(tag, Box::new(handler)).is_some() {
            tracing::debug!(%tag, "replaced event handler");
        }
    }

    /// Remove the handler for `tag`. Returns `true` if one was installed.
    pub fn unregister(&mut self, tag: EventTag) -> bool {
        self.handlers.remove(&tag).is_some()
    }

    pub fn is_registered(&self, tag: EventTag) -> bool {
        self.handlers.contains_key(&tag)
    }

    /// Register a `chat` handler that receives the decoded message.
    ///
    /// Chat payloads that do not decode are logged and skipped.
    pub fn on_chat(&mut self, mut handler: impl FnMut(ChatMessage) + Send + 'static) {
        self.register(EventTag::Chat, move |event: &DomainEvent| {
            match event.payload_as::<ChatMessage>() {
                Ok(chat) => handler(chat),
                Err(e) => tracing::warn!("malformed chat payload: {e}"),
            }
        });
    }

    /// Invoke the handler for `event.tag`. Returns `false` if none is registered.
    pub fn dispatch(&mut self, event: &DomainEvent) -> bool {
        match self.handlers.get_mut(&event.tag) {
            Some(handler) => {
                handler.handle(event);
                true
            }
            None => {
                tracing::trace!(tag = %event.tag, "no handler for event");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, Value, json};
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn event(tag: EventTag, payload: Value) -> DomainEvent {
        let Value::Object(map) = payload else {
            panic!("payload must be an object");
        };
        DomainEvent::new(tag, map)
    }

    #[test]
    fn test_dispatch_calls_only_matching_handler() {
        let mut relay = EventRelay::new();
        let hits = Arc::new(AtomicU32::new(0));
        let misses = Arc::new(AtomicU32::new(0));

        let h = Arc::clone(&hits);
        relay.register(EventTag::TagTransfer, move |_: &DomainEvent| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        let m = Arc::clone(&misses);
        relay.register(EventTag::RaceStart, move |_: &DomainEvent| {
            m.fetch_add(1, Ordering::SeqCst);
        });

        assert!(relay.dispatch(&event(EventTag::TagTransfer, json!({"to": "p2"}))));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(misses.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unregistered_tag_is_noop() {
        let mut relay = EventRelay::new();
        assert!(!relay.dispatch(&DomainEvent::new(EventTag::Stun, Map::new())));
    }

    #[test]
    fn test_register_replaces_and_unregister_removes() {
        let mut relay = EventRelay::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = Arc::clone(&seen);
        relay.register(EventTag::PvpHit, move |_: &DomainEvent| {
            s.lock().unwrap().push("first");
        });
        let s = Arc::clone(&seen);
        relay.register(EventTag::PvpHit, move |_: &DomainEvent| {
            s.lock().unwrap().push("second");
        });

        relay.dispatch(&DomainEvent::new(EventTag::PvpHit, Map::new()));
        assert_eq!(*seen.lock().unwrap(), vec!["second"]);

        assert!(relay.unregister(EventTag::PvpHit));
        assert!(!relay.is_registered(EventTag::PvpHit));
        assert!(!relay.unregister(EventTag::PvpHit));
    }

    #[test]
    fn test_handler_sees_payload_and_tag() {
        let mut relay = EventRelay::new();
        let captured = Arc::new(Mutex::new(None));
        let c = Arc::clone(&captured);
        relay.register(EventTag::HeistScore, move |e: &DomainEvent| {
            *c.lock().unwrap() = Some((e.tag, e.payload["points"].clone()));
        });

        relay.dispatch(&event(EventTag::HeistScore, json!({"points": 3})));
        assert_eq!(
            *captured.lock().unwrap(),
            Some((EventTag::HeistScore, json!(3)))
        );
    }

    #[test]
    fn test_on_chat_decodes_message() {
        let mut relay = EventRelay::new();
        let lines = Arc::new(Mutex::new(Vec::new()));
        let l = Arc::clone(&lines);
        relay.on_chat(move |chat| l.lock().unwrap().push(format!("{}: {}", chat.username, chat.message)));

        relay.dispatch(&event(
            EventTag::Chat,
            json!({"username": "Ava", "message": "hi", "timestamp": 1}),
        ));
        // Missing fields: logged, not delivered.
        relay.dispatch(&event(EventTag::Chat, json!({"message": "anon"})));

        assert_eq!(*lines.lock().unwrap(), vec!["Ava: hi".to_string()]);
    }
}

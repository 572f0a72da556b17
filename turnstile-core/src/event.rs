//! Events exchanged between machines and observed by monitors.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// Name of the built-in event that halts a machine once it reaches an
/// empty state stack.
pub const HALT: &str = "Halt";

/// Name of the built-in event synthesized when the mailbox is empty and
/// the active state declares a handler for it.
pub const DEFAULT: &str = "Default";

/// Identity of an event type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(Arc<str>);

impl EventType {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn halt() -> Self {
        Self::new(HALT)
    }

    pub fn default_event() -> Self {
        Self::new(DEFAULT)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_halt(&self) -> bool {
        &*self.0 == HALT
    }

    pub fn is_default(&self) -> bool {
        &*self.0 == DEFAULT
    }
}

impl Borrow<str> for EventType {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A typed, optionally payloaded message.
///
/// Events are immutable once built and consumed exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    kind: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_in_flight: Option<usize>,
}

impl Event {
    /// Creates an event without payload.
    pub fn new(kind: impl Into<EventType>) -> Self {
        Self {
            kind: kind.into(),
            payload: None,
            max_in_flight: None,
        }
    }

    /// Creates an event carrying a payload.
    pub fn with_payload(kind: impl Into<EventType>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload: Some(payload),
            max_in_flight: None,
        }
    }

    pub fn halt() -> Self {
        Self::new(EventType::halt())
    }

    /// Bounds how many events of this type may sit in one mailbox.
    pub fn bounded(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = Some(max_in_flight);
        self
    }

    pub fn kind(&self) -> &EventType {
        &self.kind
    }

    pub fn name(&self) -> &str {
        self.kind.as_str()
    }

    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    pub fn max_in_flight(&self) -> Option<usize> {
        self.max_in_flight
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_types() {
        assert!(Event::halt().kind().is_halt());
        assert!(EventType::default_event().is_default());
        assert!(!EventType::new("Ping").is_halt());
    }

    #[test]
    fn test_event_parts() {
        let event = Event::with_payload("Ping", json!({"seq": 1})).bounded(2);
        assert_eq!(event.name(), "Ping");
        assert_eq!(event.payload(), Some(&json!({"seq": 1})));
        assert_eq!(event.max_in_flight(), Some(2));
        assert_eq!(Event::new("Pong").payload(), None);
    }

    #[test]
    fn test_event_type_serializes_as_string() {
        let json = serde_json::to_value(Event::new("Ping")).unwrap();
        assert_eq!(json, json!({"kind": "Ping"}));
    }
}

//! Event types for the hub event bus

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

use crate::Context;

/// Payload of a runtime event with a fixed type name
pub trait EventData: Clone + Send + Sync + 'static {
    fn event_type() -> &'static str;
}

/// Name of an event, e.g. `device_added`. `*` is reserved for subscribers
/// that want every event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(Cow<'static, str>);

impl EventType {
    pub const ANY: EventType = EventType(Cow::Borrowed("*"));

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_any(&self) -> bool {
        self.0 == "*"
    }
}

impl From<&str> for EventType {
    fn from(name: &str) -> Self {
        Self(Cow::Owned(name.to_string()))
    }
}

impl From<String> for EventType {
    fn from(name: String) -> Self {
        Self(Cow::Owned(name))
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One occurrence on the event bus. Typed subscribers see `T`, untyped ones
/// see the payload as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event<T = serde_json::Value> {
    pub event_type: EventType,
    pub data: T,
    pub origin: EventOrigin,
    pub time_fired: DateTime<Utc>,
    pub context: Context,
}

impl<T> Event<T> {
    /// Stamped with the current time, origin [`EventOrigin::Runtime`]
    pub fn new(event_type: impl Into<EventType>, data: T, context: Context) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            origin: EventOrigin::Runtime,
            time_fired: Utc::now(),
            context,
        }
    }

    pub fn with_origin(mut self, origin: EventOrigin) -> Self {
        self.origin = origin;
        self
    }
}

impl<T: EventData> Event<T> {
    pub fn typed(data: T, context: Context) -> Self {
        Self::new(EventType::from_static(T::event_type()), data, context)
    }

    /// Same event with the payload as JSON, for untyped subscribers
    pub fn to_json(&self) -> serde_json::Result<Event<serde_json::Value>>
    where
        T: Serialize,
    {
        Ok(Event {
            event_type: self.event_type.clone(),
            data: serde_json::to_value(&self.data)?,
            origin: self.origin,
            time_fired: self.time_fired,
            context: self.context.clone(),
        })
    }
}

/// Where an event came from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventOrigin {
    /// The device runtime itself (lifecycle transitions)
    #[default]
    Runtime,
    /// A plugin (state updates, device events)
    Plugin,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Ping;

    impl EventData for Ping {
        fn event_type() -> &'static str {
            "ping"
        }
    }

    #[test]
    fn test_typed_event() {
        let event = Event::typed(Ping, Context::new()).with_origin(EventOrigin::Plugin);
        assert_eq!(event.event_type.as_str(), "ping");
        assert_eq!(event.origin, EventOrigin::Plugin);
    }

    #[test]
    fn test_any() {
        assert!(EventType::ANY.is_any());
        assert!(!EventType::from("device_added").is_any());
        assert_eq!(EventType::from_static("device_added"), EventType::from("device_added"));
    }

    #[test]
    fn test_serializes_as_plain_name() {
        let json = serde_json::to_string(&EventType::from_static("device_removed")).unwrap();
        assert_eq!(json, "\"device_removed\"");
    }
}

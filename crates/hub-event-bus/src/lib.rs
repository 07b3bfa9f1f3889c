//! Event bus with typed pub/sub for the hub
//!
//! The device runtime fires every lifecycle transition, state change and
//! device event here. Collaborators (rule engine, API layer, log engine)
//! subscribe either to one event type, to a typed payload, or to everything.

use dashmap::DashMap;
use hub_core::{Context, Event, EventData, EventOrigin, EventType};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

/// Default channel capacity for event subscriptions
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Broadcast bus carrying runtime events as JSON payloads.
///
/// Each event type gets its own channel on first subscription. Events of a
/// type nobody subscribed to only reach [`EventBus::subscribe_all`] receivers.
pub struct EventBus {
    listeners: DashMap<EventType, broadcast::Sender<Event<serde_json::Value>>>,
    everything: broadcast::Sender<Event<serde_json::Value>>,
    capacity: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with specified channel capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (everything, _) = broadcast::channel(capacity);
        Self {
            listeners: DashMap::new(),
            everything,
            capacity,
        }
    }

    /// Subscribe to events of a specific type
    pub fn subscribe(
        &self,
        event_type: impl Into<EventType>,
    ) -> broadcast::Receiver<Event<serde_json::Value>> {
        let event_type = event_type.into();
        trace!(event_type = %event_type, "Subscribing to event type");

        if event_type.is_any() {
            return self.everything.subscribe();
        }

        self.listeners
            .entry(event_type)
            .or_insert_with(|| {
                let (tx, _) = broadcast::channel(self.capacity);
                tx
            })
            .subscribe()
    }

    /// Subscribe to one typed event, receiving parsed payloads
    pub fn subscribe_typed<T: EventData + serde::de::DeserializeOwned>(
        &self,
    ) -> TypedEventReceiver<T> {
        TypedEventReceiver::new(self.subscribe(EventType::from_static(T::event_type())))
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<Event<serde_json::Value>> {
        self.everything.subscribe()
    }

    /// Deliver to the subscribers of the event's type and to catch-all ones
    pub fn fire(&self, event: Event<serde_json::Value>) {
        debug!(event_type = %event.event_type, "Firing event");

        if let Some(sender) = self.listeners.get(&event.event_type) {
            // Send errors only mean no active receivers
            let _ = sender.send(event.clone());
        }

        let _ = self.everything.send(event);
    }

    /// Fire a typed event originating in the runtime
    pub fn fire_typed<T: EventData + serde::Serialize>(&self, data: T, context: Context) {
        self.fire_typed_from(data, context, EventOrigin::Runtime);
    }

    /// Fire a typed event with an explicit origin
    pub fn fire_typed_from<T: EventData + serde::Serialize>(
        &self,
        data: T,
        context: Context,
        origin: EventOrigin,
    ) {
        let event = Event::typed(data, context).with_origin(origin);
        match event.to_json() {
            Ok(event) => self.fire(event),
            Err(e) => {
                warn!(event_type = %event.event_type, error = %e, "Dropping unserializable event")
            }
        }
    }

    /// Number of event types with a dedicated channel
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A receiver for typed events
pub struct TypedEventReceiver<T> {
    rx: broadcast::Receiver<Event<serde_json::Value>>,
    _phantom: std::marker::PhantomData<T>,
}

impl<T: EventData + serde::de::DeserializeOwned> TypedEventReceiver<T> {
    fn new(rx: broadcast::Receiver<Event<serde_json::Value>>) -> Self {
        Self {
            rx,
            _phantom: std::marker::PhantomData,
        }
    }

    /// Receive the next typed event, skipping payloads that fail to parse
    pub async fn recv(&mut self) -> Result<Event<T>, broadcast::error::RecvError> {
        loop {
            let event = self.rx.recv().await?;
            if let Some(typed) = Self::parse(event) {
                return Ok(typed);
            }
        }
    }

    /// Take the next already-delivered typed event without waiting
    pub fn try_recv(&mut self) -> Option<Event<T>> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => {
                    if let Some(typed) = Self::parse(event) {
                        return Some(typed);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, event_type = T::event_type(), "Typed receiver lagged");
                }
                Err(_) => return None,
            }
        }
    }

    /// Drain every delivered event
    pub fn drain(&mut self) -> Vec<Event<T>> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    fn parse(event: Event<serde_json::Value>) -> Option<Event<T>> {
        match serde_json::from_value::<T>(event.data) {
            Ok(data) => Some(Event {
                event_type: event.event_type,
                data,
                origin: event.origin,
                time_fired: event.time_fired,
                context: event.context,
            }),
            Err(e) => {
                warn!(event_type = %event.event_type, error = %e, "Skipping malformed event");
                None
            }
        }
    }
}

/// Thread-safe wrapper for EventBus
pub type SharedEventBus = Arc<EventBus>;

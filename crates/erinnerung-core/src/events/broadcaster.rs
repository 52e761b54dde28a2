//! Broadcast channel carrying store watch events.
//!
//! Every write that succeeds against an evented store is published here.
//! Subscribers that fall behind lose the oldest events; the controller
//! tolerates that because a periodic resync re-derives everything from the
//! store.

use std::sync::Arc;
use tokio::sync::broadcast;

use super::types::ResourceEvent;
use crate::meta::ObjectKey;

/// Events beyond this limit are dropped for slow receivers.
const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Cloneable sender side of the watch channel.
///
/// ```
/// use erinnerung_core::events::EventBroadcaster;
/// use erinnerung_core::meta::ObjectKey;
///
/// let broadcaster = EventBroadcaster::new();
/// let _receiver = broadcaster.subscribe();
/// let key = ObjectKey::new("default", "p1");
/// let delivered = broadcaster.send_created("Payload", &key, serde_json::json!({}));
/// assert_eq!(delivered, 1);
/// ```
#[derive(Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<ResourceEvent>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Publishes an event. Returns the number of subscribers reached.
    pub fn send(&self, event: ResourceEvent) -> usize {
        self.sender.send(event).unwrap_or_default()
    }

    pub fn send_created(&self, kind: &str, key: &ObjectKey, resource: serde_json::Value) -> usize {
        self.send(ResourceEvent::created(kind, key, resource))
    }

    pub fn send_updated(&self, kind: &str, key: &ObjectKey, resource: serde_json::Value) -> usize {
        self.send(ResourceEvent::updated(kind, key, resource))
    }

    pub fn send_deleted(
        &self,
        kind: &str,
        key: &ObjectKey,
        last_known: Option<serde_json::Value>,
    ) -> usize {
        self.send(ResourceEvent::deleted(kind, key, last_known))
    }

    /// Events published before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<ResourceEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBroadcaster")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

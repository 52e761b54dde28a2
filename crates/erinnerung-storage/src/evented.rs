//! A store wrapper that publishes watch events after successful writes.
//!
//! ```ignore
//! let broadcaster = EventBroadcaster::new_shared();
//! let store = EventedStore::new(InMemoryStore::new(), broadcaster.clone());
//! let mut events = broadcaster.subscribe();
//! store.create(object).await?; // `events` now yields a Created event
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use erinnerung_core::ObjectKey;
use erinnerung_core::events::{EventBroadcaster, ResourceEvent, ResourceEventType};
use serde_json::Value;
use tracing::debug;

use crate::error::StorageError;
use crate::traits::ResourceStore;
use crate::types::{Deletion, ListParams, StoredObject};

/// Delegates to an inner store and emits a [`ResourceEvent`] for every
/// write that succeeded. Failed writes emit nothing.
pub struct EventedStore<S: ResourceStore> {
    inner: S,
    broadcaster: Arc<EventBroadcaster>,
}

impl<S: ResourceStore> EventedStore<S> {
    pub fn new(inner: S, broadcaster: Arc<EventBroadcaster>) -> Self {
        Self { inner, broadcaster }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn broadcaster(&self) -> &Arc<EventBroadcaster> {
        &self.broadcaster
    }

    fn emit(&self, event_type: ResourceEventType, object: &StoredObject) {
        if !self.broadcaster.has_subscribers() {
            return;
        }
        let key = object.key();
        let mut event = ResourceEvent::new(
            event_type,
            object.kind.clone(),
            &key,
            Some(object.to_document()),
        );
        if event_type != ResourceEventType::Deleted {
            if let Some(version) = object.resource_version() {
                event = event.with_version(version);
            }
        }
        let count = self.broadcaster.send(event);
        debug!(
            kind = %object.kind,
            namespace = %key.namespace,
            name = %key.name,
            event = %event_type,
            subscribers = count,
            "Emitted resource event"
        );
    }
}

#[async_trait]
impl<S: ResourceStore> ResourceStore for EventedStore<S> {
    async fn get(&self, kind: &str, key: &ObjectKey) -> Result<Option<StoredObject>, StorageError> {
        self.inner.get(kind, key).await
    }

    async fn list(
        &self,
        kind: &str,
        params: &ListParams,
    ) -> Result<Vec<StoredObject>, StorageError> {
        self.inner.list(kind, params).await
    }

    async fn create(&self, object: StoredObject) -> Result<StoredObject, StorageError> {
        let created = self.inner.create(object).await?;
        self.emit(ResourceEventType::Created, &created);
        Ok(created)
    }

    async fn update(
        &self,
        object: StoredObject,
        if_match: Option<&str>,
    ) -> Result<StoredObject, StorageError> {
        let updated = self.inner.update(object, if_match).await?;
        self.emit(ResourceEventType::Updated, &updated);
        Ok(updated)
    }

    async fn update_status(
        &self,
        kind: &str,
        key: &ObjectKey,
        status: Value,
        if_match: Option<&str>,
    ) -> Result<StoredObject, StorageError> {
        let updated = self.inner.update_status(kind, key, status, if_match).await?;
        self.emit(ResourceEventType::Updated, &updated);
        Ok(updated)
    }

    async fn delete(&self, kind: &str, key: &ObjectKey) -> Result<Deletion, StorageError> {
        let deletion = self.inner.delete(kind, key).await?;
        // A tombstone is still stored; watchers see it as an update.
        for object in &deletion.tombstoned {
            self.emit(ResourceEventType::Updated, object);
        }
        for object in &deletion.removed {
            self.emit(ResourceEventType::Deleted, object);
        }
        Ok(deletion)
    }

    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }
}

impl<S: ResourceStore> std::fmt::Debug for EventedStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventedStore")
            .field("backend", &self.inner.backend_name())
            .field("subscriber_count", &self.broadcaster.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use erinnerung_core::ObjectMeta;
    use std::sync::Mutex;

    /// Echoes writes back and fails creates of a name it has already seen.
    #[derive(Default)]
    struct EchoStore {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ResourceStore for EchoStore {
        async fn get(&self, _: &str, _: &ObjectKey) -> Result<Option<StoredObject>, StorageError> {
            Ok(None)
        }

        async fn list(&self, _: &str, _: &ListParams) -> Result<Vec<StoredObject>, StorageError> {
            Ok(Vec::new())
        }

        async fn create(&self, mut object: StoredObject) -> Result<StoredObject, StorageError> {
            let mut seen = self.seen.lock().unwrap();
            if seen.contains(&object.metadata.name) {
                return Err(StorageError::already_exists(&object.kind, object.key()));
            }
            seen.push(object.metadata.name.clone());
            object.metadata.resource_version = Some("1".into());
            Ok(object)
        }

        async fn update(
            &self,
            object: StoredObject,
            _: Option<&str>,
        ) -> Result<StoredObject, StorageError> {
            Ok(object)
        }

        async fn update_status(
            &self,
            kind: &str,
            key: &ObjectKey,
            status: Value,
            _: Option<&str>,
        ) -> Result<StoredObject, StorageError> {
            Ok(StoredObject {
                kind: kind.into(),
                metadata: ObjectMeta::new(&key.namespace, &key.name),
                spec: Value::Null,
                status,
            })
        }

        async fn delete(&self, kind: &str, key: &ObjectKey) -> Result<Deletion, StorageError> {
            Ok(Deletion {
                removed: vec![StoredObject {
                    kind: kind.into(),
                    metadata: ObjectMeta::new(&key.namespace, &key.name).with_label("a", "b"),
                    spec: Value::Null,
                    status: Value::Null,
                }],
                tombstoned: Vec::new(),
            })
        }

        fn backend_name(&self) -> &'static str {
            "echo"
        }
    }

    fn object(name: &str) -> StoredObject {
        StoredObject {
            kind: "Payload".into(),
            metadata: ObjectMeta::new("default", name),
            spec: Value::Null,
            status: Value::Null,
        }
    }

    #[tokio::test]
    async fn test_emits_after_successful_writes_only() {
        let broadcaster = EventBroadcaster::new_shared();
        let store = EventedStore::new(EchoStore::default(), broadcaster.clone());
        let mut rx = broadcaster.subscribe();

        store.create(object("p1")).await.unwrap();
        assert!(store.create(object("p1")).await.is_err());
        store
            .update_status("Payload", &ObjectKey::new("default", "p1"), serde_json::json!({}), None)
            .await
            .unwrap();

        let created = rx.recv().await.unwrap();
        assert_eq!(created.event_type, ResourceEventType::Created);
        assert_eq!(created.resource_version.as_deref(), Some("1"));

        // The failed create produced nothing, so the next event is the status write.
        let updated = rx.recv().await.unwrap();
        assert_eq!(updated.event_type, ResourceEventType::Updated);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_delete_carries_last_known_object() {
        let broadcaster = EventBroadcaster::new_shared();
        let store = EventedStore::new(EchoStore::default(), broadcaster.clone());
        let mut rx = broadcaster.subscribe();

        store.delete("Payload", &ObjectKey::new("default", "p1")).await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, ResourceEventType::Deleted);
        let doc = event.resource.unwrap();
        assert_eq!(doc["metadata"]["labels"]["a"], "b");
    }
}

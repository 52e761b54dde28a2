//! Maps watch events onto endpoint keys in the work queue.

use std::sync::Arc;

use async_trait::async_trait;
use erinnerung_core::events::{HookError, ResourceEvent, ResourceHook};
use erinnerung_core::resources::{DeliveryJobSpec, EndpointSpec, Kind, PayloadSpec};
use erinnerung_core::{ObjectKey, ObjectMeta};
use erinnerung_storage::{DynStore, ListParams, ResourceStoreExt};
use tracing::{debug, info};

use crate::matcher;
use crate::queue::WorkQueue;

const WATCHED_KINDS: &[&str] = &[EndpointSpec::KIND, PayloadSpec::KIND, DeliveryJobSpec::KIND];

/// Hook that enqueues the endpoints affected by a resource change.
///
/// - Endpoint events enqueue the endpoint itself.
/// - Payload events enqueue every endpoint in the payload's namespace whose
///   selector matches the payload's labels.
/// - Delivery job events enqueue the job's controlling endpoint.
/// - Dropped events enqueue every watched endpoint, since the affected ones
///   cannot be known.
///
/// ```ignore
/// let queue = WorkQueue::new_shared();
/// let trigger = ReconcileTrigger::new(store.clone(), queue.clone());
/// registry.register(Arc::new(trigger)).await;
/// ```
pub struct ReconcileTrigger {
    store: DynStore,
    queue: Arc<WorkQueue>,
    namespaces: Vec<String>,
}

impl ReconcileTrigger {
    pub fn new(store: DynStore, queue: Arc<WorkQueue>) -> Self {
        Self {
            store,
            queue,
            namespaces: Vec::new(),
        }
    }

    /// Restricts triggering to endpoints in `namespaces`. Empty means all.
    pub fn with_namespaces(mut self, namespaces: Vec<String>) -> Self {
        self.namespaces = namespaces;
        self
    }

    fn watches(&self, namespace: &str) -> bool {
        self.namespaces.is_empty() || self.namespaces.iter().any(|n| n == namespace)
    }

    /// Metadata of the object carried by the event, if any.
    fn metadata(event: &ResourceEvent) -> Result<Option<ObjectMeta>, HookError> {
        let Some(meta) = event.resource.as_ref().and_then(|doc| doc.get("metadata")) else {
            return Ok(None);
        };
        serde_json::from_value(meta.clone())
            .map(Some)
            .map_err(|e| HookError::execution(format!("malformed metadata: {e}")))
    }

    async fn enqueue(&self, key: ObjectKey) {
        debug!(namespace = %key.namespace, name = %key.name, "Enqueueing endpoint");
        self.queue.add(key).await;
    }
}

#[async_trait]
impl ResourceHook for ReconcileTrigger {
    fn name(&self) -> &str {
        "reconcile_trigger"
    }

    fn kinds(&self) -> &[&str] {
        WATCHED_KINDS
    }

    async fn handle(&self, event: &ResourceEvent) -> Result<(), HookError> {
        if !self.watches(&event.namespace) {
            return Ok(());
        }

        match event.kind.as_str() {
            EndpointSpec::KIND => self.enqueue(event.key()).await,
            PayloadSpec::KIND => {
                // Deleted payloads carry their last known labels.
                let labels = Self::metadata(event)?
                    .map(|meta| meta.labels)
                    .unwrap_or_default();
                let keys = matcher::endpoints_for(self.store.as_ref(), &event.namespace, &labels)
                    .await
                    .map_err(|e| HookError::store(e.to_string()))?;
                debug!(
                    payload = %event.name,
                    event_type = %event.event_type,
                    endpoints = keys.len(),
                    "Payload changed"
                );
                for key in keys {
                    self.enqueue(key).await;
                }
            }
            DeliveryJobSpec::KIND => {
                let owner = Self::metadata(event)?.and_then(|meta| {
                    meta.controller_owner()
                        .filter(|o| o.kind == EndpointSpec::KIND)
                        .map(|o| o.name.clone())
                });
                match owner {
                    Some(endpoint) => {
                        self.enqueue(ObjectKey::new(&event.namespace, endpoint))
                            .await
                    }
                    None => debug!(job = %event.name, "Job has no controlling endpoint"),
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn on_lagged(&self, missed: u64) -> Result<(), HookError> {
        let endpoints = self
            .store
            .list_as::<EndpointSpec>(&ListParams::new())
            .await
            .map_err(|e| HookError::store(e.to_string()))?;

        let mut count = 0;
        for endpoint in endpoints {
            if self.watches(endpoint.namespace()) {
                self.queue.add(endpoint.key()).await;
                count += 1;
            }
        }
        info!(missed, endpoints = count, "Events dropped, resynchronizing all endpoints");
        Ok(())
    }
}

impl std::fmt::Debug for ReconcileTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcileTrigger")
            .field("namespaces", &self.namespaces)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use erinnerung_core::events::{EventBroadcaster, HookDispatcher, HookRegistry};
    use erinnerung_core::resources::{Endpoint, Payload};
    use erinnerung_core::selector::LabelSelector;
    use erinnerung_core::OwnerReference;
    use erinnerung_db_memory::{InMemoryStore, create_store};
    use erinnerung_storage::{EventedStore, StoredObject};

    async fn trigger() -> (ReconcileTrigger, Arc<WorkQueue>, DynStore) {
        let store = create_store();
        let queue = WorkQueue::new_shared();
        for (name, team) in [("hook-x", "x"), ("hook-y", "y")] {
            let endpoint = Endpoint::new(
                ObjectMeta::new("default", name),
                EndpointSpec {
                    url: "https://example.com".into(),
                    selector: LabelSelector::from_labels([("team", team)]),
                    backoff_limit: None,
                },
            );
            store.create_as(&endpoint).await.unwrap();
        }
        (ReconcileTrigger::new(store.clone(), queue.clone()), queue, store)
    }

    fn doc<S: Kind>(object: &erinnerung_core::Object<S>) -> serde_json::Value {
        StoredObject::from_resource(object).unwrap().to_document()
    }

    #[tokio::test]
    async fn test_endpoint_event_enqueues_itself() {
        let (trigger, queue, _) = trigger().await;
        let key = ObjectKey::new("default", "hook-x");
        let event = ResourceEvent::updated(EndpointSpec::KIND, &key, serde_json::json!({}));

        trigger.handle(&event).await.unwrap();
        assert_eq!(queue.get().await, Some(key));
    }

    #[tokio::test]
    async fn test_payload_event_uses_reverse_lookup() {
        let (trigger, queue, _) = trigger().await;
        let payload = Payload::new(
            ObjectMeta::new("default", "p1").with_label("team", "y"),
            PayloadSpec::default(),
        );
        let event = ResourceEvent::created(PayloadSpec::KIND, &payload.key(), doc(&payload));

        trigger.handle(&event).await.unwrap();
        assert_eq!(queue.len().await, 1);
        assert_eq!(queue.get().await, Some(ObjectKey::new("default", "hook-y")));
    }

    #[tokio::test]
    async fn test_deleted_payload_still_triggers() {
        let (trigger, queue, _) = trigger().await;
        let payload = Payload::new(
            ObjectMeta::new("default", "p1").with_label("team", "x"),
            PayloadSpec::default(),
        );
        let event =
            ResourceEvent::deleted(PayloadSpec::KIND, &payload.key(), Some(doc(&payload)));

        trigger.handle(&event).await.unwrap();
        assert_eq!(queue.get().await, Some(ObjectKey::new("default", "hook-x")));
    }

    #[tokio::test]
    async fn test_job_event_enqueues_owner() {
        let (trigger, queue, _) = trigger().await;
        let job = erinnerung_core::DeliveryJob::new(
            ObjectMeta::new("default", "hook-y-p1-0123456789").with_owner(OwnerReference {
                kind: EndpointSpec::KIND.into(),
                name: "hook-y".into(),
                uid: "u".into(),
                controller: true,
            }),
            DeliveryJobSpec::default(),
        );
        let event = ResourceEvent::updated(DeliveryJobSpec::KIND, &job.key(), doc(&job));

        trigger.handle(&event).await.unwrap();
        assert_eq!(queue.get().await, Some(ObjectKey::new("default", "hook-y")));
    }

    #[tokio::test]
    async fn test_namespace_restriction() {
        let (trigger, queue, _) = trigger().await;
        let trigger = trigger.with_namespaces(vec!["other".into()]);
        let key = ObjectKey::new("default", "hook-x");
        let event = ResourceEvent::updated(EndpointSpec::KIND, &key, serde_json::json!({}));

        trigger.handle(&event).await.unwrap();
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_lag_enqueues_watched_endpoints() {
        let (trigger, queue, store) = trigger().await;
        let other = Endpoint::new(
            ObjectMeta::new("elsewhere", "hook-z"),
            EndpointSpec {
                url: "https://example.com".into(),
                ..Default::default()
            },
        );
        store.create_as(&other).await.unwrap();
        let trigger = trigger.with_namespaces(vec!["default".into()]);

        trigger.on_lagged(3).await.unwrap();
        assert_eq!(queue.len().await, 2);
        let mut keys = vec![queue.get().await.unwrap(), queue.get().await.unwrap()];
        keys.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(
            keys,
            vec![
                ObjectKey::new("default", "hook-x"),
                ObjectKey::new("default", "hook-y")
            ]
        );
    }

    #[tokio::test]
    async fn test_dropped_payload_event_still_enqueues_endpoint() {
        let broadcaster = Arc::new(EventBroadcaster::with_capacity(1));
        let store: DynStore =
            Arc::new(EventedStore::new(InMemoryStore::new(), broadcaster.clone()));
        for (name, team) in [("hook-x", "x"), ("hook-y", "y")] {
            let endpoint = Endpoint::new(
                ObjectMeta::new("default", name),
                EndpointSpec {
                    url: "https://example.com".into(),
                    selector: LabelSelector::from_labels([("team", team)]),
                    backoff_limit: None,
                },
            );
            store.create_as(&endpoint).await.unwrap();
        }

        let queue = WorkQueue::new_shared();
        let registry = Arc::new(HookRegistry::new());
        registry
            .register(Arc::new(ReconcileTrigger::new(store.clone(), queue.clone())))
            .await;

        // Two writes before the dispatcher polls overflow the channel.
        let receiver = broadcaster.subscribe();
        for (name, team) in [("p1", "x"), ("p2", "y")] {
            let payload = Payload::new(
                ObjectMeta::new("default", name).with_label("team", team),
                PayloadSpec::default(),
            );
            store.create_as(&payload).await.unwrap();
        }
        HookDispatcher::spawn(registry, receiver);

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while queue.len().await < 2 {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("endpoints were not enqueued");

        let mut names = vec![queue.get().await.unwrap().name, queue.get().await.unwrap().name];
        names.sort();
        assert_eq!(names, vec!["hook-x", "hook-y"]);
    }
}

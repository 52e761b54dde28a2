use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use papaya::HashMap as PapayaHashMap;
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::debug;

use erinnerung_core::{DEFAULT_NAMESPACE, ObjectKey, generate_uid, validate_name};
use erinnerung_storage::{Deletion, ListParams, ResourceStore, StorageError, StoredObject};

/// Map key: kind plus namespaced name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreKey {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl StoreKey {
    pub fn new(kind: &str, key: &ObjectKey) -> Self {
        Self {
            kind: kind.to_string(),
            namespace: key.namespace.clone(),
            name: key.name.clone(),
        }
    }

    fn of(object: &StoredObject) -> Self {
        Self {
            kind: object.kind.clone(),
            namespace: object.metadata.namespace.clone(),
            name: object.metadata.name.clone(),
        }
    }
}

/// In-memory [`ResourceStore`] backed by papaya maps.
///
/// Besides the objects themselves the store keeps an owner relation table,
/// `owner uid -> dependents`, filled from `ownerReferences` on create. Delete
/// walks it to remove dependents in cascade.
#[derive(Debug)]
pub struct InMemoryStore {
    objects: PapayaHashMap<StoreKey, StoredObject>,
    dependents: PapayaHashMap<String, Vec<StoreKey>>,
    version_counter: AtomicU64,
    /// Serializes writers. Readers go straight to the maps.
    write_lock: Mutex<()>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            objects: PapayaHashMap::new(),
            dependents: PapayaHashMap::new(),
            version_counter: AtomicU64::new(1),
            write_lock: Mutex::new(()),
        }
    }

    fn next_version(&self) -> String {
        self.version_counter
            .fetch_add(1, Ordering::SeqCst)
            .to_string()
    }

    pub fn count(&self) -> usize {
        self.objects.pin().len()
    }

    pub fn count_by_kind(&self, kind: &str) -> usize {
        self.objects
            .pin()
            .iter()
            .filter(|(key, _)| key.kind == kind)
            .count()
    }

    /// Dependents recorded for an owner uid.
    pub fn dependents_of(&self, owner_uid: &str) -> Vec<StoreKey> {
        self.dependents
            .pin()
            .get(owner_uid)
            .cloned()
            .unwrap_or_default()
    }

    fn current(&self, key: &StoreKey) -> Result<StoredObject, StorageError> {
        self.objects
            .pin()
            .get(key)
            .cloned()
            .ok_or_else(|| {
                StorageError::not_found(&key.kind, ObjectKey::new(&key.namespace, &key.name))
            })
    }

    fn check_version(current: &StoredObject, if_match: Option<&str>) -> Result<(), StorageError> {
        match (if_match, current.resource_version()) {
            (Some(expected), Some(actual)) if expected != actual => {
                Err(StorageError::version_conflict(expected, actual))
            }
            (Some(expected), None) => Err(StorageError::version_conflict(expected, "")),
            _ => Ok(()),
        }
    }

    fn record_owners(&self, object: &StoredObject) {
        let key = StoreKey::of(object);
        let dependents = self.dependents.pin();
        for owner in &object.metadata.owner_references {
            let mut list = dependents.get(&owner.uid).cloned().unwrap_or_default();
            if !list.contains(&key) {
                list.push(key.clone());
            }
            dependents.insert(owner.uid.clone(), list);
        }
    }

    fn forget_owners(&self, object: &StoredObject) {
        let key = StoreKey::of(object);
        let dependents = self.dependents.pin();
        for owner in &object.metadata.owner_references {
            if let Some(list) = dependents.get(&owner.uid) {
                let remaining: Vec<StoreKey> =
                    list.iter().filter(|k| **k != key).cloned().collect();
                if remaining.is_empty() {
                    dependents.remove(&owner.uid);
                } else {
                    dependents.insert(owner.uid.clone(), remaining);
                }
            }
        }
    }

    fn tombstone(&self, mut object: StoredObject, now: OffsetDateTime) -> StoredObject {
        if object.metadata.deletion_timestamp.is_none() {
            object.metadata.deletion_timestamp = Some(now);
            object.metadata.resource_version = Some(self.next_version());
            self.objects.pin().insert(StoreKey::of(&object), object.clone());
        }
        object
    }

    /// Removes `root` and walks the relation table breadth-first. Must be
    /// called with the write lock held.
    fn delete_cascade(&self, root: StoredObject) -> Deletion {
        let now = OffsetDateTime::now_utc();
        let mut deletion = Deletion::default();
        let mut queue = VecDeque::from([root]);

        while let Some(object) = queue.pop_front() {
            if !object.metadata.finalizers.is_empty() {
                deletion.tombstoned.push(self.tombstone(object, now));
                continue;
            }

            let key = StoreKey::of(&object);
            self.objects.pin().remove(&key);
            self.forget_owners(&object);

            if let Some(uid) = &object.metadata.uid {
                let children = self.dependents.pin().remove(uid).cloned().unwrap_or_default();
                let objects = self.objects.pin();
                for child in children {
                    if let Some(child_object) = objects.get(&child) {
                        queue.push_back(child_object.clone());
                    }
                }
            }

            debug!(
                kind = %key.kind,
                namespace = %key.namespace,
                name = %key.name,
                "Removed object"
            );
            deletion.removed.push(object);
        }

        deletion
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn get(&self, kind: &str, key: &ObjectKey) -> Result<Option<StoredObject>, StorageError> {
        Ok(self.objects.pin().get(&StoreKey::new(kind, key)).cloned())
    }

    async fn list(
        &self,
        kind: &str,
        params: &ListParams,
    ) -> Result<Vec<StoredObject>, StorageError> {
        let selector = params.selector.as_ref().map(|s| s.compile()).transpose()?;

        let guard = self.objects.pin();
        let mut matching: Vec<StoredObject> = guard
            .iter()
            .filter(|(key, _)| key.kind == kind)
            .filter(|(key, _)| {
                params
                    .namespace
                    .as_ref()
                    .is_none_or(|ns| &key.namespace == ns)
            })
            .filter(|(_, object)| {
                params.owner_uid.as_ref().is_none_or(|uid| {
                    object
                        .metadata
                        .owner_references
                        .iter()
                        .any(|o| &o.uid == uid)
                })
            })
            .filter(|(_, object)| {
                selector
                    .as_ref()
                    .is_none_or(|s| s.matches(&object.metadata.labels))
            })
            .map(|(_, object)| object.clone())
            .collect();

        matching.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(matching)
    }

    async fn create(&self, mut object: StoredObject) -> Result<StoredObject, StorageError> {
        validate_name(&object.metadata.name)
            .map_err(|e| StorageError::invalid_resource(e.to_string()))?;
        if object.metadata.namespace.is_empty() {
            object.metadata.namespace = DEFAULT_NAMESPACE.to_string();
        }

        let _guard = self.write_lock.lock().await;
        let key = StoreKey::of(&object);
        let objects = self.objects.pin();
        if objects.get(&key).is_some() {
            return Err(StorageError::already_exists(&object.kind, object.key()));
        }

        object.metadata.uid = Some(generate_uid());
        object.metadata.resource_version = Some(self.next_version());
        object.metadata.creation_timestamp = Some(OffsetDateTime::now_utc());
        object.metadata.deletion_timestamp = None;

        objects.insert(key, object.clone());
        self.record_owners(&object);
        Ok(object)
    }

    async fn update(
        &self,
        object: StoredObject,
        if_match: Option<&str>,
    ) -> Result<StoredObject, StorageError> {
        let _guard = self.write_lock.lock().await;
        let key = StoreKey::of(&object);
        let mut current = self.current(&key)?;
        Self::check_version(&current, if_match)?;

        self.forget_owners(&current);
        current.metadata.labels = object.metadata.labels;
        current.metadata.annotations = object.metadata.annotations;
        current.metadata.finalizers = object.metadata.finalizers;
        current.metadata.owner_references = object.metadata.owner_references;
        current.spec = object.spec;
        current.metadata.resource_version = Some(self.next_version());
        self.record_owners(&current);

        self.objects.pin().insert(key, current.clone());
        Ok(current)
    }

    async fn update_status(
        &self,
        kind: &str,
        key: &ObjectKey,
        status: Value,
        if_match: Option<&str>,
    ) -> Result<StoredObject, StorageError> {
        let _guard = self.write_lock.lock().await;
        let store_key = StoreKey::new(kind, key);
        let mut current = self.current(&store_key)?;
        Self::check_version(&current, if_match)?;

        current.status = status;
        current.metadata.resource_version = Some(self.next_version());
        self.objects.pin().insert(store_key, current.clone());
        Ok(current)
    }

    async fn delete(&self, kind: &str, key: &ObjectKey) -> Result<Deletion, StorageError> {
        let _guard = self.write_lock.lock().await;
        let current = self.current(&StoreKey::new(kind, key))?;
        Ok(self.delete_cascade(current))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

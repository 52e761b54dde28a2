//! The store contract every backend implements.

use async_trait::async_trait;
use serde_json::Value;

use erinnerung_core::ObjectKey;
use erinnerung_core::resources::{Kind, Object};

use crate::error::StorageError;
use crate::types::{Deletion, ListParams, StoredObject};

/// Persistence for resources, keyed by `(kind, namespace, name)`.
///
/// Backends provide optimistic concurrency through `resourceVersion`: every
/// successful write bumps it, and writes given a stale `if_match` fail with
/// [`StorageError::VersionConflict`]. No other locking is offered.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Returns `None` if the object does not exist. Errors are reserved for
    /// infrastructure failures.
    async fn get(&self, kind: &str, key: &ObjectKey) -> Result<Option<StoredObject>, StorageError>;

    /// Lists objects of `kind`, filtered server-side.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidSelector` if the selector does not compile.
    async fn list(
        &self,
        kind: &str,
        params: &ListParams,
    ) -> Result<Vec<StoredObject>, StorageError>;

    /// Creates an object, assigning uid, resource version and creation time.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::AlreadyExists` on a name collision.
    async fn create(&self, object: StoredObject) -> Result<StoredObject, StorageError>;

    /// Replaces labels, annotations, finalizers, owner references and spec.
    /// Status is left as stored.
    async fn update(
        &self,
        object: StoredObject,
        if_match: Option<&str>,
    ) -> Result<StoredObject, StorageError>;

    /// Replaces only the status of an object.
    async fn update_status(
        &self,
        kind: &str,
        key: &ObjectKey,
        status: Value,
        if_match: Option<&str>,
    ) -> Result<StoredObject, StorageError>;

    /// Deletes an object. Objects holding finalizers are tombstoned instead;
    /// removed objects take everything they own with them.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the object does not exist.
    async fn delete(&self, kind: &str, key: &ObjectKey) -> Result<Deletion, StorageError>;

    /// Name of this backend for logging.
    fn backend_name(&self) -> &'static str;
}

/// Typed helpers over any [`ResourceStore`].
#[async_trait]
pub trait ResourceStoreExt: ResourceStore {
    async fn get_as<S: Kind>(&self, key: &ObjectKey) -> Result<Option<Object<S>>, StorageError> {
        match self.get(S::KIND, key).await? {
            Some(stored) => Ok(Some(stored.into_resource()?)),
            None => Ok(None),
        }
    }

    async fn list_as<S: Kind>(&self, params: &ListParams) -> Result<Vec<Object<S>>, StorageError> {
        self.list(S::KIND, params)
            .await?
            .into_iter()
            .map(StoredObject::into_resource)
            .collect()
    }

    async fn create_as<S: Kind>(&self, object: &Object<S>) -> Result<Object<S>, StorageError> {
        let stored = StoredObject::from_resource(object)?;
        self.create(stored).await?.into_resource()
    }

    /// Writes `object.status`, guarded by the object's own resource version.
    async fn update_status_as<S: Kind>(
        &self,
        object: &Object<S>,
    ) -> Result<Object<S>, StorageError> {
        let status = serde_json::to_value(&object.status)?;
        self.update_status(
            S::KIND,
            &object.key(),
            status,
            object.metadata.resource_version.as_deref(),
        )
        .await?
        .into_resource()
    }
}

impl<T: ResourceStore + ?Sized> ResourceStoreExt for T {}

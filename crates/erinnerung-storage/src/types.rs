//! Stored document and list parameter types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use erinnerung_core::resources::{Kind, Object};
use erinnerung_core::selector::LabelSelector;
use erinnerung_core::{ObjectKey, ObjectMeta};

use crate::error::StorageError;

/// A resource as the store holds it: kind and metadata typed, spec and
/// status opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredObject {
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: Value,
    #[serde(default)]
    pub status: Value,
}

impl StoredObject {
    pub fn from_resource<S: Kind>(object: &Object<S>) -> Result<Self, StorageError> {
        Ok(Self {
            kind: S::KIND.to_string(),
            metadata: object.metadata.clone(),
            spec: serde_json::to_value(&object.spec)?,
            status: serde_json::to_value(&object.status)?,
        })
    }

    /// Decodes into a typed resource. Fails if the kinds differ.
    pub fn into_resource<S: Kind>(self) -> Result<Object<S>, StorageError> {
        if self.kind != S::KIND {
            return Err(StorageError::invalid_resource(format!(
                "expected kind {}, found {}",
                S::KIND,
                self.kind
            )));
        }
        Ok(Object {
            metadata: self.metadata,
            spec: decode_or_default(self.spec)?,
            status: decode_or_default(self.status)?,
        })
    }

    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    pub fn resource_version(&self) -> Option<&str> {
        self.metadata.resource_version.as_deref()
    }

    /// The document as published in watch events.
    pub fn to_document(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn decode_or_default<T: serde::de::DeserializeOwned + Default>(
    value: Value,
) -> Result<T, StorageError> {
    if value.is_null() {
        Ok(T::default())
    } else {
        Ok(serde_json::from_value(value)?)
    }
}

/// Server-side filters for [`crate::ResourceStore::list`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListParams {
    /// Restrict to one namespace; `None` lists across namespaces.
    pub namespace: Option<String>,
    /// Label selector evaluated against object labels.
    pub selector: Option<LabelSelector>,
    /// Only objects carrying an owner reference with this uid.
    pub owner_uid: Option<String>,
}

impl ListParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            ..Self::default()
        }
    }

    pub fn with_selector(mut self, selector: LabelSelector) -> Self {
        self.selector = Some(selector);
        self
    }

    pub fn owned_by(mut self, owner_uid: impl Into<String>) -> Self {
        self.owner_uid = Some(owner_uid.into());
        self
    }
}

/// Result of a delete call.
///
/// Objects holding finalizers are tombstoned (given a deletion timestamp)
/// rather than removed. This applies to the target and to every dependent
/// reached through owner references.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Deletion {
    /// Objects removed from the store, target first.
    pub removed: Vec<StoredObject>,
    /// Objects left in place with a deletion timestamp.
    pub tombstoned: Vec<StoredObject>,
}

impl Deletion {
    pub fn is_removed(&self, key: &ObjectKey) -> bool {
        self.removed.iter().any(|o| &o.key() == key)
    }
}

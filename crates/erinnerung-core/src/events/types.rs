//! Watch events emitted after successful store writes.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::meta::ObjectKey;

/// Type of resource change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceEventType {
    Created,
    Updated,
    Deleted,
}

impl ResourceEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceEventType::Created => "created",
            ResourceEventType::Updated => "updated",
            ResourceEventType::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for ResourceEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A change to a stored resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceEvent {
    pub event_type: ResourceEventType,
    /// Resource kind, e.g. "Endpoint" or "Payload"
    pub kind: String,
    pub namespace: String,
    pub name: String,
    /// Resource version after the write; `None` for deletions
    pub resource_version: Option<String>,
    /// Last known document. Deletions carry the object as it was removed so
    /// watchers can still read its labels and owners.
    pub resource: Option<serde_json::Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl ResourceEvent {
    pub fn new(
        event_type: ResourceEventType,
        kind: impl Into<String>,
        key: &ObjectKey,
        resource: Option<serde_json::Value>,
    ) -> Self {
        Self {
            event_type,
            kind: kind.into(),
            namespace: key.namespace.clone(),
            name: key.name.clone(),
            resource_version: None,
            resource,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    pub fn created(kind: impl Into<String>, key: &ObjectKey, resource: serde_json::Value) -> Self {
        Self::new(ResourceEventType::Created, kind, key, Some(resource))
    }

    pub fn updated(kind: impl Into<String>, key: &ObjectKey, resource: serde_json::Value) -> Self {
        Self::new(ResourceEventType::Updated, kind, key, Some(resource))
    }

    pub fn deleted(
        kind: impl Into<String>,
        key: &ObjectKey,
        last_known: Option<serde_json::Value>,
    ) -> Self {
        Self::new(ResourceEventType::Deleted, kind, key, last_known)
    }

    pub fn with_version(mut self, resource_version: impl Into<String>) -> Self {
        self.resource_version = Some(resource_version.into());
        self
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }

    /// Check if this event matches a filter by kind.
    pub fn matches_kind(&self, filter: Option<&str>) -> bool {
        match filter {
            Some(k) => self.kind == k,
            None => true,
        }
    }

    /// Check if this event matches a filter by event type.
    pub fn matches_event_type(&self, filter: Option<ResourceEventType>) -> bool {
        match filter {
            Some(t) => self.event_type == t,
            None => true,
        }
    }
}

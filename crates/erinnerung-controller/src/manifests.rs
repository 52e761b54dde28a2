//! Applies resource manifests from a JSON file.
//!
//! The file holds either an array of resources or an object with an `items`
//! array. Each resource is `{kind, metadata, spec}`; status is ignored.
//! Existing objects get their spec and labels replaced.

use std::path::Path;

use erinnerung_core::resources::{EndpointSpec, Kind, PayloadSpec};
use erinnerung_core::{CoreError, DEFAULT_NAMESPACE, ObjectMeta};
use erinnerung_storage::{ResourceStore, StoredObject};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::error::ManifestError;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ManifestFile {
    List(Vec<Manifest>),
    Items { items: Vec<Manifest> },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: Value,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ApplySummary {
    pub created: usize,
    pub updated: usize,
}

pub fn parse(text: &str, origin: &str) -> Result<Vec<Manifest>, ManifestError> {
    let file: ManifestFile = serde_json::from_str(text).map_err(|source| ManifestError::Parse {
        path: origin.to_string(),
        source,
    })?;
    Ok(match file {
        ManifestFile::List(items) | ManifestFile::Items { items } => items,
    })
}

pub async fn load_and_apply(
    store: &dyn ResourceStore,
    path: &Path,
    default_backoff_limit: u32,
) -> Result<ApplySummary, ManifestError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ManifestError::Read {
            path: path.display().to_string(),
            source,
        })?;
    let manifests = parse(&text, &path.display().to_string())?;
    apply(store, manifests, default_backoff_limit).await
}

/// Admits and writes each manifest in order.
pub async fn apply(
    store: &dyn ResourceStore,
    manifests: Vec<Manifest>,
    default_backoff_limit: u32,
) -> Result<ApplySummary, ManifestError> {
    let mut summary = ApplySummary::default();

    for manifest in manifests {
        let object = admit(manifest, default_backoff_limit)?;
        let key = object.key();
        match store.get(&object.kind, &key).await? {
            None => {
                store.create(object).await?;
                summary.created += 1;
            }
            Some(existing) => {
                let mut replacement = existing;
                replacement.metadata.labels = object.metadata.labels;
                replacement.metadata.annotations = object.metadata.annotations;
                replacement.spec = object.spec;
                store.update(replacement, None).await?;
                summary.updated += 1;
            }
        }
    }

    info!(
        created = summary.created,
        updated = summary.updated,
        "Manifests applied"
    );
    Ok(summary)
}

/// Checks the kind, fills defaults and drops anything the store assigns.
fn admit(manifest: Manifest, default_backoff_limit: u32) -> Result<StoredObject, ManifestError> {
    let Manifest {
        kind,
        mut metadata,
        mut spec,
    } = manifest;

    if metadata.namespace.is_empty() {
        metadata.namespace = DEFAULT_NAMESPACE.to_string();
    }
    metadata.uid = None;
    metadata.resource_version = None;
    metadata.creation_timestamp = None;
    metadata.deletion_timestamp = None;

    match kind.as_str() {
        EndpointSpec::KIND => {
            let mut endpoint: EndpointSpec =
                serde_json::from_value(spec).map_err(CoreError::from)?;
            endpoint.backoff_limit.get_or_insert(default_backoff_limit);
            spec = serde_json::to_value(endpoint).map_err(CoreError::from)?;
        }
        PayloadSpec::KIND => {
            let payload: PayloadSpec = serde_json::from_value(spec).map_err(CoreError::from)?;
            spec = serde_json::to_value(payload).map_err(CoreError::from)?;
        }
        other => return Err(CoreError::unknown_kind(other).into()),
    }

    Ok(StoredObject {
        kind,
        metadata,
        spec,
        status: Value::Null,
    })
}

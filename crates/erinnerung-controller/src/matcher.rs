//! Selector matching in both directions.
//!
//! Forward: an endpoint's selector picks the payloads in its namespace.
//! Reverse: a payload's labels pick the endpoints whose selectors match them,
//! so that a payload change re-triggers every endpoint depending on it.

use std::collections::BTreeMap;

use erinnerung_core::resources::{Endpoint, EndpointSpec, Payload, PayloadSpec};
use erinnerung_core::ObjectKey;
use erinnerung_storage::{ListParams, ResourceStore, ResourceStoreExt, StorageError};
use tracing::warn;

use crate::error::ReconcileError;

/// Payloads in the endpoint's namespace matched by its selector.
///
/// The selector is compiled up front so a malformed selector surfaces as
/// [`ReconcileError::Selector`] rather than as a store error.
pub async fn payloads_for<S>(store: &S, endpoint: &Endpoint) -> Result<Vec<Payload>, ReconcileError>
where
    S: ResourceStore + ?Sized,
{
    endpoint
        .spec
        .selector
        .compile()
        .map_err(|source| ReconcileError::Selector {
            key: endpoint.key().to_string(),
            source,
        })?;

    let params =
        ListParams::in_namespace(endpoint.namespace())
            .with_selector(endpoint.spec.selector.clone());
    let payloads = store.list_as::<PayloadSpec>(&params).await?;
    Ok(payloads)
}

/// Keys of the endpoints in `namespace` whose selector matches `labels`.
///
/// Endpoints carrying a malformed selector are skipped with a warning; their
/// own reconcile pass reports the problem.
pub async fn endpoints_for<S>(
    store: &S,
    namespace: &str,
    labels: &BTreeMap<String, String>,
) -> Result<Vec<ObjectKey>, StorageError>
where
    S: ResourceStore + ?Sized,
{
    let endpoints = store
        .list_as::<EndpointSpec>(&ListParams::in_namespace(namespace))
        .await?;

    let mut keys = Vec::new();
    for endpoint in endpoints {
        match endpoint.spec.selector.compile() {
            Ok(selector) if selector.matches(labels) => keys.push(endpoint.key()),
            Ok(_) => {}
            Err(e) => {
                warn!(
                    namespace = %endpoint.namespace(),
                    name = %endpoint.name(),
                    error = %e,
                    "Skipping endpoint with malformed selector"
                );
            }
        }
    }
    Ok(keys)
}

//! Delivery job construction.

use erinnerung_core::resources::{
    DeliveryJob, DeliveryJobSpec, Endpoint, Payload, ENDPOINT_NAME_LABEL, PAYLOAD_NAME_LABEL,
};
use erinnerung_core::meta::ObjectMeta;
use sha2::{Digest, Sha256};

use crate::error::ReconcileError;

/// Job names double as label values, so they share the label length limit.
const MAX_JOB_NAME: usize = 63;
const HASH_LEN: usize = 10;

/// Deterministic job name for an `(endpoint, payload)` pair.
///
/// The readable prefix is truncated to fit; the hash suffix keeps distinct
/// pairs apart even when their prefixes collide.
pub fn job_name(endpoint: &str, payload: &str) -> String {
    let digest = Sha256::digest(format!("{endpoint}/{payload}").as_bytes());
    let hash = &hex::encode(digest)[..HASH_LEN];

    let budget = MAX_JOB_NAME - HASH_LEN - 1;
    let prefix: String = format!("{endpoint}-{payload}").chars().take(budget).collect();
    let prefix = prefix.trim_end_matches(['-', '.']);

    format!("{prefix}-{hash}")
}

/// Builds the job delivering `payload` to `endpoint`, owned by the endpoint.
pub fn build_job(endpoint: &Endpoint, payload: &Payload) -> Result<DeliveryJob, ReconcileError> {
    let owner = endpoint.controller_reference().ok_or_else(|| {
        ReconcileError::Invalid(format!("endpoint {} has no uid", endpoint.key()))
    })?;

    let metadata = ObjectMeta::new(endpoint.namespace(), job_name(endpoint.name(), payload.name()))
        .with_label(PAYLOAD_NAME_LABEL, payload.name())
        .with_label(ENDPOINT_NAME_LABEL, endpoint.name())
        .with_owner(owner);

    Ok(DeliveryJob::new(
        metadata,
        DeliveryJobSpec {
            endpoint: endpoint.name().to_string(),
            payload: payload.name().to_string(),
            url: endpoint.spec.url.clone(),
            data: payload.spec.data.clone(),
            backoff_limit: endpoint.backoff_limit(),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use erinnerung_core::meta::validate_name;
    use erinnerung_core::resources::{EndpointSpec, PayloadSpec, DEFAULT_BACKOFF_LIMIT};

    #[test]
    fn test_job_name_is_deterministic() {
        assert_eq!(job_name("hook", "p1"), job_name("hook", "p1"));
        assert_ne!(job_name("hook", "p1"), job_name("hook", "p2"));
        assert!(job_name("hook", "p1").starts_with("hook-p1-"));
    }

    #[test]
    fn test_job_name_separates_ambiguous_pairs() {
        // Both pairs render the same readable prefix.
        assert_ne!(job_name("a-b", "c"), job_name("a", "b-c"));
    }

    #[test]
    fn test_long_names_are_truncated() {
        let long = "x".repeat(200);
        let name = job_name(&long, &long);
        assert_eq!(name.len(), MAX_JOB_NAME);
        assert!(validate_name(&name).is_ok());
        assert_ne!(name, job_name(&long, "other"));
    }

    #[test]
    fn test_build_job() {
        let mut endpoint = Endpoint::new(
            ObjectMeta::new("ns", "hook"),
            EndpointSpec {
                url: "https://example.com/cb".into(),
                ..Default::default()
            },
        );
        let payload = Payload::new(
            ObjectMeta::new("ns", "abc123"),
            PayloadSpec {
                data: "{\"x\":1}".into(),
                ..Default::default()
            },
        );

        assert!(matches!(
            build_job(&endpoint, &payload),
            Err(ReconcileError::Invalid(_))
        ));

        endpoint.metadata.uid = Some("uid-1".into());
        let job = build_job(&endpoint, &payload).unwrap();
        assert_eq!(job.namespace(), "ns");
        assert_eq!(job.name(), job_name("hook", "abc123"));
        assert_eq!(job.payload_name(), Some("abc123"));
        assert_eq!(job.metadata.controller_owner().unwrap().uid, "uid-1");
        assert_eq!(job.spec.data, "{\"x\":1}");
        assert_eq!(job.spec.url, "https://example.com/cb");
        assert_eq!(job.spec.backoff_limit, DEFAULT_BACKOFF_LIMIT);
    }
}

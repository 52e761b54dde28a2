//! Resource kinds managed by Erinnerung.
//!
//! Every resource is an [`Object`] parameterized by its spec type. The spec
//! type carries the kind name and the status type through [`Kind`], so an
//! `Endpoint` is simply `Object<EndpointSpec>`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use time::OffsetDateTime;

use crate::conditions::Conditions;
use crate::meta::{ObjectKey, ObjectMeta, OwnerReference};
use crate::phase::Phase;
use crate::selector::LabelSelector;

/// Backoff limit applied to delivery jobs when the endpoint does not set one.
pub const DEFAULT_BACKOFF_LIMIT: u32 = 6;

/// Label carried by a delivery job naming the payload it serves.
pub const PAYLOAD_NAME_LABEL: &str = "erinnerung.io/payload-name";

/// Label carried by a delivery job naming the endpoint that created it.
pub const ENDPOINT_NAME_LABEL: &str = "erinnerung.io/endpoint-name";

/// Condition types written onto an endpoint's ledger.
pub mod endpoint_conditions {
    pub const URL: &str = "URL";
    pub const NO_ASSOCIATED_PAYLOADS: &str = "NoAssociatedPayloads";
    pub const ASSOCIATED_PAYLOADS: &str = "AssociatedPayloads";
}

/// Condition types written onto a payload's ledger.
pub mod payload_conditions {
    pub const SENDING: &str = "Sending";
    pub const COMPLETE: &str = "Complete";
    pub const FAILED: &str = "Failed";
}

/// Completion conditions reported by the delivery executor on a job.
pub mod job_conditions {
    pub const COMPLETE: &str = "Complete";
    pub const FAILED: &str = "Failed";
}

/// Binds a spec type to its kind name and status type.
pub trait Kind:
    Serialize + DeserializeOwned + Clone + Debug + Default + PartialEq + Send + Sync + 'static
{
    const KIND: &'static str;

    type Status: Serialize
        + DeserializeOwned
        + Clone
        + Debug
        + Default
        + PartialEq
        + Send
        + Sync
        + 'static;
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(bound(serialize = "S: Kind", deserialize = "S: Kind"))]
pub struct Object<S: Kind> {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: S,
    #[serde(default)]
    pub status: S::Status,
}

impl<S: Kind> Object<S> {
    pub fn new(metadata: ObjectMeta, spec: S) -> Self {
        Self {
            metadata,
            spec,
            status: S::Status::default(),
        }
    }

    pub fn kind(&self) -> &'static str {
        S::KIND
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    /// Owner reference pointing at this object, flagged as controller.
    /// `None` until the store has assigned a uid.
    pub fn controller_reference(&self) -> Option<OwnerReference> {
        self.metadata.uid.as_ref().map(|uid| OwnerReference {
            kind: S::KIND.to_string(),
            name: self.metadata.name.clone(),
            uid: uid.clone(),
            controller: true,
        })
    }
}

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSpec {
    /// Target address. Format is checked on every pass.
    #[serde(default)]
    pub url: String,
    /// Selects the payloads delivered to this endpoint.
    #[serde(default)]
    pub selector: LabelSelector,
    /// Failed attempts tolerated per delivery job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointStatus {
    #[serde(default)]
    pub conditions: Conditions,
    #[serde(default)]
    pub phase: Phase,
}

impl Kind for EndpointSpec {
    const KIND: &'static str = "Endpoint";
    type Status = EndpointStatus;
}

pub type Endpoint = Object<EndpointSpec>;

impl Endpoint {
    pub fn backoff_limit(&self) -> u32 {
        self.spec.backoff_limit.unwrap_or(DEFAULT_BACKOFF_LIMIT)
    }
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadSpec {
    #[serde(default)]
    pub data: String,
    /// Stored as given; association is decided by endpoint selectors.
    #[serde(default)]
    pub selector: LabelSelector,
}

/// Summary of a payload's ledger, kept beside the conditions for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PayloadAggregate {
    #[default]
    Pending,
    Sending,
    Complete,
    Failed,
}

impl PayloadAggregate {
    pub fn from_conditions(conditions: &Conditions) -> Self {
        use payload_conditions::*;
        if conditions.is_true(COMPLETE) {
            Self::Complete
        } else if conditions.is_true(FAILED) {
            Self::Failed
        } else if conditions.is_true(SENDING) {
            Self::Sending
        } else {
            Self::Pending
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadStatus {
    #[serde(default)]
    pub conditions: Conditions,
    #[serde(default)]
    pub aggregate: PayloadAggregate,
    /// Outcome observed per endpoint name, one entry per finished job.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub deliveries: BTreeMap<String, JobOutcome>,
}

impl Kind for PayloadSpec {
    const KIND: &'static str = "Payload";
    type Status = PayloadStatus;
}

pub type Payload = Object<PayloadSpec>;

impl Payload {
    /// Complete or Failed has been recorded.
    pub fn is_terminal(&self) -> bool {
        self.status.conditions.is_true(payload_conditions::COMPLETE)
            || self.status.conditions.is_true(payload_conditions::FAILED)
    }

    /// A job from `endpoint` has finished for this payload.
    pub fn delivered_to(&self, endpoint: &str) -> bool {
        self.status.deliveries.contains_key(endpoint)
    }

    /// Records `endpoint`'s outcome. The first recorded outcome per endpoint
    /// is kept. Returns `true` if the status changed.
    pub fn record_delivery(&mut self, endpoint: &str, outcome: JobOutcome) -> bool {
        if self.delivered_to(endpoint) {
            return false;
        }
        self.status.deliveries.insert(endpoint.to_string(), outcome);
        true
    }
}

// ---------------------------------------------------------------------------
// DeliveryJob
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryJobSpec {
    pub endpoint: String,
    pub payload: String,
    pub url: String,
    #[serde(default)]
    pub data: String,
    #[serde(default = "default_backoff_limit")]
    pub backoff_limit: u32,
}

fn default_backoff_limit() -> u32 {
    DEFAULT_BACKOFF_LIMIT
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryJobStatus {
    #[serde(default)]
    pub active: u32,
    #[serde(default)]
    pub succeeded: u32,
    #[serde(default)]
    pub failed: u32,
    #[serde(default)]
    pub conditions: Conditions,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub start_time: Option<OffsetDateTime>,
    /// When the current attempt claimed the job.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub claim_time: Option<OffsetDateTime>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub completion_time: Option<OffsetDateTime>,
}

impl Kind for DeliveryJobSpec {
    const KIND: &'static str = "DeliveryJob";
    type Status = DeliveryJobStatus;
}

pub type DeliveryJob = Object<DeliveryJobSpec>;

/// Terminal outcome reported by a delivery job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobOutcome {
    Complete,
    Failed,
}

impl DeliveryJob {
    pub fn outcome(&self) -> Option<JobOutcome> {
        if self.status.conditions.is_true(job_conditions::COMPLETE) {
            Some(JobOutcome::Complete)
        } else if self.status.conditions.is_true(job_conditions::FAILED) {
            Some(JobOutcome::Failed)
        } else {
            None
        }
    }

    pub fn is_finished(&self) -> bool {
        self.outcome().is_some()
    }

    pub fn is_active(&self) -> bool {
        self.status.active > 0
    }

    /// Name of the payload this job serves, read from its labels.
    pub fn payload_name(&self) -> Option<&str> {
        self.metadata
            .labels
            .get(PAYLOAD_NAME_LABEL)
            .map(String::as_str)
    }
}

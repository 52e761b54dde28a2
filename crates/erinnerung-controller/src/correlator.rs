//! Maps delivery jobs back to the payloads they serve.
//!
//! The correlation key is the payload name, carried by every job in the
//! [`PAYLOAD_NAME_LABEL`] label. Every finished job is recorded on the
//! payload under its endpoint, which is what keeps an endpoint from
//! dispatching the same payload twice. The payload's Complete or Failed
//! condition is set by the first finished job and never flipped afterwards.

use std::collections::{BTreeSet, HashMap};

use erinnerung_core::resources::payload_conditions::{COMPLETE, FAILED, SENDING};
use erinnerung_core::resources::{
    DeliveryJob, JobOutcome, Payload, PayloadAggregate, PAYLOAD_NAME_LABEL,
};
use erinnerung_core::ConditionStatus;
use tracing::debug;

/// Result of correlating one endpoint's jobs with its payloads.
#[derive(Debug, Default)]
pub struct Correlation {
    /// Payload names that have at least one job.
    pub correlated: BTreeSet<String>,
    /// Indices into the payload slice whose ledger changed.
    pub changed: BTreeSet<usize>,
}

impl Correlation {
    pub fn has_job(&self, payload: &str) -> bool {
        self.correlated.contains(payload)
    }
}

/// Folds job state into the payload ledgers.
pub fn correlate(jobs: &[DeliveryJob], payloads: &mut [Payload]) -> Correlation {
    let mut out = Correlation::default();
    let index: HashMap<String, usize> = payloads
        .iter()
        .enumerate()
        .map(|(i, p)| (p.name().to_string(), i))
        .collect();

    for job in jobs {
        let Some(payload_name) = job.payload_name() else {
            debug!(
                job = %job.name(),
                label = PAYLOAD_NAME_LABEL,
                "Ignoring job without payload label"
            );
            continue;
        };
        out.correlated.insert(payload_name.to_string());

        // The job outlived the payload's match, e.g. after a selector change.
        let Some(&i) = index.get(payload_name) else {
            continue;
        };

        if apply_job(&mut payloads[i], job) {
            out.changed.insert(i);
        }
    }

    out
}

/// Applies one job's observable state to its payload. Returns `true` if the
/// payload status changed.
pub fn apply_job(payload: &mut Payload, job: &DeliveryJob) -> bool {
    let outcome = job.outcome();
    let mut changed = match outcome {
        Some(outcome) => payload.record_delivery(&job.spec.endpoint, outcome),
        None => false,
    };
    if payload.is_terminal() {
        return changed;
    }

    let name = job.name();
    let conditions = &mut payload.status.conditions;
    changed |= match outcome {
        Some(JobOutcome::Complete) => {
            let set =
                conditions.set(COMPLETE, ConditionStatus::True, name, "delivery job completed");
            conditions.set(SENDING, ConditionStatus::False, name, "delivery finished") || set
        }
        Some(JobOutcome::Failed) => {
            let set = conditions.set(FAILED, ConditionStatus::True, name, "delivery job failed");
            conditions.set(SENDING, ConditionStatus::False, name, "delivery finished") || set
        }
        None if job.is_active() => {
            conditions.set(SENDING, ConditionStatus::True, name, "delivery job is active")
        }
        None => false,
    };

    let aggregate = PayloadAggregate::from_conditions(&payload.status.conditions);
    if payload.status.aggregate != aggregate {
        payload.status.aggregate = aggregate;
        changed = true;
    }
    changed
}

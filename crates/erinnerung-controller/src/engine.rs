//! The reconcile engine.
//!
//! One pass drives one endpoint from whatever is stored towards its desired
//! state:
//!
//! ```text
//! fetch -> deleting? -> validate url -> associate payloads
//!       -> correlate jobs -> classify -> dispatch -> persist status
//! ```
//!
//! Nothing survives between passes except persisted status, so a pass can be
//! repeated or abandoned at any point. Status is written once, at the end,
//! and only when it changed.

use std::collections::BTreeSet;
use std::time::Duration;

use erinnerung_core::resources::endpoint_conditions::{
    ASSOCIATED_PAYLOADS, NO_ASSOCIATED_PAYLOADS, URL,
};
use erinnerung_core::resources::{
    DeliveryJob, DeliveryJobSpec, Endpoint, EndpointSpec, EndpointStatus, Payload,
};
use erinnerung_core::{ConditionStatus, ObjectKey, Phase};
use erinnerung_storage::{DynStore, ListParams, ResourceStoreExt, StorageError};
use tracing::{debug, error, info, instrument, warn};

use crate::classifier::classify;
use crate::correlator::{self, Correlation};
use crate::error::{DispatchFailure, ReconcileError};
use crate::jobs;
use crate::matcher;

/// Delay used whenever a pass ends with a retryable error.
pub const DEFAULT_REQUEUE_AFTER: Duration = Duration::from_secs(10);

/// What the caller should do with the key after a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Done,
    RequeueNow,
    RequeueAfter(Duration),
}

/// State threaded through the steps of a single pass.
#[derive(Debug)]
pub struct PassContext {
    pub endpoint: Endpoint,
    /// Status as fetched, used to skip no-op writes.
    observed: EndpointStatus,
    pub payloads: Vec<Payload>,
    changed_payloads: BTreeSet<usize>,
}

impl PassContext {
    fn new(endpoint: Endpoint) -> Self {
        Self {
            observed: endpoint.status.clone(),
            endpoint,
            payloads: Vec::new(),
            changed_payloads: BTreeSet::new(),
        }
    }

    fn set_condition(
        &mut self,
        type_: &str,
        status: ConditionStatus,
        reason: &str,
        message: impl Into<String>,
    ) {
        self.endpoint
            .status
            .conditions
            .set(type_, status, reason, message);
    }
}

pub struct Reconciler {
    store: DynStore,
    requeue_after: Duration,
}

impl Reconciler {
    pub fn new(store: DynStore) -> Self {
        Self {
            store,
            requeue_after: DEFAULT_REQUEUE_AFTER,
        }
    }

    pub fn with_requeue_after(mut self, requeue_after: Duration) -> Self {
        self.requeue_after = requeue_after;
        self
    }

    pub fn store(&self) -> &DynStore {
        &self.store
    }

    pub fn requeue_after(&self) -> Duration {
        self.requeue_after
    }

    /// Runs one pass for the endpoint at `key`.
    ///
    /// # Errors
    ///
    /// - `Fetch` if the endpoint could not be read; retry immediately.
    /// - `Selector` if the endpoint's selector is malformed.
    /// - `Dispatch` if one or more jobs could not be created. Every other
    ///   payload was still dispatched and status was persisted.
    /// - `Store` if listing payloads or jobs failed.
    ///
    /// A conflicting status write is not an error: it yields
    /// [`Action::RequeueNow`].
    #[instrument(skip(self), fields(namespace = %key.namespace, name = %key.name))]
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Action, ReconcileError> {
        let endpoint = match self.store.get_as::<EndpointSpec>(key).await {
            Ok(Some(endpoint)) => endpoint,
            Ok(None) => {
                debug!("Endpoint not found, nothing to reconcile");
                return Ok(Action::Done);
            }
            Err(source) => {
                error!(error = %source, "Unable to fetch endpoint");
                return Err(ReconcileError::Fetch {
                    key: key.to_string(),
                    source,
                });
            }
        };

        if endpoint.metadata.is_deleting() {
            info!("Endpoint is being deleted, skipping reconcile");
            return Ok(Action::Done);
        }

        let mut ctx = PassContext::new(endpoint);
        let outcome = self.run(&mut ctx).await;
        self.finish(ctx, outcome).await
    }

    async fn run(&self, ctx: &mut PassContext) -> Result<Action, ReconcileError> {
        if let Some(action) = self.validate_spec(ctx) {
            return Ok(action);
        }

        self.associate_payloads(ctx).await?;

        let jobs = self.owned_jobs(&ctx.endpoint).await?;
        let correlation = correlator::correlate(&jobs, &mut ctx.payloads);
        ctx.changed_payloads.extend(correlation.changed.iter().copied());

        self.dispatch(ctx, &correlation).await
    }

    /// Checks the target address. Returns the action to stop with when the
    /// address is unusable.
    fn validate_spec(&self, ctx: &mut PassContext) -> Option<Action> {
        let address = ctx.endpoint.spec.url.trim().to_string();
        if address.is_empty() {
            warn!("Endpoint URL is empty");
            ctx.set_condition(
                URL,
                ConditionStatus::False,
                "unparsableURL",
                "the provided URL is empty",
            );
            return Some(Action::Done);
        }

        match url::Url::parse(&address) {
            Ok(_) => {
                ctx.set_condition(URL, ConditionStatus::True, "GoodUrl", "the provided URL good");
                None
            }
            Err(e) => {
                warn!(url = %address, error = %e, "Endpoint URL not parsable");
                ctx.set_condition(
                    URL,
                    ConditionStatus::False,
                    "unparsableURL",
                    format!("the provided URL is not parsable: {e}"),
                );
                Some(Action::RequeueAfter(self.requeue_after))
            }
        }
    }

    async fn associate_payloads(&self, ctx: &mut PassContext) -> Result<(), ReconcileError> {
        let payloads = match matcher::payloads_for(self.store.as_ref(), &ctx.endpoint).await {
            Ok(payloads) => payloads,
            Err(e) => {
                error!(error = %e, "Unable to list associated payloads");
                return Err(e);
            }
        };

        if payloads.is_empty() {
            ctx.endpoint.status.conditions.remove(ASSOCIATED_PAYLOADS);
            ctx.set_condition(
                NO_ASSOCIATED_PAYLOADS,
                ConditionStatus::True,
                "NoAssociatedPayloads",
                "there is not associated Payload for this Endpoint",
            );
        } else {
            ctx.endpoint.status.conditions.remove(NO_ASSOCIATED_PAYLOADS);
            ctx.set_condition(
                ASSOCIATED_PAYLOADS,
                ConditionStatus::True,
                "AssociatedPayloads",
                format!(
                    "there is {} associated Payload for this Endpoint",
                    payloads.len()
                ),
            );
        }
        ctx.endpoint.status.phase = Phase::aggregate(&ctx.endpoint.status.conditions);
        ctx.payloads = payloads;
        Ok(())
    }

    async fn owned_jobs(
        &self,
        endpoint: &Endpoint,
    ) -> Result<Vec<DeliveryJob>, ReconcileError> {
        let Some(uid) = endpoint.metadata.uid.as_deref() else {
            return Ok(Vec::new());
        };
        let params = ListParams::in_namespace(endpoint.namespace()).owned_by(uid);
        Ok(self.store.list_as::<DeliveryJobSpec>(&params).await?)
    }

    async fn dispatch(
        &self,
        ctx: &PassContext,
        correlation: &Correlation,
    ) -> Result<Action, ReconcileError> {
        let classes = classify(&ctx.payloads);
        debug!(
            needs_delivery = classes.needs_delivery.len(),
            in_flight = classes.in_flight.len(),
            delivered = classes.delivered.len(),
            failed = classes.failed.len(),
            "Classified payloads"
        );

        // Each endpoint delivers every matched payload once, whatever the
        // payload's aggregate says about other endpoints.
        let endpoint = ctx.endpoint.name();
        let mut failures = Vec::new();
        for payload in &ctx.payloads {
            if correlation.has_job(payload.name()) || payload.delivered_to(endpoint) {
                continue;
            }

            let job = jobs::build_job(&ctx.endpoint, payload)?;
            match self.store.create_as(&job).await {
                Ok(created) => {
                    info!(
                        job = %created.name(),
                        payload = %payload.name(),
                        "Dispatched delivery job"
                    );
                }
                Err(e) if e.is_already_exists() => {
                    debug!(
                        job = %job.name(),
                        payload = %payload.name(),
                        "Delivery job already exists"
                    );
                }
                Err(error) => {
                    warn!(
                        job = %job.name(),
                        payload = %payload.name(),
                        error = %error,
                        "Failed to create delivery job"
                    );
                    failures.push(DispatchFailure {
                        job: job.name().to_string(),
                        payload: payload.name().to_string(),
                        error,
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(Action::Done)
        } else {
            Err(ReconcileError::Dispatch { failures })
        }
    }

    /// Persists status and turns the pass outcome into the final result.
    async fn finish(
        &self,
        mut ctx: PassContext,
        outcome: Result<Action, ReconcileError>,
    ) -> Result<Action, ReconcileError> {
        if let Err(e) = self.persist(&mut ctx).await {
            info!(reason = %e, "Unable to update status, retrying");
            return Ok(Action::RequeueNow);
        }
        outcome
    }

    async fn persist(&self, ctx: &mut PassContext) -> Result<(), StorageError> {
        for &i in &ctx.changed_payloads {
            let payload = &ctx.payloads[i];
            self.store.update_status_as(payload).await?;
            debug!(
                payload = %payload.name(),
                aggregate = ?payload.status.aggregate,
                "Payload status updated"
            );
        }

        ctx.endpoint.status.phase = Phase::aggregate(&ctx.endpoint.status.conditions);
        if ctx.endpoint.status != ctx.observed {
            let updated = self.store.update_status_as(&ctx.endpoint).await?;
            debug!(phase = %updated.status.phase, "Endpoint status updated");
            ctx.observed = updated.status;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("backend", &self.store.backend_name())
            .field("requeue_after", &self.requeue_after)
            .finish()
    }
}

//! Background executor for delivery jobs.
//!
//! Polls the store for jobs that are neither finished nor active and runs
//! one attempt per job per poll. A claim that is older than the claim
//! timeout counts as abandoned, so a job whose outcome could not be written
//! is picked up again.

use std::sync::Arc;
use std::time::Duration;

use erinnerung_core::resources::job_conditions::{COMPLETE, FAILED};
use erinnerung_core::resources::{DeliveryJob, DeliveryJobSpec};
use erinnerung_core::{ConditionStatus, ObjectKey};
use erinnerung_storage::{DynStore, ListParams, ResourceStoreExt};
use time::OffsetDateTime;
use tokio::sync::watch;

use super::{DeliveryChannel, DeliveryResult};
use crate::error::DeliveryError;

pub struct DeliveryExecutor {
    store: DynStore,
    channel: Arc<dyn DeliveryChannel>,
    /// Jobs attempted per poll
    batch_size: usize,
    /// Poll interval when no job is runnable
    poll_interval: Duration,
    /// Age after which an active claim is considered abandoned
    claim_timeout: Duration,
}

impl DeliveryExecutor {
    pub fn new(store: DynStore, channel: Arc<dyn DeliveryChannel>) -> Self {
        Self {
            store,
            channel,
            batch_size: 10,
            poll_interval: Duration::from_secs(1),
            claim_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_claim_timeout(mut self, timeout: Duration) -> Self {
        self.claim_timeout = timeout;
        self
    }

    /// Start the executor with a shutdown signal.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(channel = self.channel.name(), "Starting delivery executor");

        loop {
            match self.process_batch().await {
                Ok(processed) if processed > 0 => {
                    tracing::debug!(count = processed, "Processed delivery jobs");
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Error processing delivery jobs"),
            }

            tokio::select! {
                biased;

                result = shutdown.changed() => {
                    match result {
                        Ok(()) if *shutdown.borrow() => {
                            tracing::info!("Delivery executor shutting down");
                            break;
                        }
                        Ok(()) => {}
                        Err(_) => {
                            tracing::info!("Delivery executor shutdown channel closed");
                            break;
                        }
                    }
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// Attempts every runnable job, up to the batch size. Returns the number
    /// of attempts made.
    ///
    /// Only listing the jobs fails the batch. A job whose claim or outcome
    /// write fails is logged and skipped; it becomes runnable again once its
    /// claim is released or expires.
    pub async fn process_batch(&self) -> Result<u32, DeliveryError> {
        let jobs = self
            .store
            .list_as::<DeliveryJobSpec>(&ListParams::new())
            .await?;

        let now = OffsetDateTime::now_utc();
        let runnable = jobs
            .into_iter()
            .filter(|j| self.is_runnable(j, now))
            .take(self.batch_size);

        let mut processed = 0;
        for job in runnable {
            let claimed = match self.claim(job).await {
                Ok(Some(claimed)) => claimed,
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to claim delivery job");
                    continue;
                }
            };

            let result = match self.channel.deliver(&claimed).await {
                Ok(result) => result,
                Err(e) => DeliveryResult::network_failure(e.to_string(), 0),
            };
            processed += 1;

            let key = claimed.key();
            if let Err(e) = self.record(claimed, result).await {
                tracing::error!(job = %key, error = %e, "Failed to record delivery outcome");
                self.release(&key).await;
            }
        }
        Ok(processed)
    }

    fn is_runnable(&self, job: &DeliveryJob, now: OffsetDateTime) -> bool {
        if job.is_finished() || job.metadata.is_deleting() {
            return false;
        }
        if !job.is_active() {
            return true;
        }
        let claimed_at = job.status.claim_time.or(job.status.start_time);
        claimed_at.is_some_and(|at| at < now - self.claim_timeout)
    }

    /// Marks the job active. `None` if another writer got there first.
    async fn claim(&self, mut job: DeliveryJob) -> Result<Option<DeliveryJob>, DeliveryError> {
        let now = OffsetDateTime::now_utc();
        job.status.active = 1;
        job.status.claim_time = Some(now);
        job.status.start_time.get_or_insert(now);

        match self.store.update_status_as(&job).await {
            Ok(claimed) => Ok(Some(claimed)),
            Err(e) if e.is_version_conflict() || e.is_not_found() => {
                tracing::debug!(job = %job.name(), reason = %e, "Job claimed elsewhere, skipping");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Drops this executor's claim so the job is attempted again on the next
    /// poll. Failures are logged; the claim then expires on its own.
    async fn release(&self, key: &ObjectKey) {
        let job = match self.store.get_as::<DeliveryJobSpec>(key).await {
            Ok(Some(job)) => job,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(job = %key, error = %e, "Unable to release delivery job claim");
                return;
            }
        };
        if job.is_finished() {
            return;
        }

        let mut job = job;
        job.status.active = 0;
        job.status.claim_time = None;
        if let Err(e) = self.store.update_status_as(&job).await {
            tracing::warn!(job = %key, error = %e, "Unable to release delivery job claim");
        }
    }

    async fn record(
        &self,
        mut job: DeliveryJob,
        result: DeliveryResult,
    ) -> Result<(), DeliveryError> {
        let now = OffsetDateTime::now_utc();
        let status = &mut job.status;
        status.active = 0;
        status.claim_time = None;

        if result.success {
            status.succeeded += 1;
            status.conditions.set(
                COMPLETE,
                ConditionStatus::True,
                "DeliverySucceeded",
                match result.http_status {
                    Some(code) => format!("target answered HTTP {code}"),
                    None => "delivered".to_string(),
                },
            );
            status.completion_time = Some(now);
            tracing::info!(
                namespace = %job.metadata.namespace,
                job = %job.metadata.name,
                payload = %job.spec.payload,
                "Delivery job complete"
            );
        } else {
            status.failed += 1;
            let error = result.error.unwrap_or_default();
            if status.failed > job.spec.backoff_limit {
                status.conditions.set(
                    FAILED,
                    ConditionStatus::True,
                    "BackoffLimitExceeded",
                    format!("{} failed attempts, last error: {error}", status.failed),
                );
                status.completion_time = Some(now);
                tracing::warn!(
                    namespace = %job.metadata.namespace,
                    job = %job.metadata.name,
                    payload = %job.spec.payload,
                    failed = status.failed,
                    "Delivery job failed permanently"
                );
            } else {
                tracing::debug!(
                    job = %job.metadata.name,
                    failed = status.failed,
                    backoff_limit = job.spec.backoff_limit,
                    error = %error,
                    "Delivery attempt failed"
                );
            }
        }

        match self.store.update_status_as(&job).await {
            Ok(_) => Ok(()),
            // The owning endpoint was deleted mid-attempt.
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for DeliveryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryExecutor")
            .field("channel", &self.channel.name())
            .field("batch_size", &self.batch_size)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use erinnerung_core::ObjectMeta;
    use erinnerung_db_memory::create_store;
    use erinnerung_storage::{Deletion, ResourceStore, StorageError, StoredObject};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` attempts, then succeeds.
    struct ScriptedChannel {
        failures: u32,
        attempts: AtomicU32,
    }

    impl ScriptedChannel {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures,
                attempts: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl DeliveryChannel for ScriptedChannel {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn deliver(&self, _job: &DeliveryJob) -> Result<DeliveryResult, DeliveryError> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Ok(DeliveryResult::http_failure(500, "HTTP 500: nope".into(), 1))
            } else {
                Ok(DeliveryResult::success(204, 1))
            }
        }
    }

    async fn seed(store: &DynStore, backoff_limit: u32) -> DeliveryJob {
        let job = DeliveryJob::new(
            ObjectMeta::new("default", "hook-p1-0123456789"),
            DeliveryJobSpec {
                endpoint: "hook".into(),
                payload: "p1".into(),
                url: "http://localhost/cb".into(),
                data: "{}".into(),
                backoff_limit,
            },
        );
        store.create_as(&job).await.unwrap()
    }

    async fn reload(store: &DynStore, job: &DeliveryJob) -> DeliveryJob {
        store.get_as::<DeliveryJobSpec>(&job.key()).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_success_completes_job() {
        let store = create_store();
        let job = seed(&store, 6).await;
        let executor = DeliveryExecutor::new(store.clone(), ScriptedChannel::new(0));

        assert_eq!(executor.process_batch().await.unwrap(), 1);
        let job = reload(&store, &job).await;
        assert!(job.status.conditions.is_true(COMPLETE));
        assert_eq!(job.status.succeeded, 1);
        assert_eq!(job.status.active, 0);
        assert!(job.status.start_time.is_some());
        assert!(job.status.completion_time.is_some());

        // Finished jobs are not attempted again.
        assert_eq!(executor.process_batch().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failures_until_backoff_limit() {
        let store = create_store();
        let job = seed(&store, 1).await;
        let channel = ScriptedChannel::new(u32::MAX);
        let executor = DeliveryExecutor::new(store.clone(), channel.clone());

        executor.process_batch().await.unwrap();
        let after_first = reload(&store, &job).await;
        assert_eq!(after_first.status.failed, 1);
        assert!(!after_first.is_finished());

        executor.process_batch().await.unwrap();
        let after_second = reload(&store, &job).await;
        assert_eq!(after_second.status.failed, 2);
        let failed = after_second.status.conditions.get(FAILED).unwrap();
        assert!(failed.is_true());
        assert_eq!(failed.reason, "BackoffLimitExceeded");

        assert_eq!(executor.process_batch().await.unwrap(), 0);
        assert_eq!(channel.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let store = create_store();
        let job = seed(&store, 6).await;
        let executor = DeliveryExecutor::new(store.clone(), ScriptedChannel::new(2));

        for _ in 0..3 {
            executor.process_batch().await.unwrap();
        }
        let job = reload(&store, &job).await;
        assert_eq!(job.status.failed, 2);
        assert_eq!(job.status.succeeded, 1);
        assert_eq!(job.outcome(), Some(erinnerung_core::JobOutcome::Complete));
    }

    #[tokio::test]
    async fn test_active_jobs_are_left_alone() {
        let store = create_store();
        let mut job = seed(&store, 6).await;
        job.status.active = 1;
        store.update_status_as(&job).await.unwrap();

        let channel = ScriptedChannel::new(0);
        let executor = DeliveryExecutor::new(store.clone(), channel.clone());
        assert_eq!(executor.process_batch().await.unwrap(), 0);
        assert_eq!(channel.attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stale_claim_is_skipped() {
        let store = create_store();
        let stale = seed(&store, 6).await;
        // Someone else writes first, bumping the version.
        store.update_status_as(&stale).await.unwrap();

        let executor = DeliveryExecutor::new(store.clone(), ScriptedChannel::new(0));
        assert!(executor.claim(stale).await.unwrap().is_none());
    }

    /// Fails the status write numbered `fail_at` (zero-based), passes the rest.
    struct FlakyStatusStore {
        inner: DynStore,
        fail_at: u32,
        writes: AtomicU32,
    }

    #[async_trait]
    impl ResourceStore for FlakyStatusStore {
        async fn get(
            &self,
            kind: &str,
            key: &ObjectKey,
        ) -> Result<Option<StoredObject>, StorageError> {
            self.inner.get(kind, key).await
        }

        async fn list(
            &self,
            kind: &str,
            params: &ListParams,
        ) -> Result<Vec<StoredObject>, StorageError> {
            self.inner.list(kind, params).await
        }

        async fn create(&self, object: StoredObject) -> Result<StoredObject, StorageError> {
            self.inner.create(object).await
        }

        async fn update(
            &self,
            object: StoredObject,
            if_match: Option<&str>,
        ) -> Result<StoredObject, StorageError> {
            self.inner.update(object, if_match).await
        }

        async fn update_status(
            &self,
            kind: &str,
            key: &ObjectKey,
            status: serde_json::Value,
            if_match: Option<&str>,
        ) -> Result<StoredObject, StorageError> {
            if self.writes.fetch_add(1, Ordering::SeqCst) == self.fail_at {
                return Err(StorageError::unavailable("transient"));
            }
            self.inner.update_status(kind, key, status, if_match).await
        }

        async fn delete(&self, kind: &str, key: &ObjectKey) -> Result<Deletion, StorageError> {
            self.inner.delete(kind, key).await
        }

        fn backend_name(&self) -> &'static str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn test_failed_outcome_write_releases_claim() {
        let inner = create_store();
        let job = seed(&inner, 6).await;
        // Write 0 claims the job, write 1 records the outcome.
        let store: DynStore = Arc::new(FlakyStatusStore {
            inner: inner.clone(),
            fail_at: 1,
            writes: AtomicU32::new(0),
        });
        let channel = ScriptedChannel::new(0);
        let executor = DeliveryExecutor::new(store, channel.clone());

        assert_eq!(executor.process_batch().await.unwrap(), 1);
        let after_first = reload(&inner, &job).await;
        assert_eq!(after_first.status.active, 0);
        assert!(!after_first.is_finished());

        assert_eq!(executor.process_batch().await.unwrap(), 1);
        let job = reload(&inner, &job).await;
        assert!(job.status.conditions.is_true(COMPLETE));
        assert_eq!(channel.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_write_does_not_abandon_batch() {
        let inner = create_store();
        let first = seed(&inner, 6).await;
        let second = DeliveryJob::new(
            ObjectMeta::new("default", "hook-p2-0123456789"),
            DeliveryJobSpec {
                endpoint: "hook".into(),
                payload: "p2".into(),
                url: "http://localhost/cb".into(),
                data: "{}".into(),
                backoff_limit: 6,
            },
        );
        let second = inner.create_as(&second).await.unwrap();

        // The first claim fails outright.
        let store: DynStore = Arc::new(FlakyStatusStore {
            inner: inner.clone(),
            fail_at: 0,
            writes: AtomicU32::new(0),
        });
        let executor = DeliveryExecutor::new(store, ScriptedChannel::new(0));

        assert_eq!(executor.process_batch().await.unwrap(), 1);
        let finished = [reload(&inner, &first).await, reload(&inner, &second).await]
            .iter()
            .filter(|j| j.is_finished())
            .count();
        assert_eq!(finished, 1);

        executor.process_batch().await.unwrap();
        assert!(reload(&inner, &first).await.is_finished());
        assert!(reload(&inner, &second).await.is_finished());
    }

    #[tokio::test]
    async fn test_expired_claim_is_retried() {
        let store = create_store();
        let mut job = seed(&store, 6).await;
        job.status.active = 1;
        job.status.claim_time = Some(OffsetDateTime::now_utc() - Duration::from_secs(120));
        let job = store.update_status_as(&job).await.unwrap();

        let channel = ScriptedChannel::new(0);
        let executor = DeliveryExecutor::new(store.clone(), channel.clone())
            .with_claim_timeout(Duration::from_secs(60));
        assert_eq!(executor.process_batch().await.unwrap(), 1);

        let job = reload(&store, &job).await;
        assert!(job.status.conditions.is_true(COMPLETE));
        assert_eq!(job.status.active, 0);
        assert!(job.status.claim_time.is_none());
    }
}

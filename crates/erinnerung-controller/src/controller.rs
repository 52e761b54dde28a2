//! Worker pool driving the reconcile engine from the work queue.

use std::sync::Arc;
use std::time::Duration;

use erinnerung_core::resources::EndpointSpec;
use erinnerung_core::ObjectKey;
use erinnerung_storage::{ListParams, ResourceStoreExt, StorageError};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::ControllerConfig;
use crate::engine::{Action, Reconciler};
use crate::queue::WorkQueue;

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub workers: usize,
    pub requeue_after: Duration,
    pub pass_timeout: Duration,
    /// `None` disables periodic resync.
    pub resync_interval: Option<Duration>,
    /// Empty means every namespace.
    pub namespaces: Vec<String>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self::from(&ControllerConfig::default())
    }
}

impl From<&ControllerConfig> for ControllerSettings {
    fn from(cfg: &ControllerConfig) -> Self {
        Self {
            workers: cfg.workers,
            requeue_after: Duration::from_secs(cfg.requeue_after_secs),
            pass_timeout: Duration::from_secs(cfg.pass_timeout_secs),
            resync_interval: (cfg.resync_interval_secs > 0)
                .then(|| Duration::from_secs(cfg.resync_interval_secs)),
            namespaces: cfg.namespaces.clone(),
        }
    }
}

pub struct Controller {
    reconciler: Arc<Reconciler>,
    queue: Arc<WorkQueue>,
    settings: ControllerSettings,
}

impl Controller {
    pub fn new(
        reconciler: Reconciler,
        queue: Arc<WorkQueue>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            reconciler: Arc::new(reconciler),
            queue,
            settings,
        }
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    /// Enqueues every endpoint in the watched namespaces.
    pub async fn enqueue_all(&self) -> Result<usize, StorageError> {
        let endpoints = self
            .reconciler
            .store()
            .list_as::<EndpointSpec>(&ListParams::new())
            .await?;

        let mut count = 0;
        for endpoint in endpoints {
            if self.watches(endpoint.namespace()) {
                self.queue.add(endpoint.key()).await;
                count += 1;
            }
        }
        Ok(count)
    }

    fn watches(&self, namespace: &str) -> bool {
        let namespaces = &self.settings.namespaces;
        namespaces.is_empty() || namespaces.iter().any(|n| n == namespace)
    }

    /// Runs the workers until `shutdown` flips to `true` or its sender is
    /// dropped. In-flight passes are allowed to finish.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            workers = self.settings.workers,
            requeue_after_secs = self.settings.requeue_after.as_secs(),
            namespaces = ?self.settings.namespaces,
            "Starting controller"
        );

        match self.enqueue_all().await {
            Ok(count) => info!(count, "Initial sync enqueued endpoints"),
            Err(e) => error!(error = %e, "Initial sync failed"),
        }

        let mut workers = JoinSet::new();
        for id in 0..self.settings.workers {
            let worker = Worker {
                id,
                reconciler: self.reconciler.clone(),
                queue: self.queue.clone(),
                requeue_after: self.settings.requeue_after,
                pass_timeout: self.settings.pass_timeout,
            };
            workers.spawn(worker.run());
        }

        let this = Arc::new(self);
        if let Some(interval) = this.settings.resync_interval {
            let resync = this.clone();
            let mut stop = shutdown.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            match resync.enqueue_all().await {
                                Ok(count) => debug!(count, "Resync enqueued endpoints"),
                                Err(e) => warn!(error = %e, "Resync failed"),
                            }
                        }
                        result = stop.changed() => {
                            if result.is_err() || *stop.borrow() {
                                break;
                            }
                        }
                    }
                }
            });
        }

        loop {
            match shutdown.changed().await {
                Ok(()) if *shutdown.borrow() => break,
                Ok(()) => continue,
                Err(_) => break,
            }
        }

        info!("Controller shutting down");
        this.queue.shutdown().await;
        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Worker task failed");
            }
        }
        info!("Controller stopped");
    }
}

struct Worker {
    id: usize,
    reconciler: Arc<Reconciler>,
    queue: Arc<WorkQueue>,
    requeue_after: Duration,
    pass_timeout: Duration,
}

impl Worker {
    async fn run(self) {
        debug!(worker = self.id, "Worker started");
        while let Some(key) = self.queue.get().await {
            self.process(&key).await;
            self.queue.done(&key).await;
        }
        debug!(worker = self.id, "Worker stopped");
    }

    async fn process(&self, key: &ObjectKey) {
        let outcome = tokio::time::timeout(self.pass_timeout, self.reconciler.reconcile(key)).await;

        match outcome {
            Ok(Ok(Action::Done)) => {}
            Ok(Ok(Action::RequeueNow)) => self.queue.add(key.clone()).await,
            Ok(Ok(Action::RequeueAfter(delay))) => self.queue.add_after(key.clone(), delay),
            Ok(Err(e)) if e.retry_immediately() => {
                warn!(
                    namespace = %key.namespace,
                    name = %key.name,
                    error = %e,
                    "Reconcile failed, retrying"
                );
                self.queue.add(key.clone()).await;
            }
            Ok(Err(e)) => {
                error!(
                    namespace = %key.namespace,
                    name = %key.name,
                    error = %e,
                    retry_after_secs = self.requeue_after.as_secs(),
                    "Reconcile failed"
                );
                self.queue.add_after(key.clone(), self.requeue_after);
            }
            Err(_) => {
                warn!(
                    namespace = %key.namespace,
                    name = %key.name,
                    timeout_secs = self.pass_timeout.as_secs(),
                    "Reconcile pass timed out"
                );
                self.queue.add_after(key.clone(), self.requeue_after);
            }
        }
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("settings", &self.settings)
            .finish()
    }
}

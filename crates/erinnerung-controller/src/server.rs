//! Wires the store, watch hooks, controller and delivery executor together.

use std::path::Path;
use std::sync::Arc;

use erinnerung_core::events::{EventBroadcaster, HookDispatcher, HookRegistry};
use erinnerung_db_memory::InMemoryStore;
use erinnerung_storage::{DynStore, EventedStore};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::AppConfig;
use crate::controller::{Controller, ControllerSettings};
use crate::delivery::{DeliveryChannel, DeliveryExecutor, HttpDeliveryChannel};
use crate::engine::Reconciler;
use crate::manifests;
use crate::queue::WorkQueue;
use crate::trigger::ReconcileTrigger;

pub struct ServerBuilder {
    config: AppConfig,
    channel: Option<Arc<dyn DeliveryChannel>>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
            channel: None,
        }
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.config = cfg;
        self
    }

    /// Replaces the HTTP delivery channel.
    pub fn with_channel(mut self, channel: Arc<dyn DeliveryChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    pub async fn build(self) -> anyhow::Result<ErinnerungServer> {
        let cfg = self.config;
        let broadcaster = EventBroadcaster::new_shared();
        let store: DynStore =
            Arc::new(EventedStore::new(InMemoryStore::new(), broadcaster.clone()));
        let queue = WorkQueue::new_shared();

        let registry = Arc::new(HookRegistry::new());
        let trigger = ReconcileTrigger::new(store.clone(), queue.clone())
            .with_namespaces(cfg.controller.namespaces.clone());
        registry.register(Arc::new(trigger)).await;
        let dispatcher = HookDispatcher::spawn(registry, broadcaster.subscribe());

        if let Some(path) = &cfg.manifests.path {
            let summary = manifests::load_and_apply(
                store.as_ref(),
                Path::new(path),
                cfg.delivery.default_backoff_limit,
            )
            .await?;
            tracing::info!(
                path = %path,
                created = summary.created,
                updated = summary.updated,
                "Startup manifests loaded"
            );
        }

        let settings = ControllerSettings::from(&cfg.controller);
        let reconciler = Reconciler::new(store.clone()).with_requeue_after(settings.requeue_after);
        let controller = Controller::new(reconciler, queue, settings);

        let executor = if cfg.delivery.enabled {
            let channel: Arc<dyn DeliveryChannel> = match self.channel {
                Some(channel) => channel,
                None => Arc::new(HttpDeliveryChannel::new(&cfg.delivery)?),
            };
            Some(
                DeliveryExecutor::new(store.clone(), channel)
                    .with_poll_interval(cfg.delivery.poll_interval())
                    .with_claim_timeout(cfg.delivery.request_timeout() * 2),
            )
        } else {
            tracing::info!("Delivery executor disabled");
            None
        };

        Ok(ErinnerungServer {
            store,
            controller,
            executor,
            dispatcher,
        })
    }
}

pub struct ErinnerungServer {
    store: DynStore,
    controller: Controller,
    executor: Option<DeliveryExecutor>,
    dispatcher: JoinHandle<()>,
}

impl ErinnerungServer {
    /// Store shared by every component. Writes through it trigger reconciles.
    pub fn store(&self) -> &DynStore {
        &self.store
    }

    /// Runs until `shutdown` flips to `true`.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let executor = self
            .executor
            .map(|executor| tokio::spawn(executor.run(shutdown.clone())));

        self.controller.run(shutdown).await;

        if let Some(handle) = executor {
            handle.await?;
        }
        self.dispatcher.abort();
        tracing::info!("Erinnerung stopped");
        Ok(())
    }

    /// Runs until Ctrl+C.
    pub async fn run_until_signal(self) -> anyhow::Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        });
        self.run(shutdown_rx).await
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

//! Hook registry and the dispatcher task feeding it.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, error, info, warn};

use super::hooks::ResourceHook;
use super::types::ResourceEvent;

const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(30);

/// Registered hooks plus the per-invocation timeout applied to each.
pub struct HookRegistry {
    hooks: RwLock<Vec<Arc<dyn ResourceHook>>>,
    timeout: Duration,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_HOOK_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            hooks: RwLock::new(Vec::new()),
            timeout,
        }
    }

    pub async fn register(&self, hook: Arc<dyn ResourceHook>) {
        let name = hook.name().to_string();
        self.hooks.write().await.push(hook);
        debug!(hook = %name, "Registered resource hook");
    }

    pub async fn hook_count(&self) -> usize {
        self.hooks.read().await.len()
    }

    async fn matching(&self, event: &ResourceEvent) -> Vec<Arc<dyn ResourceHook>> {
        let hooks = self.hooks.read().await;
        hooks.iter().filter(|h| h.matches(event)).cloned().collect()
    }

    /// Runs every matching hook in its own task, guarded by the registry
    /// timeout and a panic catcher. Failures are logged only.
    pub async fn dispatch(&self, event: &ResourceEvent) {
        let hooks = self.matching(event).await;
        if hooks.is_empty() {
            return;
        }

        let timeout = self.timeout;
        for hook in hooks {
            let event = event.clone();
            tokio::spawn(async move {
                let hook_name = hook.name().to_string();
                let result = tokio::time::timeout(timeout, async {
                    AssertUnwindSafe(hook.handle(&event)).catch_unwind().await
                })
                .await;

                match result {
                    Ok(Ok(Ok(()))) => {
                        debug!(
                            hook = %hook_name,
                            kind = %event.kind,
                            name = %event.name,
                            "Hook handled event"
                        );
                    }
                    Ok(Ok(Err(e))) => {
                        warn!(hook = %hook_name, error = %e, "Hook execution failed");
                    }
                    Ok(Err(panic)) => {
                        let panic_msg = if let Some(s) = panic.downcast_ref::<&str>() {
                            s.to_string()
                        } else if let Some(s) = panic.downcast_ref::<String>() {
                            s.clone()
                        } else {
                            "Unknown panic".to_string()
                        };
                        error!(hook = %hook_name, panic = %panic_msg, "Hook panicked");
                    }
                    Err(_) => {
                        error!(
                            hook = %hook_name,
                            timeout_secs = timeout.as_secs(),
                            "Hook timed out"
                        );
                    }
                }
            });
        }
    }

    pub async fn on_start(&self) {
        for hook in self.hooks.read().await.iter() {
            if let Err(e) = hook.on_start().await {
                warn!(hook = %hook.name(), error = %e, "Hook on_start failed");
            }
        }
    }

    /// Tells every hook that `missed` events were dropped.
    pub async fn on_lagged(&self, missed: u64) {
        for hook in self.hooks.read().await.iter() {
            if let Err(e) = hook.on_lagged(missed).await {
                warn!(hook = %hook.name(), missed, error = %e, "Hook on_lagged failed");
            }
        }
    }

    pub async fn on_shutdown(&self) {
        for hook in self.hooks.read().await.iter() {
            if let Err(e) = hook.on_shutdown().await {
                warn!(hook = %hook.name(), error = %e, "Hook on_shutdown failed");
            }
        }
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Consumes a broadcast receiver and forwards each event to the registry.
pub struct HookDispatcher {
    registry: Arc<HookRegistry>,
}

impl HookDispatcher {
    pub fn new(registry: Arc<HookRegistry>) -> Self {
        Self { registry }
    }

    /// Runs until the channel closes.
    pub async fn run(self, mut receiver: broadcast::Receiver<ResourceEvent>) {
        info!("Starting hook dispatcher");
        self.registry.on_start().await;

        loop {
            match receiver.recv().await {
                Ok(event) => self.registry.dispatch(&event).await,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "Dispatcher lagged, missed events");
                    self.registry.on_lagged(n).await;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Hook dispatcher channel closed, stopping");
                    break;
                }
            }
        }

        self.registry.on_shutdown().await;
    }

    pub fn registry(&self) -> &Arc<HookRegistry> {
        &self.registry
    }

    /// Spawns the dispatcher onto the current runtime.
    pub fn spawn(
        registry: Arc<HookRegistry>,
        receiver: broadcast::Receiver<ResourceEvent>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(Self::new(registry).run(receiver))
    }
}

pub mod classifier;
pub mod config;
pub mod controller;
pub mod correlator;
pub mod delivery;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod manifests;
pub mod matcher;
pub mod observability;
pub mod queue;
pub mod server;
pub mod trigger;

pub use config::{AppConfig, ControllerConfig, DeliveryConfig, LoggingConfig, ManifestsConfig};
pub use controller::{Controller, ControllerSettings};
pub use delivery::{DeliveryChannel, DeliveryExecutor, DeliveryResult, HttpDeliveryChannel};
pub use engine::{Action, DEFAULT_REQUEUE_AFTER, PassContext, Reconciler};
pub use error::{DeliveryError, DispatchFailure, ManifestError, ReconcileError};
pub use jobs::job_name;
pub use observability::{apply_logging_level, init_tracing};
pub use queue::WorkQueue;
pub use server::{ErinnerungServer, ServerBuilder};
pub use trigger::ReconcileTrigger;

use erinnerung_core::{CoreError, SelectorError};
use erinnerung_storage::StorageError;
use thiserror::Error;

/// Failure of a single reconcile pass.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("unable to fetch {key}: {source}")]
    Fetch {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("invalid selector on {key}: {source}")]
    Selector {
        key: String,
        #[source]
        source: SelectorError,
    },

    #[error("store error: {0}")]
    Store(#[from] StorageError),

    #[error("failed to dispatch {} delivery job(s): {}", failures.len(), summarize(failures))]
    Dispatch { failures: Vec<DispatchFailure> },

    #[error("invalid resource: {0}")]
    Invalid(String),
}

impl ReconcileError {
    /// Fetch failures are retried at once; everything else waits for the
    /// configured requeue delay.
    pub fn retry_immediately(&self) -> bool {
        matches!(self, Self::Fetch { .. })
    }
}

impl From<CoreError> for ReconcileError {
    fn from(err: CoreError) -> Self {
        Self::Invalid(err.to_string())
    }
}

#[derive(Debug)]
pub struct DispatchFailure {
    pub job: String,
    pub payload: String,
    pub error: StorageError,
}

fn summarize(failures: &[DispatchFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.job, f.error))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Store error: {0}")]
    Store(#[from] StorageError),
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Resource(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_fetch_retries_immediately() {
        let fetch = ReconcileError::Fetch {
            key: "default/hook".into(),
            source: StorageError::unavailable("down"),
        };
        assert!(fetch.retry_immediately());
        assert!(!ReconcileError::Store(StorageError::internal("x")).retry_immediately());
    }

    #[test]
    fn test_dispatch_error_lists_jobs() {
        let err = ReconcileError::Dispatch {
            failures: vec![DispatchFailure {
                job: "hook-p1-abc".into(),
                payload: "p1".into(),
                error: StorageError::internal("boom"),
            }],
        };
        let text = err.to_string();
        assert!(text.contains("1 delivery job"));
        assert!(text.contains("hook-p1-abc"));
    }
}

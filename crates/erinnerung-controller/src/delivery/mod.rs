//! Reference delivery executor.
//!
//! Stands in for the external job runner: claims pending delivery jobs,
//! POSTs their payload to the target address and reports back only through
//! the job status (`active`, `succeeded`, `failed` and the Complete/Failed
//! conditions).

pub mod http;
pub mod processor;

pub use http::HttpDeliveryChannel;
pub use processor::DeliveryExecutor;

use async_trait::async_trait;
use erinnerung_core::resources::DeliveryJob;

use crate::error::DeliveryError;

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResult {
    pub success: bool,
    pub http_status: Option<u16>,
    pub response_time_ms: u32,
    pub error: Option<String>,
}

impl DeliveryResult {
    pub fn success(http_status: u16, response_time_ms: u32) -> Self {
        Self {
            success: true,
            http_status: Some(http_status),
            response_time_ms,
            error: None,
        }
    }

    pub fn http_failure(http_status: u16, error: String, response_time_ms: u32) -> Self {
        Self {
            success: false,
            http_status: Some(http_status),
            response_time_ms,
            error: Some(error),
        }
    }

    pub fn network_failure(error: String, response_time_ms: u32) -> Self {
        Self {
            success: false,
            http_status: None,
            response_time_ms,
            error: Some(error),
        }
    }
}

/// Transport used to deliver a job's payload.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Channel name for logging.
    fn name(&self) -> &str;

    /// Performs one attempt. Transport-level failures are reported as an
    /// unsuccessful [`DeliveryResult`]; `Err` is reserved for requests that
    /// could not be built at all.
    async fn deliver(&self, job: &DeliveryJob) -> Result<DeliveryResult, DeliveryError>;
}

//! HTTP POST delivery channel.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use erinnerung_core::resources::DeliveryJob;
use hmac::{Hmac, Mac};
use reqwest::{Client, header};
use sha2::Sha256;

use super::{DeliveryChannel, DeliveryResult};
use crate::config::DeliveryConfig;
use crate::error::DeliveryError;

type HmacSha256 = Hmac<Sha256>;

pub const DELIVERY_HEADER: &str = "X-Erinnerung-Delivery";
pub const PAYLOAD_HEADER: &str = "X-Erinnerung-Payload";
pub const SIGNATURE_HEADER: &str = "X-Signature-256";

pub struct HttpDeliveryChannel {
    client: Client,
    content_type: String,
    signing_secret: Option<String>,
}

impl HttpDeliveryChannel {
    pub fn new(config: &DeliveryConfig) -> Result<Self, DeliveryError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| {
                DeliveryError::InvalidConfig(format!("failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            content_type: config.content_type.clone(),
            signing_secret: config.signing_secret.clone(),
        })
    }

    /// Create with a custom client.
    pub fn with_client(client: Client, content_type: impl Into<String>) -> Self {
        Self {
            client,
            content_type: content_type.into(),
            signing_secret: None,
        }
    }

    pub fn with_signing_secret(mut self, secret: impl Into<String>) -> Self {
        self.signing_secret = Some(secret.into());
        self
    }

    fn sign_payload(payload: &str, secret: &str) -> Result<String, DeliveryError> {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| DeliveryError::InvalidConfig(format!("invalid signing secret: {e}")))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

#[async_trait]
impl DeliveryChannel for HttpDeliveryChannel {
    fn name(&self) -> &str {
        "http"
    }

    async fn deliver(&self, job: &DeliveryJob) -> Result<DeliveryResult, DeliveryError> {
        let start = Instant::now();

        let mut request = self
            .client
            .post(&job.spec.url)
            .header(header::CONTENT_TYPE, self.content_type.as_str())
            .header(DELIVERY_HEADER, job.name())
            .header(PAYLOAD_HEADER, job.spec.payload.as_str());

        if let Some(secret) = &self.signing_secret {
            let signature = Self::sign_payload(&job.spec.data, secret)?;
            request = request.header(SIGNATURE_HEADER, format!("sha256={signature}"));
        }

        let response = request.body(job.spec.data.clone()).send().await;
        let elapsed = start.elapsed().as_millis() as u32;

        match response {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    tracing::debug!(
                        job = %job.name(),
                        url = %job.spec.url,
                        status = status.as_u16(),
                        elapsed_ms = elapsed,
                        "Delivery succeeded"
                    );
                    Ok(DeliveryResult::success(status.as_u16(), elapsed))
                } else {
                    let error_body = resp.text().await.unwrap_or_default();
                    tracing::warn!(
                        job = %job.name(),
                        url = %job.spec.url,
                        status = status.as_u16(),
                        error = %error_body,
                        elapsed_ms = elapsed,
                        "Delivery failed with HTTP error"
                    );
                    Ok(DeliveryResult::http_failure(
                        status.as_u16(),
                        format!("HTTP {}: {}", status.as_u16(), error_body),
                        elapsed,
                    ))
                }
            }
            Err(e) => {
                tracing::warn!(
                    job = %job.name(),
                    url = %job.spec.url,
                    error = %e,
                    elapsed_ms = elapsed,
                    "Delivery failed with network error"
                );
                Ok(DeliveryResult::network_failure(e.to_string(), elapsed))
            }
        }
    }
}

impl std::fmt::Debug for HttpDeliveryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpDeliveryChannel")
            .field("content_type", &self.content_type)
            .field("signed", &self.signing_secret.is_some())
            .finish()
    }
}

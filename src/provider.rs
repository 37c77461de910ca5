//! External sequence service.
//!
//! The back end delegates every valid request to a [`SequenceProvider`]. The
//! production implementation issues one HTTPS GET per request and hands back
//! the plain-text body untouched. No retries happen here.

use crate::backend::RangeRequest;
use crate::config::ProviderConfig;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

/// Errors from the external sequence service.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("sequence service request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("sequence service returned status {0}")]
    Status(StatusCode),
    #[error("sequence service body could not be read: {0}")]
    Body(#[source] reqwest::Error),
}

/// Source of random integer sequences.
#[async_trait]
pub trait SequenceProvider: Send + Sync {
    /// Fetch one sequence for `request`, returning the raw text body.
    async fn fetch(&self, request: &RangeRequest) -> Result<String, ProviderError>;
}

/// random.org sequence generator client.
#[derive(Debug)]
pub struct RandomOrgProvider {
    client: Client,
    url: String,
}

impl RandomOrgProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(ProviderError::Request)?;

        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }
}

#[async_trait]
impl SequenceProvider for RandomOrgProvider {
    async fn fetch(&self, request: &RangeRequest) -> Result<String, ProviderError> {
        debug!(url = %self.url, %request, "Requesting sequence");

        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("min", request.min.to_string()),
                ("max", request.max.to_string()),
                ("col", request.cols.to_string()),
                ("format", "plain".to_string()),
                ("rnd", "new".to_string()),
            ])
            .send()
            .await
            .map_err(ProviderError::Request)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status(status));
        }

        response.text().await.map_err(ProviderError::Body)
    }
}

/// Deterministic provider that records every call.
#[cfg(test)]
pub mod stub {
    use super::*;
    use std::sync::Mutex;

    pub struct StubProvider {
        reply: Option<String>,
        calls: Mutex<Vec<RangeRequest>>,
    }

    impl StubProvider {
        /// Answers every request with `reply`.
        pub fn replying(reply: &str) -> Self {
            Self {
                reply: Some(reply.to_string()),
                calls: Mutex::new(Vec::new()),
            }
        }

        /// Fails every request with a status error.
        pub fn failing() -> Self {
            Self {
                reply: None,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> Vec<RangeRequest> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SequenceProvider for StubProvider {
        async fn fetch(&self, request: &RangeRequest) -> Result<String, ProviderError> {
            self.calls.lock().unwrap().push(*request);
            self.reply
                .clone()
                .ok_or(ProviderError::Status(StatusCode::SERVICE_UNAVAILABLE))
        }
    }
}

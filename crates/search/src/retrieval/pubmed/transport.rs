//! HTTP transport for E-utilities
//!
//! Throttled to the NCBI request rate and retried under the shared
//! `RetryPolicy`. Body classification happens in the client.

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use paperscout_common::config::AppConfig;
use paperscout_common::errors::{AppError, Result};
use paperscout_common::retry::RetryPolicy;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// E-utilities endpoints used by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Query to id list
    ESearch,
    /// Id list to records
    EFetch,
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::ESearch => "esearch.fcgi",
            Endpoint::EFetch => "efetch.fcgi",
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::ESearch => write!(f, "esearch"),
            Endpoint::EFetch => write!(f, "efetch"),
        }
    }
}

/// Raw GET against an E-utilities endpoint
#[async_trait]
pub trait EutilsTransport: Send + Sync {
    /// Response body for a successful request
    async fn get(&self, endpoint: Endpoint, params: &[(String, String)]) -> Result<String>;
}

/// reqwest-backed transport
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
    limiter: Arc<DefaultDirectRateLimiter>,
    retry: RetryPolicy,
}

impl ReqwestTransport {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        requests_per_second: u32,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        let rate = NonZeroU32::new(requests_per_second).ok_or_else(|| AppError::Configuration {
            message: "pubmed.requests_per_second must be at least 1".to_string(),
        })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(rate))),
            retry,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Self::new(
            config.pubmed.base_url.clone(),
            config.pubmed_timeout(),
            config.pubmed_requests_per_second(),
            RetryPolicy::from_config(&config.retry),
        )
    }
}

#[async_trait]
impl EutilsTransport for ReqwestTransport {
    async fn get(&self, endpoint: Endpoint, params: &[(String, String)]) -> Result<String> {
        let url = format!("{}/{}", self.base_url, endpoint.path());
        let url = url.as_str();
        let client = &self.client;
        let limiter = &self.limiter;
        let operation = endpoint.to_string();

        self.retry
            .run(&operation, || async move {
                limiter.until_ready().await;
                debug!(endpoint = %endpoint, "E-utilities request");

                let response = client
                    .get(url)
                    .query(params)
                    .send()
                    .await
                    .map_err(AppError::from_source_transport)?;

                let status = response.status();
                if !status.is_success() {
                    return Err(AppError::SourceUnavailable {
                        message: format!("{} returned HTTP {}", endpoint, status),
                    });
                }

                response.text().await.map_err(AppError::from_source_transport)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_rate_rejected() {
        let result = ReqwestTransport::new("http://localhost", Duration::from_secs(1), 0, RetryPolicy::none());
        assert!(matches!(result, Err(AppError::Configuration { .. })));
    }

    #[test]
    fn test_endpoint_paths() {
        assert_eq!(Endpoint::ESearch.path(), "esearch.fcgi");
        assert_eq!(Endpoint::EFetch.to_string(), "efetch");
    }

    #[test]
    fn test_rate_follows_api_key() {
        let mut config = AppConfig::default();
        assert!(ReqwestTransport::from_config(&config).is_ok());
        assert_eq!(config.pubmed_requests_per_second(), 3);

        config.pubmed.api_key = Some("ncbi-key".into());
        assert_eq!(config.pubmed_requests_per_second(), 10);
    }
}

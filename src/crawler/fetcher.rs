//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the harvester, including:
//! - Building the HTTP client with the configured user agent and timeout
//! - GET requests for listing pages
//! - Bounded retries with linear backoff and random jitter
//!
//! The fetcher knows nothing about pages, records or the pipeline; it turns a
//! URL into a body or a typed [`FetchError`].

use crate::config::{FetchConfig, SourceConfig};
use crate::FetchError;
use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use std::time::Duration;
use url::Url;

/// Anything that can turn a URL into a page body
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<String, FetchError>;
}

/// How many times to try and how long to wait in between
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub jitter_min: Duration,
    pub jitter_max: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            jitter_min: Duration::from_millis(config.jitter_min_ms),
            jitter_max: Duration::from_millis(config.jitter_max_ms),
        }
    }

    /// Retries immediately, for tests
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            jitter_min: Duration::ZERO,
            jitter_max: Duration::ZERO,
        }
    }

    /// Wait before retry number `retry` (1-based)
    ///
    /// `retry * base_delay` plus a uniform draw from the jitter window.
    pub fn backoff(&self, retry: u32) -> Duration {
        let linear = self.base_delay.saturating_mul(retry);
        let (low, high) = if self.jitter_min <= self.jitter_max {
            (self.jitter_min, self.jitter_max)
        } else {
            (self.jitter_max, self.jitter_min)
        };
        let jitter_ms = rand::rng().random_range(low.as_millis() as u64..=high.as_millis() as u64);
        linear.saturating_add(Duration::from_millis(jitter_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&FetchConfig::default())
    }
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `source` - User agent and TLS settings of the source
/// * `fetch` - Per-request timeout
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(source: &SourceConfig, fetch: &FetchConfig) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .user_agent(source.user_agent.clone())
        .timeout(fetch.timeout())
        .connect_timeout(fetch.timeout().min(Duration::from_secs(10)))
        .gzip(true)
        .brotli(true);

    if source.accept_invalid_certs {
        tracing::warn!(
            "TLS certificate validation is disabled for {}; only use this for a trusted source",
            source.url_template
        );
        builder = builder.danger_accept_invalid_certs(true);
    }

    builder.build()
}

/// reqwest-backed fetcher with retries
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    policy: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(client: Client, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    /// Builds the client and policy from configuration
    pub fn from_config(source: &SourceConfig, fetch: &FetchConfig) -> Result<Self, reqwest::Error> {
        Ok(Self::new(
            build_http_client(source, fetch)?,
            RetryPolicy::from_config(fetch),
        ))
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// A single GET; any transport error or non-2xx status is transient
    async fn attempt(&self, url: &Url, attempt: u32) -> Result<String, FetchError> {
        let transient = |message: String| FetchError::Transient {
            url: url.to_string(),
            attempt,
            message,
        };

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| transient(describe_reqwest_error(&e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(transient(format!("HTTP {}", status)));
        }

        response
            .text()
            .await
            .map_err(|e| transient(format!("failed to read body: {}", e)))
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<String, FetchError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.attempt(url, attempt).await {
                Ok(body) => {
                    if attempt > 1 {
                        tracing::debug!("Fetched {} on attempt {}", url, attempt);
                    }
                    return Ok(body);
                }
                Err(e) if attempt >= max_attempts => {
                    return Err(FetchError::Exhausted {
                        url: url.to_string(),
                        attempts: attempt,
                        last_error: e.to_string(),
                    });
                }
                Err(e) => {
                    let delay = self.policy.backoff(attempt);
                    tracing::warn!("{}; retrying in {:?}", e, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

fn describe_reqwest_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "request timeout".to_string()
    } else if e.is_connect() {
        format!("connection failed: {}", e)
    } else {
        e.to_string()
    }
}

//! Proxy validation against probe endpoints
//!
//! A proxy is alive when a GET through it to a validator endpoint returns a
//! 2xx response whose body starts with the endpoint's `startstring`.
//! Validation never fails: every problem is an [`Verdict::Invalid`].

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::{Client, Proxy as ReqwestProxy, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::catalog::{ValidatorEndpoint, ValidatorPool};
use crate::proxy::models::{Proxy, Verdict};

/// Default timeout for each validation in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default number of concurrent validations
const DEFAULT_CONCURRENCY: usize = 32;

/// Configuration for proxy validation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Per-request timeout, covering connect, headers and body
    pub timeout_secs: u64,
    /// Maximum validations in flight within one cycle
    pub concurrency: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl ValidatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Decides whether a proxy is usable
#[async_trait]
pub trait ProxyValidator: Send + Sync {
    async fn validate(&self, proxy: &Proxy, endpoint: &ValidatorEndpoint) -> Verdict;
}

/// Judge a probe response. Exact, case-sensitive prefix match only.
pub fn judge_response(status: StatusCode, body: &str, startstring: &str) -> Verdict {
    if status.is_success() && body.starts_with(startstring) {
        Verdict::Valid
    } else {
        Verdict::Invalid
    }
}

/// Validator that probes through the proxy with reqwest
#[derive(Debug, Clone)]
pub struct HttpValidator {
    config: ValidatorConfig,
}

impl HttpValidator {
    pub fn new() -> Self {
        Self::with_config(ValidatorConfig::default())
    }

    pub fn with_config(config: ValidatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Create a reqwest client that egresses through the proxy. Probes may be
    /// http or https, so the proxy applies to both schemes.
    fn create_client(&self, proxy: &Proxy) -> reqwest::Result<Client> {
        Client::builder()
            .proxy(ReqwestProxy::all(proxy.url())?)
            .timeout(self.config.timeout())
            .build()
    }

    async fn probe(&self, proxy: &Proxy, endpoint: &ValidatorEndpoint) -> Result<Verdict, String> {
        let client = self.create_client(proxy).map_err(|e| e.to_string())?;
        let response = client
            .get(&endpoint.url)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = response.status();
        let body = response.text().await.map_err(|e| e.to_string())?;
        Ok(judge_response(status, &body, &endpoint.startstring))
    }
}

impl Default for HttpValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProxyValidator for HttpValidator {
    async fn validate(&self, proxy: &Proxy, endpoint: &ValidatorEndpoint) -> Verdict {
        let start = Instant::now();
        let verdict = match tokio::time::timeout(self.config.timeout(), self.probe(proxy, endpoint)).await {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(reason)) => {
                tracing::debug!(proxy = %proxy, probe = %endpoint.url, %reason, "Probe failed");
                Verdict::Invalid
            }
            Err(_) => {
                tracing::debug!(proxy = %proxy, probe = %endpoint.url, "Probe timed out");
                Verdict::Invalid
            }
        };
        tracing::trace!(
            proxy = %proxy,
            probe = %endpoint.url,
            ?verdict,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Validated proxy"
        );
        verdict
    }
}

/// Validate many items concurrently, each against a randomly chosen endpoint.
///
/// `proxy_of` maps an item to the proxy to probe; items that yield `None`
/// are judged invalid without touching the network. Results come back in
/// completion order.
pub async fn validate_all<T, F>(
    validator: &Arc<dyn ProxyValidator>,
    pool: &ValidatorPool,
    items: Vec<T>,
    concurrency: usize,
    proxy_of: F,
) -> Vec<(T, Verdict)>
where
    T: Send,
    F: Fn(&T) -> Option<Proxy>,
{
    stream::iter(items)
        .map(|item| {
            let proxy = proxy_of(&item);
            let endpoint = pool.choose().cloned();
            let validator = Arc::clone(validator);
            async move {
                let verdict = match (proxy, endpoint) {
                    (Some(proxy), Some(endpoint)) => validator.validate(&proxy, &endpoint).await,
                    _ => Verdict::Invalid,
                };
                (item, verdict)
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect::<Vec<_>>()
        .await
}

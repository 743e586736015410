//! Vendor page retrieval

use async_trait::async_trait;
use reqwest::{Client, Proxy as ReqwestProxy, StatusCode};
use std::time::Duration;

use crate::proxy::models::Proxy;
use crate::Result;

/// Default timeout for HTTP requests in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default user agent for HTTP requests
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// A retrieved vendor page
#[derive(Debug, Clone)]
pub struct Page {
    /// The URL that was requested
    pub url: String,
    pub status: StatusCode,
    pub body: String,
}

impl Page {
    pub fn new(url: &str, status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            url: url.to_string(),
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Retrieves vendor listing pages
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch `url`, optionally egressing through `via`
    async fn fetch(&self, url: &str, via: Option<&Proxy>) -> Result<Page>;
}

/// Configuration for vendor page fetching
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Timeout for HTTP requests
    pub timeout: Duration,
    /// User agent for HTTP requests
    pub user_agent: String,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl CrawlerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }
}

/// Page fetcher backed by reqwest
pub struct ProxyCrawler {
    config: CrawlerConfig,
    client: Client,
}

impl ProxyCrawler {
    /// Create a new crawler with default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(CrawlerConfig::default())
    }

    /// Create a new crawler with custom configuration
    pub fn with_config(config: CrawlerConfig) -> Result<Self> {
        let client = Self::builder(&config).build()?;
        Ok(Self { config, client })
    }

    fn builder(config: &CrawlerConfig) -> reqwest::ClientBuilder {
        Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
    }

    /// A one-off client that routes through `proxy`
    fn client_via(&self, proxy: &Proxy) -> Result<Client> {
        Ok(Self::builder(&self.config)
            .proxy(ReqwestProxy::all(proxy.url())?)
            .build()?)
    }
}

#[async_trait]
impl PageFetcher for ProxyCrawler {
    async fn fetch(&self, url: &str, via: Option<&Proxy>) -> Result<Page> {
        let response = match via {
            Some(proxy) => self.client_via(proxy)?.get(url).send().await?,
            None => self.client.get(url).send().await?,
        };
        let status = response.status();
        let body = response.text().await?;
        Ok(Page::new(url, status, body))
    }
}

//! Error types for the proxy pool
//!
//! Failures are grouped the way the pool handles them: store and catalog
//! errors abort the current cycle, extraction and transport errors are
//! absorbed by the worker that hit them, configuration errors are fatal at
//! startup.

use thiserror::Error;

use crate::store::StoreError;

/// Unified error type for the proxy pool
#[derive(Error, Debug)]
pub enum Error {
    /// The proxy store could not be reached or rejected a command
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The vendor/validator catalog could not be read
    #[error("catalog error: {0}")]
    Catalog(#[from] sqlx::Error),

    /// Outbound HTTP request failed
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// A vendor page could not be turned into candidates
    #[error("extraction failed for {url}: {reason}")]
    Extraction { url: String, reason: String },

    /// A vendor names an extractor that is not registered
    #[error("vendor '{vendor}' uses unknown extractor '{extractor}'")]
    UnknownExtractor { vendor: String, extractor: String },

    /// No validator endpoints are available to probe proxies with
    #[error("validator catalog is empty")]
    NoValidators,

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn extraction(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Extraction {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Whether the loop that hit this error should simply try again next
    /// iteration instead of giving up.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Store(_) | Self::Catalog(_) | Self::Http(_) | Self::Extraction { .. }
        )
    }
}

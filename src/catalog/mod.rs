//! Vendor and validator catalogs
//!
//! Vendors describe where candidate proxies are listed; validators are probe
//! pages with a known response prefix. Both are read-only to the pool.

mod sqlite;

pub use sqlite::SqliteCatalog;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::Result;

/// Whether a vendor is crawled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VendorStatus {
    #[default]
    Active,
    Inactive,
}

impl fmt::Display for VendorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VendorStatus::Active => write!(f, "active"),
            VendorStatus::Inactive => write!(f, "inactive"),
        }
    }
}

impl FromStr for VendorStatus {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(VendorStatus::Active),
            "inactive" => Ok(VendorStatus::Inactive),
            other => Err(Error::config(format!("invalid vendor status: {other}"))),
        }
    }
}

/// One proxy-listing page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorSource {
    pub name: String,
    pub url: String,
    pub status: VendorStatus,
    /// Name of the registered extractor that understands this page
    pub extractor: String,
}

impl VendorSource {
    pub fn new(name: &str, url: &str, extractor: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            status: VendorStatus::Active,
            extractor: extractor.to_string(),
        }
    }

    pub fn inactive(mut self) -> Self {
        self.status = VendorStatus::Inactive;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == VendorStatus::Active
    }
}

/// A liveness probe: a URL whose body starts with a known string
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidatorEndpoint {
    pub url: String,
    pub startstring: String,
}

impl ValidatorEndpoint {
    pub fn new(url: &str, startstring: &str) -> Self {
        Self {
            url: url.to_string(),
            startstring: startstring.to_string(),
        }
    }
}

/// Validator endpoints loaded for one worker run
#[derive(Debug, Clone, Default)]
pub struct ValidatorPool {
    endpoints: Vec<ValidatorEndpoint>,
}

impl ValidatorPool {
    pub fn new(mut endpoints: Vec<ValidatorEndpoint>) -> Self {
        endpoints.sort_by(|a, b| a.url.cmp(&b.url));
        endpoints.dedup();
        Self { endpoints }
    }

    /// Load every endpoint from a catalog, failing if there are none
    pub async fn load(catalog: &dyn ValidatorCatalog) -> Result<Self> {
        let pool = Self::new(catalog.validators().await?);
        if pool.is_empty() {
            return Err(Error::NoValidators);
        }
        Ok(pool)
    }

    /// Pick an endpoint uniformly at random
    pub fn choose(&self) -> Option<&ValidatorEndpoint> {
        self.endpoints.choose(&mut rand::thread_rng())
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

/// Read-only enumeration of vendor sources
#[async_trait]
pub trait VendorCatalog: Send + Sync {
    /// Vendors whose status is active
    async fn active_vendors(&self) -> Result<Vec<VendorSource>>;
}

/// Read-only enumeration of validator endpoints
#[async_trait]
pub trait ValidatorCatalog: Send + Sync {
    async fn validators(&self) -> Result<Vec<ValidatorEndpoint>>;
}

/// Catalog fixed at construction time
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    vendors: Vec<VendorSource>,
    validators: Vec<ValidatorEndpoint>,
}

impl StaticCatalog {
    pub fn new(vendors: Vec<VendorSource>, validators: Vec<ValidatorEndpoint>) -> Self {
        Self {
            vendors,
            validators,
        }
    }
}

#[async_trait]
impl VendorCatalog for StaticCatalog {
    async fn active_vendors(&self) -> Result<Vec<VendorSource>> {
        Ok(self
            .vendors
            .iter()
            .filter(|v| v.is_active())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ValidatorCatalog for StaticCatalog {
    async fn validators(&self) -> Result<Vec<ValidatorEndpoint>> {
        Ok(self.validators.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vendor_status_parse() {
        assert_eq!("active".parse::<VendorStatus>().unwrap(), VendorStatus::Active);
        assert_eq!(
            "inactive".parse::<VendorStatus>().unwrap(),
            VendorStatus::Inactive
        );
        assert!("paused".parse::<VendorStatus>().is_err());
        assert_eq!(VendorStatus::Inactive.to_string(), "inactive");
    }

    #[test]
    fn test_validator_pool_dedups() {
        let pool = ValidatorPool::new(vec![
            ValidatorEndpoint::new("http://a.example/ip", "{"),
            ValidatorEndpoint::new("http://a.example/ip", "{"),
            ValidatorEndpoint::new("http://b.example/", "<!DOCTYPE"),
        ]);
        assert_eq!(pool.len(), 2);
        assert!(pool.choose().is_some());
    }

    #[test]
    fn test_empty_validator_pool() {
        let pool = ValidatorPool::default();
        assert!(pool.is_empty());
        assert!(pool.choose().is_none());
    }

    #[tokio::test]
    async fn test_load_empty_catalog_fails() {
        let catalog = StaticCatalog::default();
        assert!(matches!(
            ValidatorPool::load(&catalog).await,
            Err(Error::NoValidators)
        ));
    }

    #[tokio::test]
    async fn test_static_catalog_filters_inactive() {
        let catalog = StaticCatalog::new(
            vec![
                VendorSource::new("66ip", "http://www.66ip.cn/", "plain"),
                VendorSource::new("xici", "http://www.xicidaili.com/nn/", "html_table").inactive(),
            ],
            vec![],
        );
        let vendors = catalog.active_vendors().await.unwrap();
        assert_eq!(vendors.len(), 1);
        assert_eq!(vendors[0].name, "66ip");
    }
}

//! Harvesting new proxies from vendor listings

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::catalog::{ValidatorCatalog, ValidatorPool, VendorCatalog, VendorSource};
use crate::config::{Config, MAX_PAGES_CAP};
use crate::proxy::{
    validate_all, Anonymity, Candidate, CandidateExtractor, ExtractorRegistry, PageFetcher, Proxy,
    ProxyParser, ProxyValidator,
};
use crate::pool::state::PoolState;
use crate::Result;

/// Knobs for one fetch cycle
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub max_pages: usize,
    pub max_latency: Option<Duration>,
    pub min_anonymity: Option<Anonymity>,
    pub via_pool: bool,
    pub concurrency: usize,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            max_pages: MAX_PAGES_CAP,
            max_latency: None,
            min_anonymity: None,
            via_pool: false,
            concurrency: 32,
        }
    }
}

impl FetchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_pages: config.fetch.max_pages,
            max_latency: config.fetch.max_latency(),
            min_anonymity: config.fetch.min_anonymity,
            via_pool: config.fetch.via_pool,
            concurrency: config.validator.concurrency,
        }
    }

    /// Whether a candidate's advertised attributes are acceptable.
    /// Attributes the vendor did not advertise never disqualify.
    pub fn accepts(&self, candidate: &Candidate) -> bool {
        if let (Some(max), Some(latency)) = (self.max_latency, candidate.latency) {
            if latency > max {
                return false;
            }
        }
        if let (Some(min), Some(anonymity)) = (self.min_anonymity, candidate.anonymity) {
            if anonymity < min {
                return false;
            }
        }
        true
    }
}

/// Outcome of one fetch cycle
#[derive(Debug, Clone, Default)]
pub struct FetchReport {
    pub run_id: Uuid,
    pub started_at: Option<DateTime<Utc>>,
    /// Vendors whose pages were attempted
    pub vendors: usize,
    /// Pages retrieved successfully
    pub pages: usize,
    /// Candidates extracted from those pages
    pub candidates: usize,
    /// Dropped by the latency or anonymity filter
    pub rejected: usize,
    /// Already in the pool or seen earlier in the cycle
    pub known: usize,
    /// Probed against a validator endpoint
    pub validated: usize,
    /// Newly added to the pool
    pub admitted: usize,
    /// Set size published at cycle end
    pub pool_size: u64,
}

/// Crawls every active vendor once and admits the candidates that validate
pub struct FetchWorker {
    state: PoolState,
    vendors: Arc<dyn VendorCatalog>,
    validators: Arc<dyn ValidatorCatalog>,
    fetcher: Arc<dyn PageFetcher>,
    registry: Arc<ExtractorRegistry>,
    validator: Arc<dyn ProxyValidator>,
    settings: FetchSettings,
}

impl FetchWorker {
    pub fn new(
        state: PoolState,
        vendors: Arc<dyn VendorCatalog>,
        validators: Arc<dyn ValidatorCatalog>,
        fetcher: Arc<dyn PageFetcher>,
        registry: Arc<ExtractorRegistry>,
        validator: Arc<dyn ProxyValidator>,
    ) -> Self {
        Self {
            state,
            vendors,
            validators,
            fetcher,
            registry,
            validator,
            settings: FetchSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: FetchSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    /// Run one cycle over all active vendors
    pub async fn run(&self) -> Result<FetchReport> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("fetch", %run_id);
        self.cycle(run_id).instrument(span).await
    }

    async fn cycle(&self, run_id: Uuid) -> Result<FetchReport> {
        let mut report = FetchReport {
            run_id,
            started_at: Some(Utc::now()),
            ..FetchReport::default()
        };

        let pool = ValidatorPool::load(self.validators.as_ref()).await?;
        let vendors = self.vendors.active_vendors().await?;
        info!(vendors = vendors.len(), validators = pool.len(), "Fetching proxies");

        let mut seen = HashSet::new();
        for vendor in &vendors {
            let extractor = match self.registry.resolve(vendor) {
                Ok(extractor) => extractor,
                Err(e) => {
                    error!(vendor = %vendor.name, error = %e, "Skipping vendor");
                    continue;
                }
            };
            report.vendors += 1;
            self.crawl_vendor(vendor, extractor.as_ref(), &pool, &mut seen, &mut report)
                .await?;
        }

        report.pool_size = self.state.recount().await?;
        info!(
            pages = report.pages,
            candidates = report.candidates,
            rejected = report.rejected,
            known = report.known,
            admitted = report.admitted,
            pool_size = report.pool_size,
            "Fetch cycle complete"
        );
        Ok(report)
    }

    /// Follow a vendor's pages up to the page limit. Vendor-side failures end
    /// this vendor's crawl; store failures end the cycle.
    async fn crawl_vendor(
        &self,
        vendor: &VendorSource,
        extractor: &dyn CandidateExtractor,
        pool: &ValidatorPool,
        seen: &mut HashSet<String>,
        report: &mut FetchReport,
    ) -> Result<()> {
        let max_pages = self.settings.max_pages.clamp(1, MAX_PAGES_CAP);
        let mut url = vendor.url.clone();

        for page_no in 1..=max_pages {
            let via = self.egress_proxy().await?;
            let page = match self.fetcher.fetch(&url, via.as_ref()).await {
                Ok(page) if page.is_success() => page,
                Ok(page) => {
                    warn!(vendor = %vendor.name, %url, status = %page.status, "Vendor page rejected");
                    break;
                }
                Err(e) => {
                    warn!(vendor = %vendor.name, %url, error = %e, "Vendor page fetch failed");
                    break;
                }
            };
            report.pages += 1;

            let extraction = match extractor.extract(&page) {
                Ok(extraction) => extraction,
                Err(e) => {
                    warn!(vendor = %vendor.name, %url, error = %e, "Vendor page not understood");
                    break;
                }
            };
            debug!(
                vendor = %vendor.name,
                page = page_no,
                candidates = extraction.candidates.len(),
                "Extracted candidates"
            );
            report.candidates += extraction.candidates.len();

            let fresh = self.screen(extraction.candidates, seen, report).await?;
            self.admit_valid(fresh, pool, report).await?;

            match extraction.next_page {
                Some(next) if page_no < max_pages => url = next,
                _ => break,
            }
        }
        Ok(())
    }

    /// Drop filtered, duplicate and already-pooled candidates
    async fn screen(
        &self,
        candidates: Vec<Candidate>,
        seen: &mut HashSet<String>,
        report: &mut FetchReport,
    ) -> Result<Vec<Proxy>> {
        let mut fresh = Vec::new();
        for candidate in candidates {
            if !self.settings.accepts(&candidate) {
                debug!(proxy = %candidate.proxy, "Candidate filtered out");
                report.rejected += 1;
                continue;
            }
            let member = candidate.proxy.url();
            if !seen.insert(member.clone()) || self.state.contains(&member).await? {
                report.known += 1;
                continue;
            }
            fresh.push(candidate.proxy);
        }
        Ok(fresh)
    }

    async fn admit_valid(
        &self,
        proxies: Vec<Proxy>,
        pool: &ValidatorPool,
        report: &mut FetchReport,
    ) -> Result<()> {
        report.validated += proxies.len();
        let verdicts = validate_all(
            &self.validator,
            pool,
            proxies,
            self.settings.concurrency,
            |proxy| Some(proxy.clone()),
        )
        .await;

        for (proxy, verdict) in verdicts {
            if verdict.is_valid() && self.state.admit(&proxy.url()).await? {
                debug!(%proxy, "Admitted proxy");
                report.admitted += 1;
            }
        }
        Ok(())
    }

    /// A pool member to route vendor requests through, when enabled
    async fn egress_proxy(&self) -> Result<Option<Proxy>> {
        if !self.settings.via_pool {
            return Ok(None);
        }
        Ok(self
            .state
            .sample()
            .await?
            .and_then(|member| ProxyParser::parse_url(&member)))
    }
}

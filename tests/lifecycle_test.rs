//! Pool lifecycle tests against the in-memory store with fake network seams

use async_trait::async_trait;
use futures::FutureExt;
use proxy_pool::catalog::{StaticCatalog, ValidatorEndpoint, VendorSource};
use proxy_pool::config::{Thresholds, Windows};
use proxy_pool::pool::{
    check_loop, CheckWorker, Decision, FetchSettings, FetchWorker, Flag, PoolState,
    ReplenishmentController, Supervisor, TaskFactory,
};
use proxy_pool::proxy::{
    Candidate, CandidateExtractor, Extraction, ExtractorRegistry, Page, PageFetcher, Proxy,
    ProxyType, ProxyValidator, Verdict,
};
use proxy_pool::store::{KeyTtl, MemoryStore};
use proxy_pool::Result;
use reqwest::StatusCode;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// Valid only for listed hosts
struct HostList(HashSet<String>);

impl HostList {
    fn new(hosts: &[&str]) -> Self {
        Self(hosts.iter().map(|h| h.to_string()).collect())
    }
}

#[async_trait]
impl ProxyValidator for HostList {
    async fn validate(&self, proxy: &Proxy, _endpoint: &ValidatorEndpoint) -> Verdict {
        if self.0.contains(&proxy.host) {
            Verdict::Valid
        } else {
            Verdict::Invalid
        }
    }
}

/// Panics on its first call, then defers to the inner validator
struct PanicOnce {
    tripped: AtomicBool,
    inner: HostList,
}

#[async_trait]
impl ProxyValidator for PanicOnce {
    async fn validate(&self, proxy: &Proxy, endpoint: &ValidatorEndpoint) -> Verdict {
        if !self.tripped.swap(true, Ordering::SeqCst) {
            panic!("validator crashed");
        }
        self.inner.validate(proxy, endpoint).await
    }
}

/// Serves canned pages, counting requests and the proxy each went through
#[derive(Default)]
struct FakeFetcher {
    pages: HashMap<String, (StatusCode, String)>,
    requests: AtomicUsize,
    egress: Mutex<Vec<Option<String>>>,
}

impl FakeFetcher {
    fn page(mut self, url: &str, status: StatusCode, body: &str) -> Self {
        self.pages.insert(url.to_string(), (status, body.to_string()));
        self
    }

    fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn egress(&self) -> Vec<Option<String>> {
        self.egress.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageFetcher for FakeFetcher {
    async fn fetch(&self, url: &str, via: Option<&Proxy>) -> Result<Page> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.egress.lock().unwrap().push(via.map(Proxy::url));
        Ok(match self.pages.get(url) {
            Some((status, body)) => Page::new(url, *status, body.clone()),
            None => Page::new(url, StatusCode::OK, format!("{}:80", host_for(url))),
        })
    }
}

/// A stable fake address derived from a URL
fn host_for(url: &str) -> String {
    format!("10.200.0.{}", url.len() % 250)
}

/// Every page links to another
struct EndlessPages;

impl CandidateExtractor for EndlessPages {
    fn extract(&self, page: &Page) -> Result<Extraction> {
        let proxy = Proxy::new(host_for(&page.url), 80, ProxyType::Http);
        Ok(Extraction::new(vec![Candidate::new(proxy)]).with_next_page(format!("{}/more", page.url)))
    }
}

fn probe() -> Vec<ValidatorEndpoint> {
    vec![ValidatorEndpoint::new("http://probe.test/ip", "{")]
}

fn new_state() -> PoolState {
    PoolState::new(Arc::new(MemoryStore::new()), "test")
}

fn fetch_worker(
    state: &PoolState,
    vendors: Vec<VendorSource>,
    fetcher: Arc<FakeFetcher>,
    validator: Arc<dyn ProxyValidator>,
) -> FetchWorker {
    let mut registry = ExtractorRegistry::with_defaults();
    registry.register("endless", Arc::new(EndlessPages));
    FetchWorker::new(
        state.clone(),
        Arc::new(StaticCatalog::new(vendors, Vec::new())),
        Arc::new(StaticCatalog::new(Vec::new(), probe())),
        fetcher,
        Arc::new(registry),
        validator,
    )
}

fn controller(state: &PoolState, fetch: FetchWorker) -> ReplenishmentController {
    ReplenishmentController::new(
        state.clone(),
        Thresholds { exhaust: 2, low: 5 },
        Windows {
            protect_secs: 600,
            refresh_secs: 3_600,
        },
        Arc::new(fetch),
    )
}

#[tokio::test]
async fn test_fetch_admits_valid_candidates_once() {
    let state = new_state();
    let fetcher = Arc::new(FakeFetcher::default().page(
        "http://vendor.test/list",
        StatusCode::OK,
        "10.0.0.1:8080\n10.0.0.2:8080\n10.0.0.1:8080\n",
    ));
    let worker = fetch_worker(
        &state,
        vec![VendorSource::new("vendor", "http://vendor.test/list", "plain")],
        fetcher,
        Arc::new(HostList::new(&["10.0.0.1"])),
    );

    let report = worker.run().await.unwrap();
    assert_eq!(report.admitted, 1);
    assert_eq!(report.pool_size, 1);
    assert_eq!(state.members().await.unwrap(), vec!["http://10.0.0.1:8080"]);
    assert_eq!(state.cached_count().await.unwrap(), Some(1));

    let report = worker.run().await.unwrap();
    assert_eq!(report.admitted, 0);
    assert_eq!(report.known, 1);
    assert_eq!(state.size().await.unwrap(), 1);
}

#[tokio::test]
async fn test_pagination_stops_at_three_pages() {
    let state = new_state();
    let fetcher = Arc::new(FakeFetcher::default());
    let worker = fetch_worker(
        &state,
        vec![VendorSource::new("deep", "http://deep.test/p", "endless")],
        fetcher.clone(),
        Arc::new(HostList::new(&[])),
    )
    .with_settings(FetchSettings {
        max_pages: 50,
        ..FetchSettings::default()
    });

    let report = worker.run().await.unwrap();

    assert_eq!(fetcher.requests(), 3);
    assert_eq!(report.pages, 3);
}

async fn fetch_via_pool(state: &PoolState) -> Vec<Option<String>> {
    let fetcher = Arc::new(FakeFetcher::default());
    let worker = fetch_worker(
        state,
        vec![VendorSource::new("v", "http://v.test/", "plain")],
        fetcher.clone(),
        Arc::new(HostList::new(&[])),
    )
    .with_settings(FetchSettings {
        via_pool: true,
        ..FetchSettings::default()
    });
    worker.run().await.unwrap();
    fetcher.egress()
}

#[tokio::test]
async fn test_vendor_pages_fetched_through_pool_member() {
    let state = new_state();
    state.admit("http://10.0.0.50:3128").await.unwrap();

    let egress = fetch_via_pool(&state).await;

    assert_eq!(egress, vec![Some("http://10.0.0.50:3128".to_string())]);
}

#[tokio::test]
async fn test_empty_pool_fetches_directly() {
    let state = new_state();

    let egress = fetch_via_pool(&state).await;

    assert_eq!(egress, vec![None]);
}

#[tokio::test]
async fn test_unparseable_member_fetches_directly() {
    let state = new_state();
    state.admit("not a proxy").await.unwrap();

    let egress = fetch_via_pool(&state).await;

    assert_eq!(egress, vec![None]);
}

#[tokio::test]
async fn test_direct_fetch_without_via_pool() {
    let state = new_state();
    state.admit("http://10.0.0.50:3128").await.unwrap();
    let fetcher = Arc::new(FakeFetcher::default());
    let worker = fetch_worker(
        &state,
        vec![VendorSource::new("v", "http://v.test/", "plain")],
        fetcher.clone(),
        Arc::new(HostList::new(&[])),
    );

    worker.run().await.unwrap();

    assert_eq!(fetcher.egress(), vec![None]);
}

#[tokio::test]
async fn test_failing_vendor_does_not_stop_cycle() {
    let state = new_state();
    let fetcher = Arc::new(
        FakeFetcher::default()
            .page("http://down.test/", StatusCode::INTERNAL_SERVER_ERROR, "")
            .page("http://empty.test/", StatusCode::OK, "<table></table>")
            .page("http://up.test/", StatusCode::OK, "10.0.0.9:3128"),
    );
    let worker = fetch_worker(
        &state,
        vec![
            VendorSource::new("down", "http://down.test/", "plain"),
            VendorSource::new("empty", "http://empty.test/", "html_table"),
            VendorSource::new("unknown", "http://unknown.test/", "no_such_extractor"),
            VendorSource::new("up", "http://up.test/", "plain"),
        ],
        fetcher,
        Arc::new(HostList::new(&["10.0.0.9"])),
    );

    let report = worker.run().await.unwrap();

    assert_eq!(report.vendors, 3);
    assert_eq!(report.admitted, 1);
    assert!(state.contains("http://10.0.0.9:3128").await.unwrap());
}

#[tokio::test]
async fn test_check_evicts_dead_proxies() {
    let state = new_state();
    for member in ["http://10.0.0.1:80", "http://10.0.0.2:80", "http://10.0.0.3:80"] {
        state.admit(member).await.unwrap();
    }
    let worker = CheckWorker::new(
        state.clone(),
        Arc::new(StaticCatalog::new(Vec::new(), probe())),
        Arc::new(HostList::new(&["10.0.0.2"])),
        8,
    );

    let report = worker.run().await.unwrap();

    assert_eq!(report.evicted, 2);
    assert_eq!(state.members().await.unwrap(), vec!["http://10.0.0.2:80"]);
    assert_eq!(state.cached_count().await.unwrap(), Some(1));
}

#[tokio::test]
async fn test_exhausted_pool_fetches_despite_protect() {
    let state = new_state();
    state.publish_count(1).await.unwrap();
    state.arm(Flag::Protect, Duration::from_secs(600)).await.unwrap();
    state.arm(Flag::Refresh, Duration::from_secs(600)).await.unwrap();
    let fetcher = Arc::new(FakeFetcher::default());
    let fetch = fetch_worker(
        &state,
        vec![VendorSource::new("v", "http://v.test/", "plain")],
        fetcher.clone(),
        Arc::new(HostList::new(&[])),
    );

    let outcome = controller(&state, fetch).tick().await.unwrap();

    assert_eq!(outcome.decision, Decision::Exhausted);
    assert!(outcome.fetch.is_some());
    assert_eq!(fetcher.requests(), 1);
}

#[tokio::test]
async fn test_low_pool_waits_out_protect() {
    let state = new_state();
    state.publish_count(4).await.unwrap();
    state.arm(Flag::Protect, Duration::from_secs(600)).await.unwrap();
    state.arm(Flag::Refresh, Duration::from_secs(600)).await.unwrap();
    let fetcher = Arc::new(FakeFetcher::default());
    let fetch = fetch_worker(
        &state,
        vec![VendorSource::new("v", "http://v.test/", "plain")],
        fetcher.clone(),
        Arc::new(HostList::new(&[])),
    );

    let outcome = controller(&state, fetch).tick().await.unwrap();

    assert_eq!(outcome.decision, Decision::Observing);
    assert!(outcome.fetch.is_none());
    assert_eq!(fetcher.requests(), 0);
}

#[tokio::test]
async fn test_missing_refresh_forces_fetch() {
    let state = new_state();
    state.publish_count(100).await.unwrap();
    let fetcher = Arc::new(FakeFetcher::default());
    let fetch = fetch_worker(
        &state,
        vec![VendorSource::new("v", "http://v.test/", "plain")],
        fetcher.clone(),
        Arc::new(HostList::new(&[])),
    );

    let outcome = controller(&state, fetch).tick().await.unwrap();

    assert_eq!(outcome.decision, Decision::Stale);
    assert_eq!(fetcher.requests(), 1);
    match state.flag_ttl(Flag::Refresh).await.unwrap() {
        KeyTtl::Expires(remaining) => {
            assert!(remaining > Duration::from_secs(3_500));
            assert!(remaining <= Duration::from_secs(3_600));
        }
        other => panic!("refresh flag not re-armed: {other:?}"),
    }
    assert!(state.flag_ttl(Flag::Protect).await.unwrap().exists());
}

#[tokio::test]
async fn test_crashed_cycle_leaves_snapshot_count() {
    let state = new_state();
    for member in ["http://10.0.0.1:80", "http://10.0.0.2:80", "http://10.0.0.3:80"] {
        state.admit(member).await.unwrap();
    }
    let worker = CheckWorker::new(
        state.clone(),
        Arc::new(StaticCatalog::new(Vec::new(), probe())),
        Arc::new(PanicOnce {
            tripped: AtomicBool::new(false),
            inner: HostList::new(&["10.0.0.1"]),
        }),
        1,
    );

    let crashed = tokio::spawn(async move { worker.run().await }).await;

    assert!(crashed.unwrap_err().is_panic());
    assert_eq!(state.cached_count().await.unwrap(), Some(3));
    assert_eq!(state.size().await.unwrap(), 3);
}

#[tokio::test]
async fn test_supervisor_restarts_crashed_check_loop() {
    let state = new_state();
    for member in ["http://10.0.0.1:80", "http://10.0.0.2:80", "http://10.0.0.3:80"] {
        state.admit(member).await.unwrap();
    }
    let worker = Arc::new(CheckWorker::new(
        state.clone(),
        Arc::new(StaticCatalog::new(Vec::new(), probe())),
        Arc::new(PanicOnce {
            tripped: AtomicBool::new(false),
            inner: HostList::new(&["10.0.0.1", "10.0.0.3"]),
        }),
        2,
    ));
    let factory: TaskFactory = Arc::new(move |shutdown: watch::Receiver<bool>| {
        check_loop(worker.clone(), Duration::from_millis(10), shutdown).boxed()
    });

    let mut supervisor = Supervisor::new(Duration::from_millis(20));
    supervisor.supervise("check", factory);

    let watched = state.clone();
    let summary = supervisor
        .run(async move {
            let settled = async {
                while watched.cached_count().await.ok().flatten() != Some(2) {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            };
            tokio::time::timeout(Duration::from_secs(5), settled)
                .await
                .expect("pool never settled after restart");
        })
        .await;

    assert_eq!(summary[0].name, "check");
    assert_eq!(summary[0].restarts, 1);
    let mut members = state.members().await.unwrap();
    members.sort();
    assert_eq!(members, vec!["http://10.0.0.1:80", "http://10.0.0.3:80"]);
}

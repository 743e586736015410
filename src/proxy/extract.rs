//! Candidate extraction from vendor pages
//!
//! Each vendor names the extractor that understands its page layout. The
//! registry resolves those names once, so a typo in the catalog surfaces as a
//! configuration error at startup instead of halfway through a fetch.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::VendorSource;
use crate::error::Error;
use crate::proxy::crawler::Page;
use crate::proxy::models::{Anonymity, Candidate, Proxy, ProxyType};
use crate::proxy::parser::ProxyParser;
use crate::Result;

/// Regex pattern to match IP:PORT patterns in text
static IP_PORT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}):(\d{1,5})\b")
        .expect("Invalid IP:PORT regex")
});

/// A table cell holding an IPv4 address, optionally with a port
static IP_CELL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})(?::(\d{1,5}))?$").expect("Invalid IP cell regex")
});

/// Advertised latency such as "0.5s", "1.2秒" or "300 ms"
static LATENCY_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d+(?:\.\d+)?)\s*(ms|毫秒|s|sec|secs|seconds|秒)$").expect("Invalid latency regex")
});

static LAST_NUMBER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)(\D*)$").expect("Invalid page number regex"));

static ROW: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").expect("Invalid row selector"));
static CELL: Lazy<Selector> = Lazy::new(|| Selector::parse("td").expect("Invalid cell selector"));
static TITLED: Lazy<Selector> =
    Lazy::new(|| Selector::parse("[title]").expect("Invalid title selector"));

/// Candidates found on one page, plus the next page to follow if any
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub candidates: Vec<Candidate>,
    pub next_page: Option<String>,
}

impl Extraction {
    pub fn new(candidates: Vec<Candidate>) -> Self {
        Self {
            candidates,
            next_page: None,
        }
    }

    pub fn with_next_page(mut self, url: String) -> Self {
        self.next_page = Some(url);
        self
    }
}

/// Turns a vendor page into candidates. Pure: no network access.
pub trait CandidateExtractor: Send + Sync {
    fn extract(&self, page: &Page) -> Result<Extraction>;
}

/// Validate dotted-quad octets
fn is_ipv4(host: &str) -> bool {
    let parts: Vec<&str> = host.split('.').collect();
    parts.len() == 4 && parts.iter().all(|p| p.parse::<u8>().is_ok())
}

fn dedup(candidates: &mut Vec<Candidate>) {
    let mut seen = HashSet::new();
    candidates.retain(|c| seen.insert(c.proxy.url()));
}

/// Extracts IP:PORT pairs from plain text
///
/// Tries line-by-line parsing first and falls back to scanning the whole
/// body for IP:PORT patterns.
#[derive(Debug, Clone, Default)]
pub struct PlainExtractor {
    proxy_type: ProxyType,
}

impl PlainExtractor {
    pub fn new(proxy_type: ProxyType) -> Self {
        Self { proxy_type }
    }

    /// Parse proxies from raw text content
    pub fn parse_proxies_from_text(&self, content: &str) -> Vec<Proxy> {
        let mut proxies = ProxyParser::parse_string(content, self.proxy_type.clone());

        if proxies.is_empty() {
            proxies = self.extract_proxies_with_regex(content);
        }

        proxies
    }

    /// Extract proxies using regex pattern matching
    fn extract_proxies_with_regex(&self, content: &str) -> Vec<Proxy> {
        IP_PORT_REGEX
            .captures_iter(content)
            .filter_map(|cap| {
                let host = cap.get(1)?.as_str().to_string();
                let port: u16 = cap.get(2)?.as_str().parse().ok()?;

                if !is_ipv4(&host) || port == 0 {
                    return None;
                }

                Some(Proxy::new(host, port, self.proxy_type.clone()))
            })
            .collect()
    }
}

impl CandidateExtractor for PlainExtractor {
    fn extract(&self, page: &Page) -> Result<Extraction> {
        let mut candidates: Vec<Candidate> = self
            .parse_proxies_from_text(&page.body)
            .into_iter()
            .map(Candidate::new)
            .collect();
        dedup(&mut candidates);
        Ok(Extraction::new(candidates))
    }
}

/// Extracts candidates from HTML tables
///
/// Each `tr` row is read cell by cell: the first IPv4 cell is the host, the
/// next numeric cell is the port, and cells naming a scheme, a latency or an
/// anonymity level fill in the candidate's metadata. `title` attributes
/// inside the row are also read for latency, since some vendors render it as
/// a bar with a tooltip.
#[derive(Debug, Clone, Default)]
pub struct TableExtractor;

impl TableExtractor {
    fn parse_row(cells: &[String], titles: &[String]) -> Option<Candidate> {
        let ip_index = cells.iter().position(|c| IP_CELL_REGEX.is_match(c))?;
        let caps = IP_CELL_REGEX.captures(&cells[ip_index])?;
        let host = caps[1].to_string();
        if !is_ipv4(&host) {
            return None;
        }

        let port = match caps.get(2) {
            Some(port) => port.as_str().parse::<u16>().ok(),
            None => cells[ip_index + 1..]
                .iter()
                .find_map(|c| c.parse::<u16>().ok()),
        }
        .filter(|p| *p != 0)?;

        let proxy_type = cells
            .iter()
            .find_map(|c| c.parse::<ProxyType>().ok())
            .unwrap_or_default();

        let mut candidate = Candidate::new(Proxy::new(host, port, proxy_type));
        if let Some(latency) = cells.iter().chain(titles).find_map(|c| parse_latency(c)) {
            candidate = candidate.with_latency(latency);
        }
        if let Some(anonymity) = cells.iter().find_map(|c| Anonymity::from_label(c)) {
            candidate = candidate.with_anonymity(anonymity);
        }
        Some(candidate)
    }

    fn extract_rows(&self, page: &Page) -> Result<Vec<Candidate>> {
        let document = Html::parse_document(&page.body);
        let mut rows = 0usize;
        let mut candidates = Vec::new();

        for row in document.select(&ROW) {
            rows += 1;
            let cells: Vec<String> = row
                .select(&CELL)
                .map(|cell| cell.text().collect::<String>().trim().to_string())
                .collect();
            let titles: Vec<String> = row
                .select(&TITLED)
                .filter_map(|el| el.value().attr("title"))
                .map(|t| t.trim().to_string())
                .collect();

            if let Some(candidate) = Self::parse_row(&cells, &titles) {
                candidates.push(candidate);
            }
        }

        if rows == 0 {
            return Err(Error::extraction(&page.url, "no table rows found"));
        }

        dedup(&mut candidates);
        Ok(candidates)
    }
}

impl CandidateExtractor for TableExtractor {
    fn extract(&self, page: &Page) -> Result<Extraction> {
        Ok(Extraction::new(self.extract_rows(page)?))
    }
}

/// Table extraction for vendors that number their pages in the URL
///
/// The next page is the current URL with its last number incremented. It is
/// only offered while pages keep yielding candidates.
#[derive(Debug, Clone, Default)]
pub struct PagedTableExtractor {
    table: TableExtractor,
}

impl CandidateExtractor for PagedTableExtractor {
    fn extract(&self, page: &Page) -> Result<Extraction> {
        let candidates = self.table.extract_rows(page)?;
        let next_page = if candidates.is_empty() {
            None
        } else {
            next_page_url(&page.url)
        };
        Ok(Extraction {
            candidates,
            next_page,
        })
    }
}

/// Parse an advertised latency
pub fn parse_latency(text: &str) -> Option<Duration> {
    let caps = LATENCY_REGEX.captures(text.trim())?;
    let value: f64 = caps[1].parse().ok()?;
    let secs = match &caps[2] {
        "ms" | "毫秒" => value / 1000.0,
        _ => value,
    };
    Duration::try_from_secs_f64(secs).ok()
}

/// Increment the last number in a URL, leaving any `#fragment` untouched
pub fn next_page_url(url: &str) -> Option<String> {
    let (base, fragment) = match url.find('#') {
        Some(idx) => (&url[..idx], &url[idx..]),
        None => (url, ""),
    };
    let caps = LAST_NUMBER_REGEX.captures(base)?;
    let number = caps.get(1)?;
    let next: u64 = number.as_str().parse::<u64>().ok()?.checked_add(1)?;
    Some(format!(
        "{}{}{}{}",
        &base[..number.start()],
        next,
        &caps[2],
        fragment
    ))
}

/// Maps extractor names to implementations
#[derive(Clone, Default)]
pub struct ExtractorRegistry {
    extractors: BTreeMap<String, Arc<dyn CandidateExtractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in extractors
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("plain", Arc::new(PlainExtractor::default()));
        registry.register("html_table", Arc::new(TableExtractor));
        registry.register("paged_html_table", Arc::new(PagedTableExtractor::default()));
        registry
    }

    pub fn register(&mut self, name: &str, extractor: Arc<dyn CandidateExtractor>) {
        self.extractors.insert(name.to_string(), extractor);
    }

    pub fn names(&self) -> Vec<&str> {
        self.extractors.keys().map(String::as_str).collect()
    }

    /// The extractor a vendor asks for
    pub fn resolve(&self, vendor: &VendorSource) -> Result<Arc<dyn CandidateExtractor>> {
        self.extractors
            .get(&vendor.extractor)
            .cloned()
            .ok_or_else(|| Error::UnknownExtractor {
                vendor: vendor.name.clone(),
                extractor: vendor.extractor.clone(),
            })
    }

    /// Fail on the first vendor whose extractor is not registered
    pub fn ensure_known(&self, vendors: &[VendorSource]) -> Result<()> {
        for vendor in vendors {
            self.resolve(vendor)?;
        }
        Ok(())
    }
}

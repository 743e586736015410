//! Proxy module for discovering and validating proxies
//!
//! This module provides functionality for:
//! - Parsing pool members and plain-text proxy lists
//! - Fetching vendor listing pages
//! - Extracting candidate proxies from vendor pages
//! - Validating proxies against probe endpoints

pub mod crawler;
pub mod extract;
pub mod models;
pub mod parser;
pub mod validator;

pub use crawler::{CrawlerConfig, Page, PageFetcher, ProxyCrawler};
pub use extract::{
    CandidateExtractor, Extraction, ExtractorRegistry, PagedTableExtractor, PlainExtractor,
    TableExtractor,
};
pub use models::{Anonymity, Candidate, Proxy, ProxyAuth, ProxyType, Verdict};
pub use parser::ProxyParser;
pub use validator::{validate_all, HttpValidator, ProxyValidator, ValidatorConfig};

//! Proxy parser for pool members and plain-text proxy lists

use crate::proxy::models::{Proxy, ProxyType};
use once_cell::sync::Lazy;
use regex::Regex;

static URL_FORMAT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(https?|socks[45])://(?:([^:@/]+):([^@/]+)@)?([^:@/]+):(\d+)/?$")
        .expect("Invalid proxy URL regex")
});

static AUTH_AT_FORMAT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([^:]+):([^@]+)@([^:]+):(\d+)$").expect("Invalid user:pass@host regex")
});

/// Proxy parser for parsing proxies from strings
pub struct ProxyParser;

impl ProxyParser {
    /// Parse a single proxy line
    ///
    /// Supports formats:
    /// - IP:PORT
    /// - IP:PORT:USER:PASS
    /// - USER:PASS@IP:PORT
    /// - scheme://IP:PORT
    /// - scheme://USER:PASS@IP:PORT
    pub fn parse_line(line: &str, default_type: ProxyType) -> Option<Proxy> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        if let Some(proxy) = Self::parse_url(line) {
            return Some(proxy);
        }

        if let Some(proxy) = Self::parse_auth_at_format(line, default_type.clone()) {
            return Some(proxy);
        }

        Self::parse_colon_format(line, default_type)
    }

    /// Parse a pool member, which is always stored in URL form
    pub fn parse_url(line: &str) -> Option<Proxy> {
        let caps = URL_FORMAT.captures(line.trim())?;

        let proxy_type = caps[1].parse::<ProxyType>().ok()?;
        let host = caps[4].to_string();
        let port: u16 = caps[5].parse().ok()?;
        if port == 0 {
            return None;
        }

        match (caps.get(2), caps.get(3)) {
            (Some(user), Some(pass)) => Some(Proxy::with_auth(
                host,
                port,
                proxy_type,
                user.as_str().to_string(),
                pass.as_str().to_string(),
            )),
            _ => Some(Proxy::new(host, port, proxy_type)),
        }
    }

    /// Parse user:pass@ip:port format
    fn parse_auth_at_format(line: &str, default_type: ProxyType) -> Option<Proxy> {
        let caps = AUTH_AT_FORMAT.captures(line)?;

        let username = caps[1].to_string();
        let password = caps[2].to_string();
        let host = caps[3].to_string();
        let port: u16 = caps[4].parse().ok()?;

        Some(Proxy::with_auth(host, port, default_type, username, password))
    }

    /// Parse ip:port or ip:port:user:pass format
    fn parse_colon_format(line: &str, default_type: ProxyType) -> Option<Proxy> {
        let parts: Vec<&str> = line.split(':').collect();

        match parts.len() {
            2 => {
                let host = parts[0].to_string();
                let port: u16 = parts[1].parse().ok()?;
                Some(Proxy::new(host, port, default_type))
            }
            4 => {
                let host = parts[0].to_string();
                let port: u16 = parts[1].parse().ok()?;
                let username = parts[2].to_string();
                let password = parts[3].to_string();
                Some(Proxy::with_auth(host, port, default_type, username, password))
            }
            _ => None,
        }
    }

    /// Parse proxies from a string (multiple lines)
    pub fn parse_string(content: &str, default_type: ProxyType) -> Vec<Proxy> {
        content
            .lines()
            .filter_map(|line| Self::parse_line(line, default_type.clone()))
            .collect()
    }
}

use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of external source a collector queries.
///
/// Used for reporting and stored alongside every finding.
///
/// IMPORTANT:
/// - The serialized form is lowercase and written to graph backends
/// - Renaming a variant changes stored data
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Web archives (Wayback Machine, ...)
    Archive,
    /// Structured JSON / text APIs
    Api,
    /// Certificate transparency logs
    Cert,
    /// HTML pages scraped for names
    Scrape,
    /// Crawlers following links
    Crawl,
    /// DNS based sources
    Dns,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Category::Archive => "archive",
            Category::Api => "api",
            Category::Cert => "cert",
            Category::Scrape => "scrape",
            Category::Crawl => "crawl",
            Category::Dns => "dns",
        };
        f.write_str(s)
    }
}

// ------------------------------------------------------------
// Finding
// ------------------------------------------------------------
//
// One discovered name, as emitted by a collector and written
// to every graph backend.
//
// Invariants (enforced by the sink):
// - `name` is lowercase, without trailing dot or wildcard label
// - `name` equals `domain` or ends with ".{domain}"
//
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Finding {
    /// Discovered fully qualified name
    pub name: String,

    /// Root domain of the enumeration that produced it
    pub domain: String,

    /// Collector name
    pub source: String,

    /// Collector category
    pub category: Category,

    /// When the collector emitted it
    pub timestamp: DateTime<Utc>,

    /// Addresses the name resolved to; empty when unresolved
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<IpAddr>,
}

impl Finding {
    pub fn new(name: String, domain: &str, source: &str, category: Category) -> Self {
        Self {
            name,
            domain: domain.to_string(),
            source: source.to_string(),
            category,
            timestamp: Utc::now(),
            addresses: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_serializes_lowercase() {
        let f = Finding::new("www.example.com".into(), "example.com", "crtsh", Category::Cert);
        let v = serde_json::to_value(&f).unwrap();
        assert_eq!(v["category"], "cert");
        assert_eq!(v["source"], "crtsh");
        assert_eq!(Category::Archive.to_string(), "archive");
    }

    #[test]
    fn addresses_are_omitted_until_resolved() {
        let mut f = Finding::new("www.example.com".into(), "example.com", "crtsh", Category::Cert);
        assert!(serde_json::to_value(&f).unwrap().get("addresses").is_none());

        f.addresses.push("192.0.2.1".parse().unwrap());
        let v = serde_json::to_value(&f).unwrap();
        assert_eq!(v["addresses"][0], "192.0.2.1");

        let back: Finding = serde_json::from_value(v).unwrap();
        assert_eq!(back, f);
    }
}

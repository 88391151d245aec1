use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;

use serde::Deserialize;

use crate::util::normalize_name;

/// Default number of DNS queries per second allowed per resolver endpoint.
pub const DEFAULT_QUERIES_PER_SECOND: usize = 20;

/// Directory used when `output_dir` is not configured.
pub const DEFAULT_OUTPUT_DIR: &str = "surface_output";

// ------------------------------------------------------------
// Root configuration
// ------------------------------------------------------------
//
// This is the top-level configuration structure loaded from
// `config.json`.
//
// It defines:
// - Target domains of the enumeration
// - The resolver endpoints shared by every collector
// - Which graph backends receive the findings
// - Per-source credentials and disabled sources
// - Optional debug configuration
//
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Root domains to enumerate
    #[serde(default)]
    pub domains: Vec<String>,

    /// Resolver endpoints ("ip:port" or bare ip, port 53 implied)
    #[serde(default)]
    pub resolvers: Vec<String>,

    /// Logs resolver usage periodically while the pool is alive
    #[serde(default)]
    pub monitor_resolver_rate: bool,

    /// Queries per second allowed per resolver endpoint
    pub max_dns_queries: Option<usize>,

    /// Graph backend selection
    #[serde(default)]
    pub graph: GraphConfig,

    /// Directory for local output (local graph store, reports)
    pub output_dir: Option<PathBuf>,

    /// Credentials keyed by data source name
    #[serde(default)]
    pub data_sources: HashMap<String, Credentials>,

    /// Data source names that must not be registered
    #[serde(default)]
    pub disabled_sources: Vec<String>,

    /// Optional debug configuration
    pub debug: Option<DebugConfig>,
}

// ------------------------------------------------------------
// Graph backend configuration
// ------------------------------------------------------------
//
// Any combination may be enabled. Each enabled entry becomes
// one independent sink; findings are fanned out to all of them.
//
#[derive(Debug, Deserialize, Clone, Default)]
pub struct GraphConfig {
    /// Remote Gremlin server
    pub gremlin: Option<GremlinConfig>,

    /// Remote Redis server
    pub redis: Option<RedisConfig>,

    /// Embedded store under the output directory
    #[serde(default)]
    pub local_database: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GremlinConfig {
    /// WebSocket URL, e.g. ws://localhost:8182/gremlin
    pub url: String,

    pub username: Option<String>,

    pub password: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    /// Connection URL, e.g. redis://127.0.0.1/
    pub url: String,
}

// ------------------------------------------------------------
// Data source credentials
// ------------------------------------------------------------
//
// Looked up by collectors at execution time. A collector that
// requires credentials and finds none simply does nothing.
//
// NOTE:
// The config file contains secrets and must not be committed.
//
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub key: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub secret: Option<String>,
}

// ------------------------------------------------------------
// Debug configuration
// ------------------------------------------------------------
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DebugConfig {
    /// Enables debug-level logging
    pub log: Option<bool>,
}

impl Config {
    /// Validates the settings required before a job can start.
    ///
    /// Returns a human readable reason on the first problem found.
    pub fn check_settings(&self) -> Result<(), String> {
        if self.domains.is_empty() {
            return Err("no target domains were provided".into());
        }

        if let Some(d) = self.domains.iter().find(|d| normalize_name(d).is_none()) {
            return Err(format!("invalid target domain '{}'", d));
        }

        if self.resolvers.is_empty() {
            return Err("no resolvers were provided".into());
        }

        if self.max_dns_queries == Some(0) {
            return Err("max_dns_queries must be greater than zero".into());
        }

        if let Some(g) = &self.graph.gremlin {
            if g.url.is_empty() {
                return Err("gremlin url must not be empty".into());
            }
        }

        if let Some(r) = &self.graph.redis {
            if r.url.is_empty() {
                return Err("redis url must not be empty".into());
            }
        }

        Ok(())
    }

    /// Queries per second per resolver endpoint.
    pub fn queries_per_second(&self) -> usize {
        self.max_dns_queries.unwrap_or(DEFAULT_QUERIES_PER_SECOND)
    }

    /// Resolves the directory used for local output.
    pub fn output_directory(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR))
    }

    /// Looks up credentials for a data source (case-insensitive).
    pub fn credentials(&self, source: &str) -> Option<&Credentials> {
        self.data_sources
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(source))
            .map(|(_, c)| c)
    }

    pub fn is_source_disabled(&self, source: &str) -> bool {
        self.disabled_sources
            .iter()
            .any(|s| s.eq_ignore_ascii_case(source))
    }

    pub fn debug_logging(&self) -> bool {
        self.debug.as_ref().is_some_and(|d| d.log.unwrap_or(false))
    }
}

/// Parses a resolver entry, defaulting to port 53 when none is given.
pub fn parse_resolver(entry: &str) -> Option<SocketAddr> {
    let entry = entry.trim();

    if let Ok(addr) = entry.parse::<SocketAddr>() {
        return Some(addr);
    }

    entry
        .parse::<std::net::IpAddr>()
        .ok()
        .map(|ip| SocketAddr::new(ip, 53))
}

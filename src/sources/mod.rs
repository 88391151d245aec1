//! Data source registration table
//!
//! This module provides:
//! - The `Collector` contract every data source implements
//! - A factory resolving collectors by their stable name
//!
//! All source-specific logic must live in dedicated modules.
//! The rest of the application interacts exclusively through
//! the `Collector` trait.

pub mod collector;
mod crtsh;
mod hackertarget;
mod rapiddns;
mod securitytrails;
mod wayback;

use std::sync::Arc;

use crate::config::Config;
use collector::Collector;

pub use crtsh::CrtSh;
pub use hackertarget::HackerTarget;
pub use rapiddns::RapidDns;
pub use securitytrails::SecurityTrails;
pub use wayback::Wayback;

/// Names of every built-in data source, in registration order.
pub const SOURCE_NAMES: [&str; 5] = [
    "crtsh",
    "hackertarget",
    "rapiddns",
    "securitytrails",
    "wayback",
];

/// Returns a fresh collector instance by name.
///
/// CONTRACT:
/// - `name` is matched case-insensitively
/// - The returned collector has not been started
///
/// THREADING:
/// - Collectors are wrapped in `Arc` and shared across tasks
pub fn get_source(name: &str) -> Option<Arc<dyn Collector>> {
    match name.to_ascii_lowercase().as_str() {
        "crtsh" => Some(Arc::new(CrtSh::new())),
        "hackertarget" => Some(Arc::new(HackerTarget::new())),
        "rapiddns" => Some(Arc::new(RapidDns::new())),
        "securitytrails" => Some(Arc::new(SecurityTrails::new())),
        "wayback" => Some(Arc::new(Wayback::new())),
        _ => None,
    }
}

/// Every built-in collector not listed in `disabled_sources`.
pub fn all_sources(cfg: &Config) -> Vec<Arc<dyn Collector>> {
    SOURCE_NAMES
        .iter()
        .filter(|name| !cfg.is_source_disabled(name))
        .filter_map(|name| get_source(name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_listed_name_resolves_to_itself() {
        for name in SOURCE_NAMES {
            let src = get_source(name).unwrap();
            assert_eq!(src.name(), name);
        }
        assert!(get_source("CrtSh").is_some());
        assert!(get_source("unknown").is_none());
    }

    #[test]
    fn disabled_sources_are_left_out() {
        let cfg: Config =
            serde_json::from_str(r#"{ "disabled_sources": ["Wayback", "crtsh"] }"#).unwrap();

        let names: Vec<_> = all_sources(&cfg)
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(names, vec!["hackertarget", "rapiddns", "securitytrails"]);
    }
}

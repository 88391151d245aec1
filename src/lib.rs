// ------------------------------------------------------------
// Module declarations
// ------------------------------------------------------------
//
// - config:        Configuration structs loaded from JSON
// - errors:        Orchestrator error kinds and teardown reports
// - schema:        Discovered-name records
// - util:          Name normalisation and extraction helpers
// - ratelimit:     Per-source request pacing
// - http:          Shared HTTP client used by the data sources
// - resolvers:     DNS resolver pool
// - sources:       Built-in data sources and the collector contract
// - graph:         Graph database backends
// - registry:      Append-only list of registered data sources
// - watchdog:      Memory consumption monitor
// - orchestrator:  Lifecycle owner for everything above
// - enumeration:   Runs the sources and stores what they find
//
pub mod config;
pub mod enumeration;
pub mod errors;
pub mod graph;
pub mod http;
pub mod metrics;
pub mod orchestrator;
pub mod ratelimit;
pub mod registry;
pub mod resolvers;
pub mod schema;
pub mod sources;
pub mod util;
pub mod watchdog;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use errors::{OrchestratorError, TeardownReport};
pub use orchestrator::Orchestrator;

use rustls::crypto::{ring, CryptoProvider};

/// Installs the `ring` rustls provider for the process.
///
/// rustls >= 0.23 needs one installed before any TLS connection is made.
/// Later calls are no-ops.
pub fn install_crypto_provider() {
    let _ = CryptoProvider::install_default(ring::default_provider());
}

// ------------------------------------------------------------
// External dependencies
// ------------------------------------------------------------

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::time::sleep;

use surface_collector::config::Config;
use surface_collector::enumeration::{self, EnumerationSettings};
use surface_collector::http::RequestFacility;
use surface_collector::metrics::METRICS;
use surface_collector::{install_crypto_provider, sources, Orchestrator};

// ------------------------------------------------------------
// Application entry point
// ------------------------------------------------------------
//
// Responsibilities:
// - Initialize cryptography backend (rustls)
// - Load and validate configuration
// - Build the orchestrator (resolvers, graphs, watchdog)
// - Register the built-in data sources
// - Run one enumeration and tear everything down
//
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --------------------------------------------------------
    // rustls >= 0.23 requires an explicit CryptoProvider.
    // Must run before the first TLS connection.
    // --------------------------------------------------------
    install_crypto_provider();

    // --------------------------------------------------------
    // Load configuration from disk
    //
    // Path comes from the first argument, `config.json` otherwise.
    // The file may hold data source credentials.
    // --------------------------------------------------------
    let path = std::env::args().nth(1).unwrap_or_else(|| "config.json".into());
    let config = load_config(&path)?;

    init_logging(&config);

    // --------------------------------------------------------
    // Build the orchestrator
    //
    // Fails on invalid settings, an unusable resolver list or
    // an unreachable graph backend.
    // --------------------------------------------------------
    let orch = Orchestrator::new(Arc::new(config)).await?;

    let failures = orch
        .set_data_sources(sources::all_sources(orch.config()))
        .await;
    log::info!(
        "data sources: {} ({} failed to start)",
        orch.get_all_source_names().await.join(", "),
        failures.len()
    );

    // --------------------------------------------------------
    // Start metrics reporter (periodic, low-noise)
    // --------------------------------------------------------
    let reporter = tokio::spawn(async {
        loop {
            sleep(Duration::from_secs(10)).await;
            log::info!("[METRICS] {}", METRICS.summary());
        }
    });

    // --------------------------------------------------------
    // Enumerate, interruptible with ctrl-c
    // --------------------------------------------------------
    let http = Arc::new(RequestFacility::new()?);
    tokio::select! {
        _ = enumeration::run(&orch, http, EnumerationSettings::default()) => {}
        _ = tokio::signal::ctrl_c() => log::warn!("interrupted, shutting down"),
    }

    reporter.abort();
    log::info!("[METRICS] {}", METRICS.summary());

    orch.shutdown().await?;
    Ok(())
}

// ------------------------------------------------------------
// Logging
// ------------------------------------------------------------
//
// `RUST_LOG` wins when set; otherwise the config's debug flag
// picks between debug and info.
//
fn init_logging(config: &Config) {
    let level = if config.debug_logging() { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

// ------------------------------------------------------------
// Configuration loader
// ------------------------------------------------------------
//
// Reads a JSON configuration file from disk and deserializes
// it into the strongly typed `Config` structure. Semantic
// checks happen when the orchestrator is built.
//
fn load_config(path: &str) -> anyhow::Result<Config> {
    let data = fs::read_to_string(path).with_context(|| format!("failed to read {}", path))?;
    let cfg = serde_json::from_str(&data).with_context(|| format!("failed to parse {}", path))?;
    Ok(cfg)
}

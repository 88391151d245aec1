// ------------------------------------------------------------
// The collection orchestrator
// ------------------------------------------------------------
//
// Owns the resolver pool, the graph backends, the data source registry
// and the memory watchdog of one enumeration job, and tears all of them
// down exactly once.
//
// Construction is all-or-nothing: when any step fails, everything built
// so far is released before the error is returned, and the watchdog is
// only started once every other resource exists.
//

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;

use crate::config::Config;
use crate::errors::{OrchestratorError, ResourceKind, TeardownReport};
use crate::graph::{GraphBackend, GraphTarget};
use crate::metrics::{incr, METRICS};
use crate::registry::Registry;
use crate::resolvers::{Resolver, ResolverPool};
use crate::sources::collector::Collector;
use crate::watchdog::{MemorySampler, MemoryWatchdog, ProcessMemory, WatchdogSettings};

/// Builds the external collaborators the orchestrator owns.
///
/// The default implementation talks to real resolvers and graph
/// services; tests substitute their own.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn resolvers(&self, cfg: &Config) -> Result<Arc<dyn Resolver>>;

    async fn graph(&self, target: &GraphTarget) -> Result<Arc<dyn GraphBackend>>;
}

/// Connects to the resolvers and graph backends named in the config.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultConnector;

#[async_trait::async_trait]
impl Connector for DefaultConnector {
    async fn resolvers(&self, cfg: &Config) -> Result<Arc<dyn Resolver>> {
        Ok(Arc::new(ResolverPool::from_config(cfg)?))
    }

    async fn graph(&self, target: &GraphTarget) -> Result<Arc<dyn GraphBackend>> {
        target.open().await
    }
}

/// Runs one enumeration job's shared resources.
///
/// Shared between tasks behind an `Arc`; every method takes `&self`.
pub struct Orchestrator {
    config: Arc<Config>,
    pool: Arc<dyn Resolver>,
    graphs: Vec<Arc<dyn GraphBackend>>,
    registry: Registry,

    // Broadcast that the job is over; flipped exactly once
    done: watch::Sender<bool>,
    done_already_closed: AtomicBool,

    watchdog: MemoryWatchdog,
}

impl Orchestrator {
    /// Builds the orchestrator against real resolvers and graph backends.
    pub async fn new(config: Arc<Config>) -> Result<Self, OrchestratorError> {
        Self::with_connector(config, &DefaultConnector).await
    }

    /// Builds the orchestrator with a custom [`Connector`].
    pub async fn with_connector(
        config: Arc<Config>,
        connector: &dyn Connector,
    ) -> Result<Self, OrchestratorError> {
        Self::build(config, connector, ProcessMemory, WatchdogSettings::default()).await
    }

    pub(crate) async fn build<S: MemorySampler>(
        config: Arc<Config>,
        connector: &dyn Connector,
        sampler: S,
        settings: WatchdogSettings,
    ) -> Result<Self, OrchestratorError> {
        config
            .check_settings()
            .map_err(OrchestratorError::ConfigInvalid)?;

        let pool = connector
            .resolvers(&config)
            .await
            .map_err(OrchestratorError::ResolverPoolUnavailable)?;

        let graphs = match setup_graphs(&config, connector).await {
            Ok(graphs) => graphs,
            Err(e) => {
                pool.stop();
                return Err(e);
            }
        };

        let (done, done_rx) = watch::channel(false);
        let watchdog = MemoryWatchdog::spawn_with(sampler, settings, done_rx);

        log::info!(
            "orchestrator ready: {} resolvers, {} graph backends",
            pool.len(),
            graphs.len()
        );

        Ok(Self {
            config,
            pool,
            graphs,
            registry: Registry::new(),
            done,
            done_already_closed: AtomicBool::new(false),
            watchdog,
        })
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn resolvers(&self) -> &Arc<dyn Resolver> {
        &self.pool
    }

    pub fn is_shut_down(&self) -> bool {
        self.done_already_closed.load(Ordering::SeqCst)
    }

    /// Registers `source` without starting it.
    pub async fn add_source(&self, source: Arc<dyn Collector>) -> Result<(), OrchestratorError> {
        if self.is_shut_down() {
            return Err(OrchestratorError::AlreadyShutdown);
        }

        self.registry
            .push(source)
            .await
            .map_err(|_| OrchestratorError::AlreadyShutdown)?;

        incr(&METRICS.sources_active);
        Ok(())
    }

    /// Starts `source` and registers it only if the start succeeded.
    pub async fn add_and_start(&self, source: Arc<dyn Collector>) -> Result<(), OrchestratorError> {
        if self.is_shut_down() {
            return Err(OrchestratorError::AlreadyShutdown);
        }

        if let Err(e) = source.start().await {
            incr(&METRICS.sources_failed);
            return Err(OrchestratorError::SourceStartFailed {
                name: source.name().to_string(),
                source: e,
            });
        }

        if let Err(e) = self.add_source(source.clone()).await {
            // Shut down while starting; nobody else will stop it
            if let Err(stop_err) = source.stop().await {
                log::warn!("failed to stop {}: {:#}", source.name(), stop_err);
            }
            return Err(e);
        }

        log::debug!("data source {} started", source.name());
        Ok(())
    }

    /// Starts and registers every source, continuing past failures.
    ///
    /// Returns the failures so the caller can report them.
    pub async fn set_data_sources(
        &self,
        sources: Vec<Arc<dyn Collector>>,
    ) -> Vec<OrchestratorError> {
        let mut failures = Vec::new();

        for source in sources {
            if let Err(e) = self.add_and_start(source).await {
                log::warn!("{}", e);
                failures.push(e);
            }
        }

        failures
    }

    /// Snapshot of the registered data sources.
    pub async fn data_sources(&self) -> Vec<Arc<dyn Collector>> {
        self.registry.snapshot().await
    }

    pub fn graph_backends(&self) -> &[Arc<dyn GraphBackend>] {
        &self.graphs
    }

    pub async fn get_all_source_names(&self) -> Vec<String> {
        self.registry.names().await
    }

    /// Whether allocation has stayed above the adaptive baseline.
    ///
    /// Answered from the watchdog's cached state. Always `false` once
    /// shutdown has begun.
    pub async fn high_memory_consumption(&self) -> bool {
        if self.is_shut_down() {
            return false;
        }

        self.watchdog.query().await
    }

    /// Tears everything down. Only the first call does any work.
    ///
    /// Order: signal + watchdog, data sources, graph backends, resolver
    /// pool. Every step runs even if an earlier one failed; failures are
    /// returned together.
    pub async fn shutdown(&self) -> Result<(), OrchestratorError> {
        if self.done_already_closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        log::info!("orchestrator shutting down");
        let mut report = TeardownReport::default();

        self.done.send_replace(true);
        if let Err(e) = self.watchdog.join().await {
            report.record(ResourceKind::Watchdog, "memory", e);
        }

        for source in self.registry.seal().await {
            if let Err(e) = source.stop().await {
                report.record(ResourceKind::DataSource, source.name(), e);
            }
        }

        for graph in &self.graphs {
            if let Err(e) = graph.close().await {
                report.record(ResourceKind::GraphBackend, graph.name(), e);
            }
        }

        self.pool.stop();

        if report.is_empty() {
            log::info!("orchestrator shut down cleanly");
        } else {
            log::warn!("orchestrator shut down with {} teardown failures", report.len());
        }
        report.into_result()
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("resolvers", &self.pool.len())
            .field(
                "graphs",
                &self.graphs.iter().map(|g| g.name().to_string()).collect::<Vec<_>>(),
            )
            .field("registry", &self.registry)
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

/// Opens every configured backend; on failure closes the ones already open.
async fn setup_graphs(
    config: &Config,
    connector: &dyn Connector,
) -> Result<Vec<Arc<dyn GraphBackend>>, OrchestratorError> {
    let mut graphs: Vec<Arc<dyn GraphBackend>> = Vec::new();

    for target in GraphTarget::from_config(config) {
        match connector.graph(&target).await {
            Ok(graph) => graphs.push(graph),
            Err(source) => {
                for opened in graphs.iter().rev() {
                    if let Err(e) = opened.close().await {
                        log::warn!("failed to close {} graph: {:#}", opened.name(), e);
                    }
                }

                return Err(OrchestratorError::BackendSetupFailed {
                    backend: target.to_string(),
                    source,
                });
            }
        }
    }

    Ok(graphs)
}

use std::collections::HashSet;
use std::future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use futures_util::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::graph::GraphBackend;
use crate::http::RequestFacility;
use crate::metrics::{incr, METRICS};
use crate::orchestrator::Orchestrator;
use crate::resolvers::Resolver;
use crate::schema::Finding;
use crate::sources::collector::{ExecContext, NameSink};
use crate::util::normalize_name;

// ------------------------------------------------------------
// Enumeration driver
// ------------------------------------------------------------
//
// Runs every registered data source against every configured
// domain, then for each distinct name:
// - resolves it through the orchestrator's resolver pool
// - writes it to every graph backend
//
// New executions are held back while the orchestrator reports
// high memory consumption. Executions already running are left
// alone. Names that do not resolve are still stored.
//

/// Buffered findings between collectors and the store task.
pub const SINK_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, Copy)]
pub struct EnumerationSettings {
    /// Executions allowed to run at the same time
    pub max_concurrent: usize,

    /// Lookups (and the writes that follow) in flight at once
    pub max_lookups: usize,

    /// How long to wait before re-checking memory pressure
    pub backpressure_pause: Duration,
}

impl Default for EnumerationSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 16,
            max_lookups: 64,
            backpressure_pause: Duration::from_secs(5),
        }
    }
}

/// Totals of one enumeration run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EnumerationSummary {
    pub executions: usize,
    pub unique_names: usize,
    pub resolved: usize,
    pub stored: usize,
    pub store_failures: usize,
}

/// Runs one execution per (data source, domain) pair and stores the results.
pub async fn run(
    orch: &Orchestrator,
    http: Arc<RequestFacility>,
    settings: EnumerationSettings,
) -> EnumerationSummary {
    let (sink, rx) = NameSink::channel(SINK_CAPACITY);
    let ctx = ExecContext::new(sink, http, orch.config().clone());

    let store = tokio::spawn(store_findings(
        rx,
        orch.resolvers().clone(),
        orch.graph_backends().to_vec(),
        settings.max_lookups.max(1),
    ));

    let domains = target_domains(&orch.config().domains);
    let sources = orch.data_sources().await;
    let jobs: Vec<_> = domains
        .iter()
        .flat_map(|domain| sources.iter().map(move |src| (src.clone(), domain.clone())))
        .collect();

    log::info!(
        "enumerating {} domains with {} data sources",
        domains.len(),
        sources.len()
    );

    let executions = stream::iter(jobs)
        .map(|(src, domain)| {
            let ctx = ctx.clone();
            async move {
                wait_for_memory(orch, settings.backpressure_pause).await;
                if orch.is_shut_down() {
                    return 0;
                }

                src.execute(&domain, &ctx).await;
                incr(&METRICS.executions_completed);
                1
            }
        })
        .buffer_unordered(settings.max_concurrent.max(1))
        .fold(0usize, |acc, n| async move { acc + n })
        .await;

    // Last sender gone: the store task drains and returns
    drop(ctx);

    let mut summary = match store.await {
        Ok(summary) => summary,
        Err(e) => {
            log::error!("store task failed: {}", e);
            EnumerationSummary::default()
        }
    };
    summary.executions = executions;

    log::info!(
        "enumeration finished: {} executions, {} unique names, {} resolved, {} stored, {} store failures",
        summary.executions,
        summary.unique_names,
        summary.resolved,
        summary.stored,
        summary.store_failures
    );
    summary
}

/// Configured domains in normalized form, without duplicates.
fn target_domains(configured: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut domains = Vec::new();

    for raw in configured {
        match normalize_name(raw) {
            Some(d) if seen.insert(d.clone()) => domains.push(d),
            Some(_) => {}
            None => log::warn!("skipping unusable domain '{}'", raw),
        }
    }
    domains
}

async fn wait_for_memory(orch: &Orchestrator, pause: Duration) {
    let mut announced = false;

    while orch.high_memory_consumption().await {
        if !announced {
            log::warn!("high memory consumption, holding back new executions");
            announced = true;
        }
        sleep(pause).await;
    }
}

#[derive(Debug, Default)]
struct Outcome {
    resolved: bool,
    stored: usize,
    failures: usize,
}

async fn store_findings(
    rx: mpsc::Receiver<Finding>,
    pool: Arc<dyn Resolver>,
    graphs: Vec<Arc<dyn GraphBackend>>,
    max_lookups: usize,
) -> EnumerationSummary {
    let mut seen = HashSet::new();

    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|f| (f, rx)) })
        .filter_map(move |f: Finding| {
            let fresh = seen.insert((f.domain.clone(), f.name.clone()));
            future::ready(fresh.then_some(f))
        })
        .map(|f| resolve_and_store(f, pool.as_ref(), &graphs))
        .buffer_unordered(max_lookups)
        .fold(EnumerationSummary::default(), |mut summary, outcome| {
            summary.unique_names += 1;
            summary.resolved += usize::from(outcome.resolved);
            summary.stored += outcome.stored;
            summary.store_failures += outcome.failures;
            future::ready(summary)
        })
        .await
}

async fn resolve_and_store(
    mut finding: Finding,
    pool: &dyn Resolver,
    graphs: &[Arc<dyn GraphBackend>],
) -> Outcome {
    let mut outcome = Outcome::default();

    match pool.resolve(&finding.name).await {
        Ok(addrs) => {
            outcome.resolved = !addrs.is_empty();
            if outcome.resolved {
                incr(&METRICS.names_resolved);
            }
            finding.addresses = addrs;
        }
        Err(e) => {
            incr(&METRICS.resolve_errors);
            log::debug!("{:#}", e);
        }
    }

    log::info!("{} ({}) {:?}", finding.name, finding.source, finding.addresses);

    let results = join_all(graphs.iter().map(|g| g.insert(&finding))).await;
    for (graph, result) in graphs.iter().zip(results) {
        match result {
            Ok(()) => {
                outcome.stored += 1;
                incr(&METRICS.names_stored);
            }
            Err(e) => {
                outcome.failures += 1;
                incr(&METRICS.store_errors);
                log::warn!("{} graph: {:#}", graph.name(), e);
            }
        }
    }

    outcome
}

//! Test doubles shared by the unit tests.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};

use crate::config::Config;
use crate::graph::{GraphBackend, GraphTarget};
use crate::orchestrator::Connector;
use crate::resolvers::Resolver;
use crate::schema::{Category, Finding};
use crate::sources::collector::{Collector, ExecContext};
use crate::watchdog::MemorySampler;

pub struct MockSource {
    pub name: String,
    pub fail_start: bool,
    pub fail_stop: bool,
    pub emits: Vec<String>,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub executions: AtomicUsize,
}

impl MockSource {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::with(name, false, false)
    }

    pub fn with(name: impl Into<String>, fail_start: bool, fail_stop: bool) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            fail_start,
            fail_stop,
            emits: Vec::new(),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            executions: AtomicUsize::new(0),
        })
    }

    /// A source that reports `names` (relative labels) for every domain.
    pub fn emitting(name: impl Into<String>, labels: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            fail_start: false,
            fail_stop: false,
            emits: labels.iter().map(|s| s.to_string()).collect(),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            executions: AtomicUsize::new(0),
        })
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Collector for MockSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn category(&self) -> Category {
        Category::Api
    }

    async fn start(&self) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            bail!("missing api key");
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.fail_stop {
            bail!("stop failed");
        }
        Ok(())
    }

    async fn execute(&self, domain: &str, ctx: &ExecContext) {
        self.executions.fetch_add(1, Ordering::SeqCst);

        let names: Vec<String> = self
            .emits
            .iter()
            .map(|label| format!("{}.{}", label, domain))
            .collect();
        ctx.emit_all(self, domain, names).await;
    }
}

/// Resolves every name to 192.0.2.1 except those listed in `unresolved`.
#[derive(Default)]
pub struct MockPool {
    pub stops: AtomicUsize,
    pub lookups: AtomicUsize,
    pub unresolved: Vec<&'static str>,
}

impl MockPool {
    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Resolver for MockPool {
    fn len(&self) -> usize {
        1
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        self.stops() > 0
    }

    async fn resolve(&self, name: &str) -> Result<Vec<IpAddr>> {
        if self.is_stopped() {
            bail!("resolver pool is stopped");
        }
        self.lookups.fetch_add(1, Ordering::SeqCst);

        if self.unresolved.contains(&name) {
            return Ok(Vec::new());
        }
        Ok(vec![IpAddr::from([192, 0, 2, 1])])
    }
}

pub struct MockGraph {
    pub kind: &'static str,
    pub fail_close: bool,
    pub fail_insert: bool,
    pub closes: AtomicUsize,
    pub inserted: Mutex<Vec<Finding>>,
}

impl MockGraph {
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn inserted_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .inserted
            .lock()
            .unwrap()
            .iter()
            .map(|f| f.name.clone())
            .collect();
        names.sort();
        names
    }
}

#[async_trait::async_trait]
impl GraphBackend for MockGraph {
    fn name(&self) -> &str {
        self.kind
    }

    async fn insert(&self, finding: &Finding) -> Result<()> {
        if self.fail_insert {
            bail!("write failed");
        }
        self.inserted.lock().unwrap().push(finding.clone());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            bail!("flush failed");
        }
        Ok(())
    }
}

/// Hands out mock collaborators and remembers every graph it opened.
#[derive(Default)]
pub struct MockConnector {
    pub pool: Arc<MockPool>,
    pub opened: Mutex<Vec<Arc<MockGraph>>>,
    pub fail_pool: bool,
    pub fail_graph: Option<&'static str>,
    pub fail_close: Option<&'static str>,
    pub fail_insert: Option<&'static str>,
}

impl MockConnector {
    pub fn opened(&self) -> Vec<Arc<MockGraph>> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Connector for MockConnector {
    async fn resolvers(&self, _cfg: &Config) -> Result<Arc<dyn Resolver>> {
        if self.fail_pool {
            bail!("no resolvers reachable");
        }
        Ok(self.pool.clone())
    }

    async fn graph(&self, target: &GraphTarget) -> Result<Arc<dyn GraphBackend>> {
        let kind = target.kind();
        if self.fail_graph == Some(kind) {
            bail!("connection refused");
        }

        let graph = Arc::new(MockGraph {
            kind,
            fail_close: self.fail_close == Some(kind),
            fail_insert: self.fail_insert == Some(kind),
            closes: AtomicUsize::new(0),
            inserted: Mutex::new(Vec::new()),
        });
        self.opened.lock().unwrap().push(graph.clone());
        Ok(graph)
    }
}

/// Sampler returning whatever the test stores.
pub struct FixedMemory(pub Arc<AtomicU64>);

impl MemorySampler for FixedMemory {
    fn allocated(&mut self) -> Option<u64> {
        Some(self.0.load(Ordering::SeqCst))
    }
}

/// Minimal valid config with `graph` as the graph section.
pub fn config(graph: &str) -> Arc<Config> {
    let json = format!(
        r#"{{ "domains": ["example.com"], "resolvers": ["8.8.8.8"], "graph": {} }}"#,
        graph
    );
    Arc::new(serde_json::from_str(&json).unwrap())
}

pub fn alive_tasks() -> usize {
    tokio::runtime::Handle::current().metrics().num_alive_tasks()
}

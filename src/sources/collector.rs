use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::sync::mpsc;

use crate::config::{Config, Credentials};
use crate::http::RequestFacility;
use crate::metrics::{incr, METRICS};
use crate::schema::{Category, Finding};
use crate::util;

/// Collector is the plugin boundary between:
/// - The orchestrator (registration, lifecycle)
/// - The enumeration driver (one `execute` per target domain)
/// - One external source (API, archive, CT log, web page)
///
/// Each collector must:
/// - Keep `start` / `stop` idempotent
/// - Contain every network or parse failure inside `execute`
/// - Emit names only through the provided sink
///
/// THREAD SAFETY:
/// - Must be Send + Sync
/// - `execute` may run concurrently for different domains
#[async_trait::async_trait]
pub trait Collector: Send + Sync {
    /// Stable, unique name used by the registry and in findings.
    fn name(&self) -> &str;

    fn category(&self) -> Category;

    /// Prepares the collector (rate limit, reachability checks).
    ///
    /// A failure keeps the collector out of the registry.
    async fn start(&self) -> Result<()>;

    /// Releases whatever `start` acquired.
    async fn stop(&self) -> Result<()>;

    /// Runs one vertical enumeration against `domain`.
    ///
    /// IMPORTANT:
    /// - Must never panic
    /// - Errors are logged here and never returned
    async fn execute(&self, domain: &str, ctx: &ExecContext);
}

// ------------------------------------------------------------
// Lifecycle
// ------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Started,
    Stopped,
}

/// Atomic Created → Started → Stopped bookkeeping for collectors.
#[derive(Debug)]
pub struct Lifecycle(AtomicU8);

const CREATED: u8 = 0;
const STARTED: u8 = 1;
const STOPPED: u8 = 2;

impl Default for Lifecycle {
    fn default() -> Self {
        Self(AtomicU8::new(CREATED))
    }
}

impl Lifecycle {
    pub fn state(&self) -> LifecycleState {
        match self.0.load(Ordering::SeqCst) {
            CREATED => LifecycleState::Created,
            STARTED => LifecycleState::Started,
            _ => LifecycleState::Stopped,
        }
    }

    /// Created → Started. Starting twice is fine; starting after stop is not.
    pub fn start(&self, name: &str) -> Result<()> {
        match self
            .0
            .compare_exchange(CREATED, STARTED, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) | Err(STARTED) => Ok(()),
            Err(_) => bail!("{} was already stopped", name),
        }
    }

    /// Any state → Stopped. Returns false when it was already stopped.
    pub fn stop(&self) -> bool {
        self.0.swap(STOPPED, Ordering::SeqCst) != STOPPED
    }

    pub fn is_started(&self) -> bool {
        self.state() == LifecycleState::Started
    }
}

// ------------------------------------------------------------
// Name sink
// ------------------------------------------------------------

/// Where collectors send discovered names.
///
/// Names are normalized and scope-checked before they leave the
/// collector; out-of-scope names are dropped silently.
#[derive(Debug, Clone)]
pub struct NameSink {
    tx: mpsc::Sender<Finding>,
}

impl NameSink {
    pub fn new(tx: mpsc::Sender<Finding>) -> Self {
        Self { tx }
    }

    /// Creates a sink and the receiver end of its channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Finding>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Emits one raw name found by `collector` for `domain`.
    ///
    /// Returns false when the name was rejected or the receiver is gone.
    pub async fn emit(&self, collector: &dyn Collector, domain: &str, raw: &str) -> bool {
        let (Some(name), Some(domain)) = (util::normalize_name(raw), util::normalize_name(domain))
        else {
            return false;
        };

        if !util::in_scope(&name, &domain) {
            return false;
        }

        let finding = Finding::new(name, &domain, collector.name(), collector.category());
        if self.tx.send(finding).await.is_err() {
            return false;
        }

        incr(&METRICS.names_discovered);
        true
    }
}

// ------------------------------------------------------------
// Execution context
// ------------------------------------------------------------

/// Everything a collector is handed for one execution.
#[derive(Debug, Clone)]
pub struct ExecContext {
    pub sink: NameSink,
    pub http: Arc<RequestFacility>,
    config: Arc<Config>,
}

impl ExecContext {
    pub fn new(sink: NameSink, http: Arc<RequestFacility>, config: Arc<Config>) -> Self {
        Self { sink, http, config }
    }

    /// Credentials configured for `source`, if any.
    pub fn credentials(&self, source: &str) -> Option<Credentials> {
        self.config.credentials(source).cloned()
    }

    /// Sends every name in `names` to the sink; returns how many were kept.
    pub async fn emit_all<I, S>(&self, collector: &dyn Collector, domain: &str, names: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut kept = 0;
        for name in names {
            if self.sink.emit(collector, domain, name.as_ref()).await {
                kept += 1;
            }
        }
        kept
    }
}

/// Logs a contained execution failure the same way for every collector.
pub fn log_failure(collector: &dyn Collector, domain: &str, err: &anyhow::Error) {
    log::warn!("[{}] {}: {:#}", collector.name(), domain, err);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy;

    #[async_trait::async_trait]
    impl Collector for Dummy {
        fn name(&self) -> &str {
            "dummy"
        }

        fn category(&self) -> Category {
            Category::Api
        }

        async fn start(&self) -> Result<()> {
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            Ok(())
        }

        async fn execute(&self, _domain: &str, _ctx: &ExecContext) {}
    }

    #[test]
    fn lifecycle_transitions() {
        let lc = Lifecycle::default();
        assert_eq!(lc.state(), LifecycleState::Created);

        lc.start("x").unwrap();
        lc.start("x").unwrap();
        assert!(lc.is_started());

        assert!(lc.stop());
        assert!(!lc.stop());
        assert_eq!(lc.state(), LifecycleState::Stopped);
        assert!(lc.start("x").is_err());
    }

    #[tokio::test]
    async fn sink_normalizes_and_scopes() {
        let (sink, mut rx) = NameSink::channel(8);

        assert!(sink.emit(&Dummy, "Example.com", "*.WWW.example.com.").await);
        assert!(!sink.emit(&Dummy, "example.com", "www.other.org").await);
        assert!(!sink.emit(&Dummy, "example.com", "   ").await);

        let f = rx.recv().await.unwrap();
        assert_eq!(f.name, "www.example.com");
        assert_eq!(f.domain, "example.com");
        assert_eq!(f.source, "dummy");
        assert_eq!(f.category, Category::Api);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn sink_accepts_fully_qualified_domains() {
        let (sink, mut rx) = NameSink::channel(8);

        assert!(sink.emit(&Dummy, "example.com.", "www.example.com").await);
        assert!(sink.emit(&Dummy, " Example.COM ", "api.example.com").await);
        assert!(!sink.emit(&Dummy, ".", "www.example.com").await);

        assert_eq!(rx.recv().await.unwrap().domain, "example.com");
        assert_eq!(rx.recv().await.unwrap().domain, "example.com");
    }

    #[tokio::test]
    async fn sink_reports_closed_receiver() {
        let (sink, rx) = NameSink::channel(1);
        drop(rx);
        assert!(!sink.emit(&Dummy, "example.com", "a.example.com").await);
    }

    #[tokio::test]
    async fn context_looks_up_credentials() {
        let cfg: Config = serde_json::from_str(
            r#"{ "data_sources": { "Dummy": { "key": "k", "username": "u" } } }"#,
        )
        .unwrap();
        let (sink, _rx) = NameSink::channel(1);
        let ctx = ExecContext::new(sink, Arc::new(RequestFacility::new().unwrap()), Arc::new(cfg));

        let creds = ctx.credentials("dummy").unwrap();
        assert_eq!(creds.key.as_deref(), Some("k"));
        assert_eq!(creds.username.as_deref(), Some("u"));
        assert!(ctx.credentials("other").is_none());
    }
}

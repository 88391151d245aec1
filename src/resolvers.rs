use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use hickory_resolver::config::{NameServerConfig, ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::xfer::Protocol;
use hickory_resolver::TokioResolver;
use rand::random_range;
use tokio::sync::watch;
use tokio::time::sleep;

use crate::config::{parse_resolver, Config};
use crate::ratelimit::RateGate;

// ------------------------------------------------------------
// Resolver pool
// ------------------------------------------------------------
//
// Discovered names are resolved through the configured DNS
// servers. Each server gets its own UDP client and rate gate;
// every lookup goes to a randomly picked server.
//
// With `monitor_resolver_rate` set, a background task logs
// how many lookups each server took, once a minute, until the
// pool is stopped.
//

/// Interval of the optional usage monitor.
pub const MONITOR_INTERVAL: Duration = Duration::from_secs(60);

/// Per-attempt lookup timeout.
pub const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle the orchestrator keeps on the resolver pool.
///
/// THREADING:
/// - Shared across every enumeration task
/// - `stop` must be idempotent
#[async_trait::async_trait]
pub trait Resolver: Send + Sync {
    /// Number of endpoints in the pool.
    fn len(&self) -> usize;

    /// Stops the pool; later lookups fail.
    fn stop(&self);

    fn is_stopped(&self) -> bool;

    /// Addresses of `name`. A name without records resolves to nothing.
    async fn resolve(&self, name: &str) -> Result<Vec<IpAddr>>;
}

struct Endpoint {
    addr: SocketAddr,
    gate: RateGate,
    client: TokioResolver,
    selected: AtomicUsize,
}

impl Endpoint {
    fn new(addr: SocketAddr, queries_per_second: usize) -> Self {
        let mut config = ResolverConfig::new();
        config.add_name_server(NameServerConfig::new(addr, Protocol::Udp));

        let mut opts = ResolverOpts::default();
        opts.timeout = LOOKUP_TIMEOUT;
        opts.attempts = 2;

        let client = TokioResolver::builder_with_config(config, TokioConnectionProvider::default())
            .with_options(opts)
            .build();

        Self {
            addr,
            gate: RateGate::per_second(queries_per_second),
            client,
            selected: AtomicUsize::new(0),
        }
    }
}

/// Rate-limited set of resolver endpoints.
pub struct ResolverPool {
    endpoints: Arc<Vec<Endpoint>>,
    stopped: AtomicBool,
    monitor: Option<watch::Sender<bool>>,
}

impl ResolverPool {
    /// Builds the pool from the configured resolver list.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::setup(
            &cfg.resolvers,
            cfg.monitor_resolver_rate,
            cfg.queries_per_second(),
        )
    }

    /// Builds the pool.
    ///
    /// Fails when no entry parses as a resolver address. Unparsable
    /// entries are skipped with a warning. With `monitor` set it must be
    /// called from within a tokio runtime.
    pub fn setup(resolvers: &[String], monitor: bool, queries_per_second: usize) -> Result<Self> {
        let mut endpoints = Vec::with_capacity(resolvers.len());

        for entry in resolvers {
            match parse_resolver(entry) {
                Some(addr) => endpoints.push(Endpoint::new(addr, queries_per_second)),
                None => log::warn!("ignoring invalid resolver '{}'", entry),
            }
        }

        if endpoints.is_empty() {
            bail!("no usable resolvers among {} entries", resolvers.len());
        }

        let endpoints = Arc::new(endpoints);

        let monitor = monitor.then(|| {
            let (tx, rx) = watch::channel(false);
            tokio::spawn(monitor_usage(endpoints.clone(), rx));
            tx
        });

        log::info!(
            "resolver pool ready: {} endpoints, {} queries/s each",
            endpoints.len(),
            queries_per_second.max(1)
        );

        Ok(Self {
            endpoints,
            stopped: AtomicBool::new(false),
            monitor,
        })
    }

    fn select(&self) -> Option<&Endpoint> {
        if self.is_stopped() {
            return None;
        }

        let ep = &self.endpoints[random_range(0..self.endpoints.len())];
        ep.selected.fetch_add(1, Ordering::Relaxed);
        Some(ep)
    }
}

#[async_trait::async_trait]
impl Resolver for ResolverPool {
    fn len(&self) -> usize {
        self.endpoints.len()
    }

    fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(monitor) = &self.monitor {
            let _ = monitor.send(true);
        }
        log::debug!("resolver pool stopped");
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    async fn resolve(&self, name: &str) -> Result<Vec<IpAddr>> {
        let Some(ep) = self.select() else {
            bail!("resolver pool is stopped");
        };

        ep.gate.acquire().await;

        match ep.client.lookup_ip(name).await {
            Ok(lookup) => Ok(lookup.iter().collect()),
            Err(e) if e.is_no_records_found() => Ok(Vec::new()),
            Err(e) => Err(e).with_context(|| format!("lookup of {} via {} failed", name, ep.addr)),
        }
    }
}

impl fmt::Debug for ResolverPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverPool")
            .field(
                "endpoints",
                &self.endpoints.iter().map(|e| e.addr).collect::<Vec<_>>(),
            )
            .field("stopped", &self.is_stopped())
            .field("monitored", &self.monitor.is_some())
            .finish()
    }
}

async fn monitor_usage(endpoints: Arc<Vec<Endpoint>>, mut stop: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = sleep(MONITOR_INTERVAL) => {
                for ep in endpoints.iter() {
                    log::info!(
                        "[RESOLVER] {} selected={}",
                        ep.addr,
                        ep.selected.swap(0, Ordering::Relaxed)
                    );
                }
            }
        }
    }
}

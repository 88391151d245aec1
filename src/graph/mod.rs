// ------------------------------------------------------------
// Graph storage sinks
// ------------------------------------------------------------
//
// Zero or more backends may be active at once; every finding is fanned
// out to all of them. Each backend is built from its own config slice and
// owns its connection or file handle until `close`.
//

mod gremlin;
mod local;
mod redisgraph;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use crate::config::{Config, GremlinConfig, RedisConfig};
use crate::schema::Finding;

pub use gremlin::GremlinGraph;
pub use local::{LocalGraph, LOCAL_GRAPH_FILE};
pub use redisgraph::RedisGraph;

/// A persistence sink for findings.
///
/// CONTRACT:
/// - `close` is idempotent
/// - `insert` after `close` is an error
#[async_trait::async_trait]
pub trait GraphBackend: Send + Sync {
    /// Diagnostic name ("gremlin", "redis", "local").
    fn name(&self) -> &str;

    async fn insert(&self, finding: &Finding) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// One configured backend.
#[derive(Debug, Clone)]
pub enum GraphTarget {
    Gremlin(GremlinConfig),
    Redis(RedisConfig),
    Local(PathBuf),
}

impl GraphTarget {
    /// Targets enabled by `cfg`, in construction order.
    pub fn from_config(cfg: &Config) -> Vec<GraphTarget> {
        let mut targets = Vec::new();

        if let Some(g) = &cfg.graph.gremlin {
            targets.push(GraphTarget::Gremlin(g.clone()));
        }
        if let Some(r) = &cfg.graph.redis {
            targets.push(GraphTarget::Redis(r.clone()));
        }
        if cfg.graph.local_database {
            targets.push(GraphTarget::Local(cfg.output_directory()));
        }

        targets
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GraphTarget::Gremlin(_) => "gremlin",
            GraphTarget::Redis(_) => "redis",
            GraphTarget::Local(_) => "local",
        }
    }

    /// Opens the backend this target describes.
    pub async fn open(&self) -> Result<Arc<dyn GraphBackend>> {
        Ok(match self {
            GraphTarget::Gremlin(g) => Arc::new(GremlinGraph::connect(g).await?),
            GraphTarget::Redis(r) => Arc::new(RedisGraph::connect(r).await?),
            GraphTarget::Local(dir) => Arc::new(LocalGraph::open(dir).await?),
        })
    }
}

impl fmt::Display for GraphTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphTarget::Gremlin(g) => write!(f, "gremlin ({})", g.url),
            GraphTarget::Redis(r) => write!(f, "redis ({})", r.url),
            GraphTarget::Local(dir) => write!(f, "local ({})", dir.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_follow_config_order() {
        let cfg: Config = serde_json::from_str(
            r#"{
                "graph": {
                    "local_database": true,
                    "gremlin": { "url": "ws://localhost:8182/gremlin" }
                },
                "output_dir": "/tmp/surface"
            }"#,
        )
        .unwrap();

        let kinds: Vec<_> = GraphTarget::from_config(&cfg).iter().map(|t| t.kind()).collect();
        assert_eq!(kinds, vec!["gremlin", "local"]);

        assert!(GraphTarget::from_config(&Config::default()).is_empty());
    }

    #[tokio::test]
    async fn local_target_opens() {
        let dir = tempfile::tempdir().unwrap();
        let target = GraphTarget::Local(dir.path().to_path_buf());

        let backend = target.open().await.unwrap();
        assert_eq!(backend.name(), "local");
        backend.close().await.unwrap();
    }
}

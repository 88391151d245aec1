use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use redis::aio::MultiplexedConnection;
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::config::RedisConfig;
use crate::schema::Finding;

use super::GraphBackend;

/// Key prefix of everything this backend writes.
const PREFIX: &str = "surface";

/// Bound on connecting plus the initial PING.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Remote Redis sink.
///
/// Layout:
/// - `surface:domain:{domain}` set of discovered names
/// - `surface:name:{name}` hash with `domain`, `source`, `category`, `seen`
///   and, once resolved, `addresses` (comma separated)
/// - `surface:source:{source}` set of names the source reported
pub struct RedisGraph {
    url: String,
    conn: Mutex<Option<MultiplexedConnection>>,
}

impl RedisGraph {
    pub async fn connect(cfg: &RedisConfig) -> Result<Self> {
        let client = redis::Client::open(cfg.url.as_str())
            .with_context(|| format!("invalid redis url {}", cfg.url))?;

        let conn = timeout(CONNECT_TIMEOUT, async {
            let mut conn = client
                .get_multiplexed_async_connection()
                .await
                .with_context(|| format!("failed to connect to {}", cfg.url))?;

            redis::cmd("PING")
                .query_async::<String>(&mut conn)
                .await
                .context("redis did not answer PING")?;

            Ok::<_, anyhow::Error>(conn)
        })
        .await
        .map_err(|_| anyhow!("timed out connecting to {}", cfg.url))??;

        log::info!("redis graph connected to {}", cfg.url);

        Ok(Self {
            url: cfg.url.clone(),
            conn: Mutex::new(Some(conn)),
        })
    }
}

#[async_trait::async_trait]
impl GraphBackend for RedisGraph {
    fn name(&self) -> &str {
        "redis"
    }

    async fn insert(&self, f: &Finding) -> Result<()> {
        // The multiplexed connection is cheap to clone; don't hold the lock
        // across the round trip.
        let mut conn = self
            .conn
            .lock()
            .await
            .clone()
            .ok_or_else(|| anyhow!("redis graph {} is closed", self.url))?;

        let name_key = format!("{}:name:{}", PREFIX, f.name);

        let mut pipe = redis::pipe();
        pipe.atomic()
            .sadd(format!("{}:domain:{}", PREFIX, f.domain), &f.name)
            .ignore()
            .sadd(format!("{}:source:{}", PREFIX, f.source), &f.name)
            .ignore()
            .hset(&name_key, "domain", &f.domain)
            .ignore()
            .hset(&name_key, "source", &f.source)
            .ignore()
            .hset(&name_key, "category", f.category.to_string())
            .ignore()
            .hset(&name_key, "seen", f.timestamp.to_rfc3339())
            .ignore();

        if !f.addresses.is_empty() {
            let addrs: Vec<String> = f.addresses.iter().map(|a| a.to_string()).collect();
            pipe.hset(&name_key, "addresses", addrs.join(",")).ignore();
        }

        pipe.query_async::<()>(&mut conn)
            .await
            .with_context(|| format!("failed to store {}", f.name))?;

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.conn.lock().await.take().is_some() {
            log::debug!("redis graph {} closed", self.url);
        }
        Ok(())
    }
}

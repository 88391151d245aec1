use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use crate::config::GremlinConfig;
use crate::metrics::{incr, METRICS};
use crate::schema::Finding;

use super::GraphBackend;

/// Findings buffered between `insert` and the writer task.
const QUEUE_CAPACITY: usize = 10_000;

/// Upserts the name and its domain as `fqdn` vertices and links them
/// with a single `subdomain` edge. Resolved addresses land in the
/// name vertex's `address` set property.
const UPSERT: &str = "\
sub = g.V().has('fqdn','name',name).fold().coalesce(unfold(), addV('fqdn').property('name',name)).next();\n\
for (a in addresses) { g.V(sub).property(set,'address',a).iterate() };\n\
dom = g.V().has('fqdn','name',domain).fold().coalesce(unfold(), addV('fqdn').property('name',domain)).next();\n\
g.V(sub).as('s').V(dom).coalesce(__.outE('subdomain').where(__.inV().as('s')), __.addE('subdomain').to('s'))\
.property('source',source).property('category',category).property('seen',seen).iterate()";

/// Cheap query used to verify the connection (and credentials).
const CHECK_QUERY: &str = "g.V().limit(1).count()";

/// Bound on the TCP + WebSocket handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on one script, from send to final status.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on draining the queue at close.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Pause between reconnect attempts; findings arriving meanwhile are dropped.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Remote Gremlin server reached over WebSocket.
///
/// Design:
/// - `insert` only enqueues; a single writer task owns the socket
/// - Writer failures are logged and counted, never returned to callers
/// - A broken connection is reopened on the next finding, at most once
///   per backoff period
/// - Connect, every request and the final drain are bounded in time
pub struct GremlinGraph {
    url: String,
    queue: Mutex<Option<mpsc::Sender<Finding>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl GremlinGraph {
    /// Connects and runs a check query so that bad URLs or credentials
    /// fail here rather than on the first finding.
    pub async fn connect(cfg: &GremlinConfig) -> Result<Self> {
        crate::install_crypto_provider();

        let session = Session::open(cfg).await?;
        log::info!("gremlin graph connected to {}", cfg.url);

        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let writer = tokio::spawn(write_loop(cfg.clone(), session, rx));

        Ok(Self {
            url: cfg.url.clone(),
            queue: Mutex::new(Some(tx)),
            writer: Mutex::new(Some(writer)),
        })
    }
}

#[async_trait::async_trait]
impl GraphBackend for GremlinGraph {
    fn name(&self) -> &str {
        "gremlin"
    }

    async fn insert(&self, finding: &Finding) -> Result<()> {
        let tx = self
            .queue
            .lock()
            .await
            .clone()
            .ok_or_else(|| anyhow!("gremlin graph {} is closed", self.url))?;

        tx.send(finding.clone())
            .await
            .map_err(|_| anyhow!("gremlin writer for {} has stopped", self.url))
    }

    async fn close(&self) -> Result<()> {
        // Dropping the queue lets the writer drain and exit
        self.queue.lock().await.take();

        let Some(mut writer) = self.writer.lock().await.take() else {
            return Ok(());
        };

        match timeout(CLOSE_TIMEOUT, &mut writer).await {
            Ok(joined) => {
                joined.with_context(|| format!("gremlin writer for {} panicked", self.url))?
            }
            Err(_) => {
                writer.abort();
                bail!(
                    "gremlin writer for {} did not drain within {:?}",
                    self.url,
                    CLOSE_TIMEOUT
                );
            }
        }

        log::debug!("gremlin graph {} closed", self.url);
        Ok(())
    }
}

async fn write_loop(cfg: GremlinConfig, session: Session, mut rx: mpsc::Receiver<Finding>) {
    let mut session = Some(session);
    let mut retry_at: Option<Instant> = None;

    while let Some(finding) = rx.recv().await {
        if session.is_none() {
            if retry_at.is_some_and(|at| Instant::now() < at) {
                incr(&METRICS.store_errors);
                log::debug!("gremlin {} unavailable, dropping {}", cfg.url, finding.name);
                continue;
            }

            match Session::open(&cfg).await {
                Ok(s) => {
                    log::info!("gremlin graph reconnected to {}", cfg.url);
                    session = Some(s);
                    retry_at = None;
                }
                Err(e) => {
                    incr(&METRICS.store_errors);
                    log::warn!("gremlin reconnect failed, dropping {}: {:#}", finding.name, e);
                    retry_at = Some(Instant::now() + RECONNECT_BACKOFF);
                    continue;
                }
            }
        }

        let Some(s) = session.as_mut() else {
            continue;
        };

        match s.submit(UPSERT, bindings(&finding)).await {
            Ok(()) => {}
            Err(e) => {
                incr(&METRICS.store_errors);
                log::warn!("gremlin failed to store {}: {:#}", finding.name, e);
                if s.is_broken() {
                    session = None;
                }
            }
        }
    }

    if let Some(s) = session {
        s.close().await;
    }
}

fn bindings(f: &Finding) -> Value {
    json!({
        "name": f.name,
        "domain": f.domain,
        "source": f.source,
        "category": f.category,
        "seen": f.timestamp.to_rfc3339(),
        "addresses": f.addresses,
    })
}

/// SASL PLAIN token: base64("\0user\0password").
fn sasl_plain(username: &str, password: &str) -> String {
    STANDARD.encode(format!("\0{}\0{}", username, password))
}

#[derive(Debug, Deserialize)]
struct Response {
    #[serde(rename = "requestId")]
    request_id: Option<String>,
    status: Status,
}

#[derive(Debug, Deserialize)]
struct Status {
    code: u16,
    #[serde(default)]
    message: String,
}

/// One WebSocket connection speaking the Gremlin Server protocol.
struct Session {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    sasl: Option<String>,
    broken: bool,
}

impl Session {
    async fn open(cfg: &GremlinConfig) -> Result<Self> {
        let (ws, _) = timeout(CONNECT_TIMEOUT, connect_async(cfg.url.as_str()))
            .await
            .map_err(|_| anyhow!("timed out connecting to {}", cfg.url))?
            .with_context(|| format!("failed to connect to {}", cfg.url))?;

        let sasl = match (&cfg.username, &cfg.password) {
            (Some(u), Some(p)) => Some(sasl_plain(u, p)),
            _ => None,
        };

        let mut session = Self {
            ws,
            sasl,
            broken: false,
        };
        session
            .submit(CHECK_QUERY, json!({}))
            .await
            .with_context(|| format!("gremlin check query against {} failed", cfg.url))?;

        Ok(session)
    }

    fn is_broken(&self) -> bool {
        self.broken
    }

    /// Sends one script and waits for its final status.
    ///
    /// A request that outlives [`REQUEST_TIMEOUT`] leaves the session
    /// broken, since a late answer could still arrive on it.
    async fn submit(&mut self, script: &str, bindings: Value) -> Result<()> {
        match timeout(REQUEST_TIMEOUT, self.exchange(script, bindings)).await {
            Ok(result) => result,
            Err(_) => {
                self.broken = true;
                bail!("gremlin request timed out after {:?}", REQUEST_TIMEOUT)
            }
        }
    }

    async fn exchange(&mut self, script: &str, bindings: Value) -> Result<()> {
        let id = Uuid::new_v4().to_string();
        let request = json!({
            "requestId": id,
            "op": "eval",
            "processor": "",
            "args": {
                "gremlin": script,
                "bindings": bindings,
                "language": "gremlin-groovy",
            },
        });

        self.send(request).await?;

        loop {
            let resp = self.recv().await?;
            if resp.request_id.as_deref() != Some(id.as_str()) {
                continue;
            }

            match resp.status.code {
                200 | 204 => return Ok(()),
                // partial content, more frames follow
                206 => continue,
                407 => {
                    let Some(sasl) = self.sasl.clone() else {
                        bail!("server requires authentication but no credentials are configured");
                    };
                    self.send(json!({
                        "requestId": id,
                        "op": "authentication",
                        "processor": "",
                        "args": { "sasl": sasl, "saslMechanism": "PLAIN" },
                    }))
                    .await?;
                }
                code => bail!("gremlin error {}: {}", code, resp.status.message),
            }
        }
    }

    async fn send(&mut self, msg: Value) -> Result<()> {
        let result = self.ws.send(Message::Text(msg.to_string().into())).await;
        if result.is_err() {
            self.broken = true;
        }
        Ok(result?)
    }

    async fn recv(&mut self) -> Result<Response> {
        loop {
            let frame = match self.ws.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    self.broken = true;
                    return Err(e.into());
                }
                None => {
                    self.broken = true;
                    bail!("connection closed by server");
                }
            };

            let resp = match frame {
                Message::Text(text) => serde_json::from_str(text.as_str())?,
                Message::Binary(bytes) => serde_json::from_slice(&bytes)?,
                Message::Close(_) => {
                    self.broken = true;
                    bail!("connection closed by server");
                }
                // ping / pong handled by tungstenite
                _ => continue,
            };
            return Ok(resp);
        }
    }

    async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    use crate::schema::Category;

    #[test]
    fn sasl_token_layout() {
        let token = sasl_plain("user", "pass");
        let raw = STANDARD.decode(token).unwrap();
        assert_eq!(raw, b"\0user\0pass");
    }

    #[test]
    fn bindings_carry_every_field() {
        let f = Finding::new("www.example.com".into(), "example.com", "crtsh", Category::Cert);
        let b = bindings(&f);

        assert_eq!(b["name"], "www.example.com");
        assert_eq!(b["domain"], "example.com");
        assert_eq!(b["source"], "crtsh");
        assert_eq!(b["category"], "cert");
        assert!(b["seen"].as_str().is_some());
        assert_eq!(b["addresses"], json!([]));
    }

    #[test]
    fn responses_parse() {
        let r: Response = serde_json::from_str(
            r#"{"requestId":"abc","status":{"code":407,"attributes":{}},"result":{"data":null}}"#,
        )
        .unwrap();
        assert_eq!(r.request_id.as_deref(), Some("abc"));
        assert_eq!(r.status.code, 407);
        assert!(r.status.message.is_empty());
    }

    /// Accepts TCP connections and never writes a byte.
    async fn silent_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((sock, _)) = listener.accept().await {
                held.push(sock);
            }
        });

        format!("ws://{}/gremlin", addr)
    }

    #[tokio::test(start_paused = true)]
    async fn silent_server_times_out() {
        let cfg = GremlinConfig {
            url: silent_server().await,
            username: None,
            password: None,
        };

        let Err(err) = GremlinGraph::connect(&cfg).await else {
            panic!("connect to a silent server must fail");
        };
        assert!(format!("{:#}", err).contains("timed out"), "{:#}", err);
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_writer_is_abandoned_at_close() {
        let (tx, _rx) = mpsc::channel(1);
        let writer = tokio::spawn(std::future::pending::<()>());

        let graph = GremlinGraph {
            url: "ws://stuck/gremlin".into(),
            queue: Mutex::new(Some(tx)),
            writer: Mutex::new(Some(writer)),
        };

        let err = graph.close().await.unwrap_err();
        assert!(err.to_string().contains("did not drain"));
        // second close has nothing left to wait for
        assert!(graph.close().await.is_ok());
    }

    #[tokio::test]
    async fn unreachable_server_fails_to_connect() {
        let cfg = GremlinConfig {
            url: "ws://127.0.0.1:9/gremlin".into(),
            username: None,
            password: None,
        };
        assert!(GremlinGraph::connect(&cfg).await.is_err());
    }
}

use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

use crate::http::Request;
use crate::metrics::{incr, METRICS};
use crate::ratelimit::RateGate;
use crate::schema::Category;

use super::collector::{log_failure, Collector, ExecContext, Lifecycle};

/// SecurityTrails subdomain API.
///
/// Requires an API key (`data_sources.securitytrails.key`). Without one
/// the collector stays registered but every execution is a no-op.
///
/// API:
/// https://docs.securitytrails.com/reference/domain-subdomains
pub struct SecurityTrails {
    lifecycle: Lifecycle,
    gate: RateGate,
}

/// Response of /v1/domain/{domain}/subdomains
///
/// Subdomains are labels relative to the queried domain.
#[derive(Debug, Deserialize)]
struct SubdomainsResponse {
    #[serde(default)]
    subdomains: Vec<String>,
}

impl SecurityTrails {
    pub fn new() -> Self {
        Self {
            lifecycle: Lifecycle::default(),
            gate: RateGate::with_period(Duration::from_secs(1)),
        }
    }

    async fn run(&self, domain: &str, key: &str, ctx: &ExecContext) -> Result<usize> {
        let req = Request::get(format!(
            "https://api.securitytrails.com/v1/domain/{}/subdomains",
            domain
        ))
        .header("APIKEY", key)
        .header("Accept", "application/json");

        let body = ctx.http.request(&self.gate, req).await?;
        let names = parse(&body, domain).inspect_err(|_| incr(&METRICS.parse_errors))?;

        Ok(ctx.emit_all(self, domain, names).await)
    }
}

impl Default for SecurityTrails {
    fn default() -> Self {
        Self::new()
    }
}

fn parse(body: &str, domain: &str) -> Result<Vec<String>> {
    let resp: SubdomainsResponse = serde_json::from_str(body)?;

    Ok(resp
        .subdomains
        .iter()
        .map(|label| label.trim().trim_matches('.'))
        .filter(|label| !label.is_empty())
        .map(|label| format!("{}.{}", label, domain))
        .collect())
}

#[async_trait::async_trait]
impl Collector for SecurityTrails {
    fn name(&self) -> &str {
        "securitytrails"
    }

    fn category(&self) -> Category {
        Category::Api
    }

    async fn start(&self) -> Result<()> {
        self.lifecycle.start(self.name())
    }

    async fn stop(&self) -> Result<()> {
        self.lifecycle.stop();
        Ok(())
    }

    async fn execute(&self, domain: &str, ctx: &ExecContext) {
        if !self.lifecycle.is_started() {
            return;
        }

        let Some(key) = ctx.credentials(self.name()).and_then(|c| c.key) else {
            log::debug!("[securitytrails] no API key configured, skipping {}", domain);
            return;
        };

        match self.run(domain, &key, ctx).await {
            Ok(n) => log::debug!("[securitytrails] {}: {} names", domain, n),
            Err(e) => log_failure(self, domain, &e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::Config;
    use crate::http::RequestFacility;
    use crate::sources::collector::NameSink;

    #[test]
    fn labels_become_names() {
        let body = r#"{"endpoint":"/v1/domain/example.com/subdomains","subdomains":["www","api.v2",""]}"#;
        assert_eq!(
            parse(body, "example.com").unwrap(),
            vec!["www.example.com", "api.v2.example.com"]
        );
    }

    #[tokio::test]
    async fn missing_key_is_a_no_op() {
        let st = SecurityTrails::new();
        st.start().await.unwrap();

        let (sink, mut rx) = NameSink::channel(4);
        let ctx = ExecContext::new(
            sink,
            Arc::new(RequestFacility::new().unwrap()),
            Arc::new(Config::default()),
        );

        st.execute("example.com", &ctx).await;
        drop(ctx);
        assert!(rx.recv().await.is_none());
    }
}

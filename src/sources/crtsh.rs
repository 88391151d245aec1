use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

use crate::http::Request;
use crate::metrics::{incr, METRICS};
use crate::ratelimit::RateGate;
use crate::schema::Category;

use super::collector::{log_failure, Collector, ExecContext, Lifecycle};

/// crt.sh certificate transparency search.
///
/// API:
/// https://crt.sh/?q=%25.example.com&output=json
///
/// Every certificate entry lists its names in `name_value`,
/// newline separated, wildcards included.
pub struct CrtSh {
    lifecycle: Lifecycle,
    gate: RateGate,
}

#[derive(Debug, Deserialize)]
struct CertEntry {
    #[serde(default)]
    name_value: String,
    #[serde(default)]
    common_name: Option<String>,
}

impl CrtSh {
    pub fn new() -> Self {
        Self {
            lifecycle: Lifecycle::default(),
            gate: RateGate::with_period(Duration::from_secs(2)),
        }
    }

    fn url(domain: &str) -> String {
        format!("https://crt.sh/?q=%25.{}&output=json", domain)
    }

    async fn run(&self, domain: &str, ctx: &ExecContext) -> Result<usize> {
        let body = ctx.http.request(&self.gate, Request::get(Self::url(domain))).await?;
        let names = parse(&body).inspect_err(|_| incr(&METRICS.parse_errors))?;

        Ok(ctx.emit_all(self, domain, names).await)
    }
}

impl Default for CrtSh {
    fn default() -> Self {
        Self::new()
    }
}

/// Extracts every distinct name from a crt.sh JSON response.
fn parse(body: &str) -> Result<BTreeSet<String>> {
    // crt.sh answers an empty body instead of [] when nothing matches
    if body.trim().is_empty() {
        return Ok(BTreeSet::new());
    }

    let entries: Vec<CertEntry> = serde_json::from_str(body)?;

    Ok(entries
        .iter()
        .flat_map(|e| e.name_value.lines().chain(e.common_name.as_deref()))
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .collect())
}

#[async_trait::async_trait]
impl Collector for CrtSh {
    fn name(&self) -> &str {
        "crtsh"
    }

    fn category(&self) -> Category {
        Category::Cert
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

        match self.run(domain, ctx).await {
            Ok(n) => log::debug!("[crtsh] {}: {} names", domain, n),
            Err(e) => log_failure(self, domain, &e),
        }
    }
}

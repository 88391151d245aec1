use std::time::Duration;

use anyhow::{bail, Result};

use crate::http::Request;
use crate::metrics::{incr, METRICS};
use crate::ratelimit::RateGate;
use crate::schema::Category;

use super::collector::{log_failure, Collector, ExecContext, Lifecycle};

/// HackerTarget host search.
///
/// Answers plain text, one `name,address` pair per line. Quota and
/// input errors come back as a single line of prose with status 200.
pub struct HackerTarget {
    lifecycle: Lifecycle,
    gate: RateGate,
}

impl HackerTarget {
    pub fn new() -> Self {
        Self {
            lifecycle: Lifecycle::default(),
            gate: RateGate::with_period(Duration::from_secs(1)),
        }
    }

    async fn run(&self, domain: &str, ctx: &ExecContext) -> Result<usize> {
        let url = format!("https://api.hackertarget.com/hostsearch/?q={}", domain);
        let body = ctx.http.request(&self.gate, Request::get(url)).await?;
        let names = parse(&body).inspect_err(|_| incr(&METRICS.parse_errors))?;

        Ok(ctx.emit_all(self, domain, names).await)
    }
}

impl Default for HackerTarget {
    fn default() -> Self {
        Self::new()
    }
}

fn parse(body: &str) -> Result<Vec<&str>> {
    let body = body.trim();

    if body.is_empty() || body.starts_with("error check your search parameter") {
        return Ok(Vec::new());
    }
    if body.starts_with("API count exceeded") {
        bail!("API quota exceeded");
    }

    Ok(body
        .lines()
        .filter_map(|l| l.split(',').next())
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .collect())
}

#[async_trait::async_trait]
impl Collector for HackerTarget {
    fn name(&self) -> &str {
        "hackertarget"
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

        match self.run(domain, ctx).await {
            Ok(n) => log::debug!("[hackertarget] {}: {} names", domain, n),
            Err(e) => log_failure(self, domain, &e),
        }
    }
}

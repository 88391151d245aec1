use std::time::Duration;

use anyhow::Result;

use crate::ratelimit::RateGate;
use crate::schema::Category;

use super::collector::{log_failure, Collector, ExecContext, Lifecycle};

/// RapidDNS subdomain listing, scraped from the HTML result table.
pub struct RapidDns {
    lifecycle: Lifecycle,
    gate: RateGate,
}

impl RapidDns {
    pub fn new() -> Self {
        Self {
            lifecycle: Lifecycle::default(),
            gate: RateGate::with_period(Duration::from_secs(3)),
        }
    }

    async fn run(&self, domain: &str, ctx: &ExecContext) -> Result<usize> {
        let url = format!("https://rapiddns.io/subdomain/{}?full=1", domain);
        let names = ctx.http.scrape(&self.gate, &url, domain).await?;

        Ok(ctx.emit_all(self, domain, names).await)
    }
}

impl Default for RapidDns {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Collector for RapidDns {
    fn name(&self) -> &str {
        "rapiddns"
    }

    fn category(&self) -> Category {
        Category::Scrape
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
            Ok(n) => log::debug!("[rapiddns] {}: {} names", domain, n),
            Err(e) => log_failure(self, domain, &e),
        }
    }
}

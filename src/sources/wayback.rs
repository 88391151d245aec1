use std::time::Duration;

use anyhow::Result;

use crate::http::Request;
use crate::ratelimit::RateGate;
use crate::schema::Category;
use crate::util;

use super::collector::{log_failure, Collector, ExecContext, Lifecycle};

/// Wayback Machine CDX index.
///
/// Lists every archived URL under the domain (one per line) and
/// pulls host names out of them.
pub struct Wayback {
    lifecycle: Lifecycle,
    gate: RateGate,
}

impl Wayback {
    pub fn new() -> Self {
        Self {
            lifecycle: Lifecycle::default(),
            gate: RateGate::with_period(Duration::from_secs(5)),
        }
    }

    fn url(domain: &str) -> String {
        format!(
            "https://web.archive.org/cdx/search/cdx?url=*.{}/*&output=txt&fl=original&collapse=urlkey",
            domain
        )
    }

    async fn run(&self, domain: &str, ctx: &ExecContext) -> Result<usize> {
        let body = ctx.http.request(&self.gate, Request::get(Self::url(domain))).await?;
        let re = util::subdomain_regex(domain)?;
        let names = util::extract_names(&re, &body, domain);

        Ok(ctx.emit_all(self, domain, names).await)
    }
}

impl Default for Wayback {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Collector for Wayback {
    fn name(&self) -> &str {
        "wayback"
    }

    fn category(&self) -> Category {
        Category::Archive
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
            Ok(n) => log::debug!("[wayback] {}: {} names", domain, n),
            Err(e) => log_failure(self, domain, &e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archived_urls_yield_hosts() {
        let body = "http://www.example.com:80/\nhttps://old.example.com/login?x=1\nhttp://www.example.com/about\n";
        let re = util::subdomain_regex("example.com").unwrap();

        assert_eq!(
            util::extract_names(&re, body, "example.com"),
            vec!["old.example.com", "www.example.com"]
        );
        assert!(Wayback::url("example.com").contains("url=*.example.com/*"));
    }
}

// ------------------------------------------------------------
// Shared request / scrape facility handed to every collector
// ------------------------------------------------------------
//
// Every call goes through the caller's `RateGate` first, so each
// collector paces itself against its own upstream while sharing one
// connection pool.
//

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, Method};

use crate::metrics::{incr, METRICS};
use crate::ratelimit::RateGate;
use crate::util;

/// Per-request timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = concat!("surface-collector/", env!("CARGO_PKG_VERSION"));

/// An HTTP call described by url, method and headers.
#[derive(Debug, Clone)]
pub struct Request {
    pub url: String,
    pub method: Method,
    pub headers: Vec<(String, String)>,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::GET,
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Rate-limited HTTP client shared by all collectors.
#[derive(Debug, Clone)]
pub struct RequestFacility {
    client: Client,
}

impl RequestFacility {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self { client })
    }

    /// Performs `req` once `gate` grants a permit and returns the body.
    ///
    /// Non-2xx statuses are errors. Failures are counted in the
    /// request error metric before being returned.
    pub async fn request(&self, gate: &RateGate, req: Request) -> Result<String> {
        gate.acquire().await;

        let result = self.send(req).await;
        if result.is_err() {
            incr(&METRICS.request_errors);
        }
        result
    }

    /// Fetches `url` and returns every subdomain of `domain` it mentions.
    pub async fn scrape(&self, gate: &RateGate, url: &str, domain: &str) -> Result<Vec<String>> {
        let page = self.request(gate, Request::get(url)).await?;
        let re = util::subdomain_regex(domain)?;

        Ok(util::extract_names(&re, &page, domain))
    }

    async fn send(&self, req: Request) -> Result<String> {
        let mut builder = self.client.request(req.method.clone(), &req.url);

        for (name, value) in &req.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let resp = builder
            .send()
            .await
            .with_context(|| format!("{} {} failed", req.method, req.url))?
            .error_for_status()
            .with_context(|| format!("{} {} returned an error status", req.method, req.url))?;

        resp.text()
            .await
            .with_context(|| format!("failed to read body of {}", req.url))
    }
}

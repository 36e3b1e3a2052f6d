//! Source fetching.
//!
//! A source is a URL whose body is either a plain list of share links (one per
//! line) or the same list base64-encoded as one blob, the usual subscription
//! format.

use std::time::Duration;

use anyhow::Result;

use crate::links;

/// HTTP fetch timeout for source URLs.
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Connect timeout for source fetch.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const USER_AGENT: &str = concat!("nodepool/", env!("CARGO_PKG_VERSION"));

/// Links gathered from a set of sources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceBatch {
    pub links: Vec<String>,
    pub fetched: usize,
    pub failed: usize,
}

/// Fetches source bodies over HTTP.
///
/// Uses a direct (no-proxy) client: the proxies being aggregated are not
/// expected to be usable while their sources are fetched.
pub struct SourceFetcher {
    client: reqwest::Client,
}

impl SourceFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(FETCH_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build source HTTP client: {e}"))?;
        Ok(Self { client })
    }

    /// Fetch one source and return its link lines.
    pub async fn fetch(&self, url: &str) -> Result<Vec<String>> {
        let resp = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                anyhow::anyhow!("source fetch timed out: {url}")
            } else if e.is_connect() {
                anyhow::anyhow!("failed to connect to source URL: {url}: {e}")
            } else {
                anyhow::anyhow!("source fetch failed: {url}: {e}")
            }
        })?;

        let status = resp.status();
        if status == reqwest::StatusCode::FORBIDDEN {
            anyhow::bail!("source returned 403 Forbidden: {url}");
        }
        if !status.is_success() {
            anyhow::bail!("source returned HTTP {status}: {url}");
        }

        let body = resp
            .text()
            .await
            .map_err(|e| anyhow::anyhow!("failed to read source response body: {e}"))?;
        Ok(decode_body(&body))
    }

    /// Fetch every source concurrently. A failing source is logged and
    /// counted; the others still contribute.
    pub async fn fetch_all(&self, urls: &[String]) -> SourceBatch {
        let results =
            futures_util::future::join_all(urls.iter().map(|url| self.fetch(url))).await;

        let mut batch = SourceBatch::default();
        for (url, result) in urls.iter().zip(results) {
            match result {
                Ok(lines) => {
                    tracing::info!("fetched {} link(s) from {url}", lines.len());
                    batch.fetched += 1;
                    batch.links.extend(lines);
                }
                Err(e) => {
                    tracing::warn!("skipping source: {e}");
                    batch.failed += 1;
                }
            }
        }
        batch
    }
}

/// Split a source body into link lines, decoding base64 subscription blobs.
///
/// A body is treated as base64 only when it contains no `://` and decodes to
/// UTF-8 text; otherwise it is used as-is.
pub fn decode_body(body: &str) -> Vec<String> {
    let trimmed = body.trim();
    let text = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
        links::decode_base64_lenient(&compact)
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .unwrap_or_else(|| trimmed.to_string())
    };

    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

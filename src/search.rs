//! Image search against an external provider
//!
//! The `ImageSearch` trait is the seam the rest of the crate depends on.
//! `DuckDuckGoSearch` implements it with DuckDuckGo's image endpoint: a first
//! request fetches the per-query `vqd` token from the HTML page, then the JSON
//! endpoint is paged until enough image URLs are collected.

use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use std::time::Duration;

const DUCKDUCKGO_URL: &str = "https://duckduckgo.com";

/// Browser-like agent; the provider rejects requests without one
const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36";

/// Upper bound on result pages requested for a single query
const MAX_PAGES: usize = 10;

/// Keyword image search
#[async_trait]
pub trait ImageSearch: Send + Sync {
    /// Return up to `max_results` candidate image URLs for `query`, in provider order
    ///
    /// # Errors
    /// - `SearchError` when the provider call fails
    /// - `InvalidConfig` when `max_results` is zero
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<String>>;
}

/// DuckDuckGo image search client
#[derive(Debug, Clone)]
pub struct DuckDuckGoSearch {
    client: Client,
    base_url: String,
}

/// One page of the JSON image endpoint
#[derive(Debug, Deserialize)]
struct ImagePage {
    #[serde(default)]
    results: Vec<ImageHit>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageHit {
    image: Option<String>,
}

/// Which results page to ask for
#[derive(Debug)]
enum PageRequest {
    First,
    /// Relative `next` link from the previous page
    Next(String),
}

impl DuckDuckGoSearch {
    /// Create a search client pointed at duckduckgo.com
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn new() -> Result<Self> {
        Self::with_base_url(DUCKDUCKGO_URL)
    }

    /// Create a search client against another host speaking the same protocol
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn with_base_url<S: Into<String>>(base_url: S) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| PipelineError::search(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Fetch the per-query token the JSON endpoint requires
    async fn fetch_vqd(&self, query: &str) -> Result<String> {
        let html = self
            .client
            .get(&self.base_url)
            .query(&[("q", query), ("iax", "images"), ("ia", "images")])
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| PipelineError::search(format!("token request for '{query}' failed: {e}")))?
            .text()
            .await
            .map_err(|e| PipelineError::search(format!("token response for '{query}': {e}")))?;

        extract_vqd(&html)
            .ok_or_else(|| PipelineError::search(format!("no search token found for '{query}'")))
    }

    /// Request for one results page; `vqd` is appended to every page
    fn page_request(&self, page: &PageRequest, vqd: &str, query: &str) -> RequestBuilder {
        let request = match page {
            PageRequest::First => self.client.get(format!("{}/i.js", self.base_url)).query(&[
                ("l", "us-en"),
                ("o", "json"),
                ("q", query),
                ("f", ",,,,,"),
                ("p", "1"),
            ]),
            PageRequest::Next(path) => self
                .client
                .get(format!("{}/{}", self.base_url, path.trim_start_matches('/'))),
        };

        request
            .query(&[("vqd", vqd)])
            .header(reqwest::header::REFERER, format!("{}/", self.base_url))
    }

    async fn fetch_page(&self, page: &PageRequest, vqd: &str, query: &str) -> Result<ImagePage> {
        let response = self
            .page_request(page, vqd, query)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| PipelineError::search(format!("results request for '{query}' failed: {e}")))?;

        let body = response
            .text()
            .await
            .map_err(|e| PipelineError::search(format!("results response for '{query}': {e}")))?;

        parse_page(&body)
    }
}

#[async_trait]
impl ImageSearch for DuckDuckGoSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<String>> {
        if max_results == 0 {
            return Err(PipelineError::invalid_config("max_results must be at least 1"));
        }

        tracing::info!("Searching images for '{}'...", query);
        let vqd = self.fetch_vqd(query).await?;

        let mut next_page = Some(PageRequest::First);
        let mut urls = Vec::with_capacity(max_results);

        for _ in 0..MAX_PAGES {
            let Some(request) = next_page.take() else { break };
            let page = self.fetch_page(&request, &vqd, query).await?;

            urls.extend(page.results.into_iter().filter_map(|hit| hit.image));
            if urls.len() >= max_results {
                break;
            }
            next_page = page.next.map(PageRequest::Next);
        }

        urls.truncate(max_results);
        tracing::info!("Found {} images for '{}'", urls.len(), query);
        Ok(urls)
    }
}

/// Pull the `vqd` token out of the search page markup
///
/// The token shows up as `vqd="4-123..."`, `vqd='4-123...'` or `vqd=4-123...&`.
fn extract_vqd(html: &str) -> Option<String> {
    let start = html.find("vqd=")? + "vqd=".len();
    let rest = html.get(start..)?;
    let rest = rest.trim_start_matches(['"', '\'']);
    let token: String = rest
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();

    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

fn parse_page(body: &str) -> Result<ImagePage> {
    serde_json::from_str(body)
        .map_err(|e| PipelineError::search(format!("unexpected results payload: {e}")))
}

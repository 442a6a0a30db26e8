//! Web search lookup used for proactive context injection.
//!
//! The orchestrator asks for a compact snippet block per user query and
//! prepends it to the outbound request. Lookup failures degrade to "no
//! snippets" — a broken search never blocks a reply.

use crate::error::SearchError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

const BRAVE_SEARCH_URL: &str = "https://api.search.brave.com/res/v1/web/search";

/// External search collaborator.
#[async_trait]
pub trait SearchLookup: Send + Sync {
    /// Compact snippet block for `query`, or `None` when nothing useful
    /// came back.
    async fn snippets(&self, query: &str) -> Result<Option<String>, SearchError>;
}

// ─── Brave Search API response types ────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct BraveSearchResponse {
    #[serde(default)]
    web: Option<BraveWebResults>,
}

#[derive(Debug, Deserialize)]
struct BraveWebResults {
    #[serde(default)]
    results: Vec<BraveWebResult>,
}

#[derive(Debug, Deserialize)]
struct BraveWebResult {
    title: String,
    url: String,
    #[serde(default)]
    description: String,
}

// ─── Brave client ───────────────────────────────────────────────────────────

/// Search lookup backed by the Brave Search API.
pub struct BraveSearch {
    client: Client,
    api_key: String,
    max_results: usize,
    base_url: String,
}

impl BraveSearch {
    pub fn new(api_key: impl Into<String>, max_results: usize) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            api_key: api_key.into(),
            max_results: max_results.clamp(1, 20),
            base_url: BRAVE_SEARCH_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

fn format_snippets(results: &[BraveWebResult]) -> Option<String> {
    if results.is_empty() {
        return None;
    }
    let block = results
        .iter()
        .map(|result| {
            let description = result.description.trim();
            if description.is_empty() {
                format!("- {} ({})", result.title, result.url)
            } else {
                format!("- {}: {} ({})", result.title, description, result.url)
            }
        })
        .collect::<Vec<_>>()
        .join("\n");
    Some(block)
}

#[async_trait]
impl SearchLookup for BraveSearch {
    async fn snippets(&self, query: &str) -> Result<Option<String>, SearchError> {
        if query.trim().is_empty() {
            return Ok(None);
        }

        let response = self
            .client
            .get(&self.base_url)
            .header("Accept", "application/json")
            .header("X-Subscription-Token", &self.api_key)
            .query(&[("q", query), ("count", &self.max_results.to_string())])
            .send()
            .await
            .map_err(|err| SearchError::Request(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::Request(format!("status {status}: {body}")));
        }

        let parsed: BraveSearchResponse = response
            .json()
            .await
            .map_err(|err| SearchError::Request(err.to_string()))?;

        let results = parsed.web.map(|web| web.results).unwrap_or_default();
        Ok(format_snippets(&results))
    }
}

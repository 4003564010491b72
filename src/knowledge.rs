//! Client for the external vector-search service holding the knowledge base.
//!
//! Embedding and nearest-neighbour search happen on the service side; this
//! crate only sends query text and reads back ranked documents.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::KnowledgeConfig;

/// One ranked document from the index.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Snippet {
    pub id: String,
    #[serde(default)]
    pub document: String,
}

#[async_trait]
pub trait KnowledgeIndex: Send + Sync {
    /// Ranked documents most similar to `text`, best first.
    async fn query(&self, text: &str, max_results: usize) -> Result<Vec<Snippet>>;

    async fn query_similar(&self, text: &str, max_results: usize) -> Result<Vec<String>> {
        Ok(self
            .query(text, max_results)
            .await?
            .into_iter()
            .map(|s| s.document)
            .filter(|d| !d.trim().is_empty())
            .collect())
    }

    async fn query_similar_ids(&self, text: &str, max_results: usize) -> Result<Vec<String>> {
        Ok(self
            .query(text, max_results)
            .await?
            .into_iter()
            .map(|s| s.id)
            .collect())
    }
}

/// `POST {base_url}/collections/{collection}/query` client.
pub struct HttpKnowledgeIndex {
    client: reqwest::Client,
    config: KnowledgeConfig,
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    query_text: &'a str,
    n_results: usize,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<Snippet>,
}

impl HttpKnowledgeIndex {
    pub fn new(client: reqwest::Client, config: KnowledgeConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl KnowledgeIndex for HttpKnowledgeIndex {
    async fn query(&self, text: &str, max_results: usize) -> Result<Vec<Snippet>> {
        let Some(base_url) = self.config.base_url.as_deref() else {
            tracing::debug!("Knowledge index not configured, returning no snippets");
            return Ok(Vec::new());
        };

        let url = format!(
            "{}/collections/{}/query",
            base_url.trim_end_matches('/'),
            self.config.collection
        );

        let mut req = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .json(&QueryRequest {
                query_text: text,
                n_results: max_results,
            });
        if let Some(key) = self.config.api_key.as_deref() {
            req = req.header("Authorization", format!("Bearer {key}"));
        }

        let resp = req
            .send()
            .await
            .context("Failed to reach knowledge index")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Knowledge index returned {status}: {body}");
        }

        let body: QueryResponse = resp
            .json()
            .await
            .context("Failed to parse knowledge index response")?;

        let mut results = body.results;
        results.truncate(max_results);
        Ok(results)
    }
}

//! Web research: discover sources for a topic, fetch them all, summarize
//! them all, and consolidate the summaries into one report.
//!
//! Fetch and summarize are separate fan-out/fan-in barriers: every fetch
//! finishes (or fails on its own) before any summary is requested. A failed
//! item is logged and dropped; it never fails the batch.

pub mod web;

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::llm::FallbackManager;

pub const NO_SOURCES: &str = "I couldn't find any relevant websites for that topic.";
pub const NO_SUMMARIES: &str =
    "I was able to find some websites but could not extract a clear summary.";
const REPORT_HEADER: &str = "I found the following information from the web:\n\n";

/// Where research sources come from.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Candidate links for `topic`, best first.
    async fn discover(&self, topic: &str, limit: usize) -> Result<Vec<String>>;

    /// Readable text of one page (already truncated).
    async fn fetch_text(&self, url: &str) -> Result<String>;
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str) -> Result<String>;
}

#[async_trait]
impl Summarizer for FallbackManager {
    async fn summarize(&self, text: &str) -> Result<String> {
        let prompt = format!(
            "Summarize the following text into a few key bullet points:\n\n---\n{text}\n---"
        );
        Ok(self.generate_once(&prompt).await?)
    }
}

/// One discovered source as it moves through the stages.
#[derive(Debug, Clone, PartialEq)]
pub struct ResearchSource {
    pub url: String,
    pub raw_text: Option<String>,
    pub summary: Option<String>,
}

impl ResearchSource {
    fn new(url: String) -> Self {
        Self {
            url,
            raw_text: None,
            summary: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResearchReport {
    pub sources: Vec<ResearchSource>,
    pub text: String,
}

pub struct ResearchPipeline {
    source: Arc<dyn PageSource>,
    summarizer: Arc<dyn Summarizer>,
    max_sources: usize,
}

impl ResearchPipeline {
    pub fn new(
        source: Arc<dyn PageSource>,
        summarizer: Arc<dyn Summarizer>,
        max_sources: usize,
    ) -> Self {
        Self {
            source,
            summarizer,
            max_sources: max_sources.max(1),
        }
    }

    pub async fn research(&self, topic: &str) -> String {
        let report = self.run(topic).await;
        tracing::info!(
            "Web research for '{topic}' done: {} of {} sources summarized",
            report.sources.iter().filter(|s| s.summary.is_some()).count(),
            report.sources.len()
        );
        report.text
    }

    pub async fn run(&self, topic: &str) -> ResearchReport {
        tracing::info!("Starting web research for '{topic}'");

        // ── Discover ──────────────────────────────────────
        let links = self.discover(topic).await;
        if links.is_empty() {
            return ResearchReport {
                sources: Vec::new(),
                text: NO_SOURCES.to_string(),
            };
        }

        // ── Fetch (fan-out) ───────────────────────────────
        let source = self.source.clone();
        let fetched = fan_out(links, self.max_sources, move |url: String| {
            let source = source.clone();
            async move {
                let mut item = ResearchSource::new(url);
                match source.fetch_text(&item.url).await {
                    Ok(text) if !text.trim().is_empty() => item.raw_text = Some(text),
                    Ok(_) => tracing::warn!("No readable text at {}", item.url),
                    Err(e) => tracing::warn!("Failed to fetch {}: {e:#}", item.url),
                }
                item
            }
        })
        .await;

        let (readable, mut sources): (Vec<_>, Vec<_>) =
            fetched.into_iter().partition(|s| s.raw_text.is_some());
        tracing::info!(
            "Fetched {} of {} sources for '{topic}'",
            readable.len(),
            readable.len() + sources.len()
        );

        // ── Summarize (fan-out) ───────────────────────────
        let summarizer = self.summarizer.clone();
        let summarized = fan_out(readable, self.max_sources, move |mut item: ResearchSource| {
            let summarizer = summarizer.clone();
            async move {
                let text = item.raw_text.as_deref().unwrap_or_default();
                match summarizer.summarize(text).await {
                    Ok(summary) if !summary.trim().is_empty() => {
                        item.summary = Some(summary.trim().to_string())
                    }
                    Ok(_) => tracing::warn!("Empty summary for {}", item.url),
                    Err(e) => tracing::warn!("Failed to summarize {}: {e:#}", item.url),
                }
                item
            }
        })
        .await;

        // ── Consolidate (fan-in) ──────────────────────────
        let summaries: Vec<&str> = summarized
            .iter()
            .filter_map(|s| s.summary.as_deref())
            .collect();
        let text = consolidate(&summaries);

        sources.extend(summarized);
        ResearchReport { sources, text }
    }

    async fn discover(&self, topic: &str) -> Vec<String> {
        match self.source.discover(topic, self.max_sources).await {
            Ok(links) => {
                let mut seen = HashSet::new();
                links
                    .into_iter()
                    .filter(|l| seen.insert(l.clone()))
                    .take(self.max_sources)
                    .collect()
            }
            Err(e) => {
                tracing::warn!("Source discovery failed for '{topic}': {e:#}");
                Vec::new()
            }
        }
    }
}

/// Number each summary as a source. Numbering follows completion order.
pub fn consolidate(summaries: &[&str]) -> String {
    if summaries.is_empty() {
        return NO_SUMMARIES.to_string();
    }
    let mut report = String::from(REPORT_HEADER);
    for (i, summary) in summaries.iter().enumerate() {
        report.push_str(&format!("Source {}:\n{}\n\n", i + 1, summary));
    }
    report
}

/// Run `task` over `items` with at most `width` in flight and collect the
/// outputs in completion order. A panicking task is logged and skipped; it
/// does not cancel its siblings.
pub async fn fan_out<I, T, F, Fut>(items: Vec<I>, width: usize, task: F) -> Vec<T>
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(I) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(width.max(1)));
    let mut set = JoinSet::new();

    for item in items {
        let sem = semaphore.clone();
        let fut = task(item);
        set.spawn(async move {
            let _permit = sem.acquire_owned().await;
            fut.await
        });
    }

    let mut outputs = Vec::with_capacity(set.len());
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(output) => outputs.push(output),
            Err(e) => tracing::error!("Research task aborted: {e}"),
        }
    }
    outputs
}

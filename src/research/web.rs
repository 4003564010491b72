//! Live web source: DuckDuckGo's HTML results page for discovery, plain
//! HTTP GETs for fetching, and `scraper` for turning pages into text.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use scraper::{Html, Selector};

use crate::config::ResearchConfig;
use crate::research::PageSource;

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Regions tried in order; the first one present wins.
const CONTENT_REGIONS: [&str; 3] = ["main", "article", "body"];

pub struct WebSource {
    client: reqwest::Client,
    config: ResearchConfig,
}

impl WebSource {
    pub fn new(client: reqwest::Client, config: ResearchConfig) -> Self {
        Self { client, config }
    }

    async fn get_html(&self, request: reqwest::RequestBuilder, what: &str) -> Result<String> {
        let resp = request
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send()
            .await
            .with_context(|| format!("Failed to reach {what}"))?;

        if !resp.status().is_success() {
            anyhow::bail!("{what} returned {}", resp.status());
        }

        resp.text()
            .await
            .with_context(|| format!("Failed to read body from {what}"))
    }
}

#[async_trait]
impl PageSource for WebSource {
    async fn discover(&self, topic: &str, limit: usize) -> Result<Vec<String>> {
        let request = self
            .client
            .get(&self.config.search_url)
            .query(&[("q", topic)])
            .timeout(Duration::from_secs(self.config.discover_timeout_secs));
        let html = self.get_html(request, "search provider").await?;
        let links = parse_search_links(&html, limit);
        tracing::debug!("Discovered {} links for '{topic}'", links.len());
        Ok(links)
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        let request = self
            .client
            .get(url)
            .timeout(Duration::from_secs(self.config.fetch_timeout_secs));
        let html = self.get_html(request, url).await?;
        Ok(extract_readable_text(&html, self.config.max_chars))
    }
}

/// Result links from a DuckDuckGo HTML results page, redirect wrappers
/// unwrapped. Only http(s) targets are kept.
pub fn parse_search_links(html: &str, limit: usize) -> Vec<String> {
    let Ok(selector) = Selector::parse("a.result__a") else {
        return Vec::new();
    };
    let document = Html::parse_document(html);

    let mut links: Vec<String> = Vec::new();
    for anchor in document.select(&selector) {
        if links.len() >= limit {
            break;
        }
        let Some(link) = anchor.value().attr("href").and_then(resolve_result_href) else {
            continue;
        };
        if !links.contains(&link) {
            links.push(link);
        }
    }
    links
}

fn resolve_result_href(href: &str) -> Option<String> {
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else {
        href.to_string()
    };
    let url = Url::parse(&absolute).ok()?;

    let is_redirect = url
        .host_str()
        .is_some_and(|h| h.ends_with("duckduckgo.com"))
        && url.path().starts_with("/l/");
    let target = if is_redirect {
        let (_, value) = url.query_pairs().find(|(k, _)| k == "uddg")?;
        Url::parse(&value).ok()?
    } else {
        url
    };

    matches!(target.scheme(), "http" | "https").then(|| target.to_string())
}

/// Paragraph text of the page's main content region, whitespace-collapsed
/// and cut to at most `max_chars` characters.
pub fn extract_readable_text(html: &str, max_chars: usize) -> String {
    let Ok(paragraphs) = Selector::parse("p") else {
        return String::new();
    };
    let document = Html::parse_document(html);

    let region = CONTENT_REGIONS.iter().find_map(|name| {
        let selector = Selector::parse(name).ok()?;
        document.select(&selector).next()
    });
    let Some(region) = region else {
        return String::new();
    };

    let text = region
        .select(&paragraphs)
        .map(|p| p.text().collect::<Vec<_>>().join(" "))
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    text.chars().take(max_chars).collect()
}

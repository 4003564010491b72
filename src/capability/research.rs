use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::capability::{CapabilityHandler, CapabilityResult, CapabilitySchema, ParamKind, ParamSpec};
use crate::research::ResearchPipeline;

/// General-knowledge questions answered from live web pages.
pub struct WebResearch {
    pipeline: Arc<ResearchPipeline>,
}

impl WebResearch {
    pub const NAME: &'static str = "scrape_for_info";

    pub fn new(pipeline: Arc<ResearchPipeline>) -> Self {
        Self { pipeline }
    }

    pub fn schema() -> CapabilitySchema {
        CapabilitySchema::new(
            Self::NAME,
            "Research a general or technical topic on the web and return summarized \
             findings. Use for questions about technologies, concepts, or current \
             information that the platform's own data cannot answer.",
            vec![ParamSpec::required(
                "query",
                ParamKind::String,
                "The topic to research",
            )],
        )
    }
}

#[async_trait]
impl CapabilityHandler for WebResearch {
    async fn invoke(&self, args: &Map<String, Value>) -> Result<CapabilityResult> {
        let query = args.get("query").and_then(Value::as_str).unwrap_or_default();
        Ok(CapabilityResult::text(self.pipeline.research(query).await))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::research::{PageSource, Summarizer, NO_SOURCES};
    use serde_json::json;

    struct OnePage;

    #[async_trait]
    impl PageSource for OnePage {
        async fn discover(&self, topic: &str, _limit: usize) -> Result<Vec<String>> {
            if topic == "nothing" {
                return Ok(vec![]);
            }
            Ok(vec!["https://example.org/rust".into()])
        }

        async fn fetch_text(&self, _url: &str) -> Result<String> {
            Ok("Rust is a systems language.".into())
        }
    }

    struct Echo;

    #[async_trait]
    impl Summarizer for Echo {
        async fn summarize(&self, text: &str) -> Result<String> {
            Ok(format!("- {text}"))
        }
    }

    fn handler() -> WebResearch {
        WebResearch::new(Arc::new(ResearchPipeline::new(
            Arc::new(OnePage),
            Arc::new(Echo),
            5,
        )))
    }

    #[tokio::test]
    async fn test_research_capability_returns_report() {
        let args = json!({"query": "rust"}).as_object().unwrap().clone();
        let result = handler().invoke(&args).await.unwrap();
        assert!(result.payload.contains("Source 1:\n- Rust is a systems language."));
        assert!(!result.is_empty_list());
    }

    #[tokio::test]
    async fn test_research_capability_without_sources() {
        let args = json!({"query": "nothing"}).as_object().unwrap().clone();
        let result = handler().invoke(&args).await.unwrap();
        assert_eq!(result.payload, NO_SOURCES);
    }
}

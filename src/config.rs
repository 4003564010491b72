use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::llm::backend::ModelDescriptor;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where the catalog snapshot is stored
    pub data_dir: PathBuf,
    /// Server bind address
    pub bind_addr: String,
    /// Maximum number of /chat requests answered at once
    pub max_concurrent_chats: usize,
    /// Longest accepted query in bytes (longer queries are truncated)
    pub max_query_len: usize,
    /// Names used in the assistant's system instruction
    pub persona: PersonaConfig,
    /// Gemini backends used for conversation and summarization
    pub llm: LlmConfig,
    /// External semantic index
    pub knowledge: KnowledgeConfig,
    /// Web research pipeline limits
    pub research: ResearchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    pub assistant_name: String,
    pub platform_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL for the Gemini API
    pub base_url: String,
    /// API key sent with every request
    pub api_key: Option<String>,
    /// Fallback order for the conversational backends
    pub models: Vec<ModelDescriptor>,
    /// Fallback order for the (lighter) summarization backends
    pub summary_models: Vec<ModelDescriptor>,
    /// Per-request timeout in seconds (capped at 120)
    pub timeout_secs: u64,
    /// Per-request timeout for summarization inside the research fan-out
    pub summary_timeout_secs: u64,
}

/// Configuration for the external vector-search service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    /// Base URL of the service. If None, every query returns no snippets.
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub collection: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    /// HTML search endpoint used for source discovery
    pub search_url: String,
    /// Maximum number of discovered links (also the fan-out width)
    pub max_sources: usize,
    /// Extracted page text is cut to this many characters
    pub max_chars: usize,
    pub discover_timeout_secs: u64,
    pub fetch_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            bind_addr: "127.0.0.1:50051".to_string(),
            max_concurrent_chats: 8,
            max_query_len: 2000,
            persona: PersonaConfig::default(),
            llm: LlmConfig::default(),
            knowledge: KnowledgeConfig::default(),
            research: ResearchConfig::default(),
        }
    }
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            assistant_name: "MentorBot".to_string(),
            platform_name: "MoDX".to_string(),
        }
    }
}

const DEFAULT_MODELS: &str = "gemini-2.5-flash,gemini-3-flash,gemini-2.5-flash-lite,\
                              gemini-flash-latest,gemini-2.0-flash-lite,gemini-2.0-flash";
const DEFAULT_SUMMARY_MODELS: &str = "gemini-1.5-flash:text,gemini-2.0-flash-lite:text";

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            api_key: None,
            models: parse_model_list(DEFAULT_MODELS),
            summary_models: parse_model_list(DEFAULT_SUMMARY_MODELS),
            timeout_secs: 30,
            summary_timeout_secs: 8,
        }
    }
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            collection: "knowledge_base".to_string(),
            timeout_secs: 8,
        }
    }
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            search_url: "https://html.duckduckgo.com/html/".to_string(),
            max_sources: 5,
            max_chars: 4000,
            discover_timeout_secs: 5,
            fetch_timeout_secs: 7,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("QUERY_ENGINE_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(addr) = std::env::var("QUERY_ENGINE_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Ok(val) = std::env::var("QUERY_ENGINE_MAX_CONCURRENT_CHATS") {
            if let Ok(v) = val.parse::<usize>() {
                config.max_concurrent_chats = v.max(1);
            }
        }
        if let Ok(val) = std::env::var("QUERY_ENGINE_MAX_QUERY_LEN") {
            if let Ok(v) = val.parse() {
                config.max_query_len = v;
            }
        }
        if let Ok(name) = std::env::var("QUERY_ENGINE_ASSISTANT_NAME") {
            config.persona.assistant_name = name;
        }
        if let Ok(name) = std::env::var("QUERY_ENGINE_PLATFORM_NAME") {
            config.persona.platform_name = name;
        }

        // Gemini
        if let Ok(url) = std::env::var("GEMINI_BASE_URL") {
            config.llm.base_url = url;
        }
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            config.llm.api_key = Some(key);
        }
        if let Ok(list) = std::env::var("GEMINI_MODELS") {
            let models = parse_model_list(&list);
            if !models.is_empty() {
                config.llm.models = models;
            }
        }
        if let Ok(list) = std::env::var("GEMINI_SUMMARY_MODELS") {
            let models = parse_model_list(&list);
            if !models.is_empty() {
                config.llm.summary_models = models;
            }
        }
        if let Ok(val) = std::env::var("GEMINI_TIMEOUT_SECS") {
            if let Ok(v) = val.parse::<u64>() {
                config.llm.timeout_secs = v.min(120);
            }
        }
        if let Ok(val) = std::env::var("GEMINI_SUMMARY_TIMEOUT_SECS") {
            if let Ok(v) = val.parse::<u64>() {
                config.llm.summary_timeout_secs = v.min(120);
            }
        }

        // Semantic index
        if let Ok(url) = std::env::var("KNOWLEDGE_BASE_URL") {
            config.knowledge.base_url = Some(url);
        }
        if let Ok(key) = std::env::var("KNOWLEDGE_API_KEY") {
            config.knowledge.api_key = Some(key);
        }
        if let Ok(collection) = std::env::var("KNOWLEDGE_COLLECTION") {
            config.knowledge.collection = collection;
        }
        if let Ok(val) = std::env::var("KNOWLEDGE_TIMEOUT_SECS") {
            if let Ok(v) = val.parse() {
                config.knowledge.timeout_secs = v;
            }
        }

        // Web research
        if let Ok(url) = std::env::var("RESEARCH_SEARCH_URL") {
            config.research.search_url = url;
        }
        if let Ok(val) = std::env::var("RESEARCH_MAX_SOURCES") {
            if let Ok(v) = val.parse() {
                config.research.max_sources = v;
            }
        }
        if let Ok(val) = std::env::var("RESEARCH_MAX_CHARS") {
            if let Ok(v) = val.parse() {
                config.research.max_chars = v;
            }
        }
        if let Ok(val) = std::env::var("RESEARCH_DISCOVER_TIMEOUT_SECS") {
            if let Ok(v) = val.parse() {
                config.research.discover_timeout_secs = v;
            }
        }
        if let Ok(val) = std::env::var("RESEARCH_FETCH_TIMEOUT_SECS") {
            if let Ok(v) = val.parse() {
                config.research.fetch_timeout_secs = v;
            }
        }

        config
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.data_dir.join("catalog.json")
    }
}

/// Parse a comma-separated fallback list. An entry suffixed with `:text`
/// is a backend that cannot be offered function declarations.
pub fn parse_model_list(list: &str) -> Vec<ModelDescriptor> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.strip_suffix(":text") {
            Some(id) => ModelDescriptor::text_only(id.trim()),
            None => ModelDescriptor::new(entry),
        })
        .collect()
}

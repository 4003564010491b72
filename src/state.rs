use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::capability::standard_registry;
use crate::catalog::Catalog;
use crate::config::Config;
use crate::knowledge::{HttpKnowledgeIndex, KnowledgeIndex};
use crate::llm::backend::{BackendFactory, BackendSetup};
use crate::llm::gemini::GeminiFactory;
use crate::llm::FallbackManager;
use crate::orchestrator::{prompt, Orchestrator};
use crate::research::web::WebSource;
use crate::research::{PageSource, ResearchPipeline};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub orchestrator: Arc<Orchestrator>,
    pub knowledge: Arc<dyn KnowledgeIndex>,
    pub chat_semaphore: Arc<tokio::sync::Semaphore>,
}

/// The external collaborators the service is wired from.
pub struct Services {
    pub factory: Arc<dyn BackendFactory>,
    pub knowledge: Arc<dyn KnowledgeIndex>,
    pub web: Arc<dyn PageSource>,
    pub catalog: Arc<Catalog>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let http_client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(120))
            .build()?;

        let services = Services {
            factory: Arc::new(GeminiFactory::new(http_client.clone(), &config.llm)),
            knowledge: Arc::new(HttpKnowledgeIndex::new(
                http_client.clone(),
                config.knowledge.clone(),
            )),
            web: Arc::new(WebSource::new(http_client, config.research.clone())),
            catalog: Arc::new(Catalog::open(&config.catalog_path())?),
        };

        Self::with_services(config, services)
    }

    /// Wire the capability table, both model managers, and the orchestrator.
    pub fn with_services(config: Config, services: Services) -> Result<Self> {
        let summary_setup = BackendSetup {
            timeout: Some(Duration::from_secs(config.llm.summary_timeout_secs)),
            ..Default::default()
        };
        let summarizer = FallbackManager::new(
            config.llm.summary_models.clone(),
            summary_setup,
            services.factory.clone(),
        )
        .context("Failed to initialize summarization models")?;

        let research = Arc::new(ResearchPipeline::new(
            services.web,
            Arc::new(summarizer),
            config.research.max_sources,
        ));

        let registry = standard_registry(services.catalog, services.knowledge.clone(), research)
            .context("Invalid capability table")?;

        let setup = BackendSetup {
            system_instruction: Some(prompt::build_system_instruction(&config.persona, &registry)),
            functions: registry.declarations(),
            timeout: None,
        };
        let models = FallbackManager::new(config.llm.models.clone(), setup, services.factory)
            .context("Failed to initialize conversation models")?;
        tracing::info!(
            "Conversation model: {} ({} in fallback list), {} capabilities",
            models.active_model(),
            models.models().len(),
            registry.len()
        );

        let orchestrator = Orchestrator::new(
            Arc::new(models),
            Arc::new(registry),
            services.knowledge.clone(),
            &config.persona,
            config.max_query_len,
        );

        Ok(Self {
            chat_semaphore: Arc::new(tokio::sync::Semaphore::new(config.max_concurrent_chats)),
            orchestrator: Arc::new(orchestrator),
            knowledge: services.knowledge,
            config,
        })
    }
}

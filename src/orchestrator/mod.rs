//! Per-query routing. A query either becomes a capability call chosen by
//! the model, or falls back to retrieval-augmented generation over the
//! knowledge index.
//!
//! ```text
//!   query ──► conversation.send ──► parse_reply
//!                                     │
//!            ┌────────────────────────┴─────────────────────┐
//!   CapabilityChosen(call)                          NoCapabilityChosen
//!            │                                              │
//!   registry.dispatch                               knowledge.query_similar
//!     ├─ unknown      ──► fixed refusal                     │
//!     ├─ empty list   ──► one-shot spelling suggestion  generate_once
//!     └─ otherwise    ──► function response ──► final reply
//! ```

pub mod prompt;

use std::sync::Arc;

use serde_json::json;
use tracing::Instrument;
use uuid::Uuid;

use crate::capability::{CallError, CapabilityRegistry, CapabilityResult};
use crate::config::PersonaConfig;
use crate::knowledge::KnowledgeIndex;
use crate::llm::backend::{FunctionCall, Part, Reply};
use crate::llm::{Conversation, FallbackManager, ModelError, Turn};

pub const EMPTY_QUERY_ANSWER: &str = "Please ask a question.";
pub const UNKNOWN_CAPABILITY_ANSWER: &str = "Sorry, I'm not sure how to handle that request.";
pub const SERVICE_ERROR_ANSWER: &str = "An error occurred in the AI service.";
pub const NO_ANSWER: &str = "I'm sorry, I couldn't come up with an answer to that.";

/// Snippets pulled from the knowledge index for a retrieval answer.
const RAG_CONTEXT_RESULTS: usize = 3;

/// What the model's first reply asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyIntent {
    CapabilityChosen(FunctionCall),
    NoCapabilityChosen,
}

/// The first function call in the reply wins. Replies without one, with no
/// parts, or with a nameless call choose nothing.
pub fn parse_reply(reply: &Reply) -> ReplyIntent {
    reply
        .parts
        .iter()
        .find_map(|part| match part {
            Part::FunctionCall(call) if !call.name.trim().is_empty() => Some(call.clone()),
            _ => None,
        })
        .map_or(ReplyIntent::NoCapabilityChosen, ReplyIntent::CapabilityChosen)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Answered from a capability result fed back into the conversation.
    Capability(String),
    /// The capability found nothing; answered by a one-shot suggestion.
    SpellingSuggestion(String),
    UnknownCapability(String),
    Retrieval,
    EmptyQuery,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    pub route: Route,
}

impl Answer {
    fn new(text: String, route: Route) -> Self {
        let text = if text.trim().is_empty() {
            NO_ANSWER.to_string()
        } else {
            text
        };
        Self { text, route }
    }
}

pub struct Orchestrator {
    models: Arc<FallbackManager>,
    registry: Arc<CapabilityRegistry>,
    knowledge: Arc<dyn KnowledgeIndex>,
    seed: Vec<Turn>,
    max_query_len: usize,
}

impl Orchestrator {
    /// `models` must already carry the system instruction and the
    /// registry's declarations.
    pub fn new(
        models: Arc<FallbackManager>,
        registry: Arc<CapabilityRegistry>,
        knowledge: Arc<dyn KnowledgeIndex>,
        persona: &PersonaConfig,
        max_query_len: usize,
    ) -> Self {
        Self {
            models,
            registry,
            knowledge,
            seed: prompt::few_shot_turns(persona),
            max_query_len,
        }
    }

    /// Answer a query. Never fails; errors become a safe message.
    pub async fn answer(&self, query: &str) -> String {
        let span = tracing::info_span!("query", id = %Uuid::new_v4());
        async {
            match self.route(query).await {
                Ok(answer) => {
                    tracing::info!(route = ?answer.route, "Query answered");
                    answer.text
                }
                Err(e) => {
                    tracing::error!("Query failed: {:#}", anyhow::Error::from(e));
                    SERVICE_ERROR_ANSWER.to_string()
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Answer a query and report the route taken. Only model exhaustion
    /// escapes as an error.
    pub async fn route(&self, raw_query: &str) -> Result<Answer, ModelError> {
        let query = prompt::clean_query(raw_query, self.max_query_len);
        if query.is_empty() {
            return Ok(Answer::new(EMPTY_QUERY_ANSWER.to_string(), Route::EmptyQuery));
        }

        let mut conversation = self.models.open_conversation(self.seed.clone());
        let reply = conversation.send_text(&query).await?;

        match parse_reply(&reply) {
            ReplyIntent::CapabilityChosen(call) => {
                tracing::info!("Model chose capability {} on {}", call.name, conversation.active_model());
                self.run_capability(&mut conversation, &query, call).await
            }
            ReplyIntent::NoCapabilityChosen => {
                tracing::info!("No capability chosen, answering from the knowledge base");
                self.retrieve(&query).await
            }
        }
    }

    async fn run_capability(
        &self,
        conversation: &mut Conversation<'_>,
        query: &str,
        call: FunctionCall,
    ) -> Result<Answer, ModelError> {
        let name = call.name;
        let result = match self.registry.dispatch(&name, &call.args).await {
            Ok(result) => result,
            Err(CallError::UnknownCapability(_)) => {
                tracing::warn!("Model asked for unknown capability {name}");
                return Ok(Answer::new(
                    UNKNOWN_CAPABILITY_ANSWER.to_string(),
                    Route::UnknownCapability(name),
                ));
            }
            Err(e @ CallError::InvalidArguments { .. }) => {
                tracing::warn!("Rejected call: {e}");
                CapabilityResult::failure(e.to_string())
            }
        };

        if result.is_empty_list() {
            tracing::info!("{name} found nothing, asking for a spelling suggestion");
            let text = self
                .models
                .generate_once(&prompt::spelling_suggestion_prompt(query))
                .await?;
            return Ok(Answer::new(text, Route::SpellingSuggestion(name)));
        }

        let response = Turn::function_response(name.clone(), json!({ "result": result.payload }));
        let reply = conversation.send(response).await?;
        Ok(Answer::new(reply.joined_text(), Route::Capability(name)))
    }

    async fn retrieve(&self, query: &str) -> Result<Answer, ModelError> {
        let snippets = match self.knowledge.query_similar(query, RAG_CONTEXT_RESULTS).await {
            Ok(snippets) => snippets,
            Err(e) => {
                tracing::warn!("Knowledge index query failed: {e:#}");
                Vec::new()
            }
        };

        let context = prompt::build_context_block(&snippets);
        let text = self
            .models
            .generate_once(&prompt::build_retrieval_prompt(&context, query))
            .await?;
        Ok(Answer::new(text, Route::Retrieval))
    }
}

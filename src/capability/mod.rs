//! Capabilities the model may ask the orchestrator to invoke.
//!
//! - [`registry`] - schema-checked, name-keyed handler table
//! - [`lookup`] - structured catalog lookups and concept search
//! - [`research`] - web research as a capability

pub mod lookup;
pub mod registry;
pub mod research;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use registry::{CallError, CapabilityRegistry, CapabilitySchema, ParamKind, ParamSpec};

use crate::catalog::Catalog;
use crate::knowledge::KnowledgeIndex;
use crate::research::ResearchPipeline;

#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    async fn invoke(&self, args: &Map<String, Value>) -> anyhow::Result<CapabilityResult>;
}

/// The JSON envelope structured-data lookups answer with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,
    pub message: String,
    pub data: Vec<Value>,
}

impl Envelope {
    pub fn found(message: &str, data: Vec<Value>) -> Self {
        Self {
            success: true,
            message: message.to_string(),
            data,
        }
    }

    pub fn failure(message: &str) -> Self {
        Self {
            success: false,
            message: message.to_string(),
            data: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    /// Anything that is not an empty structured result or an error.
    Found,
    /// `{success: true, data: []}` from a structured lookup.
    EmptyList,
    /// The capability reported (or suffered) a failure.
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityResult {
    pub payload: String,
    pub kind: ResultKind,
}

impl CapabilityResult {
    /// Free-form text. Never counts as an empty structured result.
    pub fn text(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            kind: ResultKind::Found,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::envelope(&Envelope::failure(&message.into()))
    }

    pub fn envelope(envelope: &Envelope) -> Self {
        let kind = match (envelope.success, envelope.data.is_empty()) {
            (false, _) => ResultKind::Error,
            (true, true) => ResultKind::EmptyList,
            (true, false) => ResultKind::Found,
        };
        Self {
            payload: serde_json::to_string(envelope).unwrap_or_default(),
            kind,
        }
    }

    pub fn is_empty_list(&self) -> bool {
        self.kind == ResultKind::EmptyList
    }
}

/// The standard capability table: catalog lookups, concept search, and web
/// research.
pub fn standard_registry(
    catalog: Arc<Catalog>,
    knowledge: Arc<dyn KnowledgeIndex>,
    research: Arc<ResearchPipeline>,
) -> Result<CapabilityRegistry, registry::RegistryError> {
    let mut registry = CapabilityRegistry::new();
    registry.register(
        lookup::ConceptSearch::schema(),
        Arc::new(lookup::ConceptSearch::new(knowledge)),
    )?;
    registry.register(
        lookup::FindProjects::schema(),
        Arc::new(lookup::FindProjects::new(catalog.clone())),
    )?;
    registry.register(
        lookup::FindUsers::schema(),
        Arc::new(lookup::FindUsers::new(catalog)),
    )?;
    registry.register(
        research::WebResearch::schema(),
        Arc::new(research::WebResearch::new(research)),
    )?;
    Ok(registry)
}

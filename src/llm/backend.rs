//! Backend-neutral conversation types and the two seams every model
//! backend plugs into: [`ModelBackend`] (one invocable client) and
//! [`BackendFactory`] (how the fallback manager recreates clients).

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One entry of the fallback list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Backend identifier, e.g. `gemini-2.5-flash`
    pub id: String,
    /// Whether the backend may be offered function declarations
    pub function_calling: bool,
}

impl ModelDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            function_calling: true,
        }
    }

    pub fn text_only(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            function_calling: false,
        }
    }
}

/// Declarations shared by every backend a manager creates.
#[derive(Debug, Clone, Default)]
pub struct BackendSetup {
    pub system_instruction: Option<String>,
    pub functions: Vec<FunctionDeclaration>,
    /// Per-request timeout override; `None` uses the factory default.
    pub timeout: Option<Duration>,
}

/// A capability schema in the form the model sees it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    /// JSON-schema object describing the arguments
    pub parameters: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Model,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub args: Map<String, Value>,
    /// Opaque thought signature attached by the model. It must be sent
    /// back unchanged when the call is replayed.
    pub signature: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionResponse {
    pub name: String,
    pub response: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    FunctionCall(FunctionCall),
    FunctionResponse(FunctionResponse),
}

/// A single transcript entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![Part::Text(text.into())],
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            parts: vec![Part::Text(text.into())],
        }
    }

    /// A user turn carrying the result of a function call back to the model.
    pub fn function_response(name: impl Into<String>, response: Value) -> Self {
        Self {
            role: Role::User,
            parts: vec![Part::FunctionResponse(FunctionResponse {
                name: name.into(),
                response,
            })],
        }
    }
}

/// The first candidate of a generation call. May be empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    pub parts: Vec<Part>,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![Part::Text(text.into())],
        }
    }

    pub fn call(name: impl Into<String>, args: Map<String, Value>) -> Self {
        Self {
            parts: vec![Part::FunctionCall(FunctionCall {
                name: name.into(),
                args,
                signature: None,
            })],
        }
    }

    /// Concatenated text of all text parts.
    pub fn joined_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn into_turn(self) -> Turn {
        Turn {
            role: Role::Model,
            parts: self.parts,
        }
    }
}

/// One live client for one backend.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    fn model_id(&self) -> &str;

    /// Stateless generation over a full transcript. Multi-turn sessions are
    /// built by the caller resending prior turns as context.
    async fn generate(&self, contents: &[Turn]) -> Result<Reply>;
}

/// Builds clients for the fallback manager. Construction may fail before
/// any network call is made (bad key, unknown model id, ...).
pub trait BackendFactory: Send + Sync {
    fn create(
        &self,
        descriptor: &ModelDescriptor,
        setup: &BackendSetup,
    ) -> Result<Arc<dyn ModelBackend>>;
}

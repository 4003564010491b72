//! Name-keyed table of capabilities. Each entry pairs a declared argument
//! schema with its handler; schemas are checked once at registration and
//! every call is checked against its schema before dispatch.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::capability::{CapabilityHandler, CapabilityResult};
use crate::llm::backend::FunctionDeclaration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
}

impl ParamKind {
    fn json_type(self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
            ParamKind::Number => "number",
            ParamKind::Boolean => "boolean",
        }
    }

    fn accepts(self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Integer => value.is_i64() || value.is_u64() || is_integral_float(value),
            ParamKind::Number => value.is_number(),
            ParamKind::Boolean => value.is_boolean(),
        }
    }
}

/// Models sometimes send `3.0` for an integer argument.
fn is_integral_float(value: &Value) -> bool {
    value.as_f64().is_some_and(|f| f.fract() == 0.0)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub required: bool,
    pub description: String,
}

impl ParamSpec {
    pub fn optional(name: &str, kind: ParamKind, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: false,
            description: description.to_string(),
        }
    }

    pub fn required(name: &str, kind: ParamKind, description: &str) -> Self {
        Self {
            required: true,
            ..Self::optional(name, kind, description)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CapabilitySchema {
    pub name: String,
    /// Shown to the model; says when the capability should be used.
    pub description: String,
    pub params: Vec<ParamSpec>,
}

impl CapabilitySchema {
    pub fn new(name: &str, description: &str, params: Vec<ParamSpec>) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            params,
        }
    }

    pub fn to_declaration(&self) -> FunctionDeclaration {
        let properties: Map<String, Value> = self
            .params
            .iter()
            .map(|p| {
                (
                    p.name.clone(),
                    json!({ "type": p.kind.json_type(), "description": p.description }),
                )
            })
            .collect();
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        let mut parameters = json!({ "type": "object", "properties": properties });
        if !required.is_empty() {
            parameters["required"] = json!(required);
        }

        FunctionDeclaration {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters,
        }
    }

    fn validate(&self) -> Result<(), RegistryError> {
        if !is_identifier(&self.name) {
            return Err(RegistryError::InvalidName(self.name.clone()));
        }
        if self.description.trim().is_empty() {
            return Err(RegistryError::MissingDescription(self.name.clone()));
        }
        let mut seen = Vec::with_capacity(self.params.len());
        for param in &self.params {
            if !is_identifier(&param.name) {
                return Err(RegistryError::InvalidParam {
                    capability: self.name.clone(),
                    param: param.name.clone(),
                });
            }
            if seen.contains(&param.name.as_str()) {
                return Err(RegistryError::DuplicateParam {
                    capability: self.name.clone(),
                    param: param.name.clone(),
                });
            }
            seen.push(param.name.as_str());
        }
        Ok(())
    }

    /// Check call arguments against this schema.
    pub fn check(&self, args: &Map<String, Value>) -> Result<(), CallError> {
        for key in args.keys() {
            if !self.params.iter().any(|p| &p.name == key) {
                return Err(CallError::InvalidArguments {
                    capability: self.name.clone(),
                    reason: format!("unexpected argument '{key}'"),
                });
            }
        }
        for param in &self.params {
            match args.get(&param.name) {
                None | Some(Value::Null) if param.required => {
                    return Err(CallError::InvalidArguments {
                        capability: self.name.clone(),
                        reason: format!("missing required argument '{}'", param.name),
                    });
                }
                None | Some(Value::Null) => {}
                Some(value) if !param.kind.accepts(value) => {
                    return Err(CallError::InvalidArguments {
                        capability: self.name.clone(),
                        reason: format!(
                            "argument '{}' must be a {}",
                            param.name,
                            param.kind.json_type()
                        ),
                    });
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name.len() <= 64
}

/// Rejected at registration time.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RegistryError {
    #[error("invalid capability name: {0:?}")]
    InvalidName(String),
    #[error("capability {0} has no description")]
    MissingDescription(String),
    #[error("capability {capability} has invalid parameter name {param:?}")]
    InvalidParam { capability: String, param: String },
    #[error("capability {capability} declares parameter {param} twice")]
    DuplicateParam { capability: String, param: String },
    #[error("capability {0} registered twice")]
    Duplicate(String),
}

/// Rejected before dispatch.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CallError {
    #[error("unknown capability: {0}")]
    UnknownCapability(String),
    #[error("invalid arguments for {capability}: {reason}")]
    InvalidArguments { capability: String, reason: String },
}

struct Entry {
    schema: CapabilitySchema,
    handler: Arc<dyn CapabilityHandler>,
}

#[derive(Default)]
pub struct CapabilityRegistry {
    entries: BTreeMap<String, Entry>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        schema: CapabilitySchema,
        handler: Arc<dyn CapabilityHandler>,
    ) -> Result<(), RegistryError> {
        schema.validate()?;
        if self.entries.contains_key(&schema.name) {
            return Err(RegistryError::Duplicate(schema.name));
        }
        self.entries
            .insert(schema.name.clone(), Entry { schema, handler });
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn CapabilityHandler>> {
        self.entries.get(name).map(|e| e.handler.clone())
    }

    pub fn schema_of(&self, name: &str) -> Option<&CapabilitySchema> {
        self.entries.get(name).map(|e| &e.schema)
    }

    pub fn schemas(&self) -> impl Iterator<Item = &CapabilitySchema> {
        self.entries.values().map(|e| &e.schema)
    }

    pub fn declarations(&self) -> Vec<FunctionDeclaration> {
        self.schemas().map(CapabilitySchema::to_declaration).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up and validate a call without invoking it.
    pub fn validate(
        &self,
        name: &str,
        args: &Map<String, Value>,
    ) -> Result<Arc<dyn CapabilityHandler>, CallError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| CallError::UnknownCapability(name.to_string()))?;
        entry.schema.check(args)?;
        Ok(entry.handler.clone())
    }

    /// Validate then invoke. Handler failures degrade to an error envelope
    /// so the model can explain them; only validation errors are returned.
    pub async fn dispatch(
        &self,
        name: &str,
        args: &Map<String, Value>,
    ) -> Result<CapabilityResult, CallError> {
        let handler = self.validate(name, args)?;
        match handler.invoke(args).await {
            Ok(result) => Ok(result),
            Err(e) => {
                tracing::warn!("Capability {name} failed: {e:#}");
                Ok(CapabilityResult::failure(format!(
                    "The {name} lookup failed: {e}"
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::ResultKind;
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl CapabilityHandler for Echo {
        async fn invoke(&self, args: &Map<String, Value>) -> anyhow::Result<CapabilityResult> {
            Ok(CapabilityResult::text(Value::Object(args.clone()).to_string()))
        }
    }

    struct Broken;

    #[async_trait]
    impl CapabilityHandler for Broken {
        async fn invoke(&self, _args: &Map<String, Value>) -> anyhow::Result<CapabilityResult> {
            anyhow::bail!("connection refused")
        }
    }

    fn lookup_schema() -> CapabilitySchema {
        CapabilitySchema::new(
            "find_projects",
            "Find projects by skill or title.",
            vec![
                ParamSpec::optional("skill", ParamKind::String, "A required skill"),
                ParamSpec::optional("title", ParamKind::String, "Part of the title"),
            ],
        )
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_register_and_resolve() {
        let mut registry = CapabilityRegistry::new();
        registry.register(lookup_schema(), Arc::new(Echo)).unwrap();
        assert!(registry.resolve("find_projects").is_some());
        assert!(registry.resolve("drop_tables").is_none());
        assert_eq!(registry.schema_of("find_projects").unwrap().params.len(), 2);
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut registry = CapabilityRegistry::new();
        registry.register(lookup_schema(), Arc::new(Echo)).unwrap();
        assert_eq!(
            registry.register(lookup_schema(), Arc::new(Echo)),
            Err(RegistryError::Duplicate("find_projects".into()))
        );
    }

    #[test]
    fn test_register_rejects_bad_schemas() {
        let mut registry = CapabilityRegistry::new();
        let bad_name = CapabilitySchema::new("find projects", "x", vec![]);
        assert!(matches!(
            registry.register(bad_name, Arc::new(Echo)),
            Err(RegistryError::InvalidName(_))
        ));

        let no_desc = CapabilitySchema::new("x", "  ", vec![]);
        assert!(matches!(
            registry.register(no_desc, Arc::new(Echo)),
            Err(RegistryError::MissingDescription(_))
        ));

        let dup_param = CapabilitySchema::new(
            "y",
            "desc",
            vec![
                ParamSpec::optional("a", ParamKind::String, ""),
                ParamSpec::optional("a", ParamKind::Integer, ""),
            ],
        );
        assert!(matches!(
            registry.register(dup_param, Arc::new(Echo)),
            Err(RegistryError::DuplicateParam { .. })
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_validate_unknown_capability() {
        let registry = CapabilityRegistry::new();
        assert_eq!(
            registry.validate("nope", &Map::new()).err(),
            Some(CallError::UnknownCapability("nope".into()))
        );
    }

    #[test]
    fn test_check_rejects_unexpected_argument() {
        let err = lookup_schema()
            .check(&args(json!({"skill": "Rust", "admin": true})))
            .unwrap_err();
        assert!(err.to_string().contains("unexpected argument 'admin'"));
    }

    #[test]
    fn test_check_rejects_wrong_type() {
        let err = lookup_schema().check(&args(json!({"skill": 5}))).unwrap_err();
        assert!(err.to_string().contains("must be a string"));
    }

    #[test]
    fn test_check_required_and_null() {
        let schema = CapabilitySchema::new(
            "scrape_for_info",
            "web",
            vec![ParamSpec::required("query", ParamKind::String, "topic")],
        );
        assert!(schema.check(&Map::new()).is_err());
        assert!(schema.check(&args(json!({"query": null}))).is_err());
        assert!(schema.check(&args(json!({"query": "rust"}))).is_ok());
        // Optional params may be null.
        assert!(lookup_schema().check(&args(json!({"skill": null}))).is_ok());
    }

    #[test]
    fn test_integer_accepts_integral_float() {
        let schema = CapabilitySchema::new(
            "top",
            "desc",
            vec![ParamSpec::required("n", ParamKind::Integer, "")],
        );
        assert!(schema.check(&args(json!({"n": 3.0}))).is_ok());
        assert!(schema.check(&args(json!({"n": 3.5}))).is_err());
    }

    #[test]
    fn test_declaration_shape() {
        let schema = CapabilitySchema::new(
            "scrape_for_info",
            "Research a topic on the web.",
            vec![ParamSpec::required("query", ParamKind::String, "topic")],
        );
        let decl = schema.to_declaration();
        assert_eq!(decl.parameters["type"], "object");
        assert_eq!(decl.parameters["properties"]["query"]["type"], "string");
        assert_eq!(decl.parameters["required"], json!(["query"]));

        let optional = lookup_schema().to_declaration();
        assert!(optional.parameters.get("required").is_none());
    }

    #[tokio::test]
    async fn test_dispatch_degrades_handler_failure() {
        let mut registry = CapabilityRegistry::new();
        registry.register(lookup_schema(), Arc::new(Broken)).unwrap();
        let result = registry
            .dispatch("find_projects", &args(json!({"skill": "Go"})))
            .await
            .unwrap();
        assert_eq!(result.kind, ResultKind::Error);
        assert!(result.payload.contains("connection refused"));
    }

    #[tokio::test]
    async fn test_dispatch_passes_arguments() {
        let mut registry = CapabilityRegistry::new();
        registry.register(lookup_schema(), Arc::new(Echo)).unwrap();
        let result = registry
            .dispatch("find_projects", &args(json!({"title": "chat"})))
            .await
            .unwrap();
        assert_eq!(result.payload, r#"{"title":"chat"}"#);
    }
}

//! Read-only lookups: structured catalog queries and concept search over
//! the knowledge index.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::capability::{CapabilityHandler, CapabilityResult, CapabilitySchema, ParamKind, ParamSpec};
use crate::catalog::Catalog;
use crate::knowledge::KnowledgeIndex;

/// How many snippets a concept search returns.
const CONCEPT_RESULTS: usize = 3;

fn string_arg<'a>(args: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    args.get(name).and_then(Value::as_str)
}

/// Free-form project discovery by topic, e.g. "projects about sustainability".
pub struct ConceptSearch {
    knowledge: Arc<dyn KnowledgeIndex>,
}

impl ConceptSearch {
    pub const NAME: &'static str = "find_projects_by_concept";

    pub fn new(knowledge: Arc<dyn KnowledgeIndex>) -> Self {
        Self { knowledge }
    }

    pub fn schema() -> CapabilitySchema {
        CapabilitySchema::new(
            Self::NAME,
            "Semantic search over project descriptions. Use when the user describes \
             a theme, goal, or idea (e.g. 'projects about climate' or 'something \
             with AI for health') rather than an exact skill or title.",
            vec![ParamSpec::required(
                "concept",
                ParamKind::String,
                "The theme or idea to search for",
            )],
        )
    }
}

#[async_trait]
impl CapabilityHandler for ConceptSearch {
    async fn invoke(&self, args: &Map<String, Value>) -> Result<CapabilityResult> {
        let concept = string_arg(args, "concept").unwrap_or_default();
        let docs = self.knowledge.query_similar(concept, CONCEPT_RESULTS).await?;
        Ok(CapabilityResult::text(docs.join("\n")))
    }
}

pub struct FindProjects {
    catalog: Arc<Catalog>,
}

impl FindProjects {
    pub const NAME: &'static str = "find_projects";

    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }

    pub fn schema() -> CapabilitySchema {
        CapabilitySchema::new(
            Self::NAME,
            "Look up projects by a specific required skill or by title. Use when the \
             user names a concrete technology or skill (e.g. 'Python projects') or \
             part of a project title.",
            vec![
                ParamSpec::optional("skill", ParamKind::String, "A required skill, e.g. React"),
                ParamSpec::optional("title", ParamKind::String, "All or part of a project title"),
            ],
        )
    }
}

#[async_trait]
impl CapabilityHandler for FindProjects {
    async fn invoke(&self, args: &Map<String, Value>) -> Result<CapabilityResult> {
        let envelope = self
            .catalog
            .find_projects(string_arg(args, "skill"), string_arg(args, "title"));
        Ok(CapabilityResult::envelope(&envelope))
    }
}

pub struct FindUsers {
    catalog: Arc<Catalog>,
}

impl FindUsers {
    pub const NAME: &'static str = "find_users";

    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }

    pub fn schema() -> CapabilitySchema {
        CapabilitySchema::new(
            Self::NAME,
            "Look up people on the platform by role (member, mentor, leader) or by \
             area of interest. Use when the user asks to find a mentor, a teammate, \
             or someone interested in a subject.",
            vec![
                ParamSpec::optional("role", ParamKind::String, "One of member, mentor, leader"),
                ParamSpec::optional("interest", ParamKind::String, "A subject the person is interested in"),
            ],
        )
    }
}

#[async_trait]
impl CapabilityHandler for FindUsers {
    async fn invoke(&self, args: &Map<String, Value>) -> Result<CapabilityResult> {
        let envelope = self
            .catalog
            .find_users(string_arg(args, "role"), string_arg(args, "interest"));
        Ok(CapabilityResult::envelope(&envelope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::ResultKind;
    use crate::catalog::{ProjectRecord, UserRecord};
    use crate::knowledge::Snippet;
    use parking_lot::Mutex;
    use serde_json::json;

    struct RecordingIndex {
        docs: Vec<&'static str>,
        seen: Mutex<Vec<(String, usize)>>,
    }

    #[async_trait]
    impl KnowledgeIndex for RecordingIndex {
        async fn query(&self, text: &str, max_results: usize) -> Result<Vec<Snippet>> {
            self.seen.lock().push((text.to_string(), max_results));
            Ok(self
                .docs
                .iter()
                .take(max_results)
                .enumerate()
                .map(|(i, d)| Snippet {
                    id: format!("p{i}"),
                    document: d.to_string(),
                })
                .collect())
        }
    }

    struct DownIndex;

    #[async_trait]
    impl KnowledgeIndex for DownIndex {
        async fn query(&self, _text: &str, _max_results: usize) -> Result<Vec<Snippet>> {
            anyhow::bail!("connection refused")
        }
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    fn catalog() -> Arc<Catalog> {
        Arc::new(Catalog::from_records(
            vec![ProjectRecord {
                title: "Solar Map".into(),
                description: "Rooftop solar potential".into(),
                required_skills: vec!["Python".into()],
                tech_stack: vec!["PostGIS".into()],
            }],
            vec![UserRecord {
                full_name: "Ada".into(),
                roles: vec!["mentor".into()],
                interest: "energy".into(),
            }],
        ))
    }

    #[tokio::test]
    async fn test_concept_search_joins_top_three() {
        let index = Arc::new(RecordingIndex {
            docs: vec!["Solar Map", "Wind Farm", "Grid Sim", "Battery DB"],
            seen: Mutex::new(Vec::new()),
        });
        let result = ConceptSearch::new(index.clone())
            .invoke(&args(json!({"concept": "renewable energy"})))
            .await
            .unwrap();

        assert_eq!(result.payload, "Solar Map\nWind Farm\nGrid Sim");
        assert_eq!(result.kind, ResultKind::Found);
        assert_eq!(index.seen.lock()[0], ("renewable energy".to_string(), 3));
    }

    #[tokio::test]
    async fn test_concept_search_no_match_is_not_empty_list() {
        let index = Arc::new(RecordingIndex {
            docs: vec![],
            seen: Mutex::new(Vec::new()),
        });
        let result = ConceptSearch::new(index)
            .invoke(&args(json!({"concept": "x"})))
            .await
            .unwrap();
        assert_eq!(result.payload, "");
        assert!(!result.is_empty_list());
    }

    #[tokio::test]
    async fn test_concept_search_propagates_index_failure() {
        let err = ConceptSearch::new(Arc::new(DownIndex))
            .invoke(&args(json!({"concept": "x"})))
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_find_projects_returns_envelope() {
        let result = FindProjects::new(catalog())
            .invoke(&args(json!({"skill": "python"})))
            .await
            .unwrap();
        let body: Value = serde_json::from_str(&result.payload).unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["data"][0]["title"], "Solar Map");
        assert_eq!(result.kind, ResultKind::Found);
    }

    #[tokio::test]
    async fn test_find_projects_no_match_is_empty_list() {
        let result = FindProjects::new(catalog())
            .invoke(&args(json!({"title": "Pythn"})))
            .await
            .unwrap();
        assert!(result.is_empty_list());
    }

    #[tokio::test]
    async fn test_find_users_without_filter_is_error() {
        let result = FindUsers::new(catalog()).invoke(&Map::new()).await.unwrap();
        assert_eq!(result.kind, ResultKind::Error);
    }

    #[tokio::test]
    async fn test_find_users_by_role() {
        let result = FindUsers::new(catalog())
            .invoke(&args(json!({"role": "mentor"})))
            .await
            .unwrap();
        assert!(result.payload.contains("Ada"));
    }

    #[test]
    fn test_schemas_register() {
        let mut registry = crate::capability::CapabilityRegistry::new();
        registry
            .register(FindProjects::schema(), Arc::new(FindProjects::new(catalog())))
            .unwrap();
        registry
            .register(FindUsers::schema(), Arc::new(FindUsers::new(catalog())))
            .unwrap();
        registry
            .register(
                ConceptSearch::schema(),
                Arc::new(ConceptSearch::new(Arc::new(DownIndex))),
            )
            .unwrap();
        assert_eq!(registry.len(), 3);
    }
}

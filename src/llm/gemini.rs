use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::LlmConfig;
use crate::llm::backend::{
    BackendFactory, BackendSetup, FunctionCall, FunctionDeclaration, FunctionResponse,
    ModelBackend, ModelDescriptor, Part, Reply, Turn,
};

const MAX_TIMEOUT_SECS: u64 = 120;

/// Creates [`GeminiBackend`] clients sharing one HTTP connection pool.
pub struct GeminiFactory {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl GeminiFactory {
    pub fn new(client: reqwest::Client, config: &LlmConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            timeout: Duration::from_secs(config.timeout_secs.min(MAX_TIMEOUT_SECS)),
        }
    }

    fn request_timeout(&self, setup: &BackendSetup) -> Duration {
        setup
            .timeout
            .map_or(self.timeout, |t| t.min(Duration::from_secs(MAX_TIMEOUT_SECS)))
    }
}

impl BackendFactory for GeminiFactory {
    fn create(
        &self,
        descriptor: &ModelDescriptor,
        setup: &BackendSetup,
    ) -> Result<Arc<dyn ModelBackend>> {
        let api_key = self
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .context("GEMINI_API_KEY is not set")?;

        if descriptor.id.is_empty() || descriptor.id.contains('/') {
            anyhow::bail!("Invalid Gemini model id: {:?}", descriptor.id);
        }

        let functions = if descriptor.function_calling {
            setup.functions.clone()
        } else {
            Vec::new()
        };

        Ok(Arc::new(GeminiBackend {
            client: self.client.clone(),
            url: format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url, descriptor.id
            ),
            api_key,
            model: descriptor.id.clone(),
            system_instruction: setup.system_instruction.clone(),
            functions,
            timeout: self.request_timeout(setup),
        }))
    }
}

/// One Gemini model behind the `generateContent` endpoint.
pub struct GeminiBackend {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    system_instruction: Option<String>,
    functions: Vec<FunctionDeclaration>,
    timeout: Duration,
}

#[async_trait]
impl ModelBackend for GeminiBackend {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn generate(&self, contents: &[Turn]) -> Result<Reply> {
        let req = build_request(self.system_instruction.as_deref(), &self.functions, contents);

        let resp = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .header("x-goog-api-key", &self.api_key)
            .json(&req)
            .send()
            .await
            .with_context(|| format!("Failed to call Gemini model {}", self.model))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Gemini {} returned {status}: {body}", self.model);
        }

        let body: GenerateResponse = resp
            .json()
            .await
            .context("Failed to parse Gemini response")?;

        Ok(first_candidate(body))
    }
}

// ─── Wire format ─────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<WireContent>,
    contents: Vec<WireContent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireTool<'a> {
    function_declarations: &'a [FunctionDeclaration],
}

#[derive(Serialize, Deserialize, Default)]
struct WireContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct WirePart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<WireFunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<WireFunctionResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thought_signature: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    args: Option<Map<String, Value>>,
}

#[derive(Serialize, Deserialize)]
struct WireFunctionResponse {
    name: String,
    response: Value,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: WireContent,
}

fn build_request<'a>(
    system_instruction: Option<&str>,
    functions: &'a [FunctionDeclaration],
    contents: &[Turn],
) -> GenerateRequest<'a> {
    GenerateRequest {
        system_instruction: system_instruction.map(|text| WireContent {
            role: None,
            parts: vec![WirePart {
                text: Some(text.to_string()),
                ..Default::default()
            }],
        }),
        contents: contents.iter().map(to_wire).collect(),
        tools: if functions.is_empty() {
            Vec::new()
        } else {
            vec![WireTool {
                function_declarations: functions,
            }]
        },
    }
}

fn to_wire(turn: &Turn) -> WireContent {
    WireContent {
        role: Some(turn.role.as_str().to_string()),
        parts: turn
            .parts
            .iter()
            .map(|part| match part {
                Part::Text(text) => WirePart {
                    text: Some(text.clone()),
                    ..Default::default()
                },
                Part::FunctionCall(call) => WirePart {
                    function_call: Some(WireFunctionCall {
                        name: call.name.clone(),
                        args: Some(call.args.clone()),
                    }),
                    thought_signature: call.signature.clone(),
                    ..Default::default()
                },
                Part::FunctionResponse(resp) => WirePart {
                    function_response: Some(WireFunctionResponse {
                        name: resp.name.clone(),
                        response: resp.response.clone(),
                    }),
                    ..Default::default()
                },
            })
            .collect(),
    }
}

/// Keep only the first candidate. A function call keeps its thought
/// signature; parts carrying nothing we understand (inline data, bare
/// signatures) are dropped.
fn first_candidate(body: GenerateResponse) -> Reply {
    let Some(candidate) = body.candidates.into_iter().next() else {
        return Reply::default();
    };

    let parts = candidate
        .content
        .parts
        .into_iter()
        .filter_map(|p| {
            if let Some(call) = p.function_call {
                Some(Part::FunctionCall(FunctionCall {
                    name: call.name,
                    args: call.args.unwrap_or_default(),
                    signature: p.thought_signature,
                }))
            } else if let Some(resp) = p.function_response {
                Some(Part::FunctionResponse(FunctionResponse {
                    name: resp.name,
                    response: resp.response,
                }))
            } else {
                p.text.map(Part::Text)
            }
        })
        .collect();

    Reply { parts }
}

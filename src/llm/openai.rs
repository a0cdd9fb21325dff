use std::time::Duration;

use agent_core::errors::AgentError;
use agent_core::llm_provider::LlmProvider;
use agent_core::model::{
    ContentPart, ConversationRole, ConversationTurn, ModelResponse, Observation, ToolCall,
    ToolSchema,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as Base64, Engine as _};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_keys: Vec<String>,
    pub model: String,
    pub api_base: String,
    pub temperature: f32,
    pub timeout: Duration,
}

/// Tool-calling provider for OpenAI-compatible chat completion endpoints.
pub struct OpenAiLlmProvider {
    client: Client,
    endpoint: Url,
    config: OpenAiConfig,
}

impl OpenAiLlmProvider {
    pub fn new(config: OpenAiConfig) -> Result<Self, AgentError> {
        if config.api_keys.is_empty() {
            return Err(AgentError::invalid_request("missing API key for model service"));
        }
        let endpoint = Url::parse(&format!(
            "{}/chat/completions",
            config.api_base.trim_end_matches('/')
        ))
        .map_err(|err| {
            AgentError::invalid_request(format!("invalid api base {:?}: {err}", config.api_base))
        })?;
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| {
                AgentError::invalid_request(format!("failed to build HTTP client: {err}"))
            })?;
        Ok(Self {
            client,
            endpoint,
            config,
        })
    }

    fn request_body(&self, history: &[ConversationTurn], tools: &[ToolSchema]) -> ChatRequest {
        ChatRequest {
            model: self.config.model.clone(),
            temperature: self.config.temperature,
            messages: to_messages(history),
            tools: tools
                .iter()
                .map(|tool| ChatTool {
                    r#type: "function",
                    function: json!({
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    }),
                })
                .collect(),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiLlmProvider {
    async fn generate(
        &self,
        history: &[ConversationTurn],
        tools: &[ToolSchema],
    ) -> Result<ModelResponse, AgentError> {
        if history.is_empty() {
            return Err(AgentError::invalid_request(
                "conversation history must not be empty",
            ));
        }
        let body = self.request_body(history, tools);

        let mut last_error: Option<AgentError> = None;
        for (index, key) in self.config.api_keys.iter().enumerate() {
            let request = self
                .client
                .post(self.endpoint.clone())
                .bearer_auth(key)
                .json(&body);
            let response = match request.send().await {
                Ok(resp) => resp,
                Err(err) => {
                    last_error = Some(AgentError::transient(format!("request failed: {err}")));
                    continue;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "<response unavailable>".to_string());
                if status == StatusCode::TOO_MANY_REQUESTS {
                    warn!(
                        target: "openai",
                        attempt = index + 1,
                        remaining = self.config.api_keys.len() - index - 1,
                        "model service rate limited; switching API key"
                    );
                    last_error = Some(AgentError::transient(rate_limit_message(&text)));
                    continue;
                }
                let message = format!("model service returned {status}: {text}");
                return Err(if status.is_server_error() {
                    AgentError::transient(message)
                } else {
                    AgentError::invalid_request(message)
                });
            }

            let raw: Value = response
                .json()
                .await
                .map_err(|err| AgentError::transient(format!("response invalid: {err}")))?;
            let parsed = parse_response(raw)?;
            debug!(
                calls = parsed.tool_calls.len(),
                has_text = parsed.text.is_some(),
                "model response parsed"
            );
            return Ok(parsed);
        }

        Err(last_error.unwrap_or_else(|| AgentError::transient("all API keys exhausted")))
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    temperature: f32,
    messages: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ChatTool>,
}

#[derive(Debug, Serialize)]
struct ChatTool {
    r#type: &'static str,
    function: Value,
}

fn image_part(observation: &Observation) -> Option<Value> {
    if observation.data.is_empty() {
        return None;
    }
    Some(json!({
        "type": "image_url",
        "image_url": {
            "url": format!(
                "data:{};base64,{}",
                observation.mime_type,
                Base64.encode(&observation.data)
            ),
        },
    }))
}

/// Map the conversation onto chat messages.
///
/// Tool responses become `tool` messages; their observations follow in one
/// user message since tool messages carry text only.
fn to_messages(history: &[ConversationTurn]) -> Vec<Value> {
    let mut messages = Vec::new();
    let mut call_index = 0usize;
    let mut pending_ids: Vec<String> = Vec::new();

    for turn in history {
        match turn.role {
            ConversationRole::Assistant => {
                let calls: Vec<Value> = turn
                    .tool_calls()
                    .map(|call| {
                        call_index += 1;
                        let id = call
                            .id
                            .clone()
                            .unwrap_or_else(|| format!("call_{call_index}"));
                        pending_ids.push(id.clone());
                        json!({
                            "id": id,
                            "type": "function",
                            "function": {
                                "name": call.name,
                                "arguments": Value::Object(call.args.clone()).to_string(),
                            },
                        })
                    })
                    .collect();
                let text = turn.text();
                let content = if text.is_empty() {
                    Value::Null
                } else {
                    Value::String(text)
                };
                let mut message = json!({"role": "assistant", "content": content});
                if !calls.is_empty() {
                    message["tool_calls"] = Value::Array(calls);
                }
                messages.push(message);
            }
            ConversationRole::User | ConversationRole::System => {
                let mut content = Vec::new();
                let mut pending = std::mem::take(&mut pending_ids).into_iter();
                for part in &turn.parts {
                    match part {
                        ContentPart::Text { text } => {
                            content.push(json!({"type": "text", "text": text}))
                        }
                        ContentPart::Observation { observation } => {
                            content.extend(image_part(observation));
                        }
                        ContentPart::ToolResponse { response } => {
                            let id = response
                                .call_id
                                .clone()
                                .or_else(|| pending.next())
                                .unwrap_or_else(|| response.name.clone());
                            messages.push(json!({
                                "role": "tool",
                                "tool_call_id": id,
                                "content": Value::Object(response.response.clone()).to_string(),
                            }));
                            if let Some(observation) = &response.observation {
                                content.extend(image_part(observation));
                            }
                        }
                        ContentPart::ToolCall { .. } => {}
                    }
                }
                if !content.is_empty() {
                    let role = match turn.role {
                        ConversationRole::System => "system",
                        _ => "user",
                    };
                    messages.push(json!({"role": role, "content": content}));
                }
            }
        }
    }
    messages
}

fn parse_response(raw: Value) -> Result<ModelResponse, AgentError> {
    let message = raw
        .pointer("/choices/0/message")
        .cloned()
        .ok_or_else(|| AgentError::transient("response has no choices"))?;

    let text = match message.get("content") {
        Some(Value::String(text)) => Some(text.clone()),
        Some(Value::Array(parts)) => Some(
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        _ => None,
    }
    .filter(|text| !text.trim().is_empty());

    let mut tool_calls = Vec::new();
    for call in message
        .get("tool_calls")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let Some(name) = call.pointer("/function/name").and_then(Value::as_str) else {
            warn!("skipping tool call without a function name");
            continue;
        };
        let args = match call.pointer("/function/arguments") {
            Some(Value::String(raw)) if !raw.trim().is_empty() => serde_json::from_str(raw)
                .unwrap_or_else(|err| {
                    warn!(tool = name, error = %err, "tool arguments are not valid JSON");
                    Value::Object(Map::new())
                }),
            Some(Value::Object(map)) => Value::Object(map.clone()),
            _ => Value::Object(Map::new()),
        };
        let mut parsed = ToolCall::new(name, args);
        if let Some(id) = call.get("id").and_then(Value::as_str) {
            parsed = parsed.with_id(id);
        }
        tool_calls.push(parsed);
    }

    Ok(ModelResponse {
        tool_calls,
        text,
        raw,
    })
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorMessage,
}

#[derive(Debug, Deserialize)]
struct ErrorMessage {
    message: Option<String>,
}

fn rate_limit_message(raw: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(raw)
        .ok()
        .and_then(|envelope| envelope.error.message)
        .map(|message| format!("rate limit exceeded: {}", message.trim()))
        .unwrap_or_else(|| "rate limit exceeded".to_string())
}

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use muster_core::errors::ModelError;
use muster_core::ids::ToolCallId;
use muster_core::messages::{Message, ToolCallBlock};
use muster_core::provider::{Completion, CompletionMeta, ModelClient};
use muster_core::tokens::TokenUsage;
use muster_core::tools::ToolDefinition;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Model client speaking the OpenAI-compatible chat-completions protocol.
/// Works against any gateway exposing `POST {base_url}/chat/completions`.
pub struct ChatClient {
    http: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    model: String,
}

impl ChatClient {
    pub fn new(base_url: &str, api_key: SecretString, model: &str) -> Result<Self, ModelError> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| ModelError::Network(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
        })
    }

    fn request_body(
        &self,
        system_prompt: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Value {
        let mut wire_messages = vec![json!({"role": "system", "content": system_prompt})];
        for message in messages {
            wire_messages.push(to_wire(message));
        }

        let mut body = json!({
            "model": self.model,
            "messages": wire_messages,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(
                tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters_schema,
                            }
                        })
                    })
                    .collect(),
            );
        }
        body
    }
}

fn to_wire(message: &Message) -> Value {
    match message {
        Message::User(m) => json!({"role": "user", "content": m.content}),
        Message::Assistant(m) => {
            let mut wire = json!({"role": "assistant", "content": m.content});
            if m.has_tool_calls() {
                wire["tool_calls"] = Value::Array(
                    m.tool_calls
                        .iter()
                        .map(|tc| {
                            json!({
                                "id": tc.id.as_str(),
                                "type": "function",
                                "function": {
                                    "name": tc.name,
                                    "arguments": tc.arguments.to_string(),
                                }
                            })
                        })
                        .collect(),
                );
            }
            wire
        }
        Message::ToolResult(m) => json!({
            "role": "tool",
            "tool_call_id": m.tool_call_id.as_str(),
            "content": m.content,
        }),
    }
}

/// Normalize one wire tool call into the canonical block. Gateways disagree
/// on the argument encoding (JSON string vs. inline object) and some omit
/// ids; everything downstream sees a single shape.
fn normalize_tool_call(raw: &Value) -> ToolCallBlock {
    let function = raw.get("function").unwrap_or(raw);
    let name = function
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let arguments = match function.get("arguments") {
        Some(Value::String(s)) => serde_json::from_str(s).unwrap_or_else(|_| json!({})),
        Some(Value::Object(map)) => Value::Object(map.clone()),
        _ => json!({}),
    };

    let id = raw
        .get("id")
        .and_then(Value::as_str)
        .map(ToolCallId::from_raw)
        .unwrap_or_default();

    ToolCallBlock { id, name, arguments }
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
    #[serde(default)]
    metadata: Option<CompletionMeta>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<Value>,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

#[async_trait]
impl ModelClient for ChatClient {
    fn name(&self) -> &str {
        "chat-completions"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        system_prompt: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<Completion, ModelError> {
        let body = self.request_body(system_prompt, messages, tools);
        debug!(model = %self.model, messages = messages.len(), "chat completion request");

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ModelError::Timeout(DEFAULT_TIMEOUT)
                } else {
                    ModelError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if status >= 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::from_status(status, body));
        }

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Network(format!("invalid response body: {e}")))?;

        let choice = wire
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::InvalidRequest("response carried no choices".into()))?;

        Ok(Completion {
            content: choice.message.content,
            tool_calls: choice
                .message
                .tool_calls
                .iter()
                .map(normalize_tool_call)
                .collect(),
            usage: wire.usage.map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
            metadata: wire.metadata.unwrap_or_default(),
        })
    }
}

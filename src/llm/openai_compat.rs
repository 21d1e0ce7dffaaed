//! `OpenAI`-compatible chat completions backends (Cerebras, Groq)

use super::error::parse_retry_after_header;
use super::recovery::{extract_failed_generation, recover_from_failed_generation, recover_tool_calls};
use super::types::{
    CanonicalMessage, CanonicalResponse, CompletionRequest, Role, ToolArguments, ToolCall,
    ToolChoice, Usage,
};
use super::{Backend, BackendError, BackendErrorKind};
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Where a backend expects tool results inside a `tool` message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolResultLayout {
    /// `{"role": "tool", "tool_call_id": .., "content": ..}`
    Flat,
    /// `{"role": "tool", "tool": {"tool_call_id": .., "content": ..}}`
    Nested,
}

/// Connection and dialect settings for one `OpenAI`-compatible backend
#[derive(Debug, Clone)]
pub struct OpenAiCompatConfig {
    pub id: String,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub layout: ToolResultLayout,
    /// Groq rejects some requests that spell out `"tool_choice": "auto"`
    pub send_auto_tool_choice: bool,
    pub timeout: Duration,
}

impl OpenAiCompatConfig {
    pub const CEREBRAS_BASE_URL: &'static str = "https://api.cerebras.ai/v1";
    pub const GROQ_BASE_URL: &'static str = "https://api.groq.com/openai/v1";
    pub const CEREBRAS_DEFAULT_MODEL: &'static str = "llama-3.3-70b";
    pub const GROQ_DEFAULT_MODEL: &'static str = "llama-3.3-70b-versatile";

    pub fn cerebras(api_key: impl Into<String>) -> Self {
        Self {
            id: "cerebras".to_string(),
            base_url: Self::CEREBRAS_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: Self::CEREBRAS_DEFAULT_MODEL.to_string(),
            layout: ToolResultLayout::Flat,
            send_auto_tool_choice: true,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn groq(api_key: impl Into<String>) -> Self {
        Self {
            id: "groq".to_string(),
            base_url: Self::GROQ_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: Self::GROQ_DEFAULT_MODEL.to_string(),
            layout: ToolResultLayout::Flat,
            send_auto_tool_choice: false,
            timeout: Duration::from_secs(60),
        }
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[must_use]
    pub fn with_layout(mut self, layout: ToolResultLayout) -> Self {
        self.layout = layout;
        self
    }
}

/// Chat completions backend speaking the `OpenAI` wire format
pub struct OpenAiCompatBackend {
    client: Client,
    config: OpenAiCompatConfig,
    endpoint: String,
}

impl OpenAiCompatBackend {
    pub fn new(config: OpenAiCompatConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| BackendError::client_error(format!("Failed to create HTTP client: {e}")))?;
        let endpoint = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            config,
            endpoint,
        })
    }

    fn translate_request(&self, request: &CompletionRequest) -> ChatRequest {
        let messages = request
            .messages
            .iter()
            .filter_map(|m| encode_message(m, self.config.layout))
            .collect();

        let (tools, tool_choice) = if request.tools.is_empty() {
            (None, None)
        } else {
            let tools = request
                .tools
                .iter()
                .map(|t| WireTool {
                    r#type: "function".to_string(),
                    function: WireFunction {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.parameters.clone(),
                    },
                })
                .collect();
            let choice = match &request.tool_choice {
                ToolChoice::Auto if self.config.send_auto_tool_choice => Some(WireToolChoice::Mode("auto")),
                ToolChoice::Auto => None,
                ToolChoice::None => Some(WireToolChoice::Mode("none")),
                ToolChoice::Function(name) => Some(WireToolChoice::Function {
                    r#type: "function",
                    function: WireFunctionName { name: name.clone() },
                }),
            };
            (Some(tools), choice)
        };

        ChatRequest {
            model: self.config.model.clone(),
            messages,
            tools,
            tool_choice,
            temperature: request.temperature,
        }
    }

    fn normalize_response(
        &self,
        resp: ChatResponse,
        request: &CompletionRequest,
    ) -> Result<CanonicalResponse, BackendError> {
        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::server_error("No choices in response"))?;
        let message = decode_message(choice.message)
            .ok_or_else(|| BackendError::server_error("Unrecognized message role in response"))?;

        let names = request.tool_names();
        let mut tool_calls: Vec<ToolCall> = message
            .tool_calls
            .into_iter()
            .filter(|call| {
                let known = names.contains(&call.name.as_str());
                if !known {
                    tracing::warn!(backend = %self.config.id, tool = %call.name, "Dropping call to unadvertised tool");
                }
                known
            })
            .collect();
        let mut content = message.content.filter(|c| !c.trim().is_empty());

        if tool_calls.is_empty() && request.tools_enabled() {
            if let Some(text) = &content {
                let recovered = recover_tool_calls(text, &names);
                if !recovered.is_empty() {
                    tracing::warn!(
                        backend = %self.config.id,
                        count = recovered.len(),
                        "Backend wrote tool calls as text"
                    );
                    tool_calls = recovered;
                }
            }
        }
        if !tool_calls.is_empty() {
            content = None;
        }

        Ok(CanonicalResponse {
            content,
            tool_calls,
            usage: resp.usage.map(Usage::from).unwrap_or_default(),
        })
    }

    /// Turn a non-2xx reply into an error, unless the body carries a
    /// rejected generation that still yields usable tool calls
    fn handle_failure(
        &self,
        status: u16,
        retry_after: Option<Duration>,
        body: &str,
        request: &CompletionRequest,
    ) -> Result<CanonicalResponse, BackendError> {
        let err = BackendError::from_status(status, &describe_error(body), retry_after);

        if err.kind == BackendErrorKind::ToolCallMalformed || body.contains("failed_generation") {
            if let Some(generation) = extract_failed_generation(body) {
                let calls = recover_from_failed_generation(&generation, &request.tool_names());
                if !calls.is_empty() {
                    tracing::warn!(
                        backend = %self.config.id,
                        count = calls.len(),
                        "Recovered tool calls from rejected generation"
                    );
                    return Ok(CanonicalResponse::tool_calls(calls));
                }
                tracing::warn!(backend = %self.config.id, generation = %generation, "Rejected generation held no usable call");
            }
            return Err(BackendError {
                kind: BackendErrorKind::ToolCallMalformed,
                ..err
            });
        }

        Err(err)
    }
}

#[async_trait]
impl Backend for OpenAiCompatBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<CanonicalResponse, BackendError> {
        let wire = self.translate_request(request);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&wire)
            .send()
            .await
            .map_err(|e| BackendError::from_transport(&e))?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after_header);
        let body = response
            .text()
            .await
            .map_err(|e| BackendError::network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return self.handle_failure(status.as_u16(), retry_after, &body, request);
        }

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| BackendError::server_error(format!("Failed to parse response: {e}")))?;
        self.normalize_response(parsed, request)
    }

    fn id(&self) -> &str {
        &self.config.id
    }
}

/// `"code: message"` from an `OpenAI`-style error body, or the raw body
fn describe_error(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return body.to_string();
    };
    let error = value.get("error").unwrap_or(&value);
    let message = error.get("message").and_then(Value::as_str).unwrap_or(body);
    match error.get("code").and_then(Value::as_str) {
        Some(code) => format!("{code}: {message}"),
        None => message.to_string(),
    }
}

pub(super) fn encode_message(msg: &CanonicalMessage, layout: ToolResultLayout) -> Option<WireMessage> {
    let mut wire = WireMessage {
        role: msg.role.as_str().to_string(),
        ..WireMessage::default()
    };

    match msg.role {
        Role::System | Role::User => wire.content = Some(msg.text().to_string()),
        Role::Assistant => {
            if msg.tool_calls.is_empty() {
                wire.content = Some(msg.text().to_string());
            } else {
                wire.content = msg.content.clone().filter(|c| !c.is_empty());
                wire.tool_calls = Some(
                    msg.tool_calls
                        .iter()
                        .map(|call| WireToolCall {
                            id: call.id.clone(),
                            r#type: function_type(),
                            function: WireFunctionCall {
                                name: call.name.clone(),
                                arguments: call.arguments.to_json_text(),
                            },
                        })
                        .collect(),
                );
            }
        }
        Role::Tool => {
            let Some(tool_call_id) = msg.tool_call_id.clone() else {
                tracing::warn!("Dropping tool message without tool_call_id");
                return None;
            };
            let content = match msg.text() {
                "" => "{}".to_string(),
                text => text.to_string(),
            };
            match layout {
                ToolResultLayout::Flat => {
                    wire.tool_call_id = Some(tool_call_id);
                    wire.name.clone_from(&msg.name);
                    wire.content = Some(content);
                }
                ToolResultLayout::Nested => {
                    wire.tool = Some(WireToolResult {
                        tool_call_id: Some(tool_call_id),
                        name: msg.name.clone(),
                        content: Some(content),
                    });
                }
            }
        }
    }

    Some(wire)
}

/// Read a wire message back into canonical form. Accepts both tool layouts.
pub(super) fn decode_message(wire: WireMessage) -> Option<CanonicalMessage> {
    let role = match wire.role.as_str() {
        "system" => Role::System,
        "user" => Role::User,
        "assistant" => Role::Assistant,
        "tool" => Role::Tool,
        _ => return None,
    };

    let mut msg = CanonicalMessage {
        role,
        content: wire.content,
        tool_calls: Vec::new(),
        tool_call_id: wire.tool_call_id,
        name: wire.name,
    };

    if let Some(nested) = wire.tool {
        msg.tool_call_id = msg.tool_call_id.or(nested.tool_call_id);
        msg.name = msg.name.or(nested.name);
        msg.content = msg.content.or(nested.content);
    }

    msg.tool_calls = wire
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .filter(|tc| !tc.function.name.is_empty())
        .map(|tc| ToolCall {
            id: tc.id,
            name: tc.function.name,
            arguments: ToolArguments::from_json_text(&tc.function.arguments),
        })
        .collect();

    Some(msg)
}

fn function_type() -> String {
    "function".to_string()
}

// Wire types

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<WireToolChoice>,
    temperature: f32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(super) struct WireMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool: Option<WireToolResult>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireTool {
    r#type: String,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum WireToolChoice {
    Mode(&'static str),
    Function {
        r#type: &'static str,
        function: WireFunctionName,
    },
}

#[derive(Debug, Serialize)]
struct WireFunctionName {
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(default = "function_type")]
    r#type: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
#[allow(clippy::struct_field_names)]
struct WireUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
}

impl From<WireUsage> for Usage {
    fn from(u: WireUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

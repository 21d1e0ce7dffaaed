//! Google Gemini provider implementation
//!
//! Gemini has no `tool` role. Tool results are folded into user turns and
//! assistant tool calls are replayed as their text only.

use super::error::parse_retry_after_header;
use super::recovery::recover_tool_calls;
use super::schema::to_gemini_schema;
use super::transcript::{fold_tool_turns, unfold_tool_turns};
use super::types::{
    CanonicalMessage, CanonicalResponse, CompletionRequest, Role, ToolCall, ToolChoice, Usage,
};
use super::{Backend, BackendError};
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const GEMINI_DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Gemini service implementation
pub struct GeminiBackend {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl GeminiBackend {
    pub fn new(api_key: impl Into<String>, model: Option<&str>) -> Result<Self, BackendError> {
        Self::with_base_url(api_key, model, GEMINI_BASE_URL)
    }

    pub fn with_base_url(
        api_key: impl Into<String>,
        model: Option<&str>,
        base_url: &str,
    ) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| BackendError::client_error(format!("Failed to create HTTP client: {e}")))?;
        let endpoint = format!(
            "{}/models/{}:generateContent",
            base_url.trim_end_matches('/'),
            model.unwrap_or(GEMINI_DEFAULT_MODEL)
        );
        Ok(Self {
            client,
            api_key: api_key.into(),
            endpoint,
        })
    }

    fn translate_request(request: &CompletionRequest) -> GeminiRequest {
        let messages = fold_tool_turns(&request.messages);

        let system_text: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(CanonicalMessage::text)
            .filter(|t| !t.is_empty())
            .collect();
        let system_instruction = (!system_text.is_empty()).then(|| GeminiContent {
            role: None,
            parts: vec![GeminiPart::Text {
                text: system_text.join("\n\n"),
            }],
        });

        let contents = messages
            .iter()
            .filter_map(|msg| {
                let role = match msg.role {
                    Role::User | Role::Tool => "user",
                    Role::Assistant => "model",
                    Role::System => return None,
                };
                // Tool calls are not replayed; an assistant turn with no text is skipped
                let text = msg.text();
                if text.is_empty() {
                    return None;
                }
                Some(GeminiContent {
                    role: Some(role.to_string()),
                    parts: vec![GeminiPart::Text {
                        text: text.to_string(),
                    }],
                })
            })
            .collect();

        let (tools, tool_config) = if request.tools_enabled() {
            let declarations = request
                .tools
                .iter()
                .map(|t| GeminiFunctionDeclaration {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: to_gemini_schema(&t.parameters),
                })
                .collect();
            let tool_config = match &request.tool_choice {
                ToolChoice::Function(name) => Some(GeminiToolConfig {
                    function_calling_config: GeminiFunctionCallingConfig {
                        mode: "ANY".to_string(),
                        allowed_function_names: Some(vec![name.clone()]),
                    },
                }),
                ToolChoice::Auto | ToolChoice::None => None,
            };
            (
                Some(vec![GeminiTool {
                    function_declarations: declarations,
                }]),
                tool_config,
            )
        } else {
            (None, None)
        };

        GeminiRequest {
            contents,
            system_instruction,
            tools,
            tool_config,
            generation_config: GeminiGenerationConfig {
                temperature: request.temperature,
            },
        }
    }

    fn normalize_response(
        resp: GeminiResponse,
        request: &CompletionRequest,
    ) -> Result<CanonicalResponse, BackendError> {
        let candidate = resp
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::server_error("No candidates in response"))?;

        let names = request.tool_names();
        let mut text_parts = Vec::new();
        let mut tool_calls = Vec::new();

        for (idx, part) in candidate
            .content
            .map(|c| c.parts)
            .unwrap_or_default()
            .into_iter()
            .enumerate()
        {
            match part {
                GeminiPart::Text { text } => text_parts.push(text),
                GeminiPart::FunctionCall { function_call } => {
                    if !names.contains(&function_call.name.as_str()) {
                        tracing::warn!(tool = %function_call.name, "Dropping call to unadvertised tool");
                        continue;
                    }
                    let args = match function_call.args {
                        Some(Value::Object(map)) => map,
                        _ => Map::new(),
                    };
                    tool_calls.push(ToolCall::new(format!("call_{idx}"), function_call.name, args));
                }
            }
        }

        let text = text_parts.join("");
        let mut content = (!text.trim().is_empty()).then_some(text);

        if tool_calls.is_empty() && request.tools_enabled() {
            if let Some(text) = &content {
                tool_calls = recover_tool_calls(text, &names);
            }
        }
        if !tool_calls.is_empty() {
            content = None;
        }

        Ok(CanonicalResponse {
            content,
            tool_calls,
            usage: resp.usage_metadata.map(Usage::from).unwrap_or_default(),
        })
    }
}

/// Read native contents back into canonical messages.
///
/// Folded tool results become `tool` messages again when `prior` still holds
/// the assistant calls they answer; ids cannot be recovered otherwise.
pub fn decode_contents(prior: &[CanonicalMessage], contents: &[Value]) -> Vec<CanonicalMessage> {
    let mut messages = prior.to_vec();
    for content in contents {
        let Ok(content) = serde_json::from_value::<GeminiContent>(content.clone()) else {
            continue;
        };
        let text: String = content
            .parts
            .iter()
            .filter_map(|p| match p {
                GeminiPart::Text { text } => Some(text.as_str()),
                GeminiPart::FunctionCall { .. } => None,
            })
            .collect();
        match content.role.as_deref() {
            Some("model") => messages.push(CanonicalMessage::assistant(text)),
            _ => messages.push(CanonicalMessage::user(text)),
        }
    }
    unfold_tool_turns(&messages)
}

/// `"STATUS: message"` from a Gemini error body, or the raw body
fn describe_error(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return body.to_string();
    };
    let error = value.get("error").unwrap_or(&value);
    let message = error.get("message").and_then(Value::as_str).unwrap_or(body);
    match error.get("status").and_then(Value::as_str) {
        Some(status) => format!("{status}: {message}"),
        None => message.to_string(),
    }
}

#[async_trait]
impl Backend for GeminiBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<CanonicalResponse, BackendError> {
        let gemini_request = Self::translate_request(request);

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&gemini_request)
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
            return Err(BackendError::from_status(
                status.as_u16(),
                &describe_error(&body),
                retry_after,
            ));
        }

        let parsed: GeminiResponse = serde_json::from_str(&body)
            .map_err(|e| BackendError::server_error(format!("Failed to parse response: {e}")))?;
        Self::normalize_response(parsed, request)
    }

    fn id(&self) -> &str {
        "gemini"
    }

    fn supports_tool_role(&self) -> bool {
        false
    }
}

// Gemini API types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<GeminiTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_config: Option<GeminiToolConfig>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: GeminiFunctionCall,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiFunctionCall {
    name: String,
    #[serde(default)]
    args: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiTool {
    function_declarations: Vec<GeminiFunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct GeminiFunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiToolConfig {
    function_calling_config: GeminiFunctionCallingConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiFunctionCallingConfig {
    mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    allowed_function_names: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct GeminiGenerationConfig {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(clippy::struct_field_names)]
struct GeminiUsage {
    prompt_token_count: Option<u64>,
    candidates_token_count: Option<u64>,
    total_token_count: Option<u64>,
}

impl From<GeminiUsage> for Usage {
    fn from(u: GeminiUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        }
    }
}

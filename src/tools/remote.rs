//! Tools backed by an external HTTP service

use super::{Tool, ToolError};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Value};
use std::time::Duration;

const REMOTE_TIMEOUT: Duration = Duration::from_secs(30);
const ERROR_BODY_PREVIEW: usize = 200;

/// Forwards the call arguments as a JSON body to `POST <endpoint>`
pub struct RemoteTool {
    name: String,
    endpoint: String,
    cacheable: bool,
    client: Client,
}

impl RemoteTool {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>, cacheable: bool) -> Result<Self, ToolError> {
        let endpoint = endpoint.into();
        let client = Client::builder()
            .timeout(REMOTE_TIMEOUT)
            .build()
            .map_err(|e| ToolError::Http {
                endpoint: endpoint.clone(),
                message: format!("failed to create HTTP client: {e}"),
            })?;
        Ok(Self {
            name: name.into(),
            endpoint,
            cacheable,
            client,
        })
    }

    fn http_error(&self, message: impl Into<String>) -> ToolError {
        ToolError::Http {
            endpoint: self.endpoint.clone(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl Tool for RemoteTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn cacheable(&self) -> bool {
        self.cacheable
    }

    async fn run(&self, args: Map<String, Value>) -> Result<Map<String, Value>, ToolError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&Value::Object(args))
            .send()
            .await
            .map_err(|e| self.http_error(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.http_error(e.to_string()))?;

        if !status.is_success() {
            let preview: String = body.chars().take(ERROR_BODY_PREVIEW).collect();
            return Err(self.http_error(format!("HTTP {}: {preview}", status.as_u16())));
        }

        match serde_json::from_str::<Value>(&body) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(ToolError::InvalidResponse(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
            Err(e) => Err(ToolError::InvalidResponse(e.to_string())),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

//! API request and response types

use crate::llm::Usage;
use crate::orchestrator::ToolInvocation;
use crate::session::{Citation, HistoryEntry};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Request to run one chat turn
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    /// Absent or unknown ids start a new session
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Result of a chat turn
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub status: &'static str,
    pub response: String,
    pub session_id: String,
    pub tool_calls: Vec<ToolInvocation>,
    pub usage: Usage,
    pub cached: bool,
    pub itinerary: Option<Value>,
    pub sources: Vec<Citation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub conversation_history: Vec<HistoryEntry>,
    pub user_preferences: Map<String, Value>,
    pub itinerary: Option<Value>,
    pub sources: Vec<Citation>,
    pub questions_asked: u32,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub backends: Vec<String>,
    pub active_backend: Option<String>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>, code: &'static str) -> Self {
        Self {
            error: message.into(),
            code,
        }
    }
}

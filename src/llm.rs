//! LLM backend abstraction
//!
//! Every provider speaks the canonical message format at this boundary.
//! Wire dialects stay inside the adapter modules.

mod error;
mod fallback;
mod gemini;
mod models;
mod openai_compat;
#[cfg(test)]
mod proptests;
pub mod recovery;
mod registry;
mod schema;
pub mod transcript;
mod types;

pub use error::{classify_message, BackendError, BackendErrorKind};
pub use fallback::{FallbackController, FallbackError};
pub use gemini::{GeminiBackend, GEMINI_BASE_URL, GEMINI_DEFAULT_MODEL};
pub use models::{all_backends, BackendDef, Provider};
pub use openai_compat::{OpenAiCompatBackend, OpenAiCompatConfig, ToolResultLayout};
pub use registry::LlmConfig;
pub use schema::to_gemini_schema;
pub use types::*;

use async_trait::async_trait;
use std::sync::Arc;

/// Common interface for LLM backends
#[async_trait]
pub trait Backend: Send + Sync {
    /// Make a completion request
    async fn complete(&self, request: &CompletionRequest) -> Result<CanonicalResponse, BackendError>;

    /// Stable backend identifier (`cerebras`, `groq`, `gemini`)
    fn id(&self) -> &str;

    /// Whether the backend accepts `tool` role messages natively
    fn supports_tool_role(&self) -> bool {
        true
    }
}

/// Logging wrapper for backends
pub struct LoggingBackend {
    inner: Arc<dyn Backend>,
    id: String,
}

impl LoggingBackend {
    pub fn new(inner: Arc<dyn Backend>) -> Self {
        let id = inner.id().to_string();
        Self { inner, id }
    }
}

#[async_trait]
impl Backend for LoggingBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<CanonicalResponse, BackendError> {
        let start = std::time::Instant::now();
        let result = self.inner.complete(request).await;
        let duration = start.elapsed();

        match &result {
            Ok(response) => {
                tracing::info!(
                    backend = %self.id,
                    duration_ms = %duration.as_millis(),
                    prompt_tokens = response.usage.prompt_tokens,
                    completion_tokens = response.usage.completion_tokens,
                    tool_calls = response.tool_calls.len(),
                    "LLM request completed"
                );
            }
            Err(e) => {
                tracing::error!(
                    backend = %self.id,
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    kind = e.kind.as_str(),
                    retryable = e.kind.is_retryable(),
                    "LLM request failed"
                );
            }
        }

        result
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn supports_tool_role(&self) -> bool {
        self.inner.supports_tool_role()
    }
}

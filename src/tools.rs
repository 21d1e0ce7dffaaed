//! Tools the model can call during a turn
//!
//! Specs and handlers are kept apart: every catalog tool is advertised, but
//! only tools with a configured handler can run. Calling an advertised tool
//! without a handler produces an error result for the model, not a failure.

mod catalog;
mod clarify;
mod effects;
mod remote;

pub use catalog::{
    tool_specs, ASK_CLARIFYING_QUESTION, BUILD_ITINERARY, RETRIEVE_CITY_GUIDANCE, SEARCH_POIS,
};
pub use clarify::ClarifyingQuestionTool;
pub use effects::session_effects;
pub use remote::RemoteTool;

use crate::llm::ToolSpec;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{0}")]
    Execution(String),
    #[error("request to {endpoint} failed: {message}")]
    Http { endpoint: String, message: String },
    #[error("invalid tool response: {0}")]
    InvalidResponse(String),
}

/// Trait for tools that can be executed by the orchestrator
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name, matching its advertised spec
    fn name(&self) -> &str;

    /// Whether results may be reused across sessions through the tool cache
    fn cacheable(&self) -> bool {
        true
    }

    /// Execute the tool
    async fn run(&self, args: Map<String, Value>) -> Result<Map<String, Value>, ToolError>;
}

/// External service endpoints for the remote tools
#[derive(Debug, Clone, Default)]
pub struct ToolEndpoints {
    pub search_pois: Option<String>,
    pub build_itinerary: Option<String>,
    pub city_guidance: Option<String>,
}

/// Advertised tool specs plus the handlers able to run them
pub struct ToolRegistry {
    specs: Vec<ToolSpec>,
    handlers: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new(specs: Vec<ToolSpec>) -> Self {
        Self {
            specs,
            handlers: HashMap::new(),
        }
    }

    /// Full catalog with the built-in clarifying-question handler and a
    /// remote handler for every configured endpoint
    pub fn standard(city: &str, endpoints: &ToolEndpoints) -> Result<Self, ToolError> {
        let mut registry = Self::new(tool_specs(city)).with_handler(Arc::new(ClarifyingQuestionTool::new(city)));

        let remotes = [
            (SEARCH_POIS, endpoints.search_pois.as_deref(), true),
            (BUILD_ITINERARY, endpoints.build_itinerary.as_deref(), false),
            (RETRIEVE_CITY_GUIDANCE, endpoints.city_guidance.as_deref(), true),
        ];
        for (name, endpoint, cacheable) in remotes {
            match endpoint {
                Some(url) => {
                    registry = registry.with_handler(Arc::new(RemoteTool::new(name, url, cacheable)?));
                }
                None => tracing::warn!(tool = name, "No endpoint configured, tool will report handler not found"),
            }
        }
        Ok(registry)
    }

    #[must_use]
    pub fn with_handler(mut self, tool: Arc<dyn Tool>) -> Self {
        self.handlers.insert(tool.name().to_string(), tool);
        self
    }

    pub fn specs(&self) -> &[ToolSpec] {
        &self.specs
    }

    pub fn handler(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.handlers.get(name).cloned()
    }

    pub fn handler_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

//! Test doubles shared by the unit tests
//!
//! Nothing here performs real network I/O except [`spawn_stub_server`],
//! which serves a local axum router on an ephemeral port.

use crate::clock::Clock;
use crate::llm::{Backend, BackendError, CanonicalResponse, CompletionRequest};
use crate::tools::{Tool, ToolError};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::Mutex;

// ============================================================================
// Mock Backend
// ============================================================================

/// Backend returning queued results and recording every request
pub struct MockBackend {
    id: String,
    tool_role: bool,
    responses: Mutex<VecDeque<Result<CanonicalResponse, BackendError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockBackend {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tool_role: true,
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Behave like a backend that needs tool turns folded into user text
    #[must_use]
    pub fn without_tool_role(mut self) -> Self {
        self.tool_role = false;
        self
    }

    pub fn queue_response(&self, response: CanonicalResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    pub fn queue_error(&self, error: BackendError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<CanonicalResponse, BackendError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(BackendError::server_error("no mock response queued")))
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn supports_tool_role(&self) -> bool {
        self.tool_role
    }
}

// ============================================================================
// Mock Tool
// ============================================================================

/// Tool with a fixed output or a fixed failure
pub struct MockTool {
    name: String,
    cacheable: bool,
    output: Result<Map<String, Value>, String>,
    invocations: Mutex<Vec<Map<String, Value>>>,
}

impl MockTool {
    /// `output` must be a JSON object
    pub fn new(name: impl Into<String>, output: Value) -> Self {
        let Value::Object(output) = output else {
            panic!("mock tool output must be an object");
        };
        Self::with_output(name, Ok(output))
    }

    pub fn failing(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_output(name, Err(message.into()))
    }

    fn with_output(name: impl Into<String>, output: Result<Map<String, Value>, String>) -> Self {
        Self {
            name: name.into(),
            cacheable: true,
            output,
            invocations: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn non_cacheable(mut self) -> Self {
        self.cacheable = false;
        self
    }

    pub fn invocations(&self) -> Vec<Map<String, Value>> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.invocations.lock().unwrap().len()
    }
}

#[async_trait]
impl Tool for MockTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn cacheable(&self) -> bool {
        self.cacheable
    }

    async fn run(&self, args: Map<String, Value>) -> Result<Map<String, Value>, ToolError> {
        self.invocations.lock().unwrap().push(args);
        self.output.clone().map_err(ToolError::Execution)
    }
}

// ============================================================================
// Manual Clock
// ============================================================================

/// Clock that only moves when told to
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Self {
        let start = Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0).unwrap();
        Self { now: Mutex::new(start) }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

// ============================================================================
// Stub HTTP server
// ============================================================================

/// Serve `app` on an ephemeral local port and return its base url
pub async fn spawn_stub_server(app: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

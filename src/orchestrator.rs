//! Tool-calling turn loop
//!
//! A turn moves through `CallModel -> DispatchTools -> CallModel ...` until
//! the model answers in text. Two bounds stop a runaway turn: the number of
//! model calls, and the number of consecutive failed tool dispatches. Either
//! bound leads to one closing call with tool calling disabled.

mod intent;
mod prompt;
mod truncate;

pub use intent::{IntentPolicy, KeywordIntentPolicy};
pub use prompt::{assemble_messages, edit_context, itinerary_summary};
pub use truncate::{fit_tool_result, RESULT_CHAR_LIMIT};

use crate::cache::{ResponseCache, ToolResultCache};
use crate::llm::{
    BackendErrorKind, CanonicalMessage, CanonicalResponse, CompletionRequest, FallbackController, FallbackError,
    Role, ToolArguments, ToolCall, ToolChoice, Usage,
};
use crate::session::{SessionError, SessionStore};
use crate::tools::{session_effects, ToolRegistry};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Returned when the closing call cannot produce an answer
pub const CLOSING_FALLBACK: &str =
    "I'm having trouble completing your request. Please try rephrasing or simplifying your request.";

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Model calls allowed before the closing call
    pub max_iterations: usize,
    /// Failed tool dispatches in a row that end the turn early
    pub max_consecutive_errors: usize,
    /// Prior history entries included in each request
    pub history_window: usize,
    pub temperature: f32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            max_consecutive_errors: 2,
            history_window: 10,
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnErrorCode {
    RateLimited,
    BackendUnavailable,
    InvalidRequest,
    ToolArgumentParse,
    SessionNotFound,
    /// The turn hit an iteration or error bound and was closed early
    IterationLimit,
}

impl TurnErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::BackendUnavailable => "backend_unavailable",
            Self::InvalidRequest => "invalid_request",
            Self::ToolArgumentParse => "tool_argument_parse",
            Self::SessionNotFound => "session_not_found",
            Self::IterationLimit => "iteration_limit",
        }
    }
}

/// A tool call the turn executed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInvocation {
    pub function: String,
    pub arguments: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub response: String,
    pub session_id: String,
    pub tool_calls_made: Vec<ToolInvocation>,
    /// Summed over every model call of the turn
    pub usage: Usage,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<TurnErrorCode>,
}

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("all backends are rate limited: {source}")]
    RateLimited {
        retry_after: Option<Duration>,
        #[source]
        source: FallbackError,
    },

    #[error("no backend could answer: {0}")]
    BackendUnavailable(#[source] FallbackError),

    #[error("request rejected by backend: {0}")]
    InvalidRequest(#[source] FallbackError),

    #[error("model produced malformed arguments for {tool}: {raw}")]
    ToolArgumentParse { tool: String, raw: String },

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl From<FallbackError> for TurnError {
    fn from(err: FallbackError) -> Self {
        let rate_limited = match &err {
            FallbackError::Exhausted { last, .. } if last.kind == BackendErrorKind::RateLimited => {
                Some(last.retry_after)
            }
            _ => None,
        };
        if let Some(retry_after) = rate_limited {
            TurnError::RateLimited {
                retry_after,
                source: err,
            }
        } else if matches!(err, FallbackError::Aborted { .. }) {
            TurnError::InvalidRequest(err)
        } else {
            TurnError::BackendUnavailable(err)
        }
    }
}

impl TurnError {
    pub fn code(&self) -> TurnErrorCode {
        match self {
            TurnError::RateLimited { .. } => TurnErrorCode::RateLimited,
            TurnError::BackendUnavailable(_) => TurnErrorCode::BackendUnavailable,
            TurnError::InvalidRequest(_) => TurnErrorCode::InvalidRequest,
            TurnError::ToolArgumentParse { .. } => TurnErrorCode::ToolArgumentParse,
            TurnError::Session(_) => TurnErrorCode::SessionNotFound,
        }
    }

    /// Natural-language explanation for the end user
    pub fn user_message(&self) -> String {
        match self {
            TurnError::RateLimited {
                retry_after: Some(wait),
                ..
            } => format!(
                "The AI service is busy right now. Please try again in {} seconds.",
                wait.as_secs().max(1)
            ),
            TurnError::RateLimited { retry_after: None, .. } => {
                "The AI service is busy right now. Please try again in a moment.".to_string()
            }
            TurnError::BackendUnavailable(_) => {
                "The AI service is temporarily unavailable. Please try again later.".to_string()
            }
            TurnError::InvalidRequest(_) => "I couldn't process that request. Please try rephrasing it.".to_string(),
            TurnError::ToolArgumentParse { .. } => {
                "I ran into a problem preparing that request. Please try rephrasing it.".to_string()
            }
            TurnError::Session(_) => "Your session has expired. Please start a new conversation.".to_string(),
        }
    }
}

/// Where the turn loop is
#[derive(Debug)]
enum TurnState {
    /// Next model call; `iteration` counts calls already made
    CallModel { iteration: usize },
    /// Execute the calls of the last response, in order
    DispatchTools { iteration: usize, calls: Vec<ToolCall> },
    /// Final call with tool calling disabled
    Closing,
    Done { response: String },
}

enum Dispatch {
    Success(Map<String, Value>),
    Failure(Map<String, Value>),
}

/// Per-turn bookkeeping
struct Turn {
    session_id: String,
    messages: Vec<CanonicalMessage>,
    tool_calls_made: Vec<ToolInvocation>,
    usage: Usage,
    consecutive_errors: usize,
    error_code: Option<TurnErrorCode>,
}

impl Turn {
    fn record_usage(&mut self, response: &CanonicalResponse) {
        self.usage.add(&response.usage);
    }
}

pub struct Orchestrator {
    controller: Arc<FallbackController>,
    tools: Arc<ToolRegistry>,
    sessions: Arc<SessionStore>,
    response_cache: Arc<ResponseCache>,
    tool_cache: Arc<ToolResultCache>,
    system_prompt: String,
    tools_hash: String,
    intent: Arc<dyn IntentPolicy>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        controller: Arc<FallbackController>,
        tools: Arc<ToolRegistry>,
        sessions: Arc<SessionStore>,
        response_cache: Arc<ResponseCache>,
        tool_cache: Arc<ToolResultCache>,
        system_prompt: impl Into<String>,
    ) -> Self {
        let tools_hash = ResponseCache::tools_hash(tools.specs());
        Self {
            controller,
            tools,
            sessions,
            response_cache,
            tool_cache,
            system_prompt: system_prompt.into(),
            tools_hash,
            intent: Arc::new(KeywordIntentPolicy),
            config: OrchestratorConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_intent_policy(mut self, intent: Arc<dyn IntentPolicy>) -> Self {
        self.intent = intent;
        self
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn controller(&self) -> &Arc<FallbackController> {
        &self.controller
    }

    /// Expiry sweep over the session store and both caches
    pub fn cleanup_expired(&self) -> usize {
        self.sessions.cleanup_expired() + self.response_cache.cleanup_expired() + self.tool_cache.cleanup_expired()
    }

    /// Run one user turn.
    ///
    /// A missing or unknown session id starts a new session.
    pub async fn process_turn(&self, session_id: Option<&str>, message: &str) -> Result<TurnOutcome, TurnError> {
        let session_id = match session_id {
            Some(id) if self.sessions.exists(id) => id.to_string(),
            Some(id) => {
                let fresh = self.sessions.create();
                tracing::warn!(requested = %id, session_id = %fresh, "Unknown session, starting a new one");
                fresh
            }
            None => self.sessions.create(),
        };
        let started = Instant::now();

        let result = self.run_turn(&session_id, message).await;
        match &result {
            Ok(outcome) => tracing::info!(
                session_id = %session_id,
                duration_ms = %started.elapsed().as_millis(),
                tool_calls = outcome.tool_calls_made.len(),
                cached = outcome.cached,
                error_code = outcome.error_code.map(TurnErrorCode::as_str),
                "Turn complete"
            ),
            Err(e) => tracing::error!(
                session_id = %session_id,
                code = e.code().as_str(),
                error = %e,
                "Turn failed"
            ),
        }
        result
    }

    #[allow(clippy::too_many_lines)]
    async fn run_turn(&self, session_id: &str, message: &str) -> Result<TurnOutcome, TurnError> {
        let session = self.sessions.get(session_id)?;
        let history = self.sessions.recent_history(session_id, self.config.history_window)?;

        let edit_itinerary = session
            .itinerary
            .as_ref()
            .filter(|it| !it.is_null() && self.intent.is_edit_request(message));
        if edit_itinerary.is_some() {
            tracing::debug!(session_id, "Edit request, injecting current itinerary");
        }
        let messages = prompt::assemble_messages(&self.system_prompt, &history, edit_itinerary, message);

        // Edit turns carry session state the cache key does not see
        let cache_eligible = edit_itinerary.is_none() && !self.intent.is_itinerary_request(message);
        let cache_key = ResponseCache::key_for(&messages, Some(&self.tools_hash));
        if cache_eligible {
            if let Some(hit) = self.response_cache.get(&cache_key) {
                let response = hit.content.unwrap_or_default();
                self.persist(session_id, message, &response)?;
                return Ok(TurnOutcome {
                    response,
                    session_id: session_id.to_string(),
                    tool_calls_made: Vec::new(),
                    usage: Usage::default(),
                    cached: true,
                    error_code: None,
                });
            }
        }

        let mut turn = Turn {
            session_id: session_id.to_string(),
            messages,
            tool_calls_made: Vec::new(),
            usage: Usage::default(),
            consecutive_errors: 0,
            error_code: None,
        };

        let mut state = TurnState::CallModel { iteration: 0 };
        let response = loop {
            state = match state {
                TurnState::CallModel { iteration } if iteration >= self.config.max_iterations => {
                    tracing::warn!(session_id, iteration, "Iteration limit reached");
                    TurnState::Closing
                }
                TurnState::CallModel { iteration } => {
                    tracing::debug!(session_id, iteration, "Calling model");
                    let request = self.request(&turn.messages, ToolChoice::Auto);
                    let response = self.controller.complete(&request).await?;
                    turn.record_usage(&response);
                    if response.has_tool_calls() {
                        let calls = response.tool_calls.clone();
                        turn.messages
                            .push(CanonicalMessage::assistant_tool_calls(response.content, response.tool_calls));
                        TurnState::DispatchTools { iteration, calls }
                    } else {
                        TurnState::Done {
                            response: response.content.unwrap_or_default(),
                        }
                    }
                }
                TurnState::DispatchTools { iteration, calls } => {
                    self.dispatch_batch(&mut turn, calls).await?;
                    if turn.consecutive_errors >= self.config.max_consecutive_errors {
                        tracing::warn!(
                            session_id,
                            consecutive_errors = turn.consecutive_errors,
                            "Too many tool failures, closing turn"
                        );
                        TurnState::Closing
                    } else {
                        TurnState::CallModel { iteration: iteration + 1 }
                    }
                }
                TurnState::Closing => {
                    turn.error_code = Some(TurnErrorCode::IterationLimit);
                    TurnState::Done {
                        response: self.closing_call(&mut turn).await,
                    }
                }
                TurnState::Done { response } => break response,
            };
        };

        self.persist(session_id, message, &response)?;
        if cache_eligible && turn.tool_calls_made.is_empty() && turn.error_code.is_none() {
            let cached = CanonicalResponse::text(response.clone()).with_usage(turn.usage);
            self.response_cache.store(cache_key, cached, false);
        }

        Ok(TurnOutcome {
            response,
            session_id: turn.session_id,
            tool_calls_made: turn.tool_calls_made,
            usage: turn.usage,
            cached: false,
            error_code: turn.error_code,
        })
    }

    fn request(&self, messages: &[CanonicalMessage], tool_choice: ToolChoice) -> CompletionRequest {
        CompletionRequest::new(messages.to_vec(), self.tools.specs().to_vec())
            .with_tool_choice(tool_choice)
            .with_temperature(self.config.temperature)
    }

    async fn closing_call(&self, turn: &mut Turn) -> String {
        let request = self.request(&turn.messages, ToolChoice::None);
        match self.controller.complete(&request).await {
            Ok(response) => {
                turn.record_usage(&response);
                response
                    .content
                    .filter(|text| !text.trim().is_empty())
                    .unwrap_or_else(|| CLOSING_FALLBACK.to_string())
            }
            Err(e) => {
                tracing::error!(session_id = %turn.session_id, error = %e, "Closing call failed");
                CLOSING_FALLBACK.to_string()
            }
        }
    }

    /// Run the calls of one model response and append their results
    async fn dispatch_batch(&self, turn: &mut Turn, calls: Vec<ToolCall>) -> Result<(), TurnError> {
        for call in calls {
            if turn.consecutive_errors >= self.config.max_consecutive_errors {
                let skipped = error_payload("Skipped after repeated tool failures", Some(&call.name));
                turn.messages
                    .push(CanonicalMessage::tool_result(call.id, call.name, fit_tool_result(&skipped)));
                continue;
            }

            let args = match call.arguments {
                ToolArguments::Parsed(args) => args,
                ToolArguments::Malformed(raw) => {
                    tracing::error!(session_id = %turn.session_id, tool = %call.name, raw = %raw, "Unparseable tool arguments");
                    return Err(TurnError::ToolArgumentParse { tool: call.name, raw });
                }
            };

            turn.tool_calls_made.push(ToolInvocation {
                function: call.name.clone(),
                arguments: args.clone(),
            });

            let payload = match self.dispatch(&turn.session_id, &call.name, args).await? {
                Dispatch::Success(result) => {
                    turn.consecutive_errors = 0;
                    result
                }
                Dispatch::Failure(error) => {
                    turn.consecutive_errors += 1;
                    error
                }
            };
            turn.messages
                .push(CanonicalMessage::tool_result(call.id, call.name, fit_tool_result(&payload)));
        }
        Ok(())
    }

    async fn dispatch(&self, session_id: &str, name: &str, args: Map<String, Value>) -> Result<Dispatch, TurnError> {
        let Some(handler) = self.tools.handler(name) else {
            tracing::warn!(session_id, tool = %name, "No handler for tool");
            return Ok(Dispatch::Failure(error_payload(&format!("Handler not found for {name}"), None)));
        };

        let cacheable = handler.cacheable();
        let cached = if cacheable { self.tool_cache.get(name, &args) } else { None };
        let result = match cached {
            Some(result) => {
                tracing::debug!(session_id, tool = %name, "Tool cache hit");
                result
            }
            None => {
                let started = Instant::now();
                match handler.run(args.clone()).await {
                    Ok(result) => {
                        tracing::info!(
                            session_id,
                            tool = %name,
                            duration_ms = %started.elapsed().as_millis(),
                            "Tool succeeded"
                        );
                        if cacheable {
                            self.tool_cache.store(name, &args, result.clone());
                        }
                        result
                    }
                    Err(e) => {
                        tracing::warn!(session_id, tool = %name, error = %e, "Tool failed");
                        return Ok(Dispatch::Failure(error_payload(&e.to_string(), Some(name))));
                    }
                }
            }
        };

        self.sessions.apply_effects(session_id, session_effects(name, &result))?;
        Ok(Dispatch::Success(result))
    }

    fn persist(&self, session_id: &str, message: &str, response: &str) -> Result<(), SessionError> {
        self.sessions.append_message(session_id, Role::User, message)?;
        self.sessions.append_message(session_id, Role::Assistant, response)
    }
}

fn error_payload(message: &str, function: Option<&str>) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("error".into(), json!(message));
    if let Some(function) = function {
        payload.insert("function".into(), json!(function));
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::llm::{Backend, BackendError, ToolSpec};
    use crate::session::SessionPatch;
    use crate::testing::{ManualClock, MockBackend, MockTool};
    use crate::tools::{Tool, BUILD_ITINERARY, SEARCH_POIS};

    struct Harness {
        orchestrator: Orchestrator,
        sessions: Arc<SessionStore>,
        response_cache: Arc<ResponseCache>,
    }

    fn spec(name: &str) -> ToolSpec {
        ToolSpec {
            name: name.to_string(),
            description: format!("Mock {name}"),
            parameters: json!({"type": "object", "properties": {}}),
        }
    }

    fn harness(backends: &[&Arc<MockBackend>], tools: &[&Arc<MockTool>], config: OrchestratorConfig) -> Harness {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
        let chain: Vec<Arc<dyn Backend>> = backends.iter().map(|b| Arc::clone(*b) as Arc<dyn Backend>).collect();

        let mut specs: Vec<ToolSpec> = tools.iter().map(|t| spec(t.name())).collect();
        specs.push(spec("weather"));
        let registry = tools
            .iter()
            .fold(ToolRegistry::new(specs), |r, t| r.with_handler(Arc::clone(*t) as Arc<dyn Tool>));

        let sessions = Arc::new(SessionStore::new(chrono::Duration::minutes(30), clock.clone()));
        let response_cache = Arc::new(ResponseCache::new(chrono::Duration::minutes(60), 100, clock.clone()));
        let tool_cache = Arc::new(ToolResultCache::new(chrono::Duration::hours(24), 100, clock));
        let orchestrator = Orchestrator::new(
            Arc::new(FallbackController::new(chain)),
            Arc::new(registry),
            sessions.clone(),
            response_cache.clone(),
            tool_cache,
            "You are a travel planner for Jaipur.",
        )
        .with_config(config);
        Harness {
            orchestrator,
            sessions,
            response_cache,
        }
    }

    fn call(id: &str, name: &str, args: Value) -> ToolCall {
        ToolCall::new(id, name, args.as_object().cloned().unwrap())
    }

    #[tokio::test]
    async fn text_answer_is_persisted_and_cached() {
        let backend = Arc::new(MockBackend::new("primary"));
        backend.queue_response(CanonicalResponse::text("October to March."));
        let h = harness(&[&backend], &[], OrchestratorConfig::default());

        let first = h.orchestrator.process_turn(None, "When should I visit?").await.unwrap();
        assert_eq!(first.response, "October to March.");
        assert!(!first.cached);
        assert_eq!(first.error_code, None);

        let session = h.sessions.get(&first.session_id).unwrap();
        let roles: Vec<Role> = session.history.iter().map(|e| e.role).collect();
        assert_eq!(roles, [Role::User, Role::Assistant]);
        assert_eq!(h.response_cache.len(), 1);

        let second = h.orchestrator.process_turn(None, "When should I visit?").await.unwrap();
        assert!(second.cached);
        assert_eq!(second.response, "October to March.");
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn itinerary_requests_bypass_the_response_cache() {
        let backend = Arc::new(MockBackend::new("primary"));
        backend.queue_response(CanonicalResponse::text("Here is a plan."));
        backend.queue_response(CanonicalResponse::text("Here is another plan."));
        let h = harness(&[&backend], &[], OrchestratorConfig::default());

        h.orchestrator.process_turn(None, "Plan a 2-day trip").await.unwrap();
        let again = h.orchestrator.process_turn(None, "Plan a 2-day trip").await.unwrap();
        assert!(!again.cached);
        assert_eq!(again.response, "Here is another plan.");
        assert_eq!(backend.call_count(), 2);
        assert!(h.response_cache.is_empty());
    }

    #[tokio::test]
    async fn tool_round_feeds_results_back_and_applies_effects() {
        let backend = Arc::new(MockBackend::new("primary"));
        backend.queue_response(CanonicalResponse::tool_calls(vec![call(
            "call_1",
            SEARCH_POIS,
            json!({"interests": ["forts"]}),
        )]));
        backend.queue_response(CanonicalResponse::text("Amber Fort is a must."));
        let search = Arc::new(MockTool::new(
            SEARCH_POIS,
            json!({"pois": [{"name": "Amber Fort", "source_url": "https://osm/amber"}]}),
        ));
        let h = harness(&[&backend], &[&search], OrchestratorConfig::default());

        let outcome = h.orchestrator.process_turn(None, "Tell me about forts").await.unwrap();
        assert_eq!(outcome.response, "Amber Fort is a must.");
        assert_eq!(outcome.tool_calls_made.len(), 1);
        assert_eq!(outcome.tool_calls_made[0].function, SEARCH_POIS);
        assert_eq!(search.invocations()[0]["interests"], json!(["forts"]));

        let second_request = &backend.requests()[1];
        let tail = &second_request.messages[second_request.messages.len() - 2..];
        assert_eq!(tail[0].role, Role::Assistant);
        assert_eq!(tail[0].tool_calls[0].id, "call_1");
        assert_eq!(tail[1].role, Role::Tool);
        assert_eq!(tail[1].tool_call_id.as_deref(), Some("call_1"));
        assert!(tail[1].text().contains("Amber Fort"));

        let session = h.sessions.get(&outcome.session_id).unwrap();
        assert_eq!(session.citations.len(), 1);
        assert_eq!(session.citations[0].url, "https://osm/amber");
        // Turns that used tools are never served from the response cache
        assert!(h.response_cache.is_empty());
    }

    #[tokio::test]
    async fn cacheable_results_are_reused_but_itineraries_are_rebuilt() {
        let backend = Arc::new(MockBackend::new("primary"));
        for _ in 0..2 {
            backend.queue_response(CanonicalResponse::tool_calls(vec![
                call("c1", SEARCH_POIS, json!({"interests": ["food"]})),
                call("c2", BUILD_ITINERARY, json!({"candidate_pois": [], "duration_days": 1, "pace": "relaxed"})),
            ]));
            backend.queue_response(CanonicalResponse::text("Done."));
        }
        let search = Arc::new(MockTool::new(SEARCH_POIS, json!({"pois": []})));
        let build = Arc::new(
            MockTool::new(BUILD_ITINERARY, json!({"itinerary": {"day_1": {"morning": []}}})).non_cacheable(),
        );
        let h = harness(&[&backend], &[&search, &build], OrchestratorConfig::default());

        let first = h.orchestrator.process_turn(None, "Plan a food trip").await.unwrap();
        h.orchestrator.process_turn(None, "Plan a food trip").await.unwrap();

        assert_eq!(search.call_count(), 1);
        assert_eq!(build.call_count(), 2);
        let session = h.sessions.get(&first.session_id).unwrap();
        assert_eq!(session.itinerary, Some(json!({"day_1": {"morning": []}})));
    }

    #[tokio::test]
    async fn consecutive_failures_end_the_loop_with_a_closing_call() {
        let backend = Arc::new(MockBackend::new("primary"));
        for i in 0..5 {
            backend.queue_response(CanonicalResponse::tool_calls(vec![call(
                &format!("call_{i}"),
                "weather",
                json!({"city": "Jaipur"}),
            )]));
        }
        let config = OrchestratorConfig {
            max_iterations: 10,
            max_consecutive_errors: 2,
            ..OrchestratorConfig::default()
        };
        let h = harness(&[&backend], &[], config);

        let outcome = h.orchestrator.process_turn(None, "Will it rain?").await.unwrap();

        // Two tool rounds, then the closing call consumes the third queued response.
        // That response still carries tool calls, so no text comes back.
        assert_eq!(backend.call_count(), 3);
        assert_eq!(outcome.response, CLOSING_FALLBACK);
        assert_eq!(outcome.error_code, Some(TurnErrorCode::IterationLimit));
        let requests = backend.requests();
        assert_eq!(requests[2].tool_choice, ToolChoice::None);
        let not_found = requests[1].messages.last().unwrap();
        assert_eq!(not_found.text(), r#"{"error":"Handler not found for weather"}"#);
    }

    #[tokio::test]
    async fn failing_handler_ends_the_loop_after_the_threshold() {
        let backend = Arc::new(MockBackend::new("primary"));
        for i in 0..2 {
            backend.queue_response(CanonicalResponse::tool_calls(vec![call(
                &format!("call_{i}"),
                SEARCH_POIS,
                json!({"interests": [format!("topic {i}")]}),
            )]));
        }
        backend.queue_response(CanonicalResponse::text("Sorry, search is down right now."));
        let search = Arc::new(MockTool::failing(SEARCH_POIS, "upstream timed out"));
        let config = OrchestratorConfig {
            max_iterations: 10,
            max_consecutive_errors: 2,
            ..OrchestratorConfig::default()
        };
        let h = harness(&[&backend], &[&search], config);

        let outcome = h.orchestrator.process_turn(None, "Find me some forts").await.unwrap();

        assert_eq!(search.call_count(), 2);
        assert_eq!(backend.call_count(), 3);
        assert_eq!(outcome.response, "Sorry, search is down right now.");
        assert_eq!(outcome.error_code, Some(TurnErrorCode::IterationLimit));
        let requests = backend.requests();
        assert_eq!(requests[0].tool_choice, ToolChoice::Auto);
        assert_eq!(requests[1].tool_choice, ToolChoice::Auto);
        assert_eq!(requests[2].tool_choice, ToolChoice::None);
        let failure: Value = serde_json::from_str(&requests[1].messages.last().unwrap().text()).unwrap();
        assert_eq!(failure["function"], SEARCH_POIS);
        assert!(failure["error"].as_str().unwrap().contains("upstream timed out"));
    }

    #[tokio::test]
    async fn iteration_limit_forces_text_answer() {
        let backend = Arc::new(MockBackend::new("primary"));
        backend.queue_response(CanonicalResponse::tool_calls(vec![call("c1", SEARCH_POIS, json!({"interests": ["art"]}))]));
        backend.queue_response(CanonicalResponse::text("Based on what I found, visit the City Palace."));
        let search = Arc::new(MockTool::new(SEARCH_POIS, json!({"pois": []})));
        let config = OrchestratorConfig {
            max_iterations: 1,
            ..OrchestratorConfig::default()
        };
        let h = harness(&[&backend], &[&search], config);

        let outcome = h.orchestrator.process_turn(None, "Art spots?").await.unwrap();
        assert_eq!(outcome.response, "Based on what I found, visit the City Palace.");
        assert_eq!(outcome.error_code, Some(TurnErrorCode::IterationLimit));
        assert_eq!(backend.requests()[1].tool_choice, ToolChoice::None);
        assert!(h.response_cache.is_empty());
    }

    #[tokio::test]
    async fn failed_closing_call_returns_fixed_message() {
        let backend = Arc::new(MockBackend::new("primary"));
        backend.queue_response(CanonicalResponse::tool_calls(vec![call("c1", "weather", json!({}))]));
        backend.queue_error(BackendError::server_error("HTTP 503: overloaded"));
        let config = OrchestratorConfig {
            max_iterations: 1,
            ..OrchestratorConfig::default()
        };
        let h = harness(&[&backend], &[], config);

        let outcome = h.orchestrator.process_turn(None, "Weather?").await.unwrap();
        assert_eq!(outcome.response, CLOSING_FALLBACK);
        let session = h.sessions.get(&outcome.session_id).unwrap();
        assert_eq!(session.history[1].content, CLOSING_FALLBACK);
    }

    #[tokio::test]
    async fn primary_outage_falls_back_and_stays_on_secondary() {
        let primary = Arc::new(MockBackend::new("primary"));
        let secondary = Arc::new(MockBackend::new("secondary"));
        primary.queue_error(BackendError::server_error("HTTP 503: unavailable"));
        secondary.queue_response(CanonicalResponse::tool_calls(vec![call("c1", "search", json!({"query": "x"}))]));
        secondary.queue_response(CanonicalResponse::text("Found it."));
        let search = Arc::new(MockTool::new("search", json!({"results": ["x"]})));
        let h = harness(&[&primary, &secondary], &[&search], OrchestratorConfig::default());

        let outcome = h.orchestrator.process_turn(None, "Find x").await.unwrap();
        assert_eq!(outcome.response, "Found it.");
        assert_eq!(primary.call_count(), 1);
        assert_eq!(secondary.call_count(), 2);
        assert_eq!(search.invocations()[0]["query"], "x");
        assert_eq!(h.orchestrator.controller().active_backend_id().as_deref(), Some("secondary"));
    }

    #[tokio::test]
    async fn malformed_arguments_abort_the_turn() {
        let backend = Arc::new(MockBackend::new("primary"));
        backend.queue_response(CanonicalResponse::tool_calls(vec![ToolCall {
            id: "c1".into(),
            name: SEARCH_POIS.into(),
            arguments: ToolArguments::Malformed(r#"{"interests": ["forts""#.into()),
        }]));
        let search = Arc::new(MockTool::new(SEARCH_POIS, json!({"pois": []})));
        let h = harness(&[&backend], &[&search], OrchestratorConfig::default());

        let session_id = h.sessions.create();
        let err = h.orchestrator.process_turn(Some(&session_id), "Forts?").await.unwrap_err();
        assert!(matches!(err, TurnError::ToolArgumentParse { ref tool, .. } if tool == SEARCH_POIS));
        assert_eq!(err.code(), TurnErrorCode::ToolArgumentParse);
        assert_eq!(search.call_count(), 0);
        assert!(h.sessions.get(&session_id).unwrap().history.is_empty());
    }

    #[tokio::test]
    async fn handler_errors_go_back_to_the_model() {
        let backend = Arc::new(MockBackend::new("primary"));
        backend.queue_response(CanonicalResponse::tool_calls(vec![call("c1", SEARCH_POIS, json!({"interests": []}))]));
        backend.queue_response(CanonicalResponse::text("The search service is down."));
        let search = Arc::new(MockTool::failing(SEARCH_POIS, "upstream down"));
        let h = harness(&[&backend], &[&search], OrchestratorConfig::default());

        let outcome = h.orchestrator.process_turn(None, "Forts?").await.unwrap();
        assert_eq!(outcome.response, "The search service is down.");
        assert_eq!(outcome.error_code, None);
        let result = backend.requests()[1].messages.last().unwrap().text().to_string();
        let payload: Value = serde_json::from_str(&result).unwrap();
        assert_eq!(payload, json!({"error": "upstream down", "function": SEARCH_POIS}));
    }

    #[tokio::test]
    async fn edit_requests_see_the_current_itinerary() {
        let backend = Arc::new(MockBackend::new("primary"));
        backend.queue_response(CanonicalResponse::text("Removed."));
        let h = harness(&[&backend], &[], OrchestratorConfig::default());

        let session_id = h.sessions.create();
        let itinerary = json!({"day_1": {"morning": {"activities": [
            {"name": "Amber Fort", "start_time": "09:00", "end_time": "11:00"}
        ]}}});
        h.sessions
            .update(
                &session_id,
                SessionPatch {
                    itinerary: Some(Some(itinerary)),
                    ..SessionPatch::default()
                },
            )
            .unwrap();

        h.orchestrator.process_turn(Some(&session_id), "Remove the fort").await.unwrap();
        let messages = &backend.requests()[0].messages;
        let injected = &messages[messages.len() - 2];
        assert_eq!(injected.role, Role::System);
        assert!(injected.text().contains("Morning: Amber Fort (09:00-11:00)"));
    }

    #[tokio::test]
    async fn edit_turns_bypass_the_response_cache() {
        let backend = Arc::new(MockBackend::new("primary"));
        backend.queue_response(CanonicalResponse::text("Removed Amber Fort from day 1."));
        backend.queue_response(CanonicalResponse::text("Removed Nahargarh Fort from day 2."));
        let h = harness(&[&backend], &[], OrchestratorConfig::default());

        let mut sessions = Vec::new();
        for (day, fort) in [("day_1", "Amber Fort"), ("day_2", "Nahargarh Fort")] {
            let id = h.sessions.create();
            h.sessions
                .update(
                    &id,
                    SessionPatch {
                        itinerary: Some(Some(json!({day: {"morning": {"activities": [{"name": fort}]}}}))),
                        ..SessionPatch::default()
                    },
                )
                .unwrap();
            sessions.push(id);
        }

        let first = h.orchestrator.process_turn(Some(&sessions[0]), "Remove the fort").await.unwrap();
        let second = h.orchestrator.process_turn(Some(&sessions[1]), "Remove the fort").await.unwrap();

        assert_eq!(first.response, "Removed Amber Fort from day 1.");
        assert!(!second.cached);
        assert_eq!(second.response, "Removed Nahargarh Fort from day 2.");
        assert_eq!(backend.call_count(), 2);
        assert!(h.response_cache.is_empty());
    }

    #[tokio::test]
    async fn rate_limit_exhaustion_reports_wait_hint() {
        let backend = Arc::new(MockBackend::new("primary"));
        backend.queue_error(BackendError::rate_limited("slow down").with_retry_after(Some(Duration::from_secs(30))));
        let h = harness(&[&backend], &[], OrchestratorConfig::default());

        let err = h.orchestrator.process_turn(None, "Hello").await.unwrap_err();
        assert_eq!(err.code(), TurnErrorCode::RateLimited);
        assert!(err.user_message().contains("30 seconds"), "{}", err.user_message());
    }

    #[tokio::test]
    async fn client_errors_map_to_invalid_request() {
        let backend = Arc::new(MockBackend::new("primary"));
        backend.queue_error(BackendError::client_error("HTTP 400: bad schema"));
        let h = harness(&[&backend], &[], OrchestratorConfig::default());

        let err = h.orchestrator.process_turn(None, "Hello").await.unwrap_err();
        assert_eq!(err.code(), TurnErrorCode::InvalidRequest);
    }

    #[tokio::test]
    async fn unknown_session_starts_fresh() {
        let backend = Arc::new(MockBackend::new("primary"));
        backend.queue_response(CanonicalResponse::text("Hi!"));
        let h = harness(&[&backend], &[], OrchestratorConfig::default());

        let outcome = h.orchestrator.process_turn(Some("missing"), "Hello").await.unwrap();
        assert_ne!(outcome.session_id, "missing");
        assert!(h.sessions.exists(&outcome.session_id));
    }
}

//! Ordered failover across backends
//!
//! The chain is fixed at construction. Each call starts at the currently
//! active backend and walks forward; a success makes that backend active
//! for later calls.

use super::transcript::{fold_tool_turns, has_folded_turns, has_tool_turns, unfold_tool_turns};
use super::{Backend, BackendError, CanonicalMessage, CanonicalResponse, CompletionRequest};
use std::borrow::Cow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FallbackError {
    #[error("no LLM backends configured")]
    NoBackends,

    #[error("{backend} failed with non-retryable error: {source}")]
    Aborted {
        backend: String,
        #[source]
        source: BackendError,
    },

    #[error("all backends failed ({}); last error: {last}", attempted.join(", "))]
    Exhausted {
        attempted: Vec<String>,
        last: BackendError,
    },
}

impl FallbackError {
    /// Wait hint carried by the last backend error, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FallbackError::NoBackends => None,
            FallbackError::Aborted { source, .. } => source.retry_after,
            FallbackError::Exhausted { last, .. } => last.retry_after,
        }
    }

    pub fn last_error(&self) -> Option<&BackendError> {
        match self {
            FallbackError::NoBackends => None,
            FallbackError::Aborted { source, .. } => Some(source),
            FallbackError::Exhausted { last, .. } => Some(last),
        }
    }
}

pub struct FallbackController {
    backends: Vec<Arc<dyn Backend>>,
    active: AtomicUsize,
}

impl FallbackController {
    pub fn new(backends: Vec<Arc<dyn Backend>>) -> Self {
        Self::starting_at(backends, 0)
    }

    pub fn starting_at(backends: Vec<Arc<dyn Backend>>, start: usize) -> Self {
        let start = start.min(backends.len().saturating_sub(1));
        Self {
            backends,
            active: AtomicUsize::new(start),
        }
    }

    pub fn active_backend_id(&self) -> Option<String> {
        self.backends
            .get(self.active.load(Ordering::Acquire))
            .map(|b| b.id().to_string())
    }

    pub fn backend_ids(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.id().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub async fn complete(&self, request: &CompletionRequest) -> Result<CanonicalResponse, FallbackError> {
        if self.backends.is_empty() {
            return Err(FallbackError::NoBackends);
        }

        let start = self.active.load(Ordering::Acquire);
        let mut attempted = Vec::new();
        let mut last_error = None;

        for (idx, backend) in self.backends.iter().enumerate().skip(start) {
            if idx != start {
                tracing::warn!(
                    from = %self.backends[idx - 1].id(),
                    to = %backend.id(),
                    "Falling back to next backend"
                );
            }
            attempted.push(backend.id().to_string());

            let prepared = prepare_messages(&request.messages, backend.supports_tool_role());
            let result = match prepared {
                Cow::Borrowed(_) => backend.complete(request).await,
                Cow::Owned(messages) => {
                    let rerendered = CompletionRequest {
                        messages,
                        ..request.clone()
                    };
                    backend.complete(&rerendered).await
                }
            };

            match result {
                Ok(response) => {
                    if idx != start {
                        self.active.store(idx, Ordering::Release);
                        tracing::info!(backend = %backend.id(), "Active backend switched");
                    }
                    return Ok(response);
                }
                Err(e) if e.kind.skips_backend() => {
                    tracing::warn!(backend = %backend.id(), kind = e.kind.as_str(), error = %e, "Skipping backend");
                    last_error = Some(e);
                }
                Err(e) if e.kind.is_retryable() => {
                    tracing::warn!(backend = %backend.id(), kind = e.kind.as_str(), error = %e, "Retryable backend failure");
                    last_error = Some(e);
                }
                Err(e) => {
                    tracing::error!(backend = %backend.id(), kind = e.kind.as_str(), error = %e, "Non-retryable backend failure");
                    return Err(FallbackError::Aborted {
                        backend: backend.id().to_string(),
                        source: e,
                    });
                }
            }
        }

        let last = last_error.unwrap_or_else(|| BackendError::server_error("no backend attempted"));
        tracing::error!(attempted = ?attempted, error = %last, "All backends exhausted");
        Err(FallbackError::Exhausted { attempted, last })
    }
}

/// Re-render tool turns for the target backend's message shape
fn prepare_messages(messages: &[CanonicalMessage], supports_tool_role: bool) -> Cow<'_, [CanonicalMessage]> {
    if supports_tool_role {
        if has_folded_turns(messages) {
            Cow::Owned(unfold_tool_turns(messages))
        } else {
            Cow::Borrowed(messages)
        }
    } else if has_tool_turns(messages) {
        Cow::Owned(fold_tool_turns(messages))
    } else {
        Cow::Borrowed(messages)
    }
}

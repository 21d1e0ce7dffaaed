//! Backend error types and failure classification

use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

/// Backend error with classification
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
    pub retry_after: Option<Duration>,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    #[must_use]
    pub fn with_retry_after(mut self, duration: Option<Duration>) -> Self {
        self.retry_after = duration;
        self
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Network, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::RateLimited, message)
    }

    pub fn quota_exhausted(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::QuotaExhausted, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::ServerError, message)
    }

    pub fn client_error(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::ClientError, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Auth, message)
    }

    pub fn tool_call_malformed(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::ToolCallMalformed, message)
    }

    /// Map a reqwest transport failure (no HTTP status available)
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::network(format!("Request timeout: {err}"))
        } else if err.is_connect() {
            Self::network(format!("Connection failed: {err}"))
        } else {
            let message = format!("Request failed: {err}");
            Self::new(classify_message(None, &message), message)
        }
    }

    /// Build an error from an HTTP status and the provider's error message
    pub fn from_status(status: u16, message: &str, retry_after: Option<Duration>) -> Self {
        let kind = classify_message(Some(status), message);
        let hint = retry_after.or_else(|| parse_retry_hint(message));
        Self::new(kind, format!("HTTP {status}: {message}")).with_retry_after(hint)
    }
}

/// Error classification driving fallback decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// 429 - transient, try the next backend
    RateLimited,
    /// Quota used up; this backend is out for the rest of the chain
    QuotaExhausted,
    /// 5xx - transient
    ServerError,
    /// DNS, connect, timeout
    Network,
    /// The request itself is bad; no backend will accept it
    ClientError,
    /// The backend rejected its own tool call and nothing could be recovered
    ToolCallMalformed,
    /// Credentials rejected (401, 403)
    Auth,
}

impl BackendErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::ServerError | Self::Network | Self::ToolCallMalformed
        )
    }

    /// Permanent for this backend, but the next one may still work
    pub fn skips_backend(self) -> bool {
        matches!(self, Self::QuotaExhausted | Self::Auth)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::QuotaExhausted => "quota_exhausted",
            Self::ServerError => "server_error",
            Self::Network => "network",
            Self::ClientError => "client_error",
            Self::ToolCallMalformed => "tool_call_malformed",
            Self::Auth => "auth",
        }
    }
}

const QUOTA_PHRASES: &[&str] = &[
    "quota exceeded",
    "exceeded your current quota",
    "insufficient_quota",
];

const RATE_LIMIT_WORDS: &[&str] = &["rate limit", "rate_limit", "resource_exhausted"];
const MALFORMED_CALL_WORDS: &[&str] = &["tool_use_failed", "failed_generation"];
const SERIALIZATION_WORDS: &[&str] = &["serializable", "mapcomposite"];
const NETWORK_WORDS: &[&str] = &["timeout", "timed out", "connection", "network"];
const UNAVAILABLE_WORDS: &[&str] = &["unavailable", "overloaded", "service"];

fn mentions(haystack: &str, words: &[&str]) -> bool {
    words.iter().any(|w| haystack.contains(w))
}

/// True when `code` appears as a standalone number, so token counts such
/// as 14290 do not read as a status.
fn mentions_status(haystack: &str, codes: &[u16]) -> bool {
    haystack
        .split(|c: char| !c.is_ascii_digit())
        .filter_map(|digits| digits.parse::<u16>().ok())
        .any(|n| codes.contains(&n))
}

/// The one place where error classes are inferred from message text.
///
/// Several providers only distinguish quota exhaustion from plain rate
/// limiting, or a rejected tool call from a bad request, in the error
/// message. Everything downstream works on the returned kind.
pub fn classify_message(status: Option<u16>, message: &str) -> BackendErrorKind {
    let lower = message.to_lowercase();

    if mentions(&lower, QUOTA_PHRASES) {
        return BackendErrorKind::QuotaExhausted;
    }

    match status {
        Some(401 | 403) => BackendErrorKind::Auth,
        Some(429) => BackendErrorKind::RateLimited,
        Some(code) if code >= 500 => BackendErrorKind::ServerError,
        Some(408) => BackendErrorKind::Network,
        Some(_) => {
            if mentions(&lower, MALFORMED_CALL_WORDS) {
                BackendErrorKind::ToolCallMalformed
            } else if mentions(&lower, RATE_LIMIT_WORDS) {
                BackendErrorKind::RateLimited
            } else {
                BackendErrorKind::ClientError
            }
        }
        None => {
            if mentions(&lower, RATE_LIMIT_WORDS) || mentions_status(&lower, &[429]) {
                BackendErrorKind::RateLimited
            } else if mentions(&lower, MALFORMED_CALL_WORDS) || mentions(&lower, SERIALIZATION_WORDS) {
                BackendErrorKind::ToolCallMalformed
            } else if mentions(&lower, NETWORK_WORDS) {
                BackendErrorKind::Network
            } else if mentions(&lower, UNAVAILABLE_WORDS) || mentions_status(&lower, &[500, 502, 503]) {
                BackendErrorKind::ServerError
            } else {
                BackendErrorKind::ClientError
            }
        }
    }
}

static RETRY_HINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)try again in\s+(?:(\d+)m)?\s*(\d+(?:\.\d+)?)s").expect("valid retry hint regex")
});

/// Parse "Please try again in 7.5s" / "try again in 1m2.3s" hints
pub fn parse_retry_hint(message: &str) -> Option<Duration> {
    let caps = RETRY_HINT.captures(message)?;
    let minutes: f64 = caps
        .get(1)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0.0);
    let seconds: f64 = caps.get(2)?.as_str().parse().ok()?;
    Duration::try_from_secs_f64(minutes * 60.0 + seconds).ok()
}

/// Parse a `Retry-After` header given in whole seconds
pub fn parse_retry_after_header(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_classify() {
        assert_eq!(classify_message(Some(429), "slow down"), BackendErrorKind::RateLimited);
        assert_eq!(classify_message(Some(503), "busy"), BackendErrorKind::ServerError);
        assert_eq!(classify_message(Some(502), ""), BackendErrorKind::ServerError);
        assert_eq!(classify_message(Some(401), "bad key"), BackendErrorKind::Auth);
        assert_eq!(
            classify_message(Some(400), "'type' is a required property"),
            BackendErrorKind::ClientError
        );
    }

    #[test]
    fn token_counts_are_not_status_codes() {
        let message = "This model's maximum context length is 8192 tokens. However, you requested 14290 tokens.";
        let kind = classify_message(Some(400), message);
        assert_eq!(kind, BackendErrorKind::ClientError);
        assert!(!kind.is_retryable());
        assert_eq!(classify_message(None, message), BackendErrorKind::ClientError);
        assert_eq!(classify_message(None, "HTTP 429 from upstream"), BackendErrorKind::RateLimited);
        assert_eq!(classify_message(None, "upstream returned 503"), BackendErrorKind::ServerError);
    }

    #[test]
    fn quota_text_wins_over_status() {
        assert_eq!(
            classify_message(Some(429), "You exceeded your current quota, please check your plan"),
            BackendErrorKind::QuotaExhausted
        );
        assert_eq!(
            classify_message(None, "Quota exceeded for metric generate_content"),
            BackendErrorKind::QuotaExhausted
        );
    }

    #[test]
    fn rejected_tool_call_on_400_is_retryable() {
        let kind = classify_message(Some(400), "tool_use_failed: Failed to call a function");
        assert_eq!(kind, BackendErrorKind::ToolCallMalformed);
        assert!(kind.is_retryable());
    }

    #[test]
    fn transport_messages_classify() {
        assert_eq!(classify_message(None, "operation timed out"), BackendErrorKind::Network);
        assert_eq!(
            classify_message(None, "MapComposite is not JSON serializable"),
            BackendErrorKind::ToolCallMalformed
        );
        assert_eq!(classify_message(None, "service unavailable"), BackendErrorKind::ServerError);
        assert_eq!(classify_message(None, "missing field"), BackendErrorKind::ClientError);
    }

    #[test]
    fn retry_policy() {
        assert!(BackendErrorKind::RateLimited.is_retryable());
        assert!(BackendErrorKind::Network.is_retryable());
        assert!(!BackendErrorKind::ClientError.is_retryable());
        assert!(!BackendErrorKind::ClientError.skips_backend());
        assert!(BackendErrorKind::QuotaExhausted.skips_backend());
        assert!(BackendErrorKind::Auth.skips_backend());
    }

    #[test]
    fn retry_hints_parse() {
        assert_eq!(
            parse_retry_hint("Rate limit reached. Please try again in 7.5s."),
            Some(Duration::from_millis(7500))
        );
        assert_eq!(
            parse_retry_hint("try again in 1m2s"),
            Some(Duration::from_secs(62))
        );
        assert_eq!(parse_retry_hint("no hint here"), None);
        assert_eq!(parse_retry_after_header(" 12 "), Some(Duration::from_secs(12)));
        assert_eq!(parse_retry_after_header("soon"), None);
    }

    #[test]
    fn from_status_picks_up_text_hint() {
        let err = BackendError::from_status(429, "Please try again in 3s", None);
        assert_eq!(err.kind, BackendErrorKind::RateLimited);
        assert_eq!(err.retry_after, Some(Duration::from_secs(3)));

        let err = BackendError::from_status(429, "later", Some(Duration::from_secs(9)));
        assert_eq!(err.retry_after, Some(Duration::from_secs(9)));
    }
}

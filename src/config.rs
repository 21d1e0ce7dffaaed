//! Service configuration from environment variables
//!
//! Every setting has a default. Values that fail to parse are logged and
//! replaced by the default instead of stopping the service.

use crate::llm::LlmConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::tools::ToolEndpoints;
use chrono::Duration;
use std::str::FromStr;

const DEFAULT_CITY: &str = "Jaipur";
const DEFAULT_PORT: u16 = 8000;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub city: String,
    pub endpoints: ToolEndpoints,
    pub response_cache_ttl: Duration,
    pub response_cache_max_size: usize,
    pub tool_cache_ttl: Duration,
    pub tool_cache_max_size: usize,
    pub session_timeout: Duration,
    pub orchestrator: OrchestratorConfig,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let text = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let defaults = OrchestratorConfig::default();
        let orchestrator = OrchestratorConfig {
            max_iterations: parse_or(&lookup, "ORCHESTRATOR_MAX_ITERATIONS", defaults.max_iterations),
            max_consecutive_errors: parse_or(&lookup, "ORCHESTRATOR_MAX_CONSECUTIVE_ERRORS", defaults.max_consecutive_errors),
            history_window: parse_or(&lookup, "ORCHESTRATOR_HISTORY_WINDOW", defaults.history_window),
            ..defaults
        };

        Self {
            llm: LlmConfig::from_lookup(&lookup),
            city: text("TRIP_CITY").unwrap_or_else(|| DEFAULT_CITY.to_string()),
            endpoints: ToolEndpoints {
                search_pois: text("SEARCH_POIS_URL"),
                build_itinerary: text("BUILD_ITINERARY_URL"),
                city_guidance: text("CITY_GUIDANCE_URL"),
            },
            response_cache_ttl: Duration::minutes(parse_or(&lookup, "RESPONSE_CACHE_TTL_MINUTES", 60)),
            response_cache_max_size: parse_or(&lookup, "RESPONSE_CACHE_MAX_SIZE", 1000),
            tool_cache_ttl: Duration::hours(parse_or(&lookup, "TOOL_CACHE_TTL_HOURS", 24)),
            tool_cache_max_size: parse_or(&lookup, "TOOL_CACHE_MAX_SIZE", 500),
            session_timeout: Duration::minutes(parse_or(&lookup, "SESSION_TIMEOUT_MINUTES", 30)),
            orchestrator,
            port: parse_or(&lookup, "TRIP_PORT", DEFAULT_PORT),
        }
    }
}

fn parse_or<T: FromStr + Copy>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Unparseable setting, using default");
            default
        }),
    }
}

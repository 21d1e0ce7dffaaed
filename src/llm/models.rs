//! Backend definitions for every supported provider
//!
//! Adding a provider means adding a [`BackendDef`] here.

use super::{Backend, GeminiBackend, OpenAiCompatBackend, OpenAiCompatConfig};
use std::sync::Arc;

/// LLM provider enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Cerebras,
    Groq,
    Gemini,
}

impl Provider {
    /// Stable identifier, also used in `LLM_PROVIDER` / `LLM_FALLBACK_ORDER`
    pub fn id(self) -> &'static str {
        match self {
            Provider::Cerebras => "cerebras",
            Provider::Groq => "groq",
            Provider::Gemini => "gemini",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Provider::Cerebras => "Cerebras",
            Provider::Groq => "Groq",
            Provider::Gemini => "Google Gemini",
        }
    }

    /// Environment variable holding this provider's API key
    pub fn api_key_env_var(self) -> &'static str {
        match self {
            Provider::Cerebras => "CEREBRAS_API_KEY",
            Provider::Groq => "GROQ_API_KEY",
            Provider::Gemini => "GEMINI_API_KEY",
        }
    }

    /// Environment variable overriding the default model
    pub fn model_env_var(self) -> &'static str {
        match self {
            Provider::Cerebras => "CEREBRAS_MODEL",
            Provider::Groq => "GROQ_MODEL",
            Provider::Gemini => "GEMINI_MODEL",
        }
    }

    pub fn parse(id: &str) -> Option<Self> {
        all_backends()
            .iter()
            .map(|def| def.provider)
            .find(|p| p.id().eq_ignore_ascii_case(id.trim()))
    }
}

/// Backend definition with its factory
#[derive(Debug, Clone)]
pub struct BackendDef {
    pub provider: Provider,
    pub default_model: &'static str,
    pub description: &'static str,
    /// Build the backend from an API key and an optional model override
    pub factory: fn(&str, Option<&str>) -> Result<Arc<dyn Backend>, String>,
}

/// All backend definitions, in default fallback order
pub fn all_backends() -> &'static [BackendDef] {
    &[
        BackendDef {
            provider: Provider::Cerebras,
            default_model: OpenAiCompatConfig::CEREBRAS_DEFAULT_MODEL,
            description: "Cerebras (OpenAI-compatible, fastest)",
            factory: |api_key, model| {
                if api_key.is_empty() {
                    return Err("cerebras requires CEREBRAS_API_KEY".to_string());
                }
                let mut config = OpenAiCompatConfig::cerebras(api_key);
                if let Some(model) = model {
                    config = config.with_model(model);
                }
                let backend = OpenAiCompatBackend::new(config).map_err(|e| e.message)?;
                Ok(Arc::new(backend))
            },
        },
        BackendDef {
            provider: Provider::Groq,
            default_model: OpenAiCompatConfig::GROQ_DEFAULT_MODEL,
            description: "Groq (OpenAI-compatible)",
            factory: |api_key, model| {
                if api_key.is_empty() {
                    return Err("groq requires GROQ_API_KEY".to_string());
                }
                let mut config = OpenAiCompatConfig::groq(api_key);
                if let Some(model) = model {
                    config = config.with_model(model);
                }
                let backend = OpenAiCompatBackend::new(config).map_err(|e| e.message)?;
                Ok(Arc::new(backend))
            },
        },
        BackendDef {
            provider: Provider::Gemini,
            default_model: super::GEMINI_DEFAULT_MODEL,
            description: "Google Gemini (no tool role)",
            factory: |api_key, model| {
                if api_key.is_empty() {
                    return Err("gemini requires GEMINI_API_KEY".to_string());
                }
                let backend = GeminiBackend::new(api_key, model).map_err(|e| e.message)?;
                Ok(Arc::new(backend))
            },
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(Provider::parse("GROQ"), Some(Provider::Groq));
        assert_eq!(Provider::parse(" gemini "), Some(Provider::Gemini));
        assert_eq!(Provider::parse("openai"), None);
    }

    #[test]
    fn factories_reject_empty_keys_and_build_otherwise() {
        for def in all_backends() {
            assert!((def.factory)("", None).is_err());
            let backend = (def.factory)("key", None).unwrap();
            assert_eq!(backend.id(), def.provider.id());
        }
    }

    #[test]
    fn only_gemini_lacks_tool_role() {
        for def in all_backends() {
            let backend = (def.factory)("key", Some("custom-model")).unwrap();
            assert_eq!(backend.supports_tool_role(), def.provider != Provider::Gemini);
        }
    }
}

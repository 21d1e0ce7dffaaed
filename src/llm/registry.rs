//! Backend chain construction from configuration

use super::{all_backends, Backend, BackendDef, FallbackController, LoggingBackend, Provider};
use std::collections::HashMap;
use std::sync::Arc;

const DEFAULT_ORDER: [Provider; 3] = [Provider::Cerebras, Provider::Groq, Provider::Gemini];

/// Configuration for LLM backends
#[derive(Debug, Clone, Default)]
pub struct LlmConfig {
    pub api_keys: HashMap<Provider, String>,
    pub models: HashMap<Provider, String>,
    /// Preferred first backend; the chain starts here
    pub provider: Option<Provider>,
    /// Chain order; empty means the default order
    pub fallback_order: Vec<Provider>,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut api_keys = HashMap::new();
        let mut models = HashMap::new();
        for def in all_backends() {
            if let Some(key) = lookup(def.provider.api_key_env_var()).filter(|k| !k.is_empty()) {
                api_keys.insert(def.provider, key);
            }
            if let Some(model) = lookup(def.provider.model_env_var()).filter(|m| !m.is_empty()) {
                models.insert(def.provider, model);
            }
        }

        let provider = lookup("LLM_PROVIDER").and_then(|p| {
            let parsed = Provider::parse(&p);
            if parsed.is_none() {
                tracing::warn!(provider = %p, "Unknown LLM_PROVIDER, using fallback order");
            }
            parsed
        });

        let fallback_order = lookup("LLM_FALLBACK_ORDER")
            .map(|order| {
                let mut seen = Vec::new();
                for id in order.split(',').filter(|s| !s.trim().is_empty()) {
                    match Provider::parse(id) {
                        Some(p) if !seen.contains(&p) => seen.push(p),
                        Some(_) => {}
                        None => tracing::warn!(provider = %id.trim(), "Ignoring unknown provider in LLM_FALLBACK_ORDER"),
                    }
                }
                seen
            })
            .unwrap_or_default();

        Self {
            api_keys,
            models,
            provider,
            fallback_order,
        }
    }

    /// Configured order, or the default one
    pub fn order(&self) -> Vec<Provider> {
        let mut order = if self.fallback_order.is_empty() {
            DEFAULT_ORDER.to_vec()
        } else {
            self.fallback_order.clone()
        };
        // A preferred provider missing from an explicit order still goes first
        if let Some(preferred) = self.provider {
            if !order.contains(&preferred) {
                order.insert(0, preferred);
            }
        }
        order
    }

    /// Instantiate every configured backend in chain order, wrapped with logging
    pub fn build_chain(&self) -> Vec<Arc<dyn Backend>> {
        self.order()
            .into_iter()
            .filter_map(|provider| {
                let def = all_backends().iter().find(|d| d.provider == provider)?;
                self.try_create(def)
            })
            .collect()
    }

    fn try_create(&self, def: &BackendDef) -> Option<Arc<dyn Backend>> {
        let api_key = self.api_keys.get(&def.provider)?;
        let model = self.models.get(&def.provider).map(String::as_str);
        match (def.factory)(api_key, model) {
            Ok(backend) => {
                tracing::info!(
                    backend = def.provider.id(),
                    model = model.unwrap_or(def.default_model),
                    "Backend configured"
                );
                Some(Arc::new(LoggingBackend::new(backend)))
            }
            Err(e) => {
                tracing::warn!(backend = def.provider.id(), error = %e, "Backend unavailable");
                None
            }
        }
    }

    /// Fallback controller over the configured chain, starting at the preferred provider
    pub fn build_controller(&self) -> FallbackController {
        let chain = self.build_chain();
        let start = self
            .provider
            .and_then(|p| chain.iter().position(|b| b.id() == p.id()))
            .unwrap_or(0);
        FallbackController::starting_at(chain, start)
    }
}

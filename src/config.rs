use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::pipeline::structuring::{
    LlmClient, OllamaClient, OpenAiClient, DEFAULT_OPENAI_BASE_URL, DEFAULT_OPENAI_MODEL,
};

/// Application-level constants
pub const APP_NAME: &str = "LabLens";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.1";
pub const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 60;

/// Get the application data directory: ~/LabLens/ on all platforms.
/// `None` when the home directory cannot be determined.
pub fn app_data_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(APP_NAME))
}

/// Optional JSON file whose reference ranges override the built-in table.
pub fn reference_ranges_path() -> Option<PathBuf> {
    app_data_dir().map(|dir| dir.join("reference_ranges.json"))
}

/// Log filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "lablens=info"
}

/// Budgets and switches for one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    /// Characters of cleaned report text sent for extraction (prefix kept).
    pub max_input_chars: usize,
    pub extraction_temperature: f32,
    pub extraction_max_tokens: u32,
    /// Characters of report text shown to the date prompt.
    pub date_window_chars: usize,
    pub date_temperature: f32,
    pub date_max_tokens: u32,
    pub explanation_temperature: f32,
    pub explanation_max_tokens: u32,
    /// Inclusive year bounds for a date to count as a sample date.
    pub min_valid_year: i32,
    pub max_valid_year: i32,
    pub enrich_explanations: bool,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            max_input_chars: 12_000,
            extraction_temperature: 0.1,
            extraction_max_tokens: 1000,
            date_window_chars: 4000,
            date_temperature: 0.0,
            date_max_tokens: 300,
            explanation_temperature: 0.3,
            explanation_max_tokens: 2000,
            min_valid_year: 1950,
            max_valid_year: 2030,
            enrich_explanations: true,
        }
    }
}

/// Provider endpoints and credentials. The only place the environment is read.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSettings {
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: String,
    /// Ollama is used only when a URL or model was configured.
    pub ollama_url: Option<String>,
    pub ollama_model: String,
    pub timeout_secs: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_model: DEFAULT_OPENAI_MODEL.to_string(),
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            ollama_url: None,
            ollama_model: DEFAULT_OLLAMA_MODEL.to_string(),
            timeout_secs: DEFAULT_PROVIDER_TIMEOUT_SECS,
        }
    }
}

impl ProviderSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let ollama_model = get("LABLENS_OLLAMA_MODEL");
        let ollama_url = get("LABLENS_OLLAMA_URL")
            .or_else(|| ollama_model.as_ref().map(|_| DEFAULT_OLLAMA_URL.to_string()));

        let timeout_secs = match get("LABLENS_PROVIDER_TIMEOUT_SECS") {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::warn!(value = %raw, "Invalid provider timeout, using default");
                defaults.timeout_secs
            }),
            None => defaults.timeout_secs,
        };

        Self {
            openai_api_key: get("OPENAI_API_KEY"),
            openai_model: get("OPENAI_MODEL").unwrap_or(defaults.openai_model),
            openai_base_url: get("OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
            ollama_url,
            ollama_model: ollama_model.unwrap_or(defaults.ollama_model),
            timeout_secs,
        }
    }

    /// Ordered provider chain: OpenAI first, then Ollama. Providers that
    /// cannot be constructed are logged and left out.
    pub fn build_providers(&self) -> Vec<Arc<dyn LlmClient>> {
        let mut providers: Vec<Arc<dyn LlmClient>> = Vec::new();

        if let Some(key) = &self.openai_api_key {
            match OpenAiClient::new(&self.openai_base_url, key, &self.openai_model, self.timeout_secs) {
                Ok(client) => {
                    tracing::info!(model = client.model(), "OpenAI provider enabled");
                    providers.push(Arc::new(client));
                }
                Err(e) => tracing::warn!(error = %e, "OpenAI provider disabled"),
            }
        }

        if let Some(url) = &self.ollama_url {
            match OllamaClient::new(url, &self.ollama_model, self.timeout_secs) {
                Ok(client) => {
                    tracing::info!(model = client.model(), url = %url, "Ollama provider enabled");
                    providers.push(Arc::new(client));
                }
                Err(e) => tracing::warn!(error = %e, "Ollama provider disabled"),
            }
        }

        if providers.is_empty() {
            tracing::warn!("No model providers configured, only pattern extraction will run");
        }
        providers
    }
}

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::types::LlmClient;
use super::ProviderError;

const PROVIDER: &str = "ollama";

/// Ollama HTTP client for local LLM inference.
pub struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: &str, timeout_secs: u64) -> Result<Self, ProviderError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ProviderError::new(PROVIDER, format!("HTTP client setup: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client,
            timeout_secs,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Request body for Ollama /api/generate
#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

/// Response body from Ollama /api/generate
#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

impl LlmClient for OllamaClient {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn complete(
        &self,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, ProviderError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = OllamaGenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: OllamaOptions {
                temperature,
                num_predict: max_tokens,
            },
        };

        let response = self.client.post(&url).json(&body).send().map_err(|e| {
            let reason = if e.is_connect() {
                format!("cannot connect to {}", self.base_url)
            } else if e.is_timeout() {
                format!("request timed out after {}s", self.timeout_secs)
            } else {
                e.to_string()
            };
            ProviderError::new(PROVIDER, reason)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ProviderError::new(
                PROVIDER,
                format!("HTTP {}: {body}", status.as_u16()),
            ));
        }

        let parsed: OllamaGenerateResponse = response
            .json()
            .map_err(|e| ProviderError::new(PROVIDER, format!("malformed response: {e}")))?;

        Ok(parsed.response)
    }
}

/// Mock LLM client for testing: returns a configurable response.
pub struct MockLlmClient {
    name: String,
    response: String,
    calls: AtomicUsize,
}

impl MockLlmClient {
    pub fn new(response: &str) -> Self {
        Self {
            name: "mock".to_string(),
            response: response.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LlmClient for MockLlmClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn complete(&self, _prompt: &str, _temperature: f32, _max_tokens: u32) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.response.clone())
    }
}

/// Mock client that always fails, standing in for an unreachable provider.
pub struct FailingLlmClient {
    name: String,
    calls: AtomicUsize,
}

impl FailingLlmClient {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LlmClient for FailingLlmClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn complete(&self, _prompt: &str, _temperature: f32, _max_tokens: u32) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ProviderError::new(&self.name, "connection refused"))
    }
}

/// Mock client that replays a fixed sequence of outcomes, one per call.
/// Calls past the end of the script fail.
pub struct SequencedLlmClient {
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    prompts: Mutex<Vec<String>>,
}

impl SequencedLlmClient {
    pub fn new(script: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl LlmClient for SequencedLlmClient {
    fn name(&self) -> &str {
        "sequenced"
    }

    fn complete(&self, prompt: &str, _temperature: f32, _max_tokens: u32) -> Result<String, ProviderError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        self.script
            .lock()
            .map_err(|_| ProviderError::new("sequenced", "script lock poisoned"))?
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::new("sequenced", "script exhausted")))
    }
}

pub mod types;
pub mod prompt;
pub mod parser;
pub mod sanitize;
pub mod fallback;
pub mod ollama;
pub mod openai;
pub mod orchestrator;
pub mod explain;

pub use types::*;
pub use prompt::*;
pub use parser::*;
pub use sanitize::*;
pub use fallback::*;
pub use ollama::*;
pub use openai::*;
pub use orchestrator::*;
pub use explain::*;

use thiserror::Error;

/// Any failure of an external completion call. Network, auth, quota,
/// timeout and malformed bodies all collapse into this one type; the
/// reason string is for logs only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{provider} completion failed: {reason}")]
pub struct ProviderError {
    pub provider: String,
    pub reason: String,
}

impl ProviderError {
    pub fn new(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum StructuringError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("JSON parsing error: {0}")]
    JsonParsing(String),

    #[error("Unexpected response shape: {0}")]
    UnexpectedShape(String),

    #[error("Extraction produced no test observations")]
    EmptyExtraction,
}

impl StructuringError {
    /// Shape and emptiness problems are handled exactly like parse failures.
    pub fn is_parse_failure(&self) -> bool {
        !matches!(self, Self::Provider(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_display_names_provider() {
        let err = ProviderError::new("openai", "HTTP 429");
        assert_eq!(err.to_string(), "openai completion failed: HTTP 429");
    }

    #[test]
    fn provider_error_converts_into_structuring_error() {
        let err: StructuringError = ProviderError::new("ollama", "refused").into();
        assert!(!err.is_parse_failure());
        assert!(StructuringError::UnexpectedShape("x".into()).is_parse_failure());
        assert!(StructuringError::EmptyExtraction.is_parse_failure());
    }
}

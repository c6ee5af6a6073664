use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;

use super::parser::parse_json_response;
use super::prompt::build_explanation_prompt;
use super::types::LlmClient;
use super::StructuringError;
use crate::config::ExtractionSettings;
use crate::models::TestObservation;

/// Explanation used whenever the model gives none for a test.
pub fn generic_explanation(test_name: &str) -> String {
    format!("This test measures {test_name} levels in the body.")
}

/// Explanations keyed by exact test name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Explanations {
    by_name: HashMap<String, String>,
}

impl Explanations {
    pub fn for_test(&self, test_name: &str) -> String {
        self.by_name
            .get(test_name)
            .cloned()
            .unwrap_or_else(|| generic_explanation(test_name))
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn apply(&self, obs: &mut TestObservation) {
        obs.explanation = Some(self.for_test(&obs.test_name));
    }
}

/// Plain-language explanations in one batched completion per provider,
/// stopping at the first provider whose response parses.
pub struct ExplanationEnricher {
    providers: Vec<Arc<dyn LlmClient>>,
    settings: ExtractionSettings,
}

impl ExplanationEnricher {
    pub fn new(providers: Vec<Arc<dyn LlmClient>>, settings: ExtractionSettings) -> Self {
        Self {
            providers,
            settings,
        }
    }

    /// Never fails; an empty set means every test gets the generic text.
    pub fn explain(&self, tests: &[TestObservation]) -> Explanations {
        let mut seen = HashSet::new();
        let unique: Vec<TestObservation> = tests
            .iter()
            .filter(|t| seen.insert(t.test_name.as_str()))
            .cloned()
            .collect();
        if unique.is_empty() {
            return Explanations::default();
        }

        let prompt = build_explanation_prompt(&unique);
        for provider in &self.providers {
            match self.request(provider.as_ref(), &prompt) {
                Ok(explanations) => {
                    tracing::debug!(
                        provider = provider.name(),
                        explained = explanations.len(),
                        requested = unique.len(),
                        "Explanations generated"
                    );
                    return explanations;
                }
                Err(e) => tracing::warn!(
                    provider = provider.name(),
                    error = %e,
                    "Explanation request failed"
                ),
            }
        }
        Explanations::default()
    }

    fn request(&self, provider: &dyn LlmClient, prompt: &str) -> Result<Explanations, StructuringError> {
        let raw = provider.complete(
            prompt,
            self.settings.explanation_temperature,
            self.settings.explanation_max_tokens,
        )?;
        match parse_json_response(&raw)? {
            Value::Object(map) => Ok(Explanations {
                by_name: map
                    .into_iter()
                    .filter_map(|(name, text)| match text {
                        Value::String(s) if !s.trim().is_empty() => Some((name, s.trim().to_string())),
                        _ => None,
                    })
                    .collect(),
            }),
            _ => Err(StructuringError::UnexpectedShape(
                "explanations are not a JSON object".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::structuring::{FailingLlmClient, MockLlmClient};

    fn enricher(providers: Vec<Arc<dyn LlmClient>>) -> ExplanationEnricher {
        ExplanationEnricher::new(providers, ExtractionSettings::default())
    }

    fn erased<T: LlmClient + 'static>(client: &Arc<T>) -> Arc<dyn LlmClient> {
        client.clone()
    }

    fn tests() -> Vec<TestObservation> {
        vec![
            TestObservation::new("LDL", "162"),
            TestObservation::new("Sodium", "139"),
            TestObservation::new("LDL", "140"),
        ]
    }

    #[test]
    fn parsed_explanations_apply_by_exact_name() {
        let provider = Arc::new(MockLlmClient::new(
            r#"```json
{"LDL": "LDL carries cholesterol; 162 is above the optimal level.", "Sodium": 3}
```"#,
        ));
        let explanations = enricher(vec![erased(&provider)]).explain(&tests());
        assert_eq!(explanations.len(), 1);
        assert!(explanations.for_test("LDL").starts_with("LDL carries"));
        assert_eq!(
            explanations.for_test("Sodium"),
            "This test measures Sodium levels in the body."
        );
    }

    #[test]
    fn failure_falls_back_to_generic_text() {
        let failing = Arc::new(FailingLlmClient::new("openai"));
        let prose = Arc::new(MockLlmClient::new("Sure! LDL is cholesterol."));
        let explanations = enricher(vec![erased(&failing), erased(&prose)]).explain(&tests());

        assert_eq!(failing.call_count(), 1);
        assert_eq!(prose.call_count(), 1);
        assert!(explanations.is_empty());

        let mut obs = TestObservation::new("TSH", "2.0");
        explanations.apply(&mut obs);
        assert_eq!(
            obs.explanation.as_deref(),
            Some("This test measures TSH levels in the body.")
        );
    }

    #[test]
    fn array_response_is_rejected() {
        let provider = Arc::new(MockLlmClient::new(r#"["LDL is cholesterol"]"#));
        assert!(enricher(vec![erased(&provider)]).explain(&tests()).is_empty());
    }

    #[test]
    fn no_tests_means_no_call() {
        let provider = Arc::new(MockLlmClient::new("{}"));
        enricher(vec![erased(&provider)]).explain(&[]);
        assert_eq!(provider.call_count(), 0);
    }
}

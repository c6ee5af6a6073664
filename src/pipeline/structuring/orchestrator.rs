use std::sync::Arc;

use super::fallback::extract_with_patterns;
use super::parser::parse_extraction_response;
use super::prompt::build_extraction_prompt;
use super::sanitize::{clean_report_text, truncate_prefix};
use super::types::{ExtractionResult, LlmClient};
use super::StructuringError;
use crate::config::ExtractionSettings;
use crate::models::{ExtractionSource, ExtractionStatus, PatientInfo};

/// Result of the extraction chain plus which stage produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionOutcome {
    pub result: ExtractionResult,
    pub source: ExtractionSource,
    pub status: ExtractionStatus,
}

/// Structured extraction over an ordered provider chain:
/// clean → truncate → provider 1 → provider 2 … → pattern extractor.
pub struct ReportExtractor {
    providers: Vec<Arc<dyn LlmClient>>,
    settings: ExtractionSettings,
}

impl ReportExtractor {
    pub fn new(providers: Vec<Arc<dyn LlmClient>>, settings: ExtractionSettings) -> Self {
        Self {
            providers,
            settings,
        }
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Extract patient and test data. Never fails: when every stage comes
    /// back empty the result is an empty Legacy shape with `Empty` status.
    pub fn extract(&self, text: &str, report_id: &str) -> ExtractionOutcome {
        let cleaned = clean_report_text(text, report_id);
        let budgeted = truncate_prefix(&cleaned, self.settings.max_input_chars);
        if budgeted.len() < cleaned.len() {
            tracing::info!(
                report_id = %report_id,
                kept_chars = self.settings.max_input_chars,
                "Report text truncated to extraction budget"
            );
        }

        let mut model_patient = PatientInfo::default();

        if budgeted.trim().is_empty() {
            tracing::debug!(report_id = %report_id, "Empty report text, skipping providers");
        } else {
            let prompt = build_extraction_prompt(budgeted);
            for (stage, provider) in self.providers.iter().enumerate() {
                match self.run_model_stage(provider.as_ref(), &prompt) {
                    Ok(result) if !result.is_empty() => {
                        tracing::info!(
                            report_id = %report_id,
                            provider = provider.name(),
                            shape = result.variant_name(),
                            observations = result.observation_count(),
                            "Model extraction succeeded"
                        );
                        return ExtractionOutcome {
                            result,
                            source: ExtractionSource::from_stage(stage),
                            status: ExtractionStatus::Ok,
                        };
                    }
                    Ok(result) => {
                        tracing::warn!(
                            report_id = %report_id,
                            provider = provider.name(),
                            error = %StructuringError::EmptyExtraction,
                            "Extraction stage produced nothing, trying next stage"
                        );
                        model_patient = merge_patient(model_patient, result.patient());
                    }
                    Err(e) => {
                        let failure = if e.is_parse_failure() { "unusable_output" } else { "provider" };
                        tracing::warn!(
                            report_id = %report_id,
                            provider = provider.name(),
                            failure,
                            error = %e,
                            "Extraction stage failed, trying next stage"
                        );
                    }
                }
            }
        }

        let fallback = extract_with_patterns(budgeted);
        let patient = merge_patient(model_patient, fallback.patient());

        match fallback {
            ExtractionResult::Legacy { tests, .. } if !tests.is_empty() => {
                tracing::info!(
                    report_id = %report_id,
                    observations = tests.len(),
                    "Using pattern extraction fallback"
                );
                ExtractionOutcome {
                    result: ExtractionResult::Legacy { patient, tests },
                    source: ExtractionSource::RegexFallback,
                    status: ExtractionStatus::Partial,
                }
            }
            _ => {
                tracing::warn!(report_id = %report_id, "All extraction stages came back empty");
                ExtractionOutcome {
                    result: ExtractionResult::Legacy {
                        patient,
                        tests: Vec::new(),
                    },
                    source: ExtractionSource::Exhausted,
                    status: ExtractionStatus::Empty,
                }
            }
        }
    }

    fn run_model_stage(
        &self,
        provider: &dyn LlmClient,
        prompt: &str,
    ) -> Result<ExtractionResult, StructuringError> {
        let raw = provider.complete(
            prompt,
            self.settings.extraction_temperature,
            self.settings.extraction_max_tokens,
        )?;
        parse_extraction_response(&raw)
    }
}

/// Field-wise merge; values already in `primary` win.
fn merge_patient(primary: PatientInfo, secondary: PatientInfo) -> PatientInfo {
    PatientInfo {
        name: primary.name.or(secondary.name),
        age: primary.age.or(secondary.age),
        gender: primary.gender.or(secondary.gender),
    }
}

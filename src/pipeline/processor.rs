//! Report analysis orchestrator.
//!
//! Single entry point that drives the full pipeline:
//! extract → fill ranges → find dates → reconcile → explain → summarize.
//!
//! Providers are injected as trait objects so the whole pipeline runs
//! against mock clients in tests.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use uuid::Uuid;

use crate::config::{self, ExtractionSettings, ProviderSettings};
use crate::intelligence::ReferenceRangeTable;
use crate::models::{ExtractionSource, ExtractionStatus, PatientContext, UserProfile};
use crate::pipeline::structuring::{
    clean_report_text, ExplanationEnricher, ExtractionResult, LlmClient, ReportExtractor,
};
use crate::timeline::{reconcile_with, CanonicalResult, DateExtractor, ReportSummary};

/// Everything returned for one analyzed report.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub report_id: Uuid,
    pub source: ExtractionSource,
    pub result: CanonicalResult,
}

impl AnalysisReport {
    pub fn status(&self) -> ExtractionStatus {
        self.result.extraction_status
    }
}

pub struct AnalysisPipeline {
    extractor: ReportExtractor,
    dates: DateExtractor,
    explainer: ExplanationEnricher,
    ranges: ReferenceRangeTable,
    settings: ExtractionSettings,
}

impl AnalysisPipeline {
    pub fn new(
        providers: Vec<Arc<dyn LlmClient>>,
        ranges: ReferenceRangeTable,
        settings: ExtractionSettings,
    ) -> Self {
        Self {
            extractor: ReportExtractor::new(providers.clone(), settings.clone()),
            dates: DateExtractor::new(providers.clone(), settings.clone()),
            explainer: ExplanationEnricher::new(providers, settings.clone()),
            ranges,
            settings,
        }
    }

    /// Analyze one report. Never fails: the worst case is an empty result
    /// with `Empty` status.
    ///
    /// The profile's age and gender only steer reference-range selection;
    /// the extracted patient identity is returned unchanged.
    pub fn analyze(&self, text: &str, profile: Option<&UserProfile>) -> AnalysisReport {
        let report_id = Uuid::new_v4();
        let _span = tracing::info_span!("analyze_report", report_id = %report_id).entered();
        let id = report_id.to_string();

        let outcome = self.extractor.extract(text, &id);
        let ctx = PatientContext::resolve(&outcome.result.patient(), profile);
        let filled = self.ranges.fill_gaps(outcome.result, &ctx);

        let cleaned = clean_report_text(text, &id);
        let dates = self.sample_dates(&filled, &cleaned);
        let mut result = reconcile_with(&filled, &cleaned, Some(dates.as_slice()), &self.settings);

        if !outcome.source.is_model() && result.extraction_status == ExtractionStatus::Ok {
            result.extraction_status = ExtractionStatus::Partial;
        }

        if self.settings.enrich_explanations && !result.is_empty() {
            let explanations = self.explainer.explain(&result.tests);
            result.map_tests(|test| explanations.apply(test));
        }

        result.summary = Some(ReportSummary::from_result(&result));

        tracing::info!(
            source = %outcome.source,
            status = %result.extraction_status,
            tests = result.tests.len(),
            groups = result.date_order.len(),
            "Report analyzed"
        );

        AnalysisReport {
            report_id,
            source: outcome.source,
            result,
        }
    }

    /// Names of the configured providers, in fallback order.
    pub fn provider_names(&self) -> Vec<&str> {
        self.extractor.provider_names()
    }

    /// Only Legacy results need dates from the text; the other shapes carry
    /// their own.
    fn sample_dates(&self, result: &ExtractionResult, text: &str) -> Vec<NaiveDate> {
        match result {
            ExtractionResult::Legacy { tests, .. } if !tests.is_empty() => {
                self.dates.extract_dates(text)
            }
            _ => Vec::new(),
        }
    }
}

/// Build a pipeline from the environment and the optional override table
/// in the application data directory.
pub fn build_pipeline() -> AnalysisPipeline {
    let providers = ProviderSettings::from_env().build_providers();
    let ranges = config::reference_ranges_path()
        .map(|path| ReferenceRangeTable::load_or_builtin(&path))
        .unwrap_or_default();
    let pipeline = AnalysisPipeline::new(providers, ranges, ExtractionSettings::default());
    tracing::info!(
        providers = ?pipeline.provider_names(),
        ranges = pipeline.ranges.len(),
        "Analysis pipeline ready"
    );
    pipeline
}

use serde::{Deserialize, Deserializer, Serialize};

use super::ProviderError;
use crate::models::{PatientInfo, TestObservation};

/// Structured output of the extraction stage, in whichever of the three
/// shapes the provider produced. Detected once at the parse boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionResult {
    /// Flat patient + tests, no per-test date.
    Legacy {
        patient: PatientInfo,
        tests: Vec<TestObservation>,
    },
    /// One date per page.
    PageBased(PageReport),
    /// One entry per historical sample, each with its own date.
    EntryArray(Vec<SampleEntry>),
}

impl ExtractionResult {
    /// The well-formed result returned when every stage came back empty.
    pub fn empty() -> Self {
        Self::Legacy {
            patient: PatientInfo::default(),
            tests: Vec::new(),
        }
    }

    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::Legacy { .. } => "legacy",
            Self::PageBased(_) => "page_based",
            Self::EntryArray(_) => "entry_array",
        }
    }

    /// Number of test readings carried, regardless of shape.
    pub fn observation_count(&self) -> usize {
        match self {
            Self::Legacy { tests, .. } => tests.len(),
            Self::PageBased(report) => report.pages.iter().map(|p| p.tests.len()).sum(),
            Self::EntryArray(entries) => entries.iter().map(|e| e.data_points.len()).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.observation_count() == 0
    }

    /// Patient identity, normalized across shapes.
    pub fn patient(&self) -> PatientInfo {
        match self {
            Self::Legacy { patient, .. } => patient.clone(),
            Self::PageBased(report) => PatientInfo {
                name: report.patient_name.clone(),
                age: report.age,
                gender: report.gender.clone(),
            },
            Self::EntryArray(entries) => PatientInfo {
                name: entries.iter().find_map(|e| non_blank(e.patient_name.as_deref())),
                age: entries.iter().find_map(|e| e.age),
                gender: entries.iter().find_map(|e| non_blank(e.gender.as_deref())),
            },
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageReport {
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub patient_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_age")]
    pub age: Option<u32>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub gender: Option<String>,
    #[serde(default)]
    pub pages: Vec<ReportPage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportPage {
    #[serde(default)]
    pub page_number: Option<u32>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub date: Option<String>,
    #[serde(default)]
    pub tests: Vec<FlaggedReading>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleEntry {
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub patient_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_age")]
    pub age: Option<u32>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub gender: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub sample_date: Option<String>,
    #[serde(default)]
    pub data_points: Vec<FlaggedReading>,
}

/// A reading that carries only a boolean abnormal flag instead of an
/// interpretation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlaggedReading {
    #[serde(alias = "test_name")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub value: String,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub unit: Option<String>,
    #[serde(default)]
    pub is_abnormal: bool,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub reference_range: Option<String>,
}

/// Text-in / text-out gateway to a generative model. Implementations must
/// not retry: the caller owns fallback ordering.
pub trait LlmClient: Send + Sync {
    /// Short label used in logs ("openai", "ollama").
    fn name(&self) -> &str;

    fn complete(
        &self,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, ProviderError>;
}

// ── Lenient field decoding ────────────────────────────────────────────────
//
// Models emit numbers where strings were requested and vice versa. These
// helpers accept either without failing the whole record.

fn value_to_string(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

pub(crate) fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    let value = serde_json::Value::deserialize(d)?;
    Ok(value_to_string(value).unwrap_or_default())
}

pub(crate) fn lenient_opt_string<'de, D: Deserializer<'de>>(
    d: D,
) -> Result<Option<String>, D::Error> {
    let value = serde_json::Value::deserialize(d)?;
    Ok(value_to_string(value).filter(|s| !s.trim().is_empty() && s.trim() != "null"))
}

pub(crate) fn lenient_age<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u32>, D::Error> {
    let value = serde_json::Value::deserialize(d)?;
    Ok(match value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .and_then(|n| u32::try_from(n).ok()),
        serde_json::Value::String(s) => s
            .split(|c: char| !c.is_ascii_digit())
            .find(|part| !part.is_empty())
            .and_then(|digits| digits.parse().ok()),
        _ => None,
    })
}

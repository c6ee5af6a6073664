use serde::Deserialize;
use serde_json::Value;

use super::types::{
    lenient_age, lenient_opt_string, lenient_string, ExtractionResult, PageReport, SampleEntry,
};
use super::StructuringError;
use crate::models::{Interpretation, PatientInfo, TestObservation};

/// Upper bound on repair attempts for a single truncated response.
const MAX_RECOVERY_ATTEMPTS: usize = 64;

/// Parse a model response into JSON, recovering truncated output where a
/// structurally complete prefix exists.
pub fn parse_json_response(raw: &str) -> Result<Value, StructuringError> {
    let body = strip_code_fence(raw);

    let direct_error = match serde_json::from_str::<Value>(body) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    if let Some(value) = recover_balanced_prefix(body) {
        tracing::debug!(
            response_len = body.len(),
            "Recovered JSON from truncated model response"
        );
        return Ok(value);
    }

    Err(StructuringError::JsonParsing(direct_error.to_string()))
}

/// Strip one leading ```json / ``` marker and one trailing ``` marker.
fn strip_code_fence(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    text.trim()
}

/// A point where the scanner saw a container close, with the closers that
/// would be needed to finish everything still open at that point.
struct CutPoint {
    end: usize,
    closers: String,
}

/// Scan for bracket balance outside string literals, starting at the first
/// `{` or `[`. Returns cut points in scan order.
fn scan_cut_points(text: &str) -> (usize, Vec<CutPoint>) {
    let start = match text.find(['{', '[']) {
        Some(i) => i,
        None => return (0, Vec::new()),
    };

    let mut stack: Vec<char> = Vec::new();
    let mut cuts = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        let index = start + offset;
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop() != Some(ch) {
                    // Mismatched closer: nothing after this point is trustworthy.
                    break;
                }
                cuts.push(CutPoint {
                    end: index,
                    closers: stack.iter().rev().collect(),
                });
            }
            _ => {}
        }
    }

    (start, cuts)
}

/// Recover the longest parseable prefix of a truncated response.
///
/// First tries prefixes ending where depth returned to zero. Failing that,
/// tries prefixes ending after any closed inner container with the still-open
/// containers closed, newest first. Unbalanced quotes are never repaired.
fn recover_balanced_prefix(text: &str) -> Option<Value> {
    let (start, cuts) = scan_cut_points(text);

    let zero_depth = cuts
        .iter()
        .rev()
        .filter(|c| c.closers.is_empty() && c.end > start);
    for cut in zero_depth.take(MAX_RECOVERY_ATTEMPTS) {
        if let Ok(value) = serde_json::from_str::<Value>(&text[start..=cut.end]) {
            return Some(value);
        }
    }

    let nested = cuts.iter().rev().filter(|c| !c.closers.is_empty());
    for cut in nested.take(MAX_RECOVERY_ATTEMPTS) {
        let mut candidate = String::with_capacity(cut.end - start + cut.closers.len() + 1);
        candidate.push_str(&text[start..=cut.end]);
        candidate.push_str(&cut.closers);
        if let Ok(value) = serde_json::from_str::<Value>(&candidate) {
            return Some(value);
        }
    }

    None
}

// ── Shape detection ───────────────────────────────────────────────────────

/// Legacy test entry as emitted by the extraction prompt.
#[derive(Deserialize)]
struct RawLegacyTest {
    #[serde(alias = "name")]
    test_name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    value: String,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    unit: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    reference_range: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    interpretation: Option<String>,
}

impl From<RawLegacyTest> for TestObservation {
    fn from(raw: RawLegacyTest) -> Self {
        Self {
            test_name: raw.test_name.trim().to_string(),
            value: raw.value.trim().to_string(),
            unit: raw.unit,
            reference_range: raw.reference_range,
            interpretation: raw
                .interpretation
                .as_deref()
                .map(Interpretation::normalize)
                .unwrap_or_default(),
            explanation: None,
        }
    }
}

#[derive(Deserialize, Default)]
struct RawPatient {
    #[serde(default, deserialize_with = "lenient_opt_string")]
    name: Option<String>,
    #[serde(default, deserialize_with = "lenient_age")]
    age: Option<u32>,
    #[serde(default, alias = "sex", deserialize_with = "lenient_opt_string")]
    gender: Option<String>,
}

/// Classify parsed JSON into one of the three result shapes.
///
/// Accepts a bare array (entry array), an object with `pages` (page based),
/// or an object with `patient` and/or `tests` (legacy). Anything else is a
/// shape error, which callers treat like a parse failure.
pub fn classify_payload(value: Value) -> Result<ExtractionResult, StructuringError> {
    match value {
        Value::Array(items) => Ok(ExtractionResult::EntryArray(parse_array_lenient(&items))),
        Value::Object(map) => {
            if map.get("pages").is_some_and(Value::is_array) {
                let report: PageReport = serde_json::from_value(Value::Object(map))
                    .map_err(|e| StructuringError::UnexpectedShape(e.to_string()))?;
                return Ok(ExtractionResult::PageBased(report));
            }

            if map.contains_key("tests") || map.contains_key("patient") {
                let patient: RawPatient = map
                    .get("patient")
                    .cloned()
                    .and_then(|p| serde_json::from_value(p).ok())
                    .unwrap_or_default();
                let tests: Vec<RawLegacyTest> = match map.get("tests") {
                    Some(Value::Array(items)) => parse_array_lenient(items),
                    Some(Value::Null) | None => Vec::new(),
                    Some(_) => {
                        return Err(StructuringError::UnexpectedShape(
                            "`tests` is not an array".into(),
                        ))
                    }
                };
                return Ok(ExtractionResult::Legacy {
                    patient: PatientInfo {
                        name: patient.name,
                        age: patient.age,
                        gender: patient.gender,
                    },
                    tests: tests
                        .into_iter()
                        .map(TestObservation::from)
                        .filter(|t| !t.test_name.is_empty())
                        .collect(),
                });
            }

            let keys: Vec<&str> = map.keys().map(String::as_str).collect();
            Err(StructuringError::UnexpectedShape(format!(
                "no recognized top-level key (found: {})",
                keys.join(", ")
            )))
        }
        other => Err(StructuringError::UnexpectedShape(format!(
            "expected object or array, got {}",
            json_kind(&other)
        ))),
    }
}

/// Parse an array leniently, skipping items that fail to deserialize.
fn parse_array_lenient<T: for<'de> Deserialize<'de>>(items: &[Value]) -> Vec<T> {
    items
        .iter()
        .filter_map(|v| serde_json::from_value(v.clone()).ok())
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Recover, parse and classify a raw model response in one step.
pub fn parse_extraction_response(raw: &str) -> Result<ExtractionResult, StructuringError> {
    let value = parse_json_response(raw)?;
    classify_payload(value)
}

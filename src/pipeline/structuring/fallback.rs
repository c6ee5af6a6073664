use std::sync::LazyLock;

use regex::Regex;

use super::types::ExtractionResult;
use crate::intelligence::interpret;
use crate::models::{Interpretation, PatientInfo, TestObservation};

/// One test per line: name, value, optional unit, optional range, optional
/// trailing H/L flag. The whole line must be consumed.
static TEST_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)^\s*
        (?P<name>[A-Za-z][A-Za-z0-9\ ().,%+\-]*?)
        (?:\s*[:=]\s*|\s+)
        (?P<value>[<>]?\s?\d+(?:[.,]\d+)*)
        (?:\s*(?P<unit>[A-Za-zµμ%][A-Za-z0-9µμ%/^.*]*))?
        (?:\s*[\[(]?\s*(?P<range>\d+(?:\.\d+)?\s*[-–]\s*\d+(?:\.\d+)?|[<>]=?\s*\d+(?:\.\d+)?)\s*[\])]?)?
        (?:\s+(?P<flag>H|L|HIGH|LOW|High|Low))?
        \s*$",
    )
    .unwrap()
});

static PATIENT_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)^\s*(?:patient(?:\s+name)?|name)\s*[:\-]\s*(?P<name>[A-Za-z][A-Za-z .'\-]{1,60}?)\s*(?:$|\s{2,}|\b(?:age|sex|gender|dob)\b)",
    )
    .unwrap()
});

static PATIENT_AGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bage\s*[:\-]?\s*(?P<age>\d{1,3})\b").unwrap());

static PATIENT_GENDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:sex|gender)\s*[:\-]?\s*(?P<gender>male|female|m|f)\b").unwrap()
});

/// Leading words of lines that look like "Label 12" but are report metadata.
const HEADER_WORDS: &[&str] = &[
    "age", "date", "page", "patient", "name", "sex", "gender", "dob", "collected", "reported",
    "received", "registered", "printed", "phone", "tel", "id", "mrn", "ref", "report", "sample",
    "specimen", "time", "room", "bed", "ward", "lab", "order", "accession",
];

/// Deterministic last-resort extractor. Never fails; returns a Legacy result
/// that may be empty.
pub fn extract_with_patterns(text: &str) -> ExtractionResult {
    let patient = extract_patient(text);
    let tests: Vec<TestObservation> = text.lines().filter_map(parse_test_line).collect();

    tracing::debug!(tests = tests.len(), "Pattern extraction complete");
    ExtractionResult::Legacy { patient, tests }
}

fn extract_patient(text: &str) -> PatientInfo {
    let name = PATIENT_NAME
        .captures(text)
        .map(|c| c["name"].trim().to_string())
        .filter(|n| !n.is_empty());
    let age = PATIENT_AGE
        .captures(text)
        .and_then(|c| c["age"].parse::<u32>().ok())
        .filter(|a| *a <= 130);
    let gender = PATIENT_GENDER.captures(text).map(|c| {
        match c["gender"].to_lowercase().as_str() {
            "m" | "male" => "Male".to_string(),
            _ => "Female".to_string(),
        }
    });

    PatientInfo { name, age, gender }
}

fn parse_test_line(line: &str) -> Option<TestObservation> {
    let caps = TEST_LINE.captures(line)?;
    let name = caps["name"].trim().trim_end_matches([',', '.', '-']).trim();

    if name.chars().filter(|c| c.is_alphabetic()).count() < 2 || is_header_label(name) {
        return None;
    }

    let value: String = caps["value"].chars().filter(|c| !c.is_whitespace()).collect();
    let range = caps.name("range").map(|m| m.as_str().trim().to_string());
    let interpretation = match (&range, caps.name("flag")) {
        (Some(r), _) => interpret(&value, Some(r)),
        (None, Some(flag)) if flag.as_str().starts_with(['H', 'h']) => Interpretation::High,
        (None, Some(_)) => Interpretation::Low,
        (None, None) => Interpretation::Unknown,
    };

    Some(TestObservation {
        test_name: name.to_string(),
        value,
        unit: caps.name("unit").map(|m| m.as_str().to_string()),
        reference_range: range,
        interpretation,
        explanation: None,
    })
}

fn is_header_label(name: &str) -> bool {
    let first = name
        .split(|c: char| !c.is_alphanumeric())
        .next()
        .unwrap_or_default()
        .to_lowercase();
    HEADER_WORDS.contains(&first.as_str())
}

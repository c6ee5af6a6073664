use serde::{Deserialize, Serialize};

use super::types::CanonicalResult;
use crate::models::{Interpretation, TestObservation};

/// Report-level counts and follow-up notes, kept apart from the per-test data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_tests: usize,
    pub high_count: usize,
    pub normal_count: usize,
    pub low_count: usize,
    pub unknown_count: usize,
    /// Distinct names of tests interpreted High or Low, in report order.
    pub abnormal_tests: Vec<String>,
    /// Number of groups keyed by a real date.
    pub sample_dates: usize,
    pub most_recent_date: Option<String>,
    pub notes: Vec<String>,
}

impl ReportSummary {
    pub fn from_result(result: &CanonicalResult) -> Self {
        let mut summary = Self {
            total_tests: result.tests.len(),
            most_recent_date: result.most_recent_date().map(str::to_string),
            sample_dates: result
                .date_order
                .iter()
                .filter(|key| chrono::NaiveDate::parse_from_str(key, "%Y-%m-%d").is_ok())
                .count(),
            ..Self::default()
        };

        for test in &result.tests {
            match test.interpretation {
                Interpretation::High => summary.high_count += 1,
                Interpretation::Normal => summary.normal_count += 1,
                Interpretation::Low => summary.low_count += 1,
                Interpretation::Unknown => summary.unknown_count += 1,
            }
            if test.interpretation.is_abnormal() && !summary.abnormal_tests.contains(&test.test_name) {
                summary.abnormal_tests.push(test.test_name.clone());
            }
        }

        summary.notes = follow_up_notes(result, &summary);
        summary
    }

    pub fn abnormal_count(&self) -> usize {
        self.high_count + self.low_count
    }
}

fn follow_up_notes(result: &CanonicalResult, summary: &ReportSummary) -> Vec<String> {
    if summary.total_tests == 0 {
        return vec!["No lab results could be read from this report.".to_string()];
    }

    let mut notes = Vec::new();
    // First reading per test in `date_order` drives the note.
    let mut noted: Vec<&str> = Vec::new();
    for test in &result.tests {
        if noted.contains(&test.test_name.as_str()) {
            continue;
        }
        noted.push(&test.test_name);
        if let Some(note) = abnormal_note(test) {
            notes.push(note);
        }
    }

    if summary.abnormal_count() == 0 && summary.unknown_count < summary.total_tests {
        notes.push("All interpreted results are within their reference ranges.".to_string());
    }
    if summary.unknown_count > 0 {
        notes.push(format!(
            "{} result(s) could not be compared with a reference range.",
            summary.unknown_count
        ));
    }
    if !notes.is_empty() && summary.abnormal_count() > 0 {
        notes.push("Discuss results outside the reference range with your doctor.".to_string());
    }
    notes
}

fn abnormal_note(test: &TestObservation) -> Option<String> {
    let direction = match test.interpretation {
        Interpretation::High => "above",
        Interpretation::Low => "below",
        _ => return None,
    };
    let reading = match test.unit.as_deref() {
        Some(unit) => format!("{} {}", test.value, unit),
        None => test.value.clone(),
    };
    Some(match test.reference_range.as_deref() {
        Some(range) => format!(
            "{} ({reading}) is {direction} the reference range {range}.",
            test.test_name
        ),
        None => format!("{} ({reading}) is {direction} the reference range.", test.test_name),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExtractionStatus, PatientInfo};
    use std::collections::BTreeMap;

    fn result(groups: Vec<(&str, Vec<TestObservation>)>) -> CanonicalResult {
        let groups: BTreeMap<String, Vec<TestObservation>> =
            groups.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        CanonicalResult::from_groups(PatientInfo::default(), groups, ExtractionStatus::Ok)
    }

    #[test]
    fn counts_interpretations_and_abnormal_names() {
        let result = result(vec![
            (
                "2024-03-01",
                vec![
                    TestObservation::new("LDL", "162")
                        .with_unit("mg/dL")
                        .with_range("< 100")
                        .with_interpretation(Interpretation::High),
                    TestObservation::new("Hemoglobin", "11.2")
                        .with_interpretation(Interpretation::Low),
                    TestObservation::new("Sodium", "139").with_interpretation(Interpretation::Normal),
                ],
            ),
            (
                "2023-09-01",
                vec![TestObservation::new("LDL", "150").with_interpretation(Interpretation::High)],
            ),
            ("unassigned", vec![TestObservation::new("Note", "n/a")]),
        ]);

        let summary = ReportSummary::from_result(&result);
        assert_eq!(summary.total_tests, 5);
        assert_eq!((summary.high_count, summary.low_count), (2, 1));
        assert_eq!((summary.normal_count, summary.unknown_count), (1, 1));
        assert_eq!(summary.abnormal_tests, vec!["LDL", "Hemoglobin"]);
        assert_eq!(summary.sample_dates, 2);
        assert_eq!(summary.most_recent_date.as_deref(), Some("2024-03-01"));

        assert_eq!(summary.notes[0], "LDL (162 mg/dL) is above the reference range < 100.");
        assert_eq!(summary.notes[1], "Hemoglobin (11.2) is below the reference range.");
        assert!(summary.notes.iter().any(|n| n.starts_with("1 result(s)")));
        assert!(summary.notes.last().unwrap().contains("doctor"));
    }

    #[test]
    fn all_normal_report() {
        let result = result(vec![(
            "latest",
            vec![TestObservation::new("Sodium", "139").with_interpretation(Interpretation::Normal)],
        )]);
        let summary = ReportSummary::from_result(&result);
        assert_eq!(summary.sample_dates, 0);
        assert!(summary.most_recent_date.is_none());
        assert_eq!(
            summary.notes,
            vec!["All interpreted results are within their reference ranges."]
        );
    }

    #[test]
    fn empty_report_has_single_note() {
        let summary = ReportSummary::from_result(&CanonicalResult::empty(PatientInfo::default()));
        assert_eq!(summary.total_tests, 0);
        assert_eq!(summary.notes.len(), 1);
    }
}

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::summary::ReportSummary;
use crate::models::{ExtractionStatus, PatientInfo, TestObservation};

/// Group key for tests when the report carries no usable date at all.
pub const LATEST_KEY: &str = "latest";
/// Group key for tests that could not be tied to any known date.
pub const UNASSIGNED_KEY: &str = "unassigned";

/// Date-grouped, shape-independent view of one analyzed report.
///
/// Every test in `tests` appears in exactly one group of `tests_by_date`,
/// and `date_order` lists exactly the group keys in descending string
/// order. ISO dates therefore run newest first, and the sentinel keys sort
/// ahead of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalResult {
    pub patient: PatientInfo,
    pub tests: Vec<TestObservation>,
    pub tests_by_date: BTreeMap<String, Vec<TestObservation>>,
    pub date_order: Vec<String>,
    pub extraction_status: ExtractionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<ReportSummary>,
}

impl CanonicalResult {
    /// Build from raw groups. Empty groups are pruned and the flat list is
    /// rebuilt in `date_order`. `status` is replaced by `Empty` when no
    /// tests remain.
    pub fn from_groups(
        patient: PatientInfo,
        groups: BTreeMap<String, Vec<TestObservation>>,
        status: ExtractionStatus,
    ) -> Self {
        let tests_by_date: BTreeMap<String, Vec<TestObservation>> = groups
            .into_iter()
            .filter(|(_, tests)| !tests.is_empty())
            .collect();

        let mut date_order: Vec<String> = tests_by_date.keys().cloned().collect();
        date_order.sort_by(|a, b| b.cmp(a));

        let tests: Vec<TestObservation> = date_order
            .iter()
            .filter_map(|key| tests_by_date.get(key))
            .flatten()
            .cloned()
            .collect();

        let extraction_status = if tests.is_empty() {
            ExtractionStatus::Empty
        } else {
            status
        };

        Self {
            patient,
            tests,
            tests_by_date,
            date_order,
            extraction_status,
            summary: None,
        }
    }

    pub fn empty(patient: PatientInfo) -> Self {
        Self::from_groups(patient, BTreeMap::new(), ExtractionStatus::Empty)
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Most recent real sample date, ignoring sentinel keys.
    pub fn most_recent_date(&self) -> Option<&str> {
        self.date_order
            .iter()
            .map(String::as_str)
            .find(|key| parse_date_key(key).is_some())
    }

    /// Apply `f` to every observation, keeping the flat list and the groups
    /// identical.
    pub fn map_tests<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut TestObservation),
    {
        for group in self.tests_by_date.values_mut() {
            group.iter_mut().for_each(&mut f);
        }
        self.tests = self
            .date_order
            .iter()
            .filter_map(|key| self.tests_by_date.get(key))
            .flatten()
            .cloned()
            .collect();
    }
}

fn parse_date_key(key: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(key, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(name: &str) -> TestObservation {
        TestObservation::new(name, "1")
    }

    fn groups(pairs: Vec<(&str, Vec<TestObservation>)>) -> BTreeMap<String, Vec<TestObservation>> {
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn date_order_is_descending_string_order() {
        let result = CanonicalResult::from_groups(
            PatientInfo::default(),
            groups(vec![
                ("2023-01-05", vec![obs("A")]),
                (UNASSIGNED_KEY, vec![obs("B")]),
                ("2024-02-01", vec![obs("C"), obs("D")]),
            ]),
            ExtractionStatus::Ok,
        );
        assert_eq!(result.date_order, vec!["unassigned", "2024-02-01", "2023-01-05"]);
        let names: Vec<&str> = result.tests.iter().map(|t| t.test_name.as_str()).collect();
        assert_eq!(names, vec!["B", "C", "D", "A"]);
        assert_eq!(result.most_recent_date(), Some("2024-02-01"));
    }

    #[test]
    fn empty_groups_are_pruned() {
        let result = CanonicalResult::from_groups(
            PatientInfo::default(),
            groups(vec![("2024-01-01", vec![]), (LATEST_KEY, vec![obs("A")])]),
            ExtractionStatus::Ok,
        );
        assert_eq!(result.date_order, vec!["latest"]);
        assert_eq!(result.tests_by_date.len(), 1);
        assert_eq!(result.most_recent_date(), None);
    }

    #[test]
    fn no_tests_means_empty_status() {
        let result = CanonicalResult::from_groups(
            PatientInfo::default(),
            groups(vec![("2024-01-01", vec![])]),
            ExtractionStatus::Ok,
        );
        assert_eq!(result.extraction_status, ExtractionStatus::Empty);
        assert!(result.date_order.is_empty());
        assert!(result.tests_by_date.is_empty());
        assert!(CanonicalResult::empty(PatientInfo::default()).is_empty());
    }

    #[test]
    fn map_tests_updates_flat_list_and_groups() {
        let mut result = CanonicalResult::from_groups(
            PatientInfo::default(),
            groups(vec![("2024-01-01", vec![obs("A")]), ("2023-01-01", vec![obs("B")])]),
            ExtractionStatus::Ok,
        );
        result.map_tests(|t| t.explanation = Some(format!("about {}", t.test_name)));

        assert_eq!(result.tests[0].explanation.as_deref(), Some("about A"));
        assert_eq!(
            result.tests_by_date["2023-01-01"][0].explanation.as_deref(),
            Some("about B")
        );
    }

    #[test]
    fn serializes_status_and_skips_missing_summary() {
        let result = CanonicalResult::empty(PatientInfo::default());
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["extraction_status"], "empty");
        assert!(json.get("summary").is_none());
    }
}

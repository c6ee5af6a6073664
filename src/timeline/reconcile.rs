use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::NaiveDate;
use regex::Regex;

use super::dates::{find_date_mentions, parse_sample_date, DateExtractor, DateMention};
use super::types::{CanonicalResult, LATEST_KEY, UNASSIGNED_KEY};
use crate::config::ExtractionSettings;
use crate::models::{ExtractionStatus, Interpretation, TestObservation};
use crate::pipeline::structuring::{ExtractionResult, FlaggedReading, PageReport, SampleEntry};

type Groups = BTreeMap<String, Vec<TestObservation>>;

/// Merge any extraction shape into the canonical date-grouped result.
///
/// `dates` are the sample dates known for the report; when `None` they are
/// scanned from `raw_text` within the default year bounds. Only Legacy
/// results consult them. Pure: the same inputs always give the same output.
pub fn reconcile(
    result: &ExtractionResult,
    raw_text: &str,
    dates: Option<&[NaiveDate]>,
) -> CanonicalResult {
    reconcile_with(result, raw_text, dates, &ExtractionSettings::default())
}

/// [`reconcile`] with the caller's year bounds applied to scanned dates.
pub fn reconcile_with(
    result: &ExtractionResult,
    raw_text: &str,
    dates: Option<&[NaiveDate]>,
    settings: &ExtractionSettings,
) -> CanonicalResult {
    let (mut groups, dropped) = match result {
        ExtractionResult::PageBased(report) => group_pages(report),
        ExtractionResult::EntryArray(entries) => (group_entries(entries), 0),
        ExtractionResult::Legacy { tests, .. } => {
            let scanned;
            let known: &[NaiveDate] = match dates {
                Some(d) => d,
                None => {
                    scanned = DateExtractor::new(Vec::new(), settings.clone()).scan_dates(raw_text);
                    scanned.as_slice()
                }
            };
            (group_by_mentions(tests, raw_text, known), 0)
        }
    };

    groups.retain(|_, tests| !tests.is_empty());
    if groups.len() == 1 {
        if let Some(tests) = groups.remove(UNASSIGNED_KEY) {
            groups.insert(LATEST_KEY.to_string(), tests);
        }
    }

    let status = if dropped > 0 {
        tracing::debug!(dropped, "Readings on undated pages were dropped");
        ExtractionStatus::Partial
    } else {
        ExtractionStatus::Ok
    };
    CanonicalResult::from_groups(result.patient(), groups, status)
}

fn to_observation(reading: &FlaggedReading) -> TestObservation {
    TestObservation {
        test_name: reading.name.trim().to_string(),
        value: reading.value.trim().to_string(),
        unit: reading.unit.clone(),
        reference_range: reading.reference_range.clone(),
        interpretation: Interpretation::from_abnormal_flag(reading.is_abnormal),
        explanation: None,
    }
}

/// ISO key for a model-supplied date string; unparseable dates are unassigned.
fn date_key(raw: &str) -> String {
    match parse_sample_date(raw) {
        Some(date) => date.format("%Y-%m-%d").to_string(),
        None => {
            tracing::debug!(value = %raw, "Unparseable sample date");
            UNASSIGNED_KEY.to_string()
        }
    }
}

/// Pages sharing a date merge; pages without a date contribute nothing.
/// Returns the groups and the number of dropped readings.
fn group_pages(report: &PageReport) -> (Groups, usize) {
    let mut groups = Groups::new();
    let mut dropped = 0;
    for page in &report.pages {
        match page.date.as_deref() {
            Some(raw) => groups
                .entry(date_key(raw))
                .or_default()
                .extend(page.tests.iter().map(to_observation)),
            None => dropped += page.tests.len(),
        }
    }
    (groups, dropped)
}

fn group_entries(entries: &[SampleEntry]) -> Groups {
    let mut groups = Groups::new();
    for entry in entries {
        let key = entry
            .sample_date
            .as_deref()
            .map(date_key)
            .unwrap_or_else(|| UNASSIGNED_KEY.to_string());
        groups
            .entry(key)
            .or_default()
            .extend(entry.data_points.iter().map(to_observation));
    }
    groups
}

/// Assign each test the latest of the dates mentioned nearest before any
/// occurrence of its name. Readings of one test from several dates can
/// collapse onto the same date.
fn group_by_mentions(tests: &[TestObservation], raw_text: &str, dates: &[NaiveDate]) -> Groups {
    let mut groups = Groups::new();
    if dates.is_empty() {
        groups.insert(LATEST_KEY.to_string(), tests.to_vec());
        return groups;
    }

    let known: BTreeSet<NaiveDate> = dates.iter().copied().collect();
    // Ambiguous numeric mentions take whichever reading is a known date.
    let mentions: Vec<DateMention> = find_date_mentions(raw_text)
        .into_iter()
        .filter_map(|m| {
            m.resolve_in(&known).map(|date| DateMention {
                date,
                alternate: None,
                ..m
            })
        })
        .collect();

    let mut assigned: HashMap<&str, Option<NaiveDate>> = HashMap::new();
    for test in tests {
        let date = *assigned
            .entry(test.test_name.as_str())
            .or_insert_with(|| nearest_preceding_date(&test.test_name, raw_text, &mentions));
        let key = date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| UNASSIGNED_KEY.to_string());
        groups.entry(key).or_default().push(test.clone());
    }
    groups
}

fn nearest_preceding_date(name: &str, raw_text: &str, mentions: &[DateMention]) -> Option<NaiveDate> {
    let name = name.trim();
    if name.is_empty() || mentions.is_empty() {
        return None;
    }
    let pattern = Regex::new(&format!("(?i){}", regex::escape(name))).ok()?;

    pattern
        .find_iter(raw_text)
        .filter_map(|occurrence| {
            let before = mentions.partition_point(|m| m.offset < occurrence.start());
            before.checked_sub(1).map(|i| mentions[i].date)
        })
        .max()
}

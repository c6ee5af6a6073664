use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::ReferenceDataError;
use crate::models::{Gender, Interpretation, PatientContext, TestObservation};
use crate::pipeline::structuring::{ExtractionResult, FlaggedReading};

/// Age below which a `child` sub-range applies.
const ADULT_AGE: u32 = 18;

/// Sub-range keys consulted after the gender pair, in order.
const SUB_RANGE_PRECEDENCE: &[&str] = &["total", "normal", "optimal", "fasting", "default"];

/// Built-in adult reference ranges in conventional US units.
const BUILTIN_RANGES: &[(&str, &[(&str, &str)])] = &[
    ("HEMOGLOBIN", &[("male", "13.5-17.5"), ("female", "12.0-15.5"), ("child", "11.0-14.5")]),
    ("HEMATOCRIT", &[("male", "41-53"), ("female", "36-46")]),
    ("RBC", &[("male", "4.5-5.9"), ("female", "4.1-5.1")]),
    ("WBC", &[("default", "4.0-11.0")]),
    ("PLATELETS", &[("default", "150-400")]),
    ("MCV", &[("default", "80-100")]),
    ("MCH", &[("default", "27-33")]),
    ("MCHC", &[("default", "32-36")]),
    ("ESR", &[("male", "0-15"), ("female", "0-20")]),
    ("GLUCOSE", &[("fasting", "70-100"), ("random", "70-140")]),
    ("HBA1C", &[("normal", "< 5.7"), ("prediabetes", "5.7-6.4")]),
    ("CHOLESTEROL", &[("total", "< 200"), ("borderline", "200-239")]),
    ("LDL", &[("optimal", "< 100"), ("borderline", "130-159")]),
    ("HDL", &[("male", "> 40"), ("female", "> 50")]),
    ("TRIGLYCERIDES", &[("normal", "< 150"), ("borderline", "150-199")]),
    ("CREATININE", &[("male", "0.7-1.3"), ("female", "0.6-1.1"), ("child", "0.3-0.7")]),
    ("BUN", &[("default", "7-20")]),
    ("URIC ACID", &[("male", "3.4-7.0"), ("female", "2.4-6.0")]),
    ("SODIUM", &[("default", "135-145")]),
    ("POTASSIUM", &[("default", "3.5-5.1")]),
    ("CHLORIDE", &[("default", "98-107")]),
    ("CALCIUM", &[("default", "8.5-10.5")]),
    ("ALT", &[("default", "7-56")]),
    ("AST", &[("default", "10-40")]),
    ("ALP", &[("normal", "44-147"), ("child", "100-390")]),
    ("BILIRUBIN", &[("total", "0.1-1.2"), ("direct", "0.0-0.3")]),
    ("ALBUMIN", &[("default", "3.5-5.0")]),
    ("TOTAL PROTEIN", &[("default", "6.0-8.3")]),
    ("TSH", &[("default", "0.4-4.0")]),
    ("FREE T4", &[("default", "0.8-1.8")]),
    ("T3", &[("default", "80-200")]),
    ("VITAMIN D", &[("optimal", "30-100")]),
    ("VITAMIN B12", &[("default", "200-900")]),
    ("FERRITIN", &[("male", "24-336"), ("female", "11-307")]),
    ("IRON", &[("default", "60-170")]),
    ("CRP", &[("normal", "< 3.0")]),
];

const BUILTIN_ALIASES: &[(&str, &str)] = &[
    ("HB", "HEMOGLOBIN"),
    ("HGB", "HEMOGLOBIN"),
    ("HAEMOGLOBIN", "HEMOGLOBIN"),
    ("HCT", "HEMATOCRIT"),
    ("PCV", "HEMATOCRIT"),
    ("RED BLOOD CELLS", "RBC"),
    ("RBC COUNT", "RBC"),
    ("WHITE BLOOD CELLS", "WBC"),
    ("WBC COUNT", "WBC"),
    ("TLC", "WBC"),
    ("PLT", "PLATELETS"),
    ("PLATELET COUNT", "PLATELETS"),
    ("FASTING GLUCOSE", "GLUCOSE"),
    ("FASTING BLOOD SUGAR", "GLUCOSE"),
    ("BLOOD SUGAR", "GLUCOSE"),
    ("FBS", "GLUCOSE"),
    ("HEMOGLOBIN A1C", "HBA1C"),
    ("A1C", "HBA1C"),
    ("GLYCATED HEMOGLOBIN", "HBA1C"),
    ("TOTAL CHOLESTEROL", "CHOLESTEROL"),
    ("LDL CHOLESTEROL", "LDL"),
    ("LDL-C", "LDL"),
    ("HDL CHOLESTEROL", "HDL"),
    ("HDL-C", "HDL"),
    ("SGPT", "ALT"),
    ("SGOT", "AST"),
    ("ALKALINE PHOSPHATASE", "ALP"),
    ("BLOOD UREA NITROGEN", "BUN"),
    ("SERUM CREATININE", "CREATININE"),
    ("TOTAL BILIRUBIN", "BILIRUBIN"),
    ("25-OH VITAMIN D", "VITAMIN D"),
    ("VITAMIN D3", "VITAMIN D"),
    ("FT4", "FREE T4"),
    ("C-REACTIVE PROTEIN", "CRP"),
    ("NA", "SODIUM"),
    ("K", "POTASSIUM"),
];

static NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").unwrap());

static BETWEEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<min>\d+(?:\.\d+)?)\s*(?:-|–|to)\s*(?P<max>\d+(?:\.\d+)?)").unwrap()
});

static BELOW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<\s*=?\s*(?P<max>\d+(?:\.\d+)?)").unwrap());

static ABOVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r">\s*=?\s*(?P<min>\d+(?:\.\d+)?)").unwrap());

static PARENTHETICAL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*\([^)]*\)").unwrap());

/// A table entry: either one range or named sub-ranges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RangeEntry {
    Single(String),
    Variants(BTreeMap<String, String>),
}

/// On-disk override format, merged over the built-in table.
#[derive(Debug, Default, Deserialize)]
struct RangeTableFile {
    #[serde(default)]
    ranges: HashMap<String, RangeEntry>,
    #[serde(default)]
    aliases: HashMap<String, String>,
}

/// Default reference ranges keyed by normalized test name.
#[derive(Debug, Clone)]
pub struct ReferenceRangeTable {
    entries: HashMap<String, RangeEntry>,
    aliases: HashMap<String, String>,
}

impl Default for ReferenceRangeTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ReferenceRangeTable {
    pub fn builtin() -> Self {
        let entries = BUILTIN_RANGES
            .iter()
            .map(|(name, subs)| {
                let variants = subs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect();
                (name.to_string(), RangeEntry::Variants(variants))
            })
            .collect();
        let aliases = BUILTIN_ALIASES
            .iter()
            .map(|(alias, canonical)| (alias.to_string(), canonical.to_string()))
            .collect();
        Self { entries, aliases }
    }

    /// Load a JSON override table and merge it over the built-in ranges.
    /// Entries in the file replace built-in entries of the same name.
    pub fn load(path: &Path) -> Result<Self, ReferenceDataError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ReferenceDataError::Load {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let file: RangeTableFile =
            serde_json::from_str(&raw).map_err(|e| ReferenceDataError::Parse {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        let mut table = Self::builtin();
        for (name, entry) in file.ranges {
            let entry = match entry {
                RangeEntry::Variants(map) => RangeEntry::Variants(
                    map.into_iter()
                        .map(|(k, v)| (k.trim().to_lowercase(), v))
                        .collect(),
                ),
                single => single,
            };
            table.entries.insert(normalize_test_name(&name), entry);
        }
        for (alias, canonical) in file.aliases {
            table
                .aliases
                .insert(normalize_test_name(&alias), normalize_test_name(&canonical));
        }
        Ok(table)
    }

    /// Load the override table when it exists, otherwise use the built-in
    /// ranges. A broken override file is logged and ignored.
    pub fn load_or_builtin(path: &Path) -> Self {
        if !path.exists() {
            return Self::builtin();
        }
        match Self::load(path) {
            Ok(table) => {
                tracing::info!(entries = table.len(), "Loaded reference range overrides");
                table
            }
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring reference range overrides");
                Self::builtin()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn lookup(&self, test_name: &str) -> Option<&RangeEntry> {
        let normalized = normalize_test_name(test_name);
        let stripped = normalize_test_name(&PARENTHETICAL.replace_all(test_name, ""));

        [normalized, stripped].into_iter().find_map(|key| {
            let canonical = self.aliases.get(&key).unwrap_or(&key);
            self.entries.get(canonical)
        })
    }

    /// Default range for a test, adjusted for the patient where the table
    /// carries sub-ranges. Unknown gender resolves to the male range.
    pub fn fill_range(&self, test_name: &str, ctx: &PatientContext) -> Option<String> {
        match self.lookup(test_name)? {
            RangeEntry::Single(range) => Some(range.clone()),
            RangeEntry::Variants(subs) => select_sub_range(subs, ctx).map(str::to_string),
        }
    }

    /// Populate missing ranges and infer interpretations that are still
    /// unknown. Readings that carry only an abnormal flag keep it.
    pub fn fill_gaps(&self, result: ExtractionResult, ctx: &PatientContext) -> ExtractionResult {
        match result {
            ExtractionResult::Legacy { patient, tests } => ExtractionResult::Legacy {
                patient,
                tests: tests
                    .into_iter()
                    .map(|t| self.fill_observation(t, ctx))
                    .collect(),
            },
            ExtractionResult::PageBased(mut report) => {
                for page in &mut report.pages {
                    for reading in &mut page.tests {
                        self.fill_reading(reading, ctx);
                    }
                }
                ExtractionResult::PageBased(report)
            }
            ExtractionResult::EntryArray(mut entries) => {
                for entry in &mut entries {
                    for reading in &mut entry.data_points {
                        self.fill_reading(reading, ctx);
                    }
                }
                ExtractionResult::EntryArray(entries)
            }
        }
    }

    fn fill_observation(&self, mut obs: TestObservation, ctx: &PatientContext) -> TestObservation {
        if !obs.has_range() {
            obs.reference_range = self.fill_range(&obs.test_name, ctx);
        }
        if obs.interpretation == Interpretation::Unknown {
            obs.interpretation = interpret(&obs.value, obs.reference_range.as_deref());
        }
        obs
    }

    fn fill_reading(&self, reading: &mut FlaggedReading, ctx: &PatientContext) {
        if reading.reference_range.is_none() {
            reading.reference_range = self.fill_range(&reading.name, ctx);
        }
    }
}

fn select_sub_range<'a>(subs: &'a BTreeMap<String, String>, ctx: &PatientContext) -> Option<&'a str> {
    if ctx.age.is_some_and(|age| age < ADULT_AGE) {
        if let Some(range) = subs.get("child") {
            return Some(range);
        }
    }

    let gender_key = match ctx.gender {
        Some(Gender::Female) => "female",
        Some(Gender::Male) | None => "male",
    };
    if let Some(range) = subs.get(gender_key) {
        return Some(range);
    }

    SUB_RANGE_PRECEDENCE
        .iter()
        .find_map(|key| subs.get(*key))
        .map(String::as_str)
}

/// Upper-case, trim and collapse internal whitespace.
pub fn normalize_test_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

/// Infer an interpretation from a value and a range string.
///
/// Uses the first number in the value (thousands separators ignored) and the
/// first matching range pattern: `min-max`, then `< max`, then `> min`.
/// Boundary values are `Normal`.
pub fn interpret(value: &str, range: Option<&str>) -> Interpretation {
    let Some(range) = range else {
        return Interpretation::Unknown;
    };
    let Some(number) = first_number(value) else {
        return Interpretation::Unknown;
    };
    let range = range.replace(',', "");

    if let Some(caps) = BETWEEN.captures(&range) {
        let (Ok(min), Ok(max)) = (caps["min"].parse::<f64>(), caps["max"].parse::<f64>()) else {
            return Interpretation::Unknown;
        };
        return if number < min {
            Interpretation::Low
        } else if number > max {
            Interpretation::High
        } else {
            Interpretation::Normal
        };
    }

    if let Some(max) = BELOW.captures(&range).and_then(|c| c["max"].parse::<f64>().ok()) {
        return if number > max {
            Interpretation::High
        } else {
            Interpretation::Normal
        };
    }

    if let Some(min) = ABOVE.captures(&range).and_then(|c| c["min"].parse::<f64>().ok()) {
        return if number < min {
            Interpretation::Low
        } else {
            Interpretation::Normal
        };
    }

    Interpretation::Unknown
}

fn first_number(value: &str) -> Option<f64> {
    let cleaned = value.replace(',', "");
    NUMBER.find(&cleaned)?.as_str().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PatientInfo;
    use crate::pipeline::structuring::{PageReport, ReportPage, SampleEntry};
    use std::io::Write;

    fn adult(gender: Option<Gender>) -> PatientContext {
        PatientContext {
            age: Some(40),
            gender,
        }
    }

    #[test]
    fn interpret_min_max() {
        assert_eq!(interpret("85", Some("70-100")), Interpretation::Normal);
        assert_eq!(interpret("65", Some("70-100")), Interpretation::Low);
        assert_eq!(interpret("150", Some("70-100")), Interpretation::High);
        assert_eq!(interpret("abc", Some("70-100")), Interpretation::Unknown);
        assert_eq!(interpret("85", None), Interpretation::Unknown);
    }

    #[test]
    fn interpret_upper_and_lower_bounds() {
        assert_eq!(interpret("250", Some("< 200")), Interpretation::High);
        assert_eq!(interpret("150", Some("< 200")), Interpretation::Normal);
        assert_eq!(interpret("45", Some("> 40")), Interpretation::Normal);
        assert_eq!(interpret("35", Some("> 40")), Interpretation::Low);
    }

    #[test]
    fn interpret_boundaries_are_normal() {
        assert_eq!(interpret("70", Some("70-100")), Interpretation::Normal);
        assert_eq!(interpret("100", Some("70-100")), Interpretation::Normal);
        assert_eq!(interpret("200", Some("< 200")), Interpretation::Normal);
        assert_eq!(interpret("40", Some(">= 40")), Interpretation::Normal);
    }

    #[test]
    fn interpret_handles_separators_and_units() {
        assert_eq!(interpret("1,250", Some("150-400")), Interpretation::High);
        assert_eq!(interpret("11.2 g/dL", Some("12.0–15.5 g/dL")), Interpretation::Low);
        assert_eq!(interpret("4.2", Some("3.5 to 5.1")), Interpretation::Normal);
        assert_eq!(interpret("5", Some("negative")), Interpretation::Unknown);
    }

    #[test]
    fn fill_range_uses_gender_pair() {
        let table = ReferenceRangeTable::builtin();
        assert_eq!(
            table.fill_range("Hemoglobin", &adult(Some(Gender::Female))).as_deref(),
            Some("12.0-15.5")
        );
        assert_eq!(
            table.fill_range("Hemoglobin", &adult(Some(Gender::Male))).as_deref(),
            Some("13.5-17.5")
        );
    }

    #[test]
    fn unknown_gender_defaults_to_male_range() {
        let table = ReferenceRangeTable::builtin();
        assert_eq!(
            table.fill_range("HDL", &PatientContext::default()).as_deref(),
            Some("> 40")
        );
    }

    #[test]
    fn child_range_takes_precedence_under_eighteen() {
        let table = ReferenceRangeTable::builtin();
        let child = PatientContext {
            age: Some(9),
            gender: Some(Gender::Female),
        };
        assert_eq!(table.fill_range("HGB", &child).as_deref(), Some("11.0-14.5"));
        // No child entry: falls through to the gender pair.
        assert_eq!(table.fill_range("HDL", &child).as_deref(), Some("> 50"));
    }

    #[test]
    fn sub_range_precedence_order() {
        let table = ReferenceRangeTable::builtin();
        let ctx = adult(None);
        assert_eq!(table.fill_range("Total Cholesterol", &ctx).as_deref(), Some("< 200"));
        assert_eq!(table.fill_range("HbA1c", &ctx).as_deref(), Some("< 5.7"));
        assert_eq!(table.fill_range("LDL Cholesterol", &ctx).as_deref(), Some("< 100"));
        assert_eq!(table.fill_range("Glucose", &ctx).as_deref(), Some("70-100"));
        assert_eq!(table.fill_range("bilirubin", &ctx).as_deref(), Some("0.1-1.2"));
    }

    #[test]
    fn lookup_normalizes_and_strips_parentheticals() {
        let table = ReferenceRangeTable::builtin();
        assert!(table.lookup("  hemoglobin ").is_some());
        assert!(table.lookup("Haemoglobin (Hb)").is_some());
        assert!(table.lookup("Unobtainium").is_none());
    }

    #[test]
    fn load_merges_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "ranges": {{
                    "tsh": "0.5-4.5",
                    "Homocysteine": {{"Male": "5-15", "female": "4-12"}}
                }},
                "aliases": {{"HCY": "homocysteine"}}
            }}"#
        )
        .unwrap();

        let table = ReferenceRangeTable::load(file.path()).unwrap();
        let ctx = adult(Some(Gender::Female));
        assert_eq!(table.fill_range("TSH", &ctx).as_deref(), Some("0.5-4.5"));
        assert_eq!(table.fill_range("hcy", &ctx).as_deref(), Some("4-12"));
        assert_eq!(table.fill_range("Sodium", &ctx).as_deref(), Some("135-145"));
        assert_eq!(table.len(), ReferenceRangeTable::builtin().len() + 1);
    }

    #[test]
    fn load_reports_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = ReferenceRangeTable::load(file.path()).unwrap_err();
        assert!(matches!(err, ReferenceDataError::Parse { .. }));

        let err = ReferenceRangeTable::load(Path::new("/nonexistent/ranges.json")).unwrap_err();
        assert!(matches!(err, ReferenceDataError::Load { .. }));
    }

    #[test]
    fn load_or_builtin_survives_missing_and_broken_files() {
        let table = ReferenceRangeTable::load_or_builtin(Path::new("/nonexistent/ranges.json"));
        assert_eq!(table.len(), ReferenceRangeTable::builtin().len());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{broken").unwrap();
        let table = ReferenceRangeTable::load_or_builtin(file.path());
        assert_eq!(table.len(), ReferenceRangeTable::builtin().len());
    }

    #[test]
    fn fill_gaps_populates_legacy_ranges_and_interpretations() {
        let table = ReferenceRangeTable::builtin();
        let result = ExtractionResult::Legacy {
            patient: PatientInfo::default(),
            tests: vec![
                TestObservation::new("Glucose", "128"),
                TestObservation::new("Sodium", "139").with_range("136-144"),
                TestObservation::new("TSH", "9.0").with_interpretation(Interpretation::Normal),
                TestObservation::new("Mystery Marker", "3"),
            ],
        };

        let filled = table.fill_gaps(result, &adult(None));
        let ExtractionResult::Legacy { tests, .. } = filled else {
            panic!("shape changed");
        };
        assert_eq!(tests[0].reference_range.as_deref(), Some("70-100"));
        assert_eq!(tests[0].interpretation, Interpretation::High);
        assert_eq!(tests[1].reference_range.as_deref(), Some("136-144"));
        assert_eq!(tests[1].interpretation, Interpretation::Normal);
        // Provider interpretation is kept even when it disagrees with the range.
        assert_eq!(tests[2].interpretation, Interpretation::Normal);
        assert_eq!(tests[2].reference_range.as_deref(), Some("0.4-4.0"));
        assert!(tests[3].reference_range.is_none());
        assert_eq!(tests[3].interpretation, Interpretation::Unknown);
    }

    #[test]
    fn fill_gaps_keeps_flag_shapes() {
        let table = ReferenceRangeTable::builtin();
        let reading = FlaggedReading {
            name: "Hemoglobin".into(),
            value: "12".into(),
            unit: Some("g/dL".into()),
            is_abnormal: true,
            reference_range: None,
        };
        let pages = ExtractionResult::PageBased(PageReport {
            patient_name: None,
            age: None,
            gender: None,
            pages: vec![ReportPage {
                page_number: Some(1),
                date: Some("2024-03-01".into()),
                tests: vec![reading.clone()],
            }],
        });
        let ExtractionResult::PageBased(report) = table.fill_gaps(pages, &adult(Some(Gender::Female)))
        else {
            panic!("shape changed");
        };
        assert_eq!(report.pages[0].tests[0].reference_range.as_deref(), Some("12.0-15.5"));
        assert!(report.pages[0].tests[0].is_abnormal);

        let entries = ExtractionResult::EntryArray(vec![SampleEntry {
            patient_name: None,
            age: None,
            gender: None,
            sample_date: None,
            data_points: vec![reading],
        }]);
        let ExtractionResult::EntryArray(entries) = table.fill_gaps(entries, &adult(None)) else {
            panic!("shape changed");
        };
        assert_eq!(entries[0].data_points[0].reference_range.as_deref(), Some("13.5-17.5"));
    }
}

use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use serde_json::Value;

use super::DateExtractionError;
use crate::config::ExtractionSettings;
use crate::pipeline::structuring::{build_date_prompt, parse_json_response, truncate_prefix, LlmClient};

const MONTH_PATTERN: &str =
    r"jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?";

static ISO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?P<y>\d{4})-(?P<m>\d{1,2})-(?P<d>\d{1,2})\b").unwrap());

static NUMERIC_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?P<a>\d{1,2})[/-](?P<b>\d{1,2})[/-](?P<y>\d{4})\b").unwrap()
});

static DAY_MONTH_YEAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?P<d>\d{{1,2}})(?:st|nd|rd|th)?[\s-]+(?P<m>{MONTH_PATTERN})\.?,?[\s-]+(?P<y>\d{{4}})\b"
    ))
    .unwrap()
});

static MONTH_DAY_YEAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?P<m>{MONTH_PATTERN})\.?\s+(?P<d>\d{{1,2}})(?:st|nd|rd|th)?,?\s+(?P<y>\d{{4}})\b"
    ))
    .unwrap()
});

/// A calendar date found in report text and where it starts (byte offset).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateMention {
    pub offset: usize,
    pub date: NaiveDate,
    /// Month-first reading of an ambiguous numeric date such as `05/03/2024`.
    pub alternate: Option<NaiveDate>,
}

impl DateMention {
    fn at(offset: usize, date: NaiveDate) -> Self {
        Self {
            offset,
            date,
            alternate: None,
        }
    }

    /// The reading of this mention that appears in `known`, day-first
    /// preferred.
    pub fn resolve_in(&self, known: &BTreeSet<NaiveDate>) -> Option<NaiveDate> {
        std::iter::once(self.date)
            .chain(self.alternate)
            .find(|date| known.contains(date))
    }
}

/// Scan text for dates in the five supported formats, in text order.
///
/// Numeric dates are read day-first; month-first is used only when the
/// day-first reading is not a valid calendar date.
pub fn find_date_mentions(text: &str) -> Vec<DateMention> {
    let mut mentions: Vec<DateMention> = Vec::new();

    for caps in ISO_DATE.captures_iter(text) {
        if let Some(date) = ymd(&caps["y"], &caps["m"], &caps["d"]) {
            mentions.push(DateMention::at(caps.get(0).map_or(0, |m| m.start()), date));
        }
    }
    for caps in NUMERIC_DATE.captures_iter(text) {
        let offset = caps.get(0).map_or(0, |m| m.start());
        let day_first = ymd(&caps["y"], &caps["b"], &caps["a"]);
        let month_first = ymd(&caps["y"], &caps["a"], &caps["b"]);
        let mention = match (day_first, month_first) {
            (Some(date), alternate) => DateMention {
                offset,
                date,
                alternate: alternate.filter(|alt| *alt != date),
            },
            (None, Some(date)) => DateMention::at(offset, date),
            (None, None) => continue,
        };
        mentions.push(mention);
    }
    for re in [&*DAY_MONTH_YEAR, &*MONTH_DAY_YEAR] {
        for caps in re.captures_iter(text) {
            let date = month_number(&caps["m"])
                .and_then(|m| ymd(&caps["y"], &m.to_string(), &caps["d"]));
            if let Some(date) = date {
                mentions.push(DateMention::at(caps.get(0).map_or(0, |m| m.start()), date));
            }
        }
    }

    mentions.sort_by_key(|m| m.offset);
    mentions.dedup_by_key(|m| m.offset);
    mentions
}

/// Parse a single date string in any of the supported formats. Used for
/// dates a model already isolated (page dates, sample dates).
pub fn parse_sample_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(date);
    }
    // ISO timestamps: keep the date part.
    if let Some(date) = trimmed
        .get(..10)
        .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
    {
        return Some(date);
    }
    find_date_mentions(trimmed).first().map(|m| m.date)
}

fn month_number(name: &str) -> Option<u32> {
    let key: String = name.chars().take(3).collect::<String>().to_lowercase();
    let month = match key.as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

fn ymd(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
}

/// Sample-date discovery: model first, pattern scan as fallback.
pub struct DateExtractor {
    providers: Vec<Arc<dyn LlmClient>>,
    settings: ExtractionSettings,
}

impl DateExtractor {
    pub fn new(providers: Vec<Arc<dyn LlmClient>>, settings: ExtractionSettings) -> Self {
        Self {
            providers,
            settings,
        }
    }

    /// Distinct dates referenced in the report, most recent first. Never
    /// fails; total failure yields an empty list.
    pub fn extract_dates(&self, text: &str) -> Vec<NaiveDate> {
        match self.extract_with_models(text) {
            Ok(dates) if !dates.is_empty() => return dates,
            Ok(_) => tracing::debug!("Model found no usable dates, scanning text"),
            Err(e) => tracing::warn!(error = %e, "Model date extraction failed, scanning text"),
        }
        self.scan_dates(text)
    }

    /// Pattern-only date discovery.
    pub fn scan_dates(&self, text: &str) -> Vec<NaiveDate> {
        let dates = find_date_mentions(text)
            .into_iter()
            .map(|m| m.date)
            .filter(|d| self.in_valid_years(d));
        sorted_descending(dates)
    }

    fn extract_with_models(&self, text: &str) -> Result<Vec<NaiveDate>, DateExtractionError> {
        if self.providers.is_empty() {
            return Err(DateExtractionError::NoProviders);
        }
        let prompt = build_date_prompt(truncate_prefix(text, self.settings.date_window_chars));

        let mut last_error = DateExtractionError::NoProviders;
        for provider in &self.providers {
            match self.request(provider.as_ref(), &prompt) {
                Ok(dates) => return Ok(dates),
                Err(e) => {
                    tracing::debug!(provider = provider.name(), error = %e, "Date request failed");
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    fn request(&self, provider: &dyn LlmClient, prompt: &str) -> Result<Vec<NaiveDate>, DateExtractionError> {
        let raw = provider.complete(prompt, self.settings.date_temperature, self.settings.date_max_tokens)?;
        let value = parse_json_response(&raw)
            .map_err(|e| DateExtractionError::InvalidResponse(e.to_string()))?;
        let Value::Array(items) = value else {
            return Err(DateExtractionError::NotAnArray);
        };

        let dates = items.iter().filter_map(|item| {
            let text = item.as_str()?;
            match NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d") {
                Ok(date) if self.in_valid_years(&date) => Some(date),
                _ => {
                    tracing::debug!(value = %text, "Discarding invalid model date");
                    None
                }
            }
        });
        Ok(sorted_descending(dates))
    }

    fn in_valid_years(&self, date: &NaiveDate) -> bool {
        (self.settings.min_valid_year..=self.settings.max_valid_year).contains(&date.year())
    }
}

fn sorted_descending(dates: impl Iterator<Item = NaiveDate>) -> Vec<NaiveDate> {
    let unique: BTreeSet<NaiveDate> = dates.collect();
    unique.into_iter().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::structuring::{FailingLlmClient, MockLlmClient};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn extractor(providers: Vec<Arc<dyn LlmClient>>) -> DateExtractor {
        DateExtractor::new(providers, ExtractionSettings::default())
    }

    fn erased<T: LlmClient + 'static>(client: &Arc<T>) -> Arc<dyn LlmClient> {
        client.clone()
    }

    #[test]
    fn finds_all_five_formats_in_text_order() {
        let text = "Collected 2024-03-05. Report 15/02/2024, reviewed 02-28-2024.\n\
                    Previous: 3 Sept 2023 and January 9, 2022.";
        let dates: Vec<NaiveDate> = find_date_mentions(text).into_iter().map(|m| m.date).collect();
        assert_eq!(
            dates,
            vec![d(2024, 3, 5), d(2024, 2, 15), d(2024, 2, 28), d(2023, 9, 3), d(2022, 1, 9)]
        );
    }

    #[test]
    fn numeric_dates_prefer_day_first() {
        let mentions = find_date_mentions("05/03/2024");
        assert_eq!(mentions[0].date, d(2024, 3, 5));
        assert_eq!(mentions[0].alternate, Some(d(2024, 5, 3)));
        let mentions = find_date_mentions("12/31/2023");
        assert_eq!(mentions[0].date, d(2023, 12, 31));
        assert!(mentions[0].alternate.is_none());
        assert!(find_date_mentions("04/04/2024")[0].alternate.is_none());
        assert!(find_date_mentions("31/31/2023").is_empty());
    }

    #[test]
    fn ambiguous_mention_resolves_to_the_known_reading() {
        let mention = find_date_mentions("05/03/2024")[0];
        let month_first: BTreeSet<NaiveDate> = [d(2024, 5, 3)].into_iter().collect();
        let day_first: BTreeSet<NaiveDate> = [d(2024, 3, 5), d(2024, 5, 3)].into_iter().collect();
        assert_eq!(mention.resolve_in(&month_first), Some(d(2024, 5, 3)));
        assert_eq!(mention.resolve_in(&day_first), Some(d(2024, 3, 5)));
        assert_eq!(mention.resolve_in(&BTreeSet::new()), None);
    }

    #[test]
    fn mention_offsets_are_byte_positions() {
        let text = "Glucose 92\nDate: 01 Mar 2024";
        let mentions = find_date_mentions(text);
        assert_eq!(mentions.len(), 1);
        assert_eq!(&text[mentions[0].offset..], "01 Mar 2024");
    }

    #[test]
    fn parse_sample_date_accepts_isolated_dates() {
        assert_eq!(parse_sample_date("2024-03-01"), Some(d(2024, 3, 1)));
        assert_eq!(parse_sample_date("2024-03-01T08:30:00Z"), Some(d(2024, 3, 1)));
        assert_eq!(parse_sample_date("March 1, 2024"), Some(d(2024, 3, 1)));
        assert_eq!(parse_sample_date("01/03/2024"), Some(d(2024, 3, 1)));
        assert_eq!(parse_sample_date("null"), None);
        assert_eq!(parse_sample_date("last week"), None);
    }

    #[test]
    fn model_dates_are_validated_sorted_and_deduplicated() {
        let provider = Arc::new(MockLlmClient::new(
            r#"["2023-01-10", "2024-05-02", "2023-01-10", "1899-01-01", "2024-13-40", "05/03/2024", 7]"#,
        ));
        let dates = extractor(vec![erased(&provider)]).extract_dates("irrelevant");
        assert_eq!(dates, vec![d(2024, 5, 2), d(2023, 1, 10)]);
    }

    #[test]
    fn failed_or_non_array_response_falls_back_to_scan() {
        let text = "Sample 01/02/2023 and 2024-06-30 and 1900-01-01";

        let failing = Arc::new(FailingLlmClient::new("openai"));
        let dates = extractor(vec![erased(&failing)]).extract_dates(text);
        assert_eq!(dates, vec![d(2024, 6, 30), d(2023, 2, 1)]);

        let object = Arc::new(MockLlmClient::new(r#"{"dates": ["2020-01-01"]}"#));
        let dates = extractor(vec![erased(&object)]).extract_dates(text);
        assert_eq!(dates, vec![d(2024, 6, 30), d(2023, 2, 1)]);
    }

    #[test]
    fn empty_model_answer_falls_back_to_scan() {
        let provider = Arc::new(MockLlmClient::new("[]"));
        let dates = extractor(vec![erased(&provider)]).extract_dates("Drawn on 4 Jan 2024");
        assert_eq!(dates, vec![d(2024, 1, 4)]);
    }

    #[test]
    fn no_dates_anywhere_is_empty() {
        assert!(extractor(Vec::new()).extract_dates("Glucose 92 mg/dL").is_empty());
    }

    #[test]
    fn prompt_window_limits_text_sent() {
        let provider = Arc::new(crate::pipeline::structuring::SequencedLlmClient::new(vec![Ok(
            "[\"2024-01-01\"]".into(),
        )]));
        let settings = ExtractionSettings {
            date_window_chars: 5,
            ..ExtractionSettings::default()
        };
        let extractor = DateExtractor::new(vec![erased(&provider)], settings);
        extractor.extract_dates("ABCDEFGHIJ");
        assert!(provider.prompts()[0].ends_with("ABCDE"));
    }
}

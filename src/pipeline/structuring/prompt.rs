use crate::models::TestObservation;

pub const EXTRACTION_INSTRUCTIONS: &str = r#"You are an information extraction system.

Extract lab test data from the following medical report text.
Return ONLY valid JSON matching this schema.

Schema:
{
  "patient": {
    "name": string | null,
    "age": number | null,
    "gender": string | null
  },
  "tests": [
    {
      "test_name": string,
      "value": string,
      "unit": string | null,
      "reference_range": string | null,
      "interpretation": "Low" | "Normal" | "High" | "Unknown"
    }
  ]
}

Rules:
- Do not add explanations or any text outside the JSON
- Do not hallucinate missing values
- If unsure, use null
- Copy values and reference ranges exactly as printed"#;

/// Build the extraction prompt. `report_text` must already be cleaned and
/// truncated.
pub fn build_extraction_prompt(report_text: &str) -> String {
    format!("{EXTRACTION_INSTRUCTIONS}\n\nMedical Report Text:\n{report_text}")
}

/// Build the date prompt over the first `window` characters of the report.
pub fn build_date_prompt(report_window: &str) -> String {
    format!(
        r#"List every calendar date that appears in the medical report text below.

Dates may be written as:
- DD/MM/YYYY or DD-MM-YYYY
- MM/DD/YYYY
- DD Mon YYYY (e.g. 05 Mar 2024)
- Mon DD, YYYY (e.g. March 5, 2024)
- YYYY-MM-DD

Convert each date to YYYY-MM-DD and return ONLY a JSON array of strings,
for example ["2024-03-05", "2023-11-20"]. Return [] if there are none.
Do not add any text outside the JSON array.

Report Text:
{report_window}"#
    )
}

/// Build the batched explanation prompt for a set of observations.
pub fn build_explanation_prompt(tests: &[TestObservation]) -> String {
    let details: Vec<String> = tests
        .iter()
        .map(|t| {
            let mut line = format!(
                "- {}: value={} {}, interpretation={}",
                t.test_name,
                t.value,
                t.unit.as_deref().unwrap_or(""),
                t.interpretation
            );
            if let Some(range) = t.reference_range.as_deref() {
                line.push_str(&format!(", reference_range={range}"));
            }
            line
        })
        .collect();

    format!(
        r#"Provide context-aware explanations for each of these medical tests based on the patient's specific values and interpretations. For each test, explain what it measures, what this result means, and any health implication of the result.

Be specific about whether the value is normal, high, or low. Keep each explanation to 2-3 sentences.

Test Results:
{}

Return ONLY a JSON object where each key is the exact test name and each value is its explanation:
{{
  "Test Name 1": "Explanation here...",
  "Test Name 2": "Explanation here..."
}}"#,
        details.join("\n")
    )
}

use serde::{Deserialize, Serialize};

use super::enums::Interpretation;

/// One lab measurement as handed to presentation and persistence layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestObservation {
    pub test_name: String,
    pub value: String,
    pub unit: Option<String>,
    pub reference_range: Option<String>,
    #[serde(default)]
    pub interpretation: Interpretation,
    #[serde(default)]
    pub explanation: Option<String>,
}

impl TestObservation {
    pub fn new(test_name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            test_name: test_name.into(),
            value: value.into(),
            unit: None,
            reference_range: None,
            interpretation: Interpretation::Unknown,
            explanation: None,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_range(mut self, range: impl Into<String>) -> Self {
        self.reference_range = Some(range.into());
        self
    }

    pub fn with_interpretation(mut self, interpretation: Interpretation) -> Self {
        self.interpretation = interpretation;
        self
    }

    pub fn has_range(&self) -> bool {
        self.reference_range
            .as_deref()
            .is_some_and(|r| !r.trim().is_empty())
    }
}

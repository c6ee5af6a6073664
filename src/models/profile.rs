use serde::{Deserialize, Serialize};

/// Patient identity as read from the report itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientInfo {
    pub name: Option<String>,
    pub age: Option<u32>,
    pub gender: Option<String>,
}

impl PatientInfo {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.age.is_none() && self.gender.is_none()
    }
}

/// Caller-supplied profile. Only `age` and `gender` influence range
/// resolution; the remaining fields are carried for presentation layers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub name: Option<String>,
    pub age: Option<u32>,
    #[serde(alias = "sex")]
    pub gender: Option<String>,
    pub body_type: Option<String>,
    pub current_goal: Option<String>,
    pub desired_outcome: Option<String>,
    #[serde(default)]
    pub previous_diseases: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "m" | "male" | "man" => Some(Self::Male),
            "f" | "female" | "woman" => Some(Self::Female),
            _ => None,
        }
    }
}

/// Age and gender used to pick a reference range. Built from the extracted
/// patient with profile values taking precedence; never written back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatientContext {
    pub age: Option<u32>,
    pub gender: Option<Gender>,
}

impl PatientContext {
    pub fn resolve(patient: &PatientInfo, profile: Option<&UserProfile>) -> Self {
        let age = profile.and_then(|p| p.age).or(patient.age);
        let gender = profile
            .and_then(|p| p.gender.as_deref())
            .and_then(Gender::parse)
            .or_else(|| patient.gender.as_deref().and_then(Gender::parse));
        Self { age, gender }
    }
}

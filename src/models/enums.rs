use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::ModelError;

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = ModelError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(ModelError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

str_enum!(Interpretation {
    Low => "Low",
    Normal => "Normal",
    High => "High",
    Unknown => "Unknown",
});

str_enum!(ExtractionStatus {
    Ok => "ok",
    Partial => "partial",
    Empty => "empty",
});

str_enum!(ExtractionSource {
    PrimaryModel => "primary_model",
    SecondaryModel => "secondary_model",
    RegexFallback => "regex_fallback",
    Exhausted => "exhausted",
});

impl Interpretation {
    /// Map any provider-specific interpretation string into the four-value set.
    ///
    /// Bare "abnormal" maps to `High`: with no direction available the
    /// elevated reading is the common case in lab panels.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "low" | "below range" | "below normal" | "l" | "decreased" => Self::Low,
            "high" | "above range" | "above normal" | "h" | "elevated" | "increased" => Self::High,
            "normal" | "within range" | "normal range" | "within normal limits" | "n" => {
                Self::Normal
            }
            "abnormal" | "abnormal results" | "outside range" => Self::High,
            _ => Self::Unknown,
        }
    }

    /// Binary mapping used when the only signal is an abnormal flag.
    pub fn from_abnormal_flag(is_abnormal: bool) -> Self {
        if is_abnormal {
            Self::High
        } else {
            Self::Normal
        }
    }

    pub fn is_abnormal(&self) -> bool {
        matches!(self, Self::Low | Self::High)
    }
}

impl Default for Interpretation {
    fn default() -> Self {
        Self::Unknown
    }
}

impl ExtractionSource {
    /// Position in the fallback chain: providers first, regex last.
    pub fn from_stage(index: usize) -> Self {
        match index {
            0 => Self::PrimaryModel,
            _ => Self::SecondaryModel,
        }
    }

    pub fn is_model(&self) -> bool {
        matches!(self, Self::PrimaryModel | Self::SecondaryModel)
    }
}

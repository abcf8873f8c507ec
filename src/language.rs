//! Algorithm languages supported by projects.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Source language of a project.
///
/// Local configs store the variant name (`"Python"`, `"CSharp"`); the cloud API
/// uses the short codes `"Py"` and `"C#"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Language {
    #[default]
    Python,
    CSharp,
}

impl Language {
    /// Code used by the cloud API.
    pub fn cloud_code(self) -> &'static str {
        match self {
            Self::Python => "Py",
            Self::CSharp => "C#",
        }
    }

    pub fn from_cloud_code(code: &str) -> Option<Self> {
        match code {
            "Py" => Some(Self::Python),
            "C#" => Some(Self::CSharp),
            _ => None,
        }
    }

    pub fn is_csharp(self) -> bool {
        matches!(self, Self::CSharp)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Python => write!(f, "Python"),
            Self::CSharp => write!(f, "CSharp"),
        }
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "python" | "py" => Ok(Self::Python),
            "csharp" | "c#" | "cs" => Ok(Self::CSharp),
            other => Err(format!("unknown language '{other}', expected python or csharp")),
        }
    }
}

/// Serde adapter for the cloud representation (`"Py"` / `"C#"`).
pub mod cloud_code {
    use super::*;

    pub fn serialize<S: Serializer>(language: &Language, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(language.cloud_code())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Language, D::Error> {
        let code = String::deserialize(deserializer)?;
        Language::from_cloud_code(&code)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown project language '{code}'")))
    }
}

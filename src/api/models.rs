//! Wire models of the cloud API.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::language::{self, Language};

/// A project parameter.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Parameter {
    pub key: String,
    #[serde(deserialize_with = "stringish")]
    pub value: String,
}

/// A library referenced by a cloud project.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectLibrary {
    pub project_id: u64,
    #[serde(default)]
    pub library_name: String,
    #[serde(default)]
    pub owner_name: String,
}

/// Key a cloud project is encrypted with.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProjectEncryptionKey {
    /// Hash identifying the key.
    pub id: String,
    pub name: String,
}

/// Encryption key registered with an organization.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegisteredKey {
    pub hash: String,
    #[serde(default)]
    pub name: String,
}

/// A project as returned by the cloud.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudProject {
    pub project_id: u64,
    #[serde(default, deserialize_with = "stringish")]
    pub organization_id: String,
    /// Project path in the cloud, `/`-separated.
    #[serde(deserialize_with = "project_name")]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, deserialize_with = "timestamp")]
    pub modified: DateTime<Utc>,
    #[serde(with = "language::cloud_code")]
    pub language: Language,
    #[serde(default)]
    pub lean_version_id: i64,
    #[serde(default)]
    pub lean_pinned_to_master: bool,
    #[serde(default)]
    pub lean_environment: Option<u64>,
    #[serde(default, deserialize_with = "parameters")]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub libraries: Vec<ProjectLibrary>,
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default)]
    pub encryption_key: Option<ProjectEncryptionKey>,
}

impl CloudProject {
    /// Ids of the projects this project uses as libraries.
    pub fn library_ids(&self) -> Vec<u64> {
        self.libraries.iter().map(|l| l.project_id).collect()
    }

    pub fn parameter_map(&self) -> BTreeMap<String, String> {
        self.parameters
            .iter()
            .map(|p| (p.key.clone(), p.value.clone()))
            .collect()
    }

    /// Id of the key the project is encrypted with, if it is encrypted.
    pub fn encryption_key_id(&self) -> Option<&str> {
        if !self.encrypted {
            return None;
        }
        self.encryption_key.as_ref().map(|k| k.id.as_str())
    }
}

/// A file of a cloud project.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudFile {
    pub name: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, deserialize_with = "timestamp")]
    pub modified: DateTime<Utc>,
    /// Set on files that belong to a referenced library rather than the project.
    #[serde(default)]
    pub is_library: bool,
}

/// Name and content of a file sent with an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub name: String,
    pub content: String,
}

/// Changes sent to the cloud for one project. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectUpdate {
    pub description: Option<String>,
    pub parameters: Option<BTreeMap<String, String>>,
    pub lean_engine: Option<i64>,
    pub python_venv: Option<u64>,
    pub files: Option<Vec<FileContent>>,
    pub libraries: Option<Vec<u64>>,
    /// Id of the key the uploaded files are encrypted with, empty for plaintext.
    pub encryption_key: Option<String>,
}

impl ProjectUpdate {
    pub fn is_empty(&self) -> bool {
        self.categories().is_empty()
    }

    /// Human readable names of the fields this update changes.
    pub fn categories(&self) -> Vec<&'static str> {
        let mut categories = Vec::new();
        if self.description.is_some() {
            categories.push("description");
        }
        if self.parameters.is_some() {
            categories.push("parameters");
        }
        if self.lean_engine.is_some() {
            categories.push("lean engine");
        }
        if self.python_venv.is_some() {
            categories.push("python venv");
        }
        if self.files.is_some() {
            categories.push("files");
        }
        if self.libraries.is_some() {
            categories.push("libraries");
        }
        if self.encryption_key.is_some() {
            categories.push("encryption key");
        }
        categories
    }
}

/// Join `["a", "b", "c"]` as `"a, b, and c"`.
pub fn join_categories(categories: &[&str]) -> String {
    match categories {
        [] => String::new(),
        [one] => (*one).to_string(),
        [a, b] => format!("{a} and {b}"),
        [init @ .., last] => format!("{}, and {last}", init.join(", ")),
    }
}

fn stringish<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}

fn project_name<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let name = String::deserialize(deserializer)?;
    Ok(name.strip_prefix('/').unwrap_or(&name).to_string())
}

/// Parameters come either as a list of `{key, value}` or as a plain object.
fn parameters<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Parameter>, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .into_iter()
            .map(|item| serde_json::from_value(item).map_err(serde::de::Error::custom))
            .collect(),
        Value::Object(map) => Ok(map
            .into_iter()
            .map(|(key, value)| Parameter {
                key,
                value: match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                },
            })
            .collect()),
        other => Err(serde::de::Error::custom(format!(
            "expected parameter list, got {other}"
        ))),
    }
}

/// Parse a cloud timestamp (`YYYY-MM-DD HH:MM:SS` in UTC, RFC 3339 accepted).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
        })
}

fn timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(DateTime::<Utc>::default()),
        Some(raw) => parse_timestamp(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{raw}'"))),
    }
}

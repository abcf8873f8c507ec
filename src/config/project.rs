//! Typed view of a project's `config.json`.
//!
//! Values are validated when the file is loaded so malformed configs are reported
//! up front with the offending file. Keys the CLI does not know about are kept in
//! [`ProjectConfig::extra`] and written back untouched.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::ConfigError;
use super::storage::Storage;
use crate::language::Language;

/// File name of the per-project configuration.
pub const PROJECT_CONFIG_FILE: &str = "config.json";

/// A library referenced by a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryReference {
    /// Directory name of the library.
    pub name: String,
    /// Library path, relative to the Lean CLI root when possible.
    pub path: PathBuf,
}

/// Content of a project's `config.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProjectConfig {
    #[serde(skip)]
    path: PathBuf,

    /// Id of the cloud project this directory is linked to.
    #[serde(default, deserialize_with = "lenient_u64", skip_serializing_if = "Option::is_none")]
    pub cloud_id: Option<u64>,

    /// Name of the cloud project, as last pulled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm_language: Option<Language>,

    #[serde(default, deserialize_with = "string_map", skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,

    /// Id of the python environment used in the cloud.
    #[serde(default, deserialize_with = "lenient_u64", skip_serializing_if = "Option::is_none")]
    pub python_venv: Option<u64>,

    /// Pinned engine version, `-1` meaning latest.
    #[serde(default, deserialize_with = "lenient_i64", skip_serializing_if = "Option::is_none")]
    pub lean_engine: Option<i64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub libraries: Vec<LibraryReference>,

    /// Whether the source files on disk are encrypted.
    #[serde(default, skip_serializing_if = "is_false")]
    pub encrypted: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_key_path: Option<PathBuf>,

    /// Keys not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProjectConfig {
    /// Load the config of the project in `project_dir`.
    ///
    /// A missing file yields an empty config that is created on the first [`save`](Self::save).
    pub fn load(project_dir: &Path) -> Result<Self, ConfigError> {
        let path = project_dir.join(PROJECT_CONFIG_FILE);
        let storage = Storage::open(&path)?;
        let mut config: ProjectConfig = serde_json::from_value(Value::Object(storage.as_map().clone()))
            .map_err(|source| ConfigError::Invalid {
                path: path.clone(),
                source,
            })?;
        config.path = path;
        Ok(config)
    }

    /// Whether `dir` contains a project config file.
    pub fn exists_in(dir: &Path) -> bool {
        dir.join(PROJECT_CONFIG_FILE).is_file()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory of the project owning this config.
    pub fn project_dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    /// Persist the config, skipping the write when nothing changed.
    pub fn save(&self) -> Result<(), ConfigError> {
        let value = serde_json::to_value(self).map_err(|source| ConfigError::Invalid {
            path: self.path.clone(),
            source,
        })?;
        let Value::Object(map) = value else {
            return Err(ConfigError::NotAnObject(self.path.clone()));
        };
        let mut storage = Storage::open(&self.path)?;
        storage.replace(map)
    }

    /// Library directories referenced by this project, resolved against `root`.
    pub fn library_dirs(&self, root: &Path) -> Vec<PathBuf> {
        self.libraries
            .iter()
            .map(|library| {
                if library.path.is_absolute() {
                    library.path.clone()
                } else {
                    root.join(&library.path)
                }
            })
            .collect()
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Accept numbers and numeric strings; older configs store ids as strings.
fn lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("expected a positive integer, got {n}"))),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("expected an integer, got '{s}'"))),
        Some(other) => Err(serde::de::Error::custom(format!("expected an integer, got {other}"))),
    }
}

fn lenient_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("expected an integer, got {n}"))),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("expected an integer, got '{s}'"))),
        Some(other) => Err(serde::de::Error::custom(format!("expected an integer, got {other}"))),
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!("expected a string, got {other}"))),
    }
}

fn string_map<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error> {
    let raw = Option::<BTreeMap<String, Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (key, value)
        })
        .collect())
}

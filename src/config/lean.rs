//! `lean.json` discovery and editing.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use super::ConfigError;
use super::jsonc;
use super::storage::write_atomic;

/// File name of the Lean CLI root configuration.
pub const LEAN_CONFIG_FILE: &str = "lean.json";

/// The Lean configuration file at the root of a CLI directory.
#[derive(Debug, Clone)]
pub struct LeanConfig {
    path: PathBuf,
    text: String,
    values: Map<String, Value>,
}

impl LeanConfig {
    /// Find `lean.json` in `start` or any of its ancestors.
    pub fn discover(start: &Path) -> Result<Self, ConfigError> {
        start
            .ancestors()
            .map(|dir| dir.join(LEAN_CONFIG_FILE))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| ConfigError::LeanConfigNotFound(start.to_path_buf()))
            .and_then(Self::load)
    }

    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = fs::read_to_string(&path).map_err(|e| ConfigError::io(&path, e))?;
        let values = jsonc::parse_object(&text).map_err(|e| ConfigError::Malformed {
            path: path.clone(),
            message: e.to_string(),
        })?;
        Ok(Self { path, text, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory containing `lean.json`; project names and library paths are relative to it.
    pub fn root_dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.values.get(key)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Organization the CLI works against. `job-organization-id` wins over `organization-id`.
    pub fn organization_id(&self) -> Option<String> {
        self.get_str("job-organization-id")
            .or_else(|| self.get_str("organization-id"))
    }

    /// Update several top-level properties, keeping comments and layout intact.
    pub fn set_properties(&mut self, properties: &[(&str, Value)]) -> Result<(), ConfigError> {
        let mut text = self.text.clone();
        for (key, value) in properties {
            text = jsonc::set_member(&text, key, value).map_err(|e| ConfigError::Malformed {
                path: self.path.clone(),
                message: e.to_string(),
            })?;
        }

        let values = jsonc::parse_object(&text).map_err(|e| ConfigError::Malformed {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        write_atomic(&self.path, text.as_bytes())?;

        tracing::debug!(path = %self.path.display(), "updated lean config");
        self.text = text;
        self.values = values;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_discover_walks_up() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(LEAN_CONFIG_FILE), "{\"organization-id\": \"org\"}").unwrap();
        let nested = dir.path().join("Library").join("Utils");
        fs::create_dir_all(&nested).unwrap();

        let config = LeanConfig::discover(&nested).unwrap();
        assert_eq!(config.root_dir(), dir.path());
        assert_eq!(config.organization_id().as_deref(), Some("org"));
    }

    #[test]
    fn test_discover_missing() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            LeanConfig::discover(dir.path()).unwrap_err(),
            ConfigError::LeanConfigNotFound(_)
        ));
    }

    #[test]
    fn test_job_organization_wins() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(LEAN_CONFIG_FILE);
        fs::write(
            &path,
            "{\n  \"organization-id\": \"a\",\n  \"job-organization-id\": \"b\"\n}",
        )
        .unwrap();
        assert_eq!(LeanConfig::load(&path).unwrap().organization_id().as_deref(), Some("b"));
    }

    #[test]
    fn test_set_properties_preserves_comments() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(LEAN_CONFIG_FILE);
        fs::write(&path, "{\n    // organization\n    \"organization-id\": \"a\"\n}\n").unwrap();

        let mut config = LeanConfig::load(&path).unwrap();
        config
            .set_properties(&[("organization-id", json!("b")), ("data-folder", json!("data"))])
            .unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("// organization"));
        assert_eq!(config.organization_id().as_deref(), Some("b"));
        assert_eq!(LeanConfig::load(&path).unwrap().get_str("data-folder").as_deref(), Some("data"));
    }
}

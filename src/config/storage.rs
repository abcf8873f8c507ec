//! File-backed JSON key/value store.
//!
//! A [`Storage`] wraps a single JSON object on disk. Missing files behave like an
//! empty object, writes go through a temporary file in the same directory so a
//! crash never leaves a truncated config behind, and the backing file is deleted
//! once the last key is removed.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::ConfigError;

/// JSON object persisted to a single file.
#[derive(Debug, Clone)]
pub struct Storage {
    path: PathBuf,
    data: Map<String, Value>,
}

impl Storage {
    /// Open the store at `path`, validating its content.
    ///
    /// A missing file yields an empty store; the file is only created on the first write.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let data = match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => Map::new(),
            Ok(text) => parse_object(&path, &text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(ConfigError::io(&path, e)),
        };
        Ok(Self { path, data })
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Typed value stored under `key`, `None` when the key is absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        match self.data.get(key) {
            None => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|source| ConfigError::InvalidValue {
                    path: self.path.clone(),
                    key: key.to_string(),
                    source,
                }),
        }
    }

    /// Store `value` under `key` and persist. Writing an identical value is a no-op.
    pub fn set(&mut self, key: &str, value: impl Serialize) -> Result<(), ConfigError> {
        let value = serde_json::to_value(value).map_err(|source| ConfigError::InvalidValue {
            path: self.path.clone(),
            key: key.to_string(),
            source,
        })?;
        if self.data.get(key) == Some(&value) {
            return Ok(());
        }
        self.data.insert(key.to_string(), value);
        self.save()
    }

    /// Remove `key` and persist. Removing a missing key is a no-op.
    pub fn delete(&mut self, key: &str) -> Result<(), ConfigError> {
        if self.data.remove(key).is_none() {
            return Ok(());
        }
        self.save()
    }

    /// Replace the whole object and persist when it changed.
    pub fn replace(&mut self, data: Map<String, Value>) -> Result<(), ConfigError> {
        if self.data == data {
            return Ok(());
        }
        self.data = data;
        self.save()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.data
    }

    /// Write the current content to disk.
    ///
    /// An empty store removes its backing file instead of writing `{}`.
    pub fn save(&self) -> Result<(), ConfigError> {
        if self.data.is_empty() {
            return match fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(ConfigError::io(&self.path, e)),
            };
        }

        let mut text = serde_json::to_string_pretty(&self.data).map_err(|source| {
            ConfigError::Invalid {
                path: self.path.clone(),
                source,
            }
        })?;
        text.push('\n');
        write_atomic(&self.path, text.as_bytes())
    }
}

/// Parse `text` as a JSON object, attributing errors to `path`.
pub(crate) fn parse_object(path: &Path, text: &str) -> Result<Map<String, Value>, ConfigError> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ConfigError::NotAnObject(path.to_path_buf())),
        Err(source) => Err(ConfigError::Invalid {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Replace `path` with `bytes` through a temporary sibling file.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ConfigError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).map_err(|e| ConfigError::io(&parent, e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(&parent).map_err(|e| ConfigError::io(&parent, e))?;
    tmp.write_all(bytes).map_err(|e| ConfigError::io(path, e))?;
    tmp.persist(path)
        .map_err(|e| ConfigError::io(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path().join("config.json")).unwrap();
        assert!(storage.is_empty());
        assert!(!storage.as_map().contains_key("cloud-id"));
    }

    #[test]
    fn test_set_get_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut storage = Storage::open(&path).unwrap();
        storage.set("cloud-id", 42).unwrap();
        storage.set("description", "hello").unwrap();

        let reopened = Storage::open(&path).unwrap();
        assert_eq!(reopened.get::<u64>("cloud-id").unwrap(), Some(42));
        assert_eq!(
            reopened.get::<String>("description").unwrap().as_deref(),
            Some("hello")
        );
    }

    #[test]
    fn test_file_removed_when_last_key_deleted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut storage = Storage::open(&path).unwrap();
        storage.set("a", 1).unwrap();
        storage.set("b", 2).unwrap();
        storage.delete("a").unwrap();
        assert!(path.exists());
        storage.delete("b").unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_invalid_json_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let err = Storage::open(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_non_object_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "[1, 2]").unwrap();

        assert!(matches!(
            Storage::open(&path).unwrap_err(),
            ConfigError::NotAnObject(_)
        ));
    }

    #[test]
    fn test_typed_get_reports_bad_value() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, json!({"cloud-id": "abc"}).to_string()).unwrap();

        let storage = Storage::open(&path).unwrap();
        let err = storage.get::<u64>("cloud-id").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "cloud-id"));
    }
}

//! CLI-wide options stored under `~/.lean/config`.

use std::path::{Path, PathBuf};

use super::ConfigError;
use super::storage::Storage;

/// Default API endpoint.
pub const DEFAULT_API_URL: &str = "https://www.quantconnect.com/api/v2/";

/// Keys accepted by `lean config`.
pub const KNOWN_KEYS: &[(&str, &str)] = &[
    ("user-id", "The user id used when making authenticated requests to the API"),
    ("api-token", "The API token used when making authenticated requests to the API"),
    ("default-language", "The default language used when creating new projects (python or csharp)"),
    ("api-url", "The base URL of the API"),
    ("organization-id", "The organization used when creating and listing cloud projects (stored in lean.json)"),
];

/// Credentials for the cloud API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user_id: String,
    pub api_token: String,
}

/// The CLI configuration store.
#[derive(Debug, Clone)]
pub struct CliConfig {
    storage: Storage,
}

impl CliConfig {
    /// Directory holding the CLI configuration, `$LEAN_CONFIG_DIR` or `~/.lean`.
    pub fn default_dir() -> PathBuf {
        if let Some(dir) = std::env::var_os("LEAN_CONFIG_DIR").filter(|v| !v.is_empty()) {
            return PathBuf::from(dir);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".lean")
    }

    pub fn open_default() -> Result<Self, ConfigError> {
        Self::open(&Self::default_dir())
    }

    pub fn open(dir: &Path) -> Result<Self, ConfigError> {
        Ok(Self {
            storage: Storage::open(dir.join("config"))?,
        })
    }

    pub fn is_known_key(key: &str) -> bool {
        KNOWN_KEYS.iter().any(|(k, _)| *k == key)
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, ConfigError> {
        self.storage.get::<String>(key)
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        if !Self::is_known_key(key) {
            return Err(ConfigError::UnknownKey(key.to_string()));
        }
        self.storage.set(key, value)
    }

    pub fn unset(&mut self, key: &str) -> Result<(), ConfigError> {
        self.storage.delete(key)
    }

    /// Stored key/value pairs, in key order.
    pub fn entries(&self) -> Vec<(String, String)> {
        self.storage
            .as_map()
            .iter()
            .map(|(k, v)| {
                let v = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
                (k.clone(), v)
            })
            .collect()
    }

    /// Credentials, with `LEAN_USER_ID` / `LEAN_API_TOKEN` taking precedence.
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        let user_id = env_or(self, "LEAN_USER_ID", "user-id")?
            .ok_or(ConfigError::MissingCredential("user-id"))?;
        let api_token = env_or(self, "LEAN_API_TOKEN", "api-token")?
            .ok_or(ConfigError::MissingCredential("api-token"))?;
        Ok(Credentials { user_id, api_token })
    }

    pub fn api_url(&self) -> Result<String, ConfigError> {
        Ok(env_or(self, "LEAN_API_URL", "api-url")?.unwrap_or_else(|| DEFAULT_API_URL.to_string()))
    }
}

fn env_or(config: &CliConfig, var: &str, key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(var) {
        Ok(value) if !value.is_empty() => Ok(Some(value)),
        _ => config.get(key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_set_get_unset() {
        let dir = tempdir().unwrap();
        let mut config = CliConfig::open(dir.path()).unwrap();
        config.set("default-language", "csharp").unwrap();
        assert_eq!(config.get("default-language").unwrap().as_deref(), Some("csharp"));

        let reopened = CliConfig::open(dir.path()).unwrap();
        assert_eq!(reopened.entries(), vec![("default-language".to_string(), "csharp".to_string())]);

        config.unset("default-language").unwrap();
        assert!(!dir.path().join("config").exists());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let dir = tempdir().unwrap();
        let mut config = CliConfig::open(dir.path()).unwrap();
        assert!(matches!(
            config.set("colour", "blue").unwrap_err(),
            ConfigError::UnknownKey(_)
        ));
    }
}

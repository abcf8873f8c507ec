//! Synchronization of local projects with the cloud.
//!
//! [`pull::PullManager`] brings cloud projects (and the libraries they reference)
//! down to disk, reconciling project configs and library references.
//! [`push::PushManager`] creates or updates cloud projects from local directories.
//!
//! Both managers work on a [`SyncContext`] carrying the Lean CLI root, the API
//! client and the working organization. Projects are processed one at a time in a
//! deterministic order; a project that fails is recorded in the returned
//! [`SyncReport`] and logged as a warning, and the batch carries on. Only
//! precondition failures (bad options, mismatched encryption keys, missing project
//! configs) abort a call, and they do so before anything is written.
//!
//! # Example
//!
//! ```rust,ignore
//! use lean_cli::sync::{EncryptionOptions, SyncContext, pull::PullManager};
//!
//! let ctx = SyncContext::new(root, &client).with_organization_id(org);
//! let projects = client.get_all_projects(ctx.organization_id())?;
//! let report = PullManager::new(&ctx).pull_projects(projects.clone(), Some(&projects), &EncryptionOptions::default())?;
//! println!("{} pulled, {} failed", report.succeeded().count(), report.failed().count());
//! ```

pub mod pull;
pub mod push;
pub mod report;

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::api::{ApiError, ProjectClient};
use crate::config::ConfigError;
use crate::encryption::{EncryptionAction, EncryptionError, EncryptionKey};
use crate::project::ProjectError;

pub use report::{ProjectSyncResult, SyncDirection, SyncOutcome, SyncReport};

/// Errors that can occur during pull and push.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("'{0}' is not a Lean CLI project, it has no config.json")]
    NotAProject(PathBuf),

    #[error("No project matches '{0}'")]
    NoMatchingProject(String),

    #[error("{0}")]
    InvalidOptions(String),

    #[error("Library '{0}' has not been pushed to the cloud yet")]
    LibraryNotPushed(PathBuf),

    #[error("Refusing to write '{0}' outside of the project directory")]
    UnsafePath(String),

    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Encryption(#[from] EncryptionError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Project(#[from] ProjectError),
}

impl SyncError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Everything a sync operation needs to know about its environment.
pub struct SyncContext<'a> {
    root: PathBuf,
    client: &'a dyn ProjectClient,
    organization_id: Option<String>,
    local_restore: bool,
}

impl<'a> SyncContext<'a> {
    /// Context for the Lean CLI directory `root` talking to `client`.
    pub fn new(root: impl Into<PathBuf>, client: &'a dyn ProjectClient) -> Self {
        Self {
            root: root.into(),
            client,
            organization_id: None,
            local_restore: true,
        }
    }

    /// Organization used to create and look up cloud projects.
    pub fn with_organization_id(mut self, organization_id: Option<String>) -> Self {
        self.organization_id = organization_id;
        self
    }

    /// Whether C# projects are restored after their library references change.
    pub fn with_local_restore(mut self, local_restore: bool) -> Self {
        self.local_restore = local_restore;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn client(&self) -> &'a dyn ProjectClient {
        self.client
    }

    pub fn organization_id(&self) -> Option<&str> {
        self.organization_id.as_deref()
    }

    pub fn local_restore(&self) -> bool {
        self.local_restore
    }
}

/// Encryption requested by the caller of a pull or push.
#[derive(Debug, Clone, Default)]
pub struct EncryptionOptions {
    pub action: Option<EncryptionAction>,
    pub key: Option<PathBuf>,
}

impl EncryptionOptions {
    pub fn encrypt(key: impl Into<PathBuf>) -> Self {
        Self {
            action: Some(EncryptionAction::Encrypt),
            key: Some(key.into()),
        }
    }

    pub fn decrypt(key: impl Into<PathBuf>) -> Self {
        Self {
            action: Some(EncryptionAction::Decrypt),
            key: Some(key.into()),
        }
    }

    /// Build options from the `--encrypt`/`--decrypt`/`--key` flags.
    pub fn from_flags(encrypt: bool, decrypt: bool, key: Option<PathBuf>) -> Result<Self, SyncError> {
        let action = match (encrypt, decrypt) {
            (true, true) => {
                return Err(SyncError::InvalidOptions(
                    "Cannot encrypt and decrypt at the same time".to_string(),
                ));
            }
            (true, false) => Some(EncryptionAction::Encrypt),
            (false, true) => Some(EncryptionAction::Decrypt),
            (false, false) => None,
        };
        let options = Self { action, key };
        options.validate()?;
        Ok(options)
    }

    /// An action needs a key and a key needs an action.
    pub fn validate(&self) -> Result<(), SyncError> {
        match (&self.action, &self.key) {
            (Some(_), None) => Err(SyncError::InvalidOptions(
                "Encryption key is required when encrypting or decrypting".to_string(),
            )),
            (None, Some(_)) => Err(SyncError::InvalidOptions(
                "Encryption key can only be specified when encrypting or decrypting".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Load the key file, if one was given.
    pub(crate) fn load_key(&self) -> Result<Option<EncryptionKey>, SyncError> {
        self.key
            .as_deref()
            .map(EncryptionKey::load)
            .transpose()
            .map_err(SyncError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_validation() {
        assert!(EncryptionOptions::from_flags(false, false, None).unwrap().action.is_none());
        assert!(matches!(
            EncryptionOptions::from_flags(true, true, Some("k".into())),
            Err(SyncError::InvalidOptions(_))
        ));
        assert!(matches!(
            EncryptionOptions::from_flags(true, false, None),
            Err(SyncError::InvalidOptions(_))
        ));
        assert!(matches!(
            EncryptionOptions::from_flags(false, false, Some("k".into())),
            Err(SyncError::InvalidOptions(_))
        ));
        let options = EncryptionOptions::from_flags(false, true, Some("k".into())).unwrap();
        assert_eq!(options.action, Some(EncryptionAction::Decrypt));
    }
}

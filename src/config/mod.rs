//! Configuration files used by the CLI.
//!
//! Three files are involved:
//!
//! - **`config.json`** inside every project directory, read through the typed
//!   [`project::ProjectConfig`].
//! - **`lean.json`** at the root of the Lean CLI directory. Its location defines the
//!   scanning root used to compute library paths and project names
//!   ([`lean::LeanConfig`]). It may contain comments, so writes go through the
//!   lossless editor in [`jsonc`].
//! - **`~/.lean/config`** holding CLI-wide options such as credentials
//!   ([`cli::CliConfig`]).
//!
//! All of them are backed by the same JSON key/value [`storage::Storage`].

pub mod cli;
pub mod jsonc;
pub mod lean;
pub mod project;
pub mod storage;

use std::path::PathBuf;

use thiserror::Error;

pub use cli::CliConfig;
pub use lean::LeanConfig;
pub use project::{LibraryReference, ProjectConfig};
pub use storage::Storage;

/// Errors raised while reading or writing configuration files.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} does not contain valid JSON: {source}")]
    Invalid {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0} must contain a JSON object at the top level")]
    NotAnObject(PathBuf),

    #[error("Invalid value for '{key}' in {path}: {source}")]
    InvalidValue {
        path: PathBuf,
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Could not edit {path}: {message}")]
    Malformed { path: PathBuf, message: String },

    #[error(
        "This command requires a Lean configuration file, run the command in a directory containing lean.json or pass --lean-config (searched upwards from {0})"
    )]
    LeanConfigNotFound(PathBuf),

    #[error("Missing credentials, set '{0}' with `lean config set` or the matching LEAN_* environment variable")]
    MissingCredential(&'static str),

    #[error("Unknown configuration key '{0}'")]
    UnknownKey(String),
}

impl ConfigError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

//! Client for the cloud project API.
//!
//! The sync engine only talks to the cloud through the [`ProjectClient`] trait so it
//! can be driven by the blocking HTTP implementation in [`http`] or by an in-memory
//! fake in tests.

pub mod http;
pub mod models;

use thiserror::Error;

pub use http::HttpProjectClient;
pub use models::{
    CloudFile, CloudProject, FileContent, Parameter, ProjectEncryptionKey, ProjectLibrary,
    ProjectUpdate, RegisteredKey,
};

use crate::language::Language;

/// Errors returned by the cloud API.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid credentials, please log in using `lean config set user-id/api-token`")]
    Authentication,

    #[error("{endpoint} request failed: {message}")]
    RequestFailed { endpoint: String, message: String },

    #[error("Unexpected response from {endpoint}: {message}")]
    InvalidResponse { endpoint: String, message: String },

    #[error("Project {0} was not found in the cloud")]
    ProjectNotFound(u64),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Operations the sync engine needs from the cloud.
pub trait ProjectClient {
    /// Fetch a single project.
    fn get_project(
        &self,
        project_id: u64,
        organization_id: Option<&str>,
    ) -> Result<CloudProject, ApiError>;

    /// Fetch every project of an organization (the user's default one when `None`).
    fn get_all_projects(&self, organization_id: Option<&str>) -> Result<Vec<CloudProject>, ApiError>;

    fn create_project(
        &self,
        name: &str,
        language: Language,
        organization_id: Option<&str>,
    ) -> Result<CloudProject, ApiError>;

    fn update_project(&self, project_id: u64, update: &ProjectUpdate) -> Result<(), ApiError>;

    /// All files of a project, including the files of the libraries it references.
    fn get_files(&self, project_id: u64) -> Result<Vec<CloudFile>, ApiError>;

    fn add_library(&self, project_id: u64, library_id: u64) -> Result<(), ApiError>;

    fn delete_library(&self, project_id: u64, library_id: u64) -> Result<(), ApiError>;

    /// Encryption keys registered with an organization.
    fn list_encryption_keys(&self, organization_id: Option<&str>) -> Result<Vec<RegisteredKey>, ApiError>;
}

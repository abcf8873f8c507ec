//! Blocking HTTP implementation of [`ProjectClient`].
//!
//! Every request is authenticated with HTTP basic auth where the password is
//! `sha256("<api-token>:<timestamp>")`, and the same timestamp is sent in the
//! `Timestamp` header. Responses carry a `success` flag; failures are turned into
//! [`ApiError`]s with the messages returned by the server. Nothing is retried.

use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use super::models::{CloudFile, CloudProject, ProjectUpdate, RegisteredKey};
use super::{ApiError, ProjectClient};
use crate::language::Language;

/// HTTP client for the cloud API.
pub struct HttpProjectClient {
    base_url: String,
    user_id: String,
    api_token: String,
    http: Client,
}

impl HttpProjectClient {
    pub fn new(
        base_url: impl Into<String>,
        user_id: impl Into<String>,
        api_token: impl Into<String>,
    ) -> Result<Self, ApiError> {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        let http = Client::builder()
            .timeout(Duration::from_secs(120))
            .user_agent(concat!("lean-cli/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            base_url,
            user_id: user_id.into(),
            api_token: api_token.into(),
            http,
        })
    }

    fn authenticate(&self, request: RequestBuilder) -> RequestBuilder {
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let hash = hex::encode(Sha256::digest(format!("{}:{timestamp}", self.api_token)));
        request
            .basic_auth(&self.user_id, Some(hash))
            .header("Timestamp", timestamp)
    }

    fn get(&self, endpoint: &str, query: &[(&str, String)]) -> Result<Value, ApiError> {
        let request = self.http.get(format!("{}{endpoint}", self.base_url)).query(query);
        self.send(endpoint, request)
    }

    fn post_json(&self, endpoint: &str, body: &Value) -> Result<Value, ApiError> {
        let request = self.http.post(format!("{}{endpoint}", self.base_url)).json(body);
        self.send(endpoint, request)
    }

    fn post_form(&self, endpoint: &str, form: &[(String, String)]) -> Result<Value, ApiError> {
        let request = self.http.post(format!("{}{endpoint}", self.base_url)).form(form);
        self.send(endpoint, request)
    }

    fn send(&self, endpoint: &str, request: RequestBuilder) -> Result<Value, ApiError> {
        let response = self.authenticate(request).send()?;
        let status = response.status();
        let text = response.text()?;
        tracing::debug!(endpoint, status = status.as_u16(), body = %truncate(&text, 500), "api response");

        if status == reqwest::StatusCode::INTERNAL_SERVER_ERROR {
            return Err(ApiError::RequestFailed {
                endpoint: endpoint.to_string(),
                message: format!("server returned {status}"),
            });
        }

        let body: Value = serde_json::from_str(&text).map_err(|e| ApiError::InvalidResponse {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })?;

        if body.get("success").and_then(Value::as_bool) == Some(true) {
            return Ok(body);
        }

        let message = collect_messages(&body);
        if message.contains("Hash doesn't match") {
            return Err(ApiError::Authentication);
        }
        Err(ApiError::RequestFailed {
            endpoint: endpoint.to_string(),
            message: if message.is_empty() {
                format!("server returned {status}")
            } else {
                message
            },
        })
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn collect_messages(body: &Value) -> String {
    ["errors", "messages"]
        .iter()
        .filter_map(|key| body.get(*key).and_then(Value::as_array))
        .flatten()
        .filter_map(|m| m.as_str().map(str::to_string).or_else(|| Some(m.to_string())))
        .collect::<Vec<_>>()
        .join(" ")
}

fn field<T: DeserializeOwned>(endpoint: &str, body: &Value, key: &str) -> Result<T, ApiError> {
    let value = body.get(key).cloned().unwrap_or(Value::Null);
    serde_json::from_value(value).map_err(|e| ApiError::InvalidResponse {
        endpoint: endpoint.to_string(),
        message: format!("field '{key}': {e}"),
    })
}

/// Flatten an update into the indexed form fields the update endpoint expects.
///
/// An empty list is sent as the bare field with an empty value so the server clears it.
fn update_form(project_id: u64, update: &ProjectUpdate) -> Vec<(String, String)> {
    let mut form = vec![("projectId".to_string(), project_id.to_string())];

    if let Some(description) = &update.description {
        form.push(("description".to_string(), description.clone()));
    }
    if let Some(parameters) = &update.parameters {
        if parameters.is_empty() {
            form.push(("parameters".to_string(), String::new()));
        }
        for (i, (key, value)) in parameters.iter().enumerate() {
            form.push((format!("parameters[{i}][key]"), key.clone()));
            form.push((format!("parameters[{i}][value]"), value.clone()));
        }
    }
    if let Some(version) = update.lean_engine {
        form.push(("versionId".to_string(), version.to_string()));
    }
    if let Some(venv) = update.python_venv {
        form.push(("leanEnvironment".to_string(), venv.to_string()));
    }
    if let Some(files) = &update.files {
        if files.is_empty() {
            form.push(("files".to_string(), String::new()));
        }
        for (i, file) in files.iter().enumerate() {
            form.push((format!("files[{i}][name]"), file.name.clone()));
            form.push((format!("files[{i}][content]"), file.content.clone()));
        }
    }
    if let Some(libraries) = &update.libraries {
        if libraries.is_empty() {
            form.push(("libraries".to_string(), String::new()));
        }
        for (i, id) in libraries.iter().enumerate() {
            form.push((format!("libraries[{i}]"), id.to_string()));
        }
    }
    if let Some(key) = &update.encryption_key {
        form.push(("encryptionKey".to_string(), key.clone()));
    }
    form
}

impl ProjectClient for HttpProjectClient {
    fn get_project(
        &self,
        project_id: u64,
        organization_id: Option<&str>,
    ) -> Result<CloudProject, ApiError> {
        let endpoint = "projects/read";
        let mut query = vec![("projectId", project_id.to_string())];
        if let Some(org) = organization_id {
            query.push(("organizationId", org.to_string()));
        }
        let body = self.get(endpoint, &query)?;
        let projects: Vec<CloudProject> = field(endpoint, &body, "projects")?;
        projects
            .into_iter()
            .next()
            .ok_or(ApiError::ProjectNotFound(project_id))
    }

    fn get_all_projects(&self, organization_id: Option<&str>) -> Result<Vec<CloudProject>, ApiError> {
        let endpoint = "projects/read";
        let query: Vec<(&str, String)> = organization_id
            .map(|org| vec![("organizationId", org.to_string())])
            .unwrap_or_default();
        let body = self.get(endpoint, &query)?;
        field(endpoint, &body, "projects")
    }

    fn create_project(
        &self,
        name: &str,
        language: Language,
        organization_id: Option<&str>,
    ) -> Result<CloudProject, ApiError> {
        let endpoint = "projects/create";
        let mut body = json!({
            "name": name,
            "language": language.cloud_code(),
        });
        if let Some(org) = organization_id {
            body["organizationId"] = json!(org);
        }
        let response = self.post_json(endpoint, &body)?;
        let projects: Vec<CloudProject> = field(endpoint, &response, "projects")?;
        projects
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::InvalidResponse {
                endpoint: endpoint.to_string(),
                message: "no project returned".to_string(),
            })
    }

    fn update_project(&self, project_id: u64, update: &ProjectUpdate) -> Result<(), ApiError> {
        self.post_form("projects/update", &update_form(project_id, update))?;
        Ok(())
    }

    fn get_files(&self, project_id: u64) -> Result<Vec<CloudFile>, ApiError> {
        let endpoint = "files/read";
        let body = self.get(endpoint, &[("projectId", project_id.to_string())])?;
        field(endpoint, &body, "files")
    }

    fn add_library(&self, project_id: u64, library_id: u64) -> Result<(), ApiError> {
        self.post_json(
            "projects/library/create",
            &json!({"projectId": project_id, "libraryId": library_id}),
        )?;
        Ok(())
    }

    fn delete_library(&self, project_id: u64, library_id: u64) -> Result<(), ApiError> {
        self.post_json(
            "projects/library/delete",
            &json!({"projectId": project_id, "libraryId": library_id}),
        )?;
        Ok(())
    }

    fn list_encryption_keys(&self, organization_id: Option<&str>) -> Result<Vec<RegisteredKey>, ApiError> {
        let endpoint = "organizations/encryption/keys/list/";
        let body = self.post_json(endpoint, &json!({"organizationId": organization_id}))?;
        field(endpoint, &body, "keys")
    }
}

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use lean_cli::api::{
    ApiError, CloudFile, CloudProject, Parameter, ProjectClient, ProjectEncryptionKey, ProjectLibrary,
    ProjectUpdate, RegisteredKey,
};
use lean_cli::language::Language;
use parking_lot::Mutex;

pub const ORG: &str = "org-1";

#[derive(Default)]
pub struct FakeState {
    pub projects: BTreeMap<u64, CloudProject>,
    pub files: HashMap<u64, Vec<CloudFile>>,
    pub keys: Vec<RegisteredKey>,
    pub next_id: u64,
    pub get_project_calls: Vec<u64>,
    pub get_all_calls: usize,
    pub get_files_calls: Vec<u64>,
    pub creates: Vec<String>,
    pub updates: Vec<(u64, ProjectUpdate)>,
    pub failing_files: HashSet<u64>,
    pub failing_updates: HashSet<u64>,
}

/// In-memory cloud.
#[derive(Default)]
pub struct FakeClient {
    pub state: Mutex<FakeState>,
}

impl FakeClient {
    pub fn new() -> Self {
        let client = Self::default();
        client.state.lock().next_id = 1000;
        client
    }

    pub fn add_project(&self, id: u64, name: &str, libraries: &[u64], files: &[(&str, &str)]) -> CloudProject {
        let project = cloud_project(id, name, libraries);
        let mut state = self.state.lock();
        state.projects.insert(id, project.clone());
        state.files.insert(
            id,
            files.iter().map(|(name, content)| cloud_file(name, content)).collect(),
        );
        project
    }

    pub fn update_project_with(&self, id: u64, f: impl FnOnce(&mut CloudProject)) {
        let mut state = self.state.lock();
        if let Some(project) = state.projects.get_mut(&id) {
            f(project);
        }
    }

    pub fn project(&self, id: u64) -> CloudProject {
        self.state.lock().projects[&id].clone()
    }

    pub fn all(&self) -> Vec<CloudProject> {
        self.state.lock().projects.values().cloned().collect()
    }

    pub fn files_of(&self, id: u64) -> Vec<CloudFile> {
        self.state.lock().files.get(&id).cloned().unwrap_or_default()
    }

    pub fn register_key(&self, hash: &str) {
        self.state.lock().keys.push(RegisteredKey {
            hash: hash.to_string(),
            name: "key".to_string(),
        });
    }

    pub fn fail_files_of(&self, id: u64) {
        self.state.lock().failing_files.insert(id);
    }

    pub fn fail_updates_of(&self, id: u64) {
        self.state.lock().failing_updates.insert(id);
    }

    pub fn get_files_calls(&self) -> Vec<u64> {
        self.state.lock().get_files_calls.clone()
    }

    pub fn creates(&self) -> Vec<String> {
        self.state.lock().creates.clone()
    }

    pub fn updates(&self) -> Vec<(u64, ProjectUpdate)> {
        self.state.lock().updates.clone()
    }
}

impl ProjectClient for FakeClient {
    fn get_project(&self, project_id: u64, _organization_id: Option<&str>) -> Result<CloudProject, ApiError> {
        let mut state = self.state.lock();
        state.get_project_calls.push(project_id);
        state
            .projects
            .get(&project_id)
            .cloned()
            .ok_or(ApiError::ProjectNotFound(project_id))
    }

    fn get_all_projects(&self, _organization_id: Option<&str>) -> Result<Vec<CloudProject>, ApiError> {
        let mut state = self.state.lock();
        state.get_all_calls += 1;
        Ok(state.projects.values().cloned().collect())
    }

    fn create_project(
        &self,
        name: &str,
        language: Language,
        _organization_id: Option<&str>,
    ) -> Result<CloudProject, ApiError> {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        let mut project = cloud_project(id, name, &[]);
        project.language = language;
        state.creates.push(name.to_string());
        state.projects.insert(id, project.clone());
        state.files.insert(id, Vec::new());
        Ok(project)
    }

    fn update_project(&self, project_id: u64, update: &ProjectUpdate) -> Result<(), ApiError> {
        let mut state = self.state.lock();
        if state.failing_updates.contains(&project_id) {
            return Err(ApiError::RequestFailed {
                endpoint: "projects/update".to_string(),
                message: "injected failure".to_string(),
            });
        }
        state.updates.push((project_id, update.clone()));

        if let Some(files) = &update.files {
            let stored = files
                .iter()
                .map(|f| cloud_file(&f.name, &f.content))
                .collect();
            state.files.insert(project_id, stored);
        }
        let project = state
            .projects
            .get_mut(&project_id)
            .ok_or(ApiError::ProjectNotFound(project_id))?;
        if let Some(description) = &update.description {
            project.description = description.clone();
        }
        if let Some(parameters) = &update.parameters {
            project.parameters = parameters
                .iter()
                .map(|(key, value)| Parameter {
                    key: key.clone(),
                    value: value.clone(),
                })
                .collect();
        }
        if let Some(lean_engine) = update.lean_engine {
            project.lean_version_id = lean_engine;
        }
        if let Some(venv) = update.python_venv {
            project.lean_environment = Some(venv);
        }
        if let Some(libraries) = &update.libraries {
            project.libraries = libraries.iter().map(|&id| library(id)).collect();
        }
        if let Some(key) = &update.encryption_key {
            project.encrypted = !key.is_empty();
            project.encryption_key = Some(key.clone()).filter(|k| !k.is_empty()).map(|id| ProjectEncryptionKey {
                id,
                name: "key".to_string(),
            });
        }
        Ok(())
    }

    fn get_files(&self, project_id: u64) -> Result<Vec<CloudFile>, ApiError> {
        let mut state = self.state.lock();
        state.get_files_calls.push(project_id);
        if state.failing_files.contains(&project_id) {
            return Err(ApiError::RequestFailed {
                endpoint: "files/read".to_string(),
                message: "injected failure".to_string(),
            });
        }
        Ok(state.files.get(&project_id).cloned().unwrap_or_default())
    }

    fn add_library(&self, project_id: u64, library_id: u64) -> Result<(), ApiError> {
        let mut state = self.state.lock();
        let project = state
            .projects
            .get_mut(&project_id)
            .ok_or(ApiError::ProjectNotFound(project_id))?;
        project.libraries.push(library(library_id));
        Ok(())
    }

    fn delete_library(&self, project_id: u64, library_id: u64) -> Result<(), ApiError> {
        let mut state = self.state.lock();
        let project = state
            .projects
            .get_mut(&project_id)
            .ok_or(ApiError::ProjectNotFound(project_id))?;
        project.libraries.retain(|l| l.project_id != library_id);
        Ok(())
    }

    fn list_encryption_keys(&self, _organization_id: Option<&str>) -> Result<Vec<RegisteredKey>, ApiError> {
        Ok(self.state.lock().keys.clone())
    }
}

pub fn library(id: u64) -> ProjectLibrary {
    ProjectLibrary {
        project_id: id,
        library_name: String::new(),
        owner_name: String::new(),
    }
}

pub fn cloud_project(id: u64, name: &str, libraries: &[u64]) -> CloudProject {
    CloudProject {
        project_id: id,
        organization_id: ORG.to_string(),
        name: name.to_string(),
        modified: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
        language: Language::Python,
        lean_version_id: 16000,
        libraries: libraries.iter().map(|&id| library(id)).collect(),
        ..Default::default()
    }
}

pub fn cloud_file(name: &str, content: &str) -> CloudFile {
    CloudFile {
        name: name.to_string(),
        content: content.to_string(),
        modified: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
        is_library: false,
    }
}

/// A Lean CLI root with a `lean.json`.
pub fn lean_root() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    fs::write(
        root.join("lean.json"),
        "{\n    // data folder\n    \"data-folder\": \"data\",\n    \"organization-id\": \"org-1\"\n}\n",
    )
    .unwrap();
    (dir, root)
}

/// Write a local project with the given config and files.
pub fn local_project(root: &Path, rel: &str, config: serde_json::Value, files: &[(&str, &str)]) -> PathBuf {
    let dir = root.join(rel);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("config.json"), serde_json::to_string_pretty(&config).unwrap()).unwrap();
    for (name, content) in files {
        let path = dir.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
    dir
}

pub fn read_config(dir: &Path) -> serde_json::Value {
    serde_json::from_str(&fs::read_to_string(dir.join("config.json")).unwrap()).unwrap()
}

pub fn write_key(root: &Path, name: &str, content: &str) -> PathBuf {
    let path = root.join(name);
    fs::write(&path, content).unwrap();
    path.canonicalize().unwrap()
}

/// Log output collected from a `tracing` subscriber.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Run `f` with a subscriber recording plain-text logs.
pub fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .without_time()
        .with_target(false)
        .finish();
    let out = tracing::subscriber::with_default(subscriber, f);
    (out, buffer.contents())
}

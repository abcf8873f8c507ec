//! Pushing local projects to the cloud.
//!
//! Every pushed directory either gets a new cloud project (exactly one
//! `create_project` call, after which its `cloud-id` is written back) or is diffed
//! against the cloud project it is linked to. Only the fields that differ are sent.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use itertools::Itertools;

use super::report::{ProjectSyncResult, SyncDirection, SyncOutcome, SyncReport};
use super::{EncryptionOptions, SyncContext, SyncError};
use crate::api::models::join_categories;
use crate::api::{ApiError, CloudFile, CloudProject, FileContent, ProjectUpdate, RegisteredKey};
use crate::config::ProjectConfig;
use crate::encryption::{self, EncryptionAction, EncryptionError, EncryptionKey};
use crate::project::{ProjectError, ProjectManager, canonical_key, paths};

/// How local file contents are sent.
enum PushMode {
    Plain,
    Encrypt(EncryptionKey),
    Decrypt(EncryptionKey),
}

impl PushMode {
    fn key(&self) -> Option<&EncryptionKey> {
        match self {
            Self::Plain => None,
            Self::Encrypt(key) | Self::Decrypt(key) => Some(key),
        }
    }
}

/// Cloud state fetched once per push call.
#[derive(Default)]
struct PushSession {
    cloud_projects: HashMap<u64, CloudProject>,
    registered_keys: Option<Vec<RegisteredKey>>,
}

/// Order in which `dirs` and their local libraries are pushed.
///
/// Every library comes before the projects that reference it and every directory
/// appears once.
pub fn push_order(projects: &ProjectManager, dirs: &[PathBuf]) -> Result<Vec<PathBuf>, SyncError> {
    let mut seen = HashSet::new();
    let mut ordered = Vec::new();
    for dir in dirs {
        let mut chain = projects.project_libraries(dir)?;
        chain.push(dir.clone());
        for path in chain {
            if seen.insert(canonical_key(&path)) {
                ordered.push(path);
            }
        }
    }
    Ok(ordered)
}

/// Synchronizes local projects to the cloud.
pub struct PushManager<'a, 'c> {
    ctx: &'a SyncContext<'c>,
    projects: ProjectManager,
}

impl<'a, 'c> PushManager<'a, 'c> {
    pub fn new(ctx: &'a SyncContext<'c>) -> Self {
        Self {
            ctx,
            projects: ProjectManager::new(ctx.root()),
        }
    }

    /// Push `dirs` in the given order.
    ///
    /// Every directory must contain a project config. Use [`push_order`] to push the
    /// libraries of a project along with it.
    pub fn push_projects(&self, dirs: &[PathBuf], encryption: &EncryptionOptions) -> Result<SyncReport, SyncError> {
        encryption.validate()?;
        if let Some(dir) = dirs.iter().find(|dir| !ProjectConfig::exists_in(dir)) {
            return Err(SyncError::NotAProject(dir.clone()));
        }
        let explicit = match (encryption.action, encryption.load_key()?) {
            (Some(action), Some(key)) => Some((action, key)),
            _ => None,
        };

        let overall_start = Instant::now();
        let mut report = SyncReport::new(SyncDirection::Push);
        let mut session = PushSession::default();
        let total = dirs.len();

        for (index, dir) in dirs.iter().enumerate() {
            let name = self.projects.project_name(dir);
            tracing::info!("[{}/{}] Pushing '{}'", index + 1, total, name);
            let start = Instant::now();

            let mut result = match self.push_project(dir, &name, explicit.as_ref(), &mut session) {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!("Cannot push '{}': {}", name, e);
                    let cloud_id = ProjectConfig::load(dir).ok().and_then(|c| c.cloud_id);
                    let mut result = ProjectSyncResult::failed(name.clone(), cloud_id, &e, None);
                    result.local_path = Some(dir.clone());
                    result
                }
            };
            result.duration_ms = start.elapsed().as_millis() as u64;
            report.add_result(result);
        }

        report.total_duration_ms = overall_start.elapsed().as_millis() as u64;
        Ok(report)
    }

    fn push_project(
        &self,
        dir: &Path,
        name: &str,
        explicit: Option<&(EncryptionAction, EncryptionKey)>,
        session: &mut PushSession,
    ) -> Result<ProjectSyncResult, SyncError> {
        let mut config = ProjectConfig::load(dir)?;
        let mut result = ProjectSyncResult::new(name, config.cloud_id);
        result.local_path = Some(dir.to_path_buf());

        let cloud = match config.cloud_id {
            Some(id) => match self.cloud_project(id, session) {
                Ok(project) => project,
                Err(SyncError::Api(ApiError::ProjectNotFound(_))) => {
                    tracing::info!("Cloud project {} of '{}' no longer exists", id, name);
                    result.created = true;
                    self.create_cloud_project(dir, name, &mut config, session)?
                }
                Err(e) => return Err(e),
            },
            None => {
                result.created = true;
                self.create_cloud_project(dir, name, &mut config, session)?
            }
        };
        result.cloud_id = Some(cloud.project_id);

        encryption::validate_key_state(
            &cloud,
            config.encrypted,
            config.encryption_key_path.as_deref(),
            explicit.map(|(_, key)| key),
        )?;
        let mode = self.push_mode(&config, name, explicit)?;
        if let Some(key) = mode.key() {
            self.ensure_registered(key, session)?;
        }

        let update = self.build_update(dir, &config, &cloud, &mode)?;
        if !update.is_empty() {
            self.ctx.client().update_project(cloud.project_id, &update)?;
            let categories = update.categories();
            tracing::info!(
                "Successfully updated {} for '{}'",
                join_categories(&categories),
                cloud.name
            );
            result.updated = categories.into_iter().map(String::from).collect();
        }

        result.outcome = if result.created || !result.updated.is_empty() {
            SyncOutcome::Updated
        } else {
            SyncOutcome::Unchanged
        };
        Ok(result)
    }

    fn cloud_project(&self, id: u64, session: &mut PushSession) -> Result<CloudProject, SyncError> {
        if let Some(project) = session.cloud_projects.get(&id) {
            return Ok(project.clone());
        }
        let project = self.ctx.client().get_project(id, self.ctx.organization_id())?;
        session.cloud_projects.insert(id, project.clone());
        Ok(project)
    }

    fn create_cloud_project(
        &self,
        dir: &Path,
        name: &str,
        config: &mut ProjectConfig,
        session: &mut PushSession,
    ) -> Result<CloudProject, SyncError> {
        let language = config
            .algorithm_language
            .ok_or_else(|| ProjectError::MissingLanguage(dir.to_path_buf()))?;
        let organization_id = self.ctx.organization_id();
        let project = self.ctx.client().create_project(name, language, organization_id)?;

        config.cloud_id = Some(project.project_id);
        config.organization_id = Some(project.organization_id.clone())
            .filter(|org| !org.is_empty())
            .or_else(|| organization_id.map(String::from));
        config.save()?;

        let organization_part = organization_id
            .map(|org| format!(" in organization '{org}'"))
            .unwrap_or_default();
        tracing::info!("Successfully created cloud project '{}'{}", project.name, organization_part);

        session.cloud_projects.insert(project.project_id, project.clone());
        Ok(project)
    }

    /// Pick how files are sent.
    ///
    /// An explicit action wins. Otherwise projects encrypted locally are pushed
    /// encrypted with their configured key, which must be readable.
    fn push_mode(
        &self,
        config: &ProjectConfig,
        name: &str,
        explicit: Option<&(EncryptionAction, EncryptionKey)>,
    ) -> Result<PushMode, SyncError> {
        if let Some((action, key)) = explicit {
            return Ok(match action {
                EncryptionAction::Encrypt => PushMode::Encrypt(key.clone()),
                EncryptionAction::Decrypt => PushMode::Decrypt(key.clone()),
            });
        }
        if !config.encrypted {
            return Ok(PushMode::Plain);
        }
        let key = config
            .encryption_key_path
            .as_deref()
            .and_then(|path| EncryptionKey::load(path).ok())
            .ok_or_else(|| EncryptionError::LocalKeyUnavailable(name.to_string()))?;
        Ok(PushMode::Encrypt(key))
    }

    fn ensure_registered(&self, key: &EncryptionKey, session: &mut PushSession) -> Result<(), SyncError> {
        if session.registered_keys.is_none() {
            let keys = self
                .ctx
                .client()
                .list_encryption_keys(self.ctx.organization_id())?;
            session.registered_keys = Some(keys);
        }
        let registered = session
            .registered_keys
            .as_deref()
            .is_some_and(|keys| keys.iter().any(|k| k.hash == key.id()));
        if registered {
            Ok(())
        } else {
            Err(EncryptionError::KeyNotRegistered.into())
        }
    }

    fn build_update(
        &self,
        dir: &Path,
        config: &ProjectConfig,
        cloud: &CloudProject,
        mode: &PushMode,
    ) -> Result<ProjectUpdate, SyncError> {
        let mut update = ProjectUpdate::default();

        let description = config.description.clone().unwrap_or_default();
        if description != cloud.description {
            update.description = Some(description);
        }

        if config.parameters != cloud.parameter_map() {
            update.parameters = Some(config.parameters.clone());
        }

        // -1 stands for the latest engine and never overrides the cloud pin
        if let Some(lean_engine) = config.lean_engine {
            if lean_engine != -1 && lean_engine != cloud.lean_version_id {
                update.lean_engine = Some(lean_engine);
            }
        }

        if let Some(venv) = config.python_venv {
            if Some(venv) != cloud.lean_environment {
                update.python_venv = Some(venv);
            }
        }

        let files = self.local_files(dir, config, cloud, mode)?;
        let cloud_files = self.ctx.client().get_files(cloud.project_id)?;
        // library files come along with the project but are not part of it
        let cloud_files: Vec<&CloudFile> = cloud_files.iter().filter(|f| !f.is_library).collect();
        if !same_files(&files, &cloud_files) {
            update.files = Some(files);
        }

        let libraries = self.library_cloud_ids(config)?;
        let cloud_libraries: Vec<u64> = cloud.library_ids().into_iter().sorted().dedup().collect();
        if libraries != cloud_libraries {
            update.libraries = Some(libraries);
        }

        let desired_key = match mode {
            PushMode::Encrypt(key) => Some(key.id()),
            PushMode::Plain | PushMode::Decrypt(_) => None,
        };
        if desired_key != cloud.encryption_key_id() {
            update.encryption_key = Some(desired_key.unwrap_or_default().to_string());
        }

        Ok(update)
    }

    /// Source files as they should be stored in the cloud.
    fn local_files(
        &self,
        dir: &Path,
        config: &ProjectConfig,
        cloud: &CloudProject,
        mode: &PushMode,
    ) -> Result<Vec<FileContent>, SyncError> {
        let cipher = match mode.key() {
            Some(key) => Some(key.cipher(&self.cipher_organization(config, cloud))?),
            None => None,
        };

        let mut files = Vec::new();
        for path in self.projects.source_files(dir)? {
            let raw = fs::read_to_string(&path).map_err(|e| SyncError::io(&path, e))?;
            let name = paths::to_posix(path.strip_prefix(dir).unwrap_or(&path));
            let content = match (mode, &cipher) {
                (PushMode::Encrypt(_), Some(cipher)) if !config.encrypted => cipher.encrypt(&raw)?,
                (PushMode::Decrypt(_), Some(cipher)) if config.encrypted => cipher.decrypt(&name, &raw)?,
                _ => raw,
            };
            files.push(FileContent { name, content });
        }
        Ok(files)
    }

    fn cipher_organization(&self, config: &ProjectConfig, cloud: &CloudProject) -> String {
        Some(cloud.organization_id.clone())
            .filter(|org| !org.is_empty())
            .or_else(|| config.organization_id.clone())
            .or_else(|| self.ctx.organization_id().map(String::from))
            .unwrap_or_default()
    }

    /// Cloud ids of the libraries in the project config, sorted.
    fn library_cloud_ids(&self, config: &ProjectConfig) -> Result<Vec<u64>, SyncError> {
        let mut ids = Vec::new();
        for library_dir in config.library_dirs(self.ctx.root()) {
            let library = ProjectConfig::load(&library_dir)?;
            let id = library
                .cloud_id
                .ok_or_else(|| SyncError::LibraryNotPushed(library_dir.clone()))?;
            ids.push(id);
        }
        Ok(ids.into_iter().sorted().dedup().collect())
    }
}

/// Whether the cloud already holds exactly `local`, ignoring surrounding whitespace.
fn same_files(local: &[FileContent], cloud: &[&CloudFile]) -> bool {
    if local.len() != cloud.len() {
        return false;
    }
    let local_names: BTreeSet<&str> = local.iter().map(|f| f.name.as_str()).collect();
    let cloud_by_name: HashMap<&str, &str> = cloud
        .iter()
        .map(|f| (f.name.as_str(), f.content.as_str()))
        .collect();
    if local_names.len() != cloud_by_name.len() {
        return false;
    }
    local.iter().all(|file| {
        cloud_by_name
            .get(file.name.as_str())
            .is_some_and(|content| normalize(content) == normalize(&file.content))
    })
}

fn normalize(content: &str) -> String {
    content.replace("\r\n", "\n").trim().to_string()
}

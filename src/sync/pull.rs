//! Pulling cloud projects to the local drive.

use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Instant;

use super::report::{ProjectSyncResult, SyncDirection, SyncOutcome, SyncReport};
use super::{EncryptionOptions, SyncContext, SyncError};
use crate::api::{CloudFile, CloudProject};
use crate::config::ProjectConfig;
use crate::encryption::{self, EncryptionAction, EncryptionKey, ProjectCipher};
use crate::language::Language;
use crate::project::libraries::{cloud_library_closure, fetch_library_closure};
use crate::project::{LibraryManager, ProjectManager, RestoreMode};

/// How cloud file contents are transformed before they are written.
enum FilePlan {
    Mirror,
    Decrypt(ProjectCipher),
    Encrypt(ProjectCipher),
}

/// Encryption state of the local project once the pull is done.
struct LocalEncryption {
    encrypted: bool,
    key_path: Option<PathBuf>,
}

/// A project that could not be pulled.
struct PullFailure {
    file: Option<String>,
    error: SyncError,
}

impl From<SyncError> for PullFailure {
    fn from(error: SyncError) -> Self {
        Self { file: None, error }
    }
}

/// Synchronizes cloud projects to the local drive.
pub struct PullManager<'a, 'c> {
    ctx: &'a SyncContext<'c>,
    projects: ProjectManager,
    libraries: LibraryManager,
}

impl<'a, 'c> PullManager<'a, 'c> {
    pub fn new(ctx: &'a SyncContext<'c>) -> Self {
        Self {
            ctx,
            projects: ProjectManager::new(ctx.root()),
            libraries: LibraryManager::new(ctx.root()),
        }
    }

    /// Local directory a cloud project is pulled to.
    ///
    /// Two cloud projects named "Project" end up in `./Project` and `./Project 2`.
    pub fn local_project_path(&self, project: &CloudProject) -> Result<PathBuf, SyncError> {
        Ok(self
            .projects
            .local_project_path(&project.name, project.project_id)?)
    }

    /// Pull `targets` and every library they transitively reference.
    ///
    /// With `catalog` (all cloud projects of the organization) libraries are
    /// resolved without extra requests; otherwise each library is fetched once.
    /// Encryption keys are checked for every project before anything is written.
    /// Projects that fail are recorded in the report and the batch carries on.
    pub fn pull_projects(
        &self,
        targets: Vec<CloudProject>,
        catalog: Option<&[CloudProject]>,
        encryption: &EncryptionOptions,
    ) -> Result<SyncReport, SyncError> {
        encryption.validate()?;
        let key = encryption.load_key()?;
        let overall_start = Instant::now();

        let mut seen = HashSet::new();
        let mut projects: Vec<CloudProject> = targets
            .into_iter()
            .filter(|p| seen.insert(p.project_id))
            .collect();

        let libraries = match catalog {
            Some(catalog) => cloud_library_closure(&projects, catalog),
            None => fetch_library_closure(&projects, |id| {
                self.ctx.client().get_project(id, self.ctx.organization_id())
            }),
        };
        projects.extend(libraries);
        projects.sort_by(|a, b| a.name.cmp(&b.name));

        for project in &projects {
            self.check_encryption(project, key.as_ref())?;
        }

        let mut report = SyncReport::new(SyncDirection::Pull);
        let mut pulled: Vec<(CloudProject, PathBuf)> = Vec::new();
        let total = projects.len();

        for (index, project) in projects.into_iter().enumerate() {
            tracing::info!("[{}/{}] Pulling '{}'", index + 1, total, project.name);
            let start = Instant::now();

            match self.pull_project(&project, encryption.action, key.as_ref()) {
                Ok(mut result) => {
                    result.duration_ms = start.elapsed().as_millis() as u64;
                    let local_path = result.local_path.clone().unwrap_or_default();
                    report.add_result(result);
                    pulled.push((project, local_path));
                }
                Err(failure) => {
                    match &failure.file {
                        Some(file) => tracing::warn!(
                            "Cannot pull '{}' (id {}, failed on {}): {}",
                            project.name,
                            project.project_id,
                            file,
                            failure.error
                        ),
                        None => tracing::warn!(
                            "Cannot pull '{}' (id {}): {}",
                            project.name,
                            project.project_id,
                            failure.error
                        ),
                    }
                    let mut result = ProjectSyncResult::failed(
                        project.name.clone(),
                        Some(project.project_id),
                        &failure.error,
                        failure.file,
                    );
                    result.duration_ms = start.elapsed().as_millis() as u64;
                    report.add_result(result);
                }
            }
        }

        self.update_local_library_references(&pulled, &mut report);

        report.total_duration_ms = overall_start.elapsed().as_millis() as u64;
        Ok(report)
    }

    /// Refuse to touch a local project whose key disagrees with the cloud.
    fn check_encryption(&self, project: &CloudProject, key: Option<&EncryptionKey>) -> Result<(), SyncError> {
        let path = self.local_project_path(project)?;
        let (local_encrypted, local_key) = match ProjectConfig::load(&path) {
            Ok(config) => (config.encrypted, config.encryption_key_path),
            // broken configs fail the project itself later on
            Err(_) => (false, None),
        };
        encryption::validate_key_state(project, local_encrypted, local_key.as_deref(), key)?;
        Ok(())
    }

    fn plan(
        &self,
        project: &CloudProject,
        config: &ProjectConfig,
        action: Option<EncryptionAction>,
        key: Option<&EncryptionKey>,
    ) -> Result<(FilePlan, LocalEncryption), SyncError> {
        let organization_id = project.organization_id.as_str();
        Ok(match (action, key) {
            (Some(EncryptionAction::Decrypt), Some(key)) => {
                let plan = if project.encrypted {
                    FilePlan::Decrypt(key.cipher(organization_id)?)
                } else {
                    FilePlan::Mirror
                };
                (
                    plan,
                    LocalEncryption {
                        encrypted: false,
                        key_path: None,
                    },
                )
            }
            (Some(EncryptionAction::Encrypt), Some(key)) => {
                let plan = if project.encrypted {
                    FilePlan::Mirror
                } else {
                    FilePlan::Encrypt(key.cipher(organization_id)?)
                };
                (
                    plan,
                    LocalEncryption {
                        encrypted: true,
                        key_path: Some(key.path().to_path_buf()),
                    },
                )
            }
            _ => {
                let state = if project.encrypted {
                    LocalEncryption {
                        encrypted: true,
                        key_path: config.encryption_key_path.clone(),
                    }
                } else {
                    LocalEncryption {
                        encrypted: false,
                        key_path: None,
                    }
                };
                (FilePlan::Mirror, state)
            }
        })
    }

    fn pull_project(
        &self,
        project: &CloudProject,
        action: Option<EncryptionAction>,
        key: Option<&EncryptionKey>,
    ) -> Result<ProjectSyncResult, PullFailure> {
        let local_path = self.local_project_path(project)?;
        if !local_path.exists() {
            self.projects
                .create_new_project(&local_path, project.language)
                .map_err(SyncError::from)?;
        }

        let mut config = ProjectConfig::load(&local_path).map_err(SyncError::from)?;
        let original_config = config.clone();
        let (plan, local_encryption) = self.plan(project, &config, action, key)?;

        let files = self
            .ctx
            .client()
            .get_files(project.project_id)
            .map_err(SyncError::from)?;

        let mut result = ProjectSyncResult::new(project.name.clone(), Some(project.project_id));
        result.local_path = Some(local_path.clone());

        for file in files.iter().filter(|f| !f.is_library) {
            self.pull_file(project, &local_path, file, &plan, &mut result)
                .map_err(|error| PullFailure {
                    file: Some(file.name.clone()),
                    error,
                })?;
        }

        config.cloud_id = Some(project.project_id);
        config.algorithm_language = Some(project.language);
        config.parameters = project.parameter_map();
        config.description = Some(project.description.clone());
        config.organization_id =
            Some(project.organization_id.clone()).filter(|org| !org.is_empty());
        if let Some(venv) = project.lean_environment {
            config.python_venv = Some(venv);
        }
        config.name = Some(project.name.clone());
        config.lean_engine = if project.lean_pinned_to_master {
            None
        } else {
            Some(project.lean_version_id)
        };
        config.encrypted = local_encryption.encrypted;
        config.encryption_key_path = local_encryption.key_path;

        let config_changed = config != original_config;
        config.save().map_err(SyncError::from)?;

        self.projects
            .update_last_modified_time(&local_path, project.modified)
            .map_err(SyncError::from)?;

        result.outcome = if result.files_written > 0 || config_changed {
            SyncOutcome::Updated
        } else {
            SyncOutcome::Unchanged
        };
        Ok(result)
    }

    fn pull_file(
        &self,
        project: &CloudProject,
        local_path: &Path,
        file: &CloudFile,
        plan: &FilePlan,
        result: &mut ProjectSyncResult,
    ) -> Result<(), SyncError> {
        let relative = Path::new(&file.name);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(SyncError::UnsafePath(file.name.clone()));
        }

        let content = match plan {
            FilePlan::Mirror => file.content.clone(),
            FilePlan::Decrypt(cipher) => cipher.decrypt(&file.name, &file.content)?,
            FilePlan::Encrypt(cipher) => cipher.encrypt(&file.content)?,
        };
        let mut content = content.replace("\r\n", "\n");

        let path = local_path.join(relative);
        if path.is_file() {
            let existing = fs::read_to_string(&path).map_err(|e| SyncError::io(&path, e))?;
            if existing.replace("\r\n", "\n").trim() == content.trim() {
                self.projects.update_last_modified_time(&path, file.modified)?;
                result.files_unchanged += 1;
                return Ok(());
            }
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;
        }
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        fs::write(&path, content).map_err(|e| SyncError::io(&path, e))?;
        self.projects.update_last_modified_time(&path, file.modified)?;

        result.files_written += 1;
        tracing::info!("Successfully pulled '{}/{}'", project.name, file.name);
        Ok(())
    }

    /// Make the local library references of every pulled project match the cloud.
    fn update_local_library_references(&self, pulled: &[(CloudProject, PathBuf)], report: &mut SyncReport) {
        for (project, project_dir) in pulled {
            let library_ids = project.library_ids();
            let project_label = project_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| project.name.clone());
            let mut warnings = Vec::new();

            let library_dirs: Vec<&PathBuf> = pulled
                .iter()
                .filter(|(library, _)| library_ids.contains(&library.project_id))
                .map(|(_, dir)| dir)
                .collect();

            if !library_dirs.is_empty() {
                tracing::info!("Adding/updating local library references to project {}", project_label);
            }
            for (i, library_dir) in library_dirs.iter().enumerate() {
                tracing::info!(
                    "[{}/{}] Adding/updating local library {} reference to project {}",
                    i + 1,
                    library_dirs.len(),
                    library_dir.file_name().map(|n| n.to_string_lossy()).unwrap_or_default(),
                    project_label
                );
                if let Err(e) = self.libraries.add(project_dir, library_dir, RestoreMode::Deferred) {
                    tracing::warn!(project = %project.name, error = %e, "Failed to add library reference");
                    warnings.push(e.to_string());
                }
            }

            if let Err(e) = self.remove_stale_references(project_dir, &library_dirs, &library_ids) {
                tracing::warn!(project = %project.name, error = %e, "Failed to remove library references");
                warnings.push(e.to_string());
            }

            if project.language == Language::CSharp && self.ctx.local_restore() {
                if let Err(e) = self.libraries.restore(project_dir) {
                    tracing::warn!(project = %project.name, error = %e, "Failed to restore project");
                    warnings.push(e.to_string());
                }
            }

            if let Some(result) = report.result_for_mut(project.project_id) {
                result.warnings.extend(warnings);
            }
        }
    }

    /// Drop references to libraries the cloud project no longer uses.
    ///
    /// References to libraries that are still used in the cloud but were not pulled
    /// in this batch are kept.
    fn remove_stale_references(
        &self,
        project_dir: &Path,
        library_dirs: &[&PathBuf],
        library_ids: &[u64],
    ) -> Result<(), SyncError> {
        let expected: HashSet<PathBuf> = library_dirs
            .iter()
            .map(|dir| self.libraries.config_path(dir))
            .collect();
        let config = ProjectConfig::load(project_dir)?;

        let stale: Vec<PathBuf> = config
            .libraries
            .iter()
            .zip(config.library_dirs(self.ctx.root()))
            .filter(|(reference, _)| !expected.contains(&reference.path))
            .map(|(_, dir)| dir)
            .filter(|dir| {
                let still_used = ProjectConfig::load(dir)
                    .ok()
                    .and_then(|c| c.cloud_id)
                    .is_some_and(|id| library_ids.contains(&id));
                !still_used
            })
            .collect();

        if !stale.is_empty() {
            tracing::info!("Removing local library references from project {}", project_dir.display());
        }
        for (i, library_dir) in stale.iter().enumerate() {
            tracing::info!(
                "[{}/{}] Removing local library {} reference from project {}",
                i + 1,
                stale.len(),
                library_dir.display(),
                project_dir.display()
            );
            self.libraries.remove(project_dir, library_dir, RestoreMode::Deferred)?;
        }
        Ok(())
    }
}

//! Library references between projects.
//!
//! Local references live in the `libraries` list of a project's config and, for C#
//! projects, as `<ProjectReference>` items in its `.csproj`. Both are kept in
//! lockstep by [`LibraryManager`]. The cloud side of the graph is walked by
//! [`cloud_library_closure`] and [`fetch_library_closure`], which use a worklist and
//! a visited set so cycles and self references terminate.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};

use super::paths::{relative_if_possible, to_posix};
use super::{ProjectError, ProjectManager, csproj};
use crate::api::CloudProject;
use crate::config::{LibraryReference, ProjectConfig};
use crate::language::Language;

/// When `dotnet restore` runs after a C# reference change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreMode {
    /// Restore right away, reverting the `.csproj` edit if the restore fails.
    Immediate,
    /// Leave the restore to the caller, e.g. after a batch of reference changes.
    Deferred,
}

/// Result of adding a library reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    AlreadyExisted,
}

/// Maintains library references of local projects.
#[derive(Debug, Clone)]
pub struct LibraryManager {
    projects: ProjectManager,
}

impl LibraryManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            projects: ProjectManager::new(root),
        }
    }

    fn root(&self) -> &Path {
        self.projects.root()
    }

    /// Whether `path` is a Lean CLI library: a project directory under `Library/`.
    pub fn is_lean_library(&self, path: &Path) -> bool {
        let relative = relative_if_possible(path, self.root());
        let under_library = relative
            .components()
            .next()
            .is_some_and(|c| c.as_os_str().to_string_lossy().eq_ignore_ascii_case("library"));

        under_library
            && relative.is_relative()
            && path.is_dir()
            && ProjectConfig::load(path)
                .map(|c| c.algorithm_language.is_some())
                .unwrap_or(false)
    }

    /// Path of `dir` as stored in a project's `libraries` list.
    pub fn config_path(&self, dir: &Path) -> PathBuf {
        relative_if_possible(dir, self.root())
    }

    /// `../` repeated once per component of the project's path below the root.
    fn csproj_prefix(&self, project_dir: &Path) -> String {
        let depth = relative_if_possible(project_dir, self.root()).components().count();
        "../".repeat(depth)
    }

    /// Include path of the library's `.csproj`, relative to the project directory.
    fn csproj_include(&self, project_dir: &Path, library_dir: &Path) -> Option<String> {
        let library_csproj = self.projects.csproj_file_path(library_dir)?;
        let relative = relative_if_possible(&library_csproj, self.root());
        Some(format!("{}{}", self.csproj_prefix(project_dir), to_posix(&relative)))
    }

    fn language_of(dir: &Path) -> Result<Option<Language>, ProjectError> {
        Ok(ProjectConfig::load(dir)?.algorithm_language)
    }

    /// Add a reference to `library_dir` to the project in `project_dir`.
    ///
    /// Adding a reference that already exists is a no-op. Adding a library that
    /// already references the project is refused as a circular dependency.
    pub fn add(
        &self,
        project_dir: &Path,
        library_dir: &Path,
        restore: RestoreMode,
    ) -> Result<AddOutcome, ProjectError> {
        let mut config = ProjectConfig::load(project_dir)?;
        let library_path = self.config_path(library_dir);
        let project_path = self.config_path(project_dir);

        if config.libraries.iter().any(|l| l.path == library_path) {
            tracing::debug!(
                project = %project_path.display(),
                library = %library_path.display(),
                "library reference already exists"
            );
            return Ok(AddOutcome::AlreadyExisted);
        }

        let library_config = ProjectConfig::load(library_dir)?;
        if library_path == project_path || library_config.libraries.iter().any(|l| l.path == project_path)
        {
            return Err(ProjectError::CircularDependency {
                project: to_posix(&project_path),
                library: to_posix(&library_path),
            });
        }

        // C# projects reference C# libraries in their .csproj as well.
        let mut csproj_edit = None;
        if config.algorithm_language == Some(Language::CSharp)
            && library_config.algorithm_language == Some(Language::CSharp)
        {
            let include = self
                .csproj_include(project_dir, library_dir)
                .ok_or_else(|| ProjectError::MissingCsproj(library_dir.to_path_buf()))?;
            if let Some(csproj_path) = self.projects.csproj_file_path(project_dir) {
                let original =
                    fs::read_to_string(&csproj_path).map_err(|e| ProjectError::io(&csproj_path, e))?;
                if let Some(updated) = csproj::add_project_reference(&original, &include) {
                    csproj_edit = Some((csproj_path, original, updated));
                }
            }
        }

        config.libraries.push(LibraryReference {
            name: library_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| to_posix(&library_path)),
            path: library_path,
        });
        config.save()?;

        if let Some((csproj_path, original, updated)) = csproj_edit {
            fs::write(&csproj_path, updated).map_err(|e| ProjectError::io(&csproj_path, e))?;
            if restore == RestoreMode::Immediate {
                restore_or_revert(&csproj_path, &original)?;
            }
        }

        Ok(AddOutcome::Added)
    }

    /// Remove the reference to `library_dir`. Missing references are not an error.
    pub fn remove(
        &self,
        project_dir: &Path,
        library_dir: &Path,
        restore: RestoreMode,
    ) -> Result<(), ProjectError> {
        let mut config = ProjectConfig::load(project_dir)?;
        let library_path = self.config_path(library_dir);

        let before = config.libraries.len();
        config.libraries.retain(|l| l.path != library_path);
        if config.libraries.len() != before {
            config.save()?;
        }

        if config.algorithm_language != Some(Language::CSharp) {
            return Ok(());
        }
        let Some(csproj_path) = self.projects.csproj_file_path(project_dir) else {
            return Ok(());
        };

        let original = fs::read_to_string(&csproj_path).map_err(|e| ProjectError::io(&csproj_path, e))?;
        let include_dir = format!("{}{}", self.csproj_prefix(project_dir), to_posix(&library_path));
        if let Some(updated) = csproj::remove_library_references(&original, &include_dir) {
            tracing::info!(
                "Removing {} from '{}'",
                to_posix(&library_path),
                to_posix(&self.config_path(&csproj_path))
            );
            fs::write(&csproj_path, updated).map_err(|e| ProjectError::io(&csproj_path, e))?;
            if restore == RestoreMode::Immediate {
                restore_or_revert(&csproj_path, &original)?;
            }
        }
        Ok(())
    }

    /// Restore a C# project after deferred reference changes. Other languages are a no-op.
    pub fn restore(&self, project_dir: &Path) -> Result<(), ProjectError> {
        if Self::language_of(project_dir)? != Some(Language::CSharp) {
            return Ok(());
        }
        if let Some(csproj_path) = self.projects.csproj_file_path(project_dir) {
            csproj::restore(&csproj_path)?;
        }
        Ok(())
    }
}

fn restore_or_revert(csproj_path: &Path, original: &str) -> Result<(), ProjectError> {
    if let Err(e) = csproj::restore(csproj_path) {
        tracing::warn!("Reverting the changes to '{}'", csproj_path.display());
        fs::write(csproj_path, original).map_err(|io| ProjectError::io(csproj_path, io))?;
        return Err(e);
    }
    Ok(())
}

/// Libraries transitively referenced by `requested`, resolved against `catalog`.
///
/// The requested projects themselves are never part of the result and every library
/// appears once, in breadth-first discovery order.
pub fn cloud_library_closure(requested: &[CloudProject], catalog: &[CloudProject]) -> Vec<CloudProject> {
    let by_id: HashMap<u64, &CloudProject> = catalog.iter().map(|p| (p.project_id, p)).collect();
    let mut visited: HashSet<u64> = requested.iter().map(|p| p.project_id).collect();
    let mut queue: VecDeque<u64> = requested.iter().flat_map(CloudProject::library_ids).collect();
    let mut libraries = Vec::new();

    while let Some(id) = queue.pop_front() {
        if !visited.insert(id) {
            continue;
        }
        match by_id.get(&id) {
            Some(library) => {
                queue.extend(library.library_ids());
                libraries.push((*library).clone());
            }
            None => tracing::warn!(library_id = id, "library is not part of the cloud project list"),
        }
    }

    libraries
}

/// Like [`cloud_library_closure`], fetching every library through `fetch`.
///
/// Each library id is fetched at most once. Libraries that cannot be fetched are
/// logged and skipped.
pub fn fetch_library_closure<E: Display>(
    requested: &[CloudProject],
    mut fetch: impl FnMut(u64) -> Result<CloudProject, E>,
) -> Vec<CloudProject> {
    let mut visited: HashSet<u64> = requested.iter().map(|p| p.project_id).collect();
    let mut queue: VecDeque<u64> = requested.iter().flat_map(CloudProject::library_ids).collect();
    let mut libraries = Vec::new();

    while let Some(id) = queue.pop_front() {
        if !visited.insert(id) {
            continue;
        }
        match fetch(id) {
            Ok(library) => {
                queue.extend(library.library_ids());
                libraries.push(library);
            }
            Err(e) => tracing::warn!(library_id = id, error = %e, "Failed to fetch library"),
        }
    }

    libraries
}

//! Local project scanning.
//!
//! A project is a directory containing a `config.json`. The [`ProjectManager`]
//! knows where projects live relative to the Lean CLI root, which files of a
//! project are source files, and how the local library graph is shaped.
//!
//! # Architecture
//!
//! - **paths**: relative-path and cloud-name formatting rules
//! - **csproj**: `<ProjectReference>` edits for C# projects and `dotnet restore`
//! - **libraries**: library reference maintenance and cloud library closures

pub mod csproj;
pub mod libraries;
pub mod paths;

use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use filetime::FileTime;
use thiserror::Error;
use walkdir::WalkDir;

use crate::config::{ConfigError, ProjectConfig};
use crate::language::Language;

pub use libraries::{AddOutcome, LibraryManager, RestoreMode};

/// Extensions of files synchronized with the cloud.
pub const SOURCE_EXTENSIONS: &[&str] = &["py", "cs", "ipynb"];

/// Build and output directories never synchronized.
pub const EXCLUDED_DIRS: &[&str] = &[
    "bin",
    "obj",
    ".ipynb_checkpoints",
    "backtests",
    "live",
    "optimizations",
];

/// Errors raised while working with local projects.
#[derive(Error, Debug)]
pub enum ProjectError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("'{0}' is not a Lean CLI library, libraries must live under the Library directory")]
    NotALibrary(PathBuf),

    #[error("Circular dependency detected between {project} and {library}")]
    CircularDependency { project: String, library: String },

    #[error("C# library {0} does not contain a .csproj file")]
    MissingCsproj(PathBuf),

    #[error("Cloud project name '{0}' does not map to a directory inside the Lean CLI root")]
    UnsafeName(String),

    #[error("Project {0} has no algorithm-language in its config")]
    MissingLanguage(PathBuf),

    #[error("Restoring {path} failed: {message}")]
    RestoreFailed { path: PathBuf, message: String },
}

impl ProjectError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Access to the projects under a Lean CLI root directory.
#[derive(Debug, Clone)]
pub struct ProjectManager {
    root: PathBuf,
}

impl ProjectManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Source files of a project, sorted, skipping build and output directories.
    pub fn source_files(&self, project_dir: &Path) -> Result<Vec<PathBuf>, ProjectError> {
        let mut files = Vec::new();
        let walker = WalkDir::new(project_dir)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !(entry.file_type().is_dir()
                        && EXCLUDED_DIRS.contains(&entry.file_name().to_string_lossy().as_ref()))
            });

        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(project_dir).to_path_buf();
                ProjectError::io(path, std::io::Error::other(e.to_string()))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let is_source = entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext));
            if is_source {
                files.push(entry.into_path());
            }
        }

        files.sort();
        Ok(files)
    }

    /// Every project directory under the root, sorted by path.
    pub fn find_local_projects(&self) -> Result<Vec<PathBuf>, ProjectError> {
        let mut projects = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                if entry.depth() == 0 || !entry.file_type().is_dir() {
                    return true;
                }
                let name = entry.file_name().to_string_lossy();
                !name.starts_with('.') && !EXCLUDED_DIRS.contains(&name.as_ref())
            });

        for entry in walker.filter_map(Result::ok) {
            if entry.depth() > 0
                && entry.file_type().is_dir()
                && ProjectConfig::exists_in(entry.path())
            {
                projects.push(entry.into_path());
            }
        }

        projects.sort();
        Ok(projects)
    }

    /// Local directory for a cloud project.
    ///
    /// When another project already occupies the formatted name, ` 2`, ` 3`, ... are
    /// appended until a free directory or the one linked to `cloud_id` is found.
    pub fn local_project_path(&self, cloud_name: &str, cloud_id: u64) -> Result<PathBuf, ProjectError> {
        let local_name = paths::format_local_path(cloud_name);
        if !Path::new(&local_name)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(ProjectError::UnsafeName(cloud_name.to_string()));
        }

        let mut index = 1;
        loop {
            let candidate = if index == 1 {
                self.root.join(&local_name)
            } else {
                self.root.join(format!("{local_name} {index}"))
            };

            if !candidate.exists() || ProjectConfig::load(&candidate)?.cloud_id == Some(cloud_id) {
                return Ok(candidate);
            }
            index += 1;
        }
    }

    /// Create the directory and config of a new project.
    pub fn create_new_project(&self, project_dir: &Path, language: Language) -> Result<(), ProjectError> {
        fs::create_dir_all(project_dir).map_err(|e| ProjectError::io(project_dir, e))?;

        let mut config = ProjectConfig::load(project_dir)?;
        config.algorithm_language = Some(language);
        config.save()?;

        if language.is_csharp() && self.csproj_file_path(project_dir).is_none() {
            let name = project_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "Main".to_string());
            let csproj = project_dir.join(format!("{name}.csproj"));
            fs::write(&csproj, csproj::MINIMAL_CSPROJ).map_err(|e| ProjectError::io(&csproj, e))?;
        }

        tracing::debug!(path = %project_dir.display(), %language, "created local project");
        Ok(())
    }

    /// Set the modification time of `path` to `timestamp`.
    pub fn update_last_modified_time(&self, path: &Path, timestamp: DateTime<Utc>) -> Result<(), ProjectError> {
        let time = FileTime::from_unix_time(timestamp.timestamp(), timestamp.timestamp_subsec_nanos());
        filetime::set_file_times(path, time, time).map_err(|e| ProjectError::io(path, e))
    }

    /// First `.csproj` file directly inside `project_dir`.
    pub fn csproj_file_path(&self, project_dir: &Path) -> Option<PathBuf> {
        let mut candidates: Vec<PathBuf> = fs::read_dir(project_dir)
            .ok()?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "csproj"))
            .collect();
        candidates.sort();
        candidates.into_iter().next()
    }

    /// Project names are their path relative to the root, `/`-separated.
    pub fn project_name(&self, project_dir: &Path) -> String {
        paths::to_posix(&paths::relative_if_possible(project_dir, &self.root))
    }

    /// Transitive local libraries of a project, dependencies before dependents.
    ///
    /// References to missing directories are skipped. The project itself is never
    /// part of the result, even when a cycle leads back to it.
    pub fn project_libraries(&self, project_dir: &Path) -> Result<Vec<PathBuf>, ProjectError> {
        let start_key = canonical_key(project_dir);
        let mut visited: HashSet<PathBuf> = HashSet::new();
        let mut ordered = Vec::new();
        let mut stack = vec![(project_dir.to_path_buf(), false)];

        while let Some((dir, expanded)) = stack.pop() {
            let key = canonical_key(&dir);
            if expanded {
                if key != start_key {
                    ordered.push(dir);
                }
                continue;
            }
            if !visited.insert(key) {
                continue;
            }

            stack.push((dir.clone(), true));
            let config = ProjectConfig::load(&dir)?;
            for library_dir in config.library_dirs(&self.root).into_iter().rev() {
                if !library_dir.is_dir() {
                    tracing::debug!(path = %library_dir.display(), "referenced library does not exist");
                    continue;
                }
                if !visited.contains(&canonical_key(&library_dir)) {
                    stack.push((library_dir, false));
                }
            }
        }

        Ok(ordered)
    }
}

/// Identity of a directory for visited-set purposes.
pub(crate) fn canonical_key(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

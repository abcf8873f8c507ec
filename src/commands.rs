//! Command implementations behind [`crate::cli::Command`].

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde_json::Value;

use crate::api::{CloudProject, HttpProjectClient, ProjectClient};
use crate::cli::{Cli, Command, ConfigCommand, KeyArgs, LibraryArgs, LibraryCommand, PullArgs, PushArgs};
use crate::config::cli::KNOWN_KEYS;
use crate::config::{CliConfig, ConfigError, LeanConfig, ProjectConfig};
use crate::encryption::{self, EncryptionAction, EncryptionKey};
use crate::project::{AddOutcome, LibraryManager, ProjectError, ProjectManager, RestoreMode};
use crate::sync::pull::PullManager;
use crate::sync::push::{PushManager, push_order};
use crate::sync::{EncryptionOptions, SyncContext, SyncError, SyncReport};

/// Cloud projects whose names start with this are only pulled on request.
const BOOT_CAMP_PREFIX: &str = "Boot Camp/";

pub fn run(cli: Cli) -> Result<()> {
    let lean_config = cli.lean_config.as_deref();
    match cli.command {
        Command::Pull(args) => pull(lean_config, args),
        Command::Push(args) => push(lean_config, args),
        Command::Encrypt(args) => transform_project(lean_config, args, EncryptionAction::Encrypt),
        Command::Decrypt(args) => transform_project(lean_config, args, EncryptionAction::Decrypt),
        Command::Library(LibraryCommand::Add(args)) => library(lean_config, args, true),
        Command::Library(LibraryCommand::Remove(args)) => library(lean_config, args, false),
        Command::Config(command) => config(lean_config, command),
    }
}

/// The Lean CLI directory a command operates in.
struct Workspace {
    lean: LeanConfig,
    root: PathBuf,
}

impl Workspace {
    fn open(lean_config: Option<&Path>) -> Result<Self> {
        let lean = match lean_config {
            Some(path) => LeanConfig::load(absolute(path)?)?,
            None => LeanConfig::discover(&std::env::current_dir().context("Cannot read the current directory")?)?,
        };
        let root = lean.root_dir().to_path_buf();
        let root = root.canonicalize().unwrap_or(root);
        tracing::debug!(root = %root.display(), "using Lean CLI root");
        Ok(Self { lean, root })
    }

    fn client(&self) -> Result<HttpProjectClient> {
        let config = CliConfig::open_default()?;
        let credentials = config.credentials()?;
        Ok(HttpProjectClient::new(
            config.api_url()?,
            credentials.user_id,
            credentials.api_token,
        )?)
    }
}

/// `path` made absolute against the current directory, canonical when it exists.
fn absolute(path: &Path) -> Result<PathBuf> {
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .context("Cannot read the current directory")?
            .join(path)
    };
    Ok(path.canonicalize().unwrap_or(path))
}

fn project_dir(path: &Path) -> Result<PathBuf> {
    let dir = absolute(path)?;
    if !ProjectConfig::exists_in(&dir) {
        return Err(SyncError::NotAProject(dir).into());
    }
    Ok(dir)
}

/// Cloud projects to pull, plus the catalog used to resolve their libraries.
///
/// A numeric `project` is looked up by id without listing the organization. A name
/// must match a cloud project exactly. Without `project` every project is pulled,
/// except Boot Camp projects unless `pull_bootcamp` is set.
pub fn select_pull_targets(
    client: &dyn ProjectClient,
    organization_id: Option<&str>,
    project: Option<&str>,
    pull_bootcamp: bool,
) -> Result<(Vec<CloudProject>, Option<Vec<CloudProject>>), SyncError> {
    if let Some(id) = project.and_then(|p| p.trim().parse::<u64>().ok()) {
        return Ok((vec![client.get_project(id, organization_id)?], None));
    }

    let all = client.get_all_projects(organization_id)?;
    let targets: Vec<CloudProject> = match project {
        Some(name) => {
            let wanted = name.replace('\\', "/");
            let wanted = wanted.trim_matches('/');
            let matching: Vec<CloudProject> = all.iter().filter(|p| p.name == wanted).cloned().collect();
            if matching.is_empty() {
                return Err(SyncError::NoMatchingProject(name.to_string()));
            }
            matching
        }
        None => all
            .iter()
            .filter(|p| pull_bootcamp || !p.name.starts_with(BOOT_CAMP_PREFIX))
            .cloned()
            .collect(),
    };
    Ok((targets, Some(all)))
}

fn pull(lean_config: Option<&Path>, args: PullArgs) -> Result<()> {
    let flags = args.encryption;
    let encryption = EncryptionOptions::from_flags(flags.encrypt, flags.decrypt, flags.key)?;
    let workspace = Workspace::open(lean_config)?;
    let client = workspace.client()?;
    let ctx = SyncContext::new(&workspace.root, &client).with_organization_id(workspace.lean.organization_id());

    let (targets, catalog) = select_pull_targets(
        &client,
        ctx.organization_id(),
        args.project.as_deref(),
        args.pull_bootcamp,
    )?;
    if encryption.key.is_some() && targets.len() > 1 {
        return Err(SyncError::InvalidOptions(
            "Encryption can only be specified when pulling a single project, use --project".to_string(),
        )
        .into());
    }

    let report = PullManager::new(&ctx).pull_projects(targets, catalog.as_deref(), &encryption)?;
    print_report(&report);
    Ok(())
}

fn push(lean_config: Option<&Path>, args: PushArgs) -> Result<()> {
    let flags = args.encryption;
    let encryption = EncryptionOptions::from_flags(flags.encrypt, flags.decrypt, flags.key)?;
    let workspace = Workspace::open(lean_config)?;
    let projects = ProjectManager::new(&workspace.root);

    let dirs = match &args.project {
        Some(project) => push_order(&projects, &[project_dir(project)?])?,
        None => {
            if encryption.key.is_some() {
                return Err(SyncError::InvalidOptions(
                    "Encryption can only be specified when pushing a single project, use --project".to_string(),
                )
                .into());
            }
            push_order(&projects, &projects.find_local_projects()?)?
        }
    };

    let client = workspace.client()?;
    let ctx = SyncContext::new(&workspace.root, &client).with_organization_id(workspace.lean.organization_id());
    let report = PushManager::new(&ctx).push_projects(&dirs, &encryption)?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &SyncReport) {
    for result in report.failed() {
        match &result.failed_file {
            Some(file) => println!(
                "failed: {} ({}): {}",
                result.name,
                file,
                result.error.as_deref().unwrap_or_default()
            ),
            None => println!("failed: {}: {}", result.name, result.error.as_deref().unwrap_or_default()),
        }
    }
    println!("{}", report.summary());
}

/// Encrypt or decrypt every source file of a local project in place.
///
/// All files are transformed in memory first so a wrong key leaves the project
/// untouched.
fn transform_project(lean_config: Option<&Path>, args: KeyArgs, action: EncryptionAction) -> Result<()> {
    let workspace = Workspace::open(lean_config)?;
    let dir = project_dir(&args.project)?;
    let projects = ProjectManager::new(&workspace.root);
    let name = projects.project_name(&dir);
    let mut config = ProjectConfig::load(&dir)?;

    let key_path = encryption::resolve_user_key(args.key.as_deref(), config.encryption_key_path.as_deref())?;
    let key = EncryptionKey::load(&key_path)?;

    let already_done = match action {
        EncryptionAction::Encrypt => config.encrypted,
        EncryptionAction::Decrypt => !config.encrypted,
    };
    if already_done {
        tracing::info!("Project '{}' is already {}ed", name, action);
        return Ok(());
    }

    let organization_id = config
        .organization_id
        .clone()
        .or_else(|| workspace.lean.organization_id())
        .unwrap_or_default();
    let cipher = key.cipher(&organization_id)?;

    let mut transformed = Vec::new();
    for path in projects.source_files(&dir)? {
        let raw = fs::read_to_string(&path).with_context(|| format!("Cannot read {}", path.display()))?;
        let file_name = path.strip_prefix(&dir).unwrap_or(&path).display().to_string();
        let content = match action {
            EncryptionAction::Encrypt => cipher.encrypt(&raw)?,
            EncryptionAction::Decrypt => cipher.decrypt(&file_name, &raw)?,
        };
        transformed.push((path, content));
    }
    for (path, content) in &transformed {
        fs::write(path, content).with_context(|| format!("Cannot write {}", path.display()))?;
    }

    match action {
        EncryptionAction::Encrypt => {
            config.encrypted = true;
            config.encryption_key_path = Some(key.path().to_path_buf());
        }
        EncryptionAction::Decrypt => {
            config.encrypted = false;
            config.encryption_key_path = None;
        }
    }
    config.save()?;

    tracing::info!(
        "Successfully {}ed {} file(s) of project '{}'",
        action,
        transformed.len(),
        name
    );
    Ok(())
}

fn library(lean_config: Option<&Path>, args: LibraryArgs, adding: bool) -> Result<()> {
    let workspace = Workspace::open(lean_config)?;
    let project_dir = project_dir(&args.project)?;
    let library_dir = absolute(&args.library)?;
    let libraries = LibraryManager::new(&workspace.root);
    let restore = if args.no_local {
        RestoreMode::Deferred
    } else {
        RestoreMode::Immediate
    };

    if adding {
        if !libraries.is_lean_library(&library_dir) {
            return Err(ProjectError::NotALibrary(library_dir).into());
        }
        check_library_keys(&project_dir, &library_dir)?;

        match libraries.add(&project_dir, &library_dir, restore)? {
            AddOutcome::Added => tracing::info!(
                "Added library '{}' to project '{}'",
                libraries.config_path(&library_dir).display(),
                libraries.config_path(&project_dir).display()
            ),
            AddOutcome::AlreadyExisted => tracing::info!(
                "Project '{}' already references library '{}'",
                libraries.config_path(&project_dir).display(),
                libraries.config_path(&library_dir).display()
            ),
        }
    } else {
        libraries.remove(&project_dir, &library_dir, restore)?;
        tracing::info!(
            "Removed library '{}' from project '{}'",
            libraries.config_path(&library_dir).display(),
            libraries.config_path(&project_dir).display()
        );
    }

    if args.cloud {
        let project_id = ProjectConfig::load(&project_dir)?
            .cloud_id
            .ok_or_else(|| anyhow::anyhow!("Project '{}' has not been pushed yet", project_dir.display()))?;
        let library_id = ProjectConfig::load(&library_dir)?
            .cloud_id
            .ok_or_else(|| SyncError::LibraryNotPushed(library_dir.clone()))?;
        let client = workspace.client()?;
        if adding {
            client.add_library(project_id, library_id)?;
        } else {
            client.delete_library(project_id, library_id)?;
        }
        tracing::info!("Updated the library references of cloud project {}", project_id);
    }

    Ok(())
}

/// An encrypted project may only reference an encrypted library using the same key.
fn check_library_keys(project_dir: &Path, library_dir: &Path) -> Result<()> {
    let project = ProjectConfig::load(project_dir)?;
    let library = ProjectConfig::load(library_dir)?;
    if !(project.encrypted && library.encrypted) {
        return Ok(());
    }
    let project_key = project.encryption_key_path.as_deref().and_then(encryption::key_id_of);
    let library_key = library.encryption_key_path.as_deref().and_then(encryption::key_id_of);
    if let (Some(project_key), Some(library_key)) = (project_key, library_key) {
        if project_key != library_key {
            bail!(
                "Library '{}' is encrypted with a different key than project '{}'",
                library_dir.display(),
                project_dir.display()
            );
        }
    }
    Ok(())
}

fn config(lean_config: Option<&Path>, command: ConfigCommand) -> Result<()> {
    let mut cli_config = CliConfig::open_default()?;
    match command {
        ConfigCommand::Get { key } => {
            let value = if key == "organization-id" {
                Workspace::open(lean_config)?.lean.organization_id()
            } else {
                if !CliConfig::is_known_key(&key) {
                    return Err(ConfigError::UnknownKey(key).into());
                }
                cli_config.get(&key)?
            };
            match value {
                Some(value) => println!("{value}"),
                None => bail!("The option with key '{key}' doesn't have a value set"),
            }
        }
        ConfigCommand::Set { key, value } => {
            if key == "organization-id" {
                let mut workspace = Workspace::open(lean_config)?;
                workspace
                    .lean
                    .set_properties(&[("organization-id", Value::String(value.clone()))])?;
            } else {
                cli_config.set(&key, &value)?;
            }
            if key == "api-token" {
                tracing::info!("Successfully updated the value of '{}'", key);
            } else {
                tracing::info!("Successfully updated the value of '{}' to '{}'", key, value);
            }
        }
        ConfigCommand::Unset { key } => {
            if !CliConfig::is_known_key(&key) || key == "organization-id" {
                return Err(ConfigError::UnknownKey(key).into());
            }
            cli_config.unset(&key)?;
            tracing::info!("Successfully unset '{}'", key);
        }
        ConfigCommand::List => {
            let entries = cli_config.entries();
            for (key, description) in KNOWN_KEYS {
                let value = if *key == "organization-id" {
                    Workspace::open(lean_config).ok().and_then(|w| w.lean.organization_id())
                } else {
                    entries.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
                };
                let shown = match (value, *key) {
                    (Some(_), "api-token") => "<hidden>".to_string(),
                    (Some(value), _) => value,
                    (None, _) => "<not set>".to_string(),
                };
                println!("{key}: {shown}\n    {description}");
            }
        }
    }
    Ok(())
}

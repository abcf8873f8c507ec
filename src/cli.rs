//! Command line definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "lean",
    author,
    version,
    about = "Synchronize Lean CLI projects with the cloud",
    disable_help_subcommand = true
)]
pub struct Cli {
    #[arg(long, global = true, help = "Enable debug logging")]
    pub verbose: bool,

    #[arg(
        long,
        global = true,
        env = "LEAN_CONFIG_PATH",
        help = "Path to the lean.json of the Lean CLI root (searched upwards from the current directory by default)"
    )]
    pub lean_config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Pull projects from the cloud to the local drive.
    Pull(PullArgs),
    /// Push local projects to the cloud.
    Push(PushArgs),
    /// Encrypt the source files of a local project.
    Encrypt(KeyArgs),
    /// Decrypt the source files of a local project.
    Decrypt(KeyArgs),
    /// Manage library references of a project.
    #[command(subcommand)]
    Library(LibraryCommand),
    /// Read and write CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Args, Debug)]
pub struct EncryptionFlags {
    #[arg(long, conflicts_with = "decrypt", help = "Encrypt files with the given key")]
    pub encrypt: bool,
    #[arg(long, help = "Decrypt files with the given key")]
    pub decrypt: bool,
    #[arg(long, value_name = "FILE", help = "Path to the encryption key")]
    pub key: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct PullArgs {
    #[arg(long, help = "Name or id of the cloud project to pull (all projects by default)")]
    pub project: Option<String>,
    #[arg(long, help = "Also pull Boot Camp projects")]
    pub pull_bootcamp: bool,
    #[command(flatten)]
    pub encryption: EncryptionFlags,
}

#[derive(Args, Debug)]
pub struct PushArgs {
    #[arg(long, help = "Local project to push (all local projects by default)")]
    pub project: Option<PathBuf>,
    #[command(flatten)]
    pub encryption: EncryptionFlags,
}

#[derive(Args, Debug)]
pub struct KeyArgs {
    /// Project directory.
    pub project: PathBuf,
    #[arg(long, value_name = "FILE", help = "Path to the encryption key (the project's key by default)")]
    pub key: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum LibraryCommand {
    /// Reference a Lean CLI library from a project.
    Add(LibraryArgs),
    /// Drop a library reference from a project.
    Remove(LibraryArgs),
}

#[derive(Args, Debug)]
pub struct LibraryArgs {
    /// Project directory.
    pub project: PathBuf,
    /// Library directory, under Library/.
    pub library: PathBuf,
    #[arg(long, help = "Skip the dotnet restore of C# projects")]
    pub no_local: bool,
    #[arg(long, help = "Also update the reference in the cloud")]
    pub cloud: bool,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the value of a key.
    Get { key: String },
    /// Set a key.
    Set { key: String, value: String },
    /// Remove a key.
    Unset { key: String },
    /// Print every configured key.
    List,
}

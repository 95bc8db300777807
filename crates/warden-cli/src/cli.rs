//! CLI argument definitions for the node lifecycle manager.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Command-line interface for the node lifecycle manager.
#[derive(Parser, Debug)]
#[command(
    name = "warden",
    version,
    about = "Installs, runs and bootstraps a local Qortal node.",
    disable_help_subcommand = true
)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Lifecycle operations.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    /// Reports the install location, runtime, install and liveness state.
    Status,
    /// Installs whatever is missing, then starts the node and waits for it.
    Install,
    /// Starts an installed node and waits for its control API.
    Start,
    /// Stops the node and confirms it is gone.
    Stop,
    /// Rebuilds the node repository from a bootstrap archive.
    Bootstrap,
    /// Prints the node API key, generating one when none is stored.
    ApiKey {
        /// Discards the stored key and generates a new one.
        #[arg(long)]
        reset: bool,
    },
    /// Inspects or deletes the node repository.
    Repository {
        #[command(subcommand)]
        action: RepositoryAction,
    },
    /// Chooses where the node is installed.
    CustomDir {
        #[command(subcommand)]
        action: CustomDirAction,
    },
}

/// Repository operations.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub(crate) enum RepositoryAction {
    /// Prints the repository root.
    Path,
    /// Stops the node and deletes its repository database.
    Delete {
        /// Confirms the deletion.
        #[arg(long)]
        yes: bool,
    },
}

/// Install directory operations.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub(crate) enum CustomDirAction {
    /// Uses an existing install in `DIR`.
    Set {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },
    /// Reverts to the default install directory.
    Clear,
}

//! relup - release updater
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
//!
//! Installs an application from the assets of a GitHub release and keeps it
//! up to date.
//!
//! # Overview
//!
//! Each application is described by a small TOML file: the repository to
//! watch, which release assets to install and where, and which paths inside
//! the install belong to the user and must survive an update. `relup update`
//! stages the new release next to the current install and swaps it into
//! place only once staging has succeeded.
//!
//! # Directory Layout
//!
//! ```text
//! $RELUP_HOME/            # defaults to <data dir>/relup
//! └── <name>/             # install root, replaced on every update
//!     └── .github_release_tag
//! ```

pub mod cmd;

pub use relup_core::paths::*;
pub use relup_core::USER_AGENT;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "relup")]
#[command(author, version = env!("RELUP_VERSION"), about = "relup - install and update applications from GitHub releases")]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Install or update an application to its latest release
    Update {
        /// Application config file (TOML)
        config: PathBuf,
        /// Install this release tag instead of the latest release
        #[arg(long)]
        tag: Option<String>,
        /// Install here instead of the configured or default location
        #[arg(long)]
        install_root: Option<PathBuf>,
        /// Directory to stage the new release in
        #[arg(long)]
        staging_dir: Option<PathBuf>,
        /// Do not print the installed files
        #[arg(short, long)]
        quiet: bool,
        /// GitHub API base URL
        #[arg(long, env = "RELUP_API_URL", default_value = relup_core::DEFAULT_API_BASE_URL, hide = true)]
        api_url: String,
    },
    /// Show the installed release of an application
    Status {
        /// Application config file (TOML)
        config: PathBuf,
        /// Look here instead of the configured or default location
        #[arg(long)]
        install_root: Option<PathBuf>,
    },
    /// Validate a zip archive and list what it would install
    Inspect {
        /// Archive to inspect
        archive: PathBuf,
    },
    /// Validate a config file and print what it describes
    Manifest {
        /// Application config file (TOML)
        config: PathBuf,
    },
}

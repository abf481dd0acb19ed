//! Core library for relup: release queries, safe archive extraction and
//! staged installs.
//!
//! [`Updater`] ties the pieces together: it asks a [`ReleaseClient`] for a
//! release, validates it against an [`UpdaterConfig`], extracts assets with
//! [`SafeArchive`] and swaps the result into the install root.

pub mod archive;
pub mod config;
pub mod fsops;
pub mod github;
pub mod paths;
pub mod updater;

#[cfg(test)]
pub(crate) mod testutil;

pub use archive::{ArchiveEntry, ArchiveError, SafeArchive, SecurityViolation};
pub use config::{AssetPolicy, AssetSpec, ConfigError, UpdaterConfig};
pub use github::{
    DEFAULT_API_BASE_URL, HttpResponse, ReleaseClient, ReleaseError, ReqwestTransport, RetryPolicy,
    Transport, TransportError,
};
pub use paths::*;
pub use updater::{UpdateError, UpdateOptions, UpdateOutcome, Updater, installed_tag};

pub use relup_schema::{
    ArchiveFormat, AssetPattern, GitHubRepo, InstallManifest, Metadata, Release,
};

/// User Agent string for core operations
pub const USER_AGENT: &str = concat!("relup/", env!("CARGO_PKG_VERSION"));

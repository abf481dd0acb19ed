//! Shared types for relup.
//!
//! Everything in this crate is plain data: no network, no filesystem. The
//! core crate produces and consumes these values while it updates an
//! installation.

pub mod manifest;
pub mod release;
pub mod repo;

// Re-exports
pub use manifest::{InstallManifest, Metadata, POSIX_PERMISSIONS_MASK};
pub use release::{AmbiguousAsset, ArchiveFormat, AssetPattern, Release};
pub use repo::{GitHubRepo, RepoError};

//! Update orchestration: query, validate, stage, preserve, swap.
//!
//! The install root is only replaced once the new tree is completely
//! staged next to it. Staging and download directories are temporary and
//! disappear on every exit path.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use relup_schema::{AmbiguousAsset, ArchiveFormat, InstallManifest, Release};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::archive::{ArchiveError, SafeArchive};
use crate::config::{AssetPolicy, ConfigError, UpdaterConfig};
use crate::fsops;
use crate::github::{ReleaseClient, ReleaseError, Transport, TransportError};
use crate::paths::version_marker_path;

#[derive(Error, Debug)]
pub enum UpdateError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Release(#[from] ReleaseError),

    #[error("Release {tag} has no asset matching {pattern}")]
    MissingAsset { tag: String, pattern: String },

    #[error(transparent)]
    Ambiguous(#[from] AmbiguousAsset),

    #[error("Asset {asset} is configured as a {format} archive, but only zip archives can be installed")]
    UnsupportedArchive { asset: String, format: ArchiveFormat },

    #[error("Asset name {0:?} is not a plain file name")]
    UnsafeAssetName(String),

    #[error("Failed to download {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: TransportError,
    },

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("Staging directory {} must not be inside the install root {}", .staging.display(), .install_root.display())]
    StagingInsideInstallRoot {
        staging: PathBuf,
        install_root: PathBuf,
    },

    #[error("Install root {} has no usable parent directory", .0.display())]
    InvalidInstallRoot(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Per-invocation overrides.
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    /// Install this tag instead of the latest release.
    pub tag: Option<String>,
    /// Install here instead of the configured root.
    pub install_root: Option<PathBuf>,
    /// Create the staging tree under this directory instead of next to the
    /// install root.
    pub staging_parent: Option<PathBuf>,
}

/// How an update attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The release source has no release (or none for the requested tag).
    NoRelease,
    /// The installed tag already matches the release.
    UpToDate { tag: String },
    /// A new tree was swapped into place.
    Updated {
        previous_tag: Option<String>,
        tag: String,
        manifest: InstallManifest,
    },
}

impl UpdateOutcome {
    /// The installed manifest, if anything was installed.
    pub fn manifest(&self) -> Option<&InstallManifest> {
        match self {
            Self::Updated { manifest, .. } => Some(manifest),
            _ => None,
        }
    }

    /// The installed manifest; empty when nothing changed.
    pub fn into_manifest(self) -> InstallManifest {
        match self {
            Self::Updated { manifest, .. } => manifest,
            _ => InstallManifest::new(),
        }
    }
}

/// Tag recorded under `install_root`; empty when nothing is installed.
pub async fn installed_tag(install_root: &Path) -> Result<String, UpdateError> {
    match tokio::fs::read_to_string(version_marker_path(install_root)).await {
        Ok(tag) => Ok(tag.trim().to_string()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e.into()),
    }
}

/// One policy resolved against one release asset.
#[derive(Debug)]
struct PlannedAsset<'a> {
    policy: &'a AssetPolicy,
    name: String,
    url: String,
}

#[derive(Debug)]
pub struct Updater<T> {
    config: UpdaterConfig,
    client: ReleaseClient<T>,
}

impl<T: Transport> Updater<T> {
    pub fn new(config: UpdaterConfig, client: ReleaseClient<T>) -> Self {
        Self { config, client }
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    pub fn client(&self) -> &ReleaseClient<T> {
        &self.client
    }

    /// Resolve every configured asset against `release`.
    ///
    /// Nothing is downloaded or written; any problem found here aborts the
    /// update before it has side effects.
    fn validate_release<'a>(&'a self, release: &Release) -> Result<Vec<PlannedAsset<'a>>, UpdateError> {
        let mut planned = Vec::with_capacity(self.config.assets().len());
        for policy in self.config.assets() {
            policy.validate()?;

            let missing = || UpdateError::MissingAsset {
                tag: release.tag().to_string(),
                pattern: policy.pattern().to_string(),
            };
            let name = release
                .single_matching_asset(policy.pattern())?
                .ok_or_else(missing)?;
            if !is_safe_asset_name(name) {
                return Err(UpdateError::UnsafeAssetName(name.to_string()));
            }
            if let Some(format @ (ArchiveFormat::Tar | ArchiveFormat::Tgz)) = policy.archive() {
                return Err(UpdateError::UnsupportedArchive {
                    asset: name.to_string(),
                    format,
                });
            }
            let url = release.asset_url(name).ok_or_else(missing)?;

            debug!(pattern = %policy.pattern(), asset = name, "Matched asset");
            planned.push(PlannedAsset {
                policy,
                name: name.to_string(),
                url: url.to_string(),
            });
        }
        Ok(planned)
    }

    /// Bring the install root up to date with the release source.
    pub async fn update(&self, options: &UpdateOptions) -> Result<UpdateOutcome, UpdateError> {
        let install_root = match &options.install_root {
            Some(root) => root.clone(),
            None => self.config.install_root()?,
        };
        let install_root = std::path::absolute(&install_root)?;
        let staging_parent = staging_parent(&install_root, options.staging_parent.as_deref())?;

        info!(
            name = self.config.name(),
            repository = %self.client.repository(),
            install_root = %install_root.display(),
            "Checking for updates"
        );

        let Some(release) = self.client.get_release(options.tag.as_deref()).await? else {
            info!(name = self.config.name(), "No release available");
            return Ok(UpdateOutcome::NoRelease);
        };

        let installed = installed_tag(&install_root).await?;
        if installed == release.tag() {
            info!(tag = release.tag(), "Already up to date");
            return Ok(UpdateOutcome::UpToDate { tag: installed });
        }
        let shown = if installed.is_empty() {
            "<none>"
        } else {
            installed.as_str()
        };
        info!(installed = shown, available = release.tag(), "Update available");

        let planned = self.validate_release(&release)?;

        tokio::fs::create_dir_all(&staging_parent).await?;
        let staging = tempfile::Builder::new()
            .prefix(&format!(".{}.relup-staging-", self.config.name()))
            .tempdir_in(&staging_parent)?;
        let tree = staging.path().join("tree");
        tokio::fs::create_dir(&tree).await?;
        let downloads = tempfile::Builder::new()
            .prefix("relup-download-")
            .tempdir()?;
        debug!(staging = %tree.display(), "Staging new installation");

        let mut manifest = InstallManifest::new();
        for asset in &planned {
            let staged = self.stage_asset(asset, &tree, &downloads).await?;
            for path in manifest.merge(staged) {
                warn!(
                    path = %path.display(),
                    asset = %asset.name,
                    "Asset overwrites a path written by an earlier asset"
                );
            }
        }

        let preserved = self.config.preserved_paths().clone();
        let tag = release.tag().to_string();
        let root = install_root.clone();
        let swapped = tokio::task::spawn_blocking(move || {
            preserve_and_swap(&tree, &root, &preserved, manifest, &tag)
        })
        .await
        .map_err(join_error)?;
        let manifest = match swapped {
            Ok(manifest) => manifest,
            Err(SwapFailure { error, stranded }) => {
                if stranded {
                    let kept = staging.keep();
                    warn!(
                        staging = %kept.display(),
                        "Keeping staging directory: it holds preserved data that could not be restored"
                    );
                }
                return Err(error);
            }
        };

        drop(downloads);
        if let Err(e) = staging.close() {
            warn!(error = %e, "Failed to remove staging directory");
        }

        info!(
            tag = release.tag(),
            entries = manifest.len(),
            install_root = %install_root.display(),
            "Update complete"
        );
        Ok(UpdateOutcome::Updated {
            previous_tag: (!installed.is_empty()).then_some(installed),
            tag: release.tag().to_string(),
            manifest,
        })
    }

    /// Fetch one asset into the staging tree and return what it installed,
    /// keyed relative to the tree.
    async fn stage_asset(
        &self,
        asset: &PlannedAsset<'_>,
        tree: &Path,
        downloads: &TempDir,
    ) -> Result<InstallManifest, UpdateError> {
        let policy = asset.policy;
        let destination = tree.join(policy.destination());
        tokio::fs::create_dir_all(&destination).await?;

        if policy.archive().is_none() {
            let file_name = policy.rename().unwrap_or(&asset.name);
            let target = destination.join(file_name);
            if fsops::exists(&target) {
                fsops::delete_path(&target)?;
            }
            info!(asset = %asset.name, target = %target.display(), "Downloading");
            self.download(&asset.url, &target).await?;

            let mut manifest = InstallManifest::new();
            manifest.insert(
                policy.destination().join(file_name),
                fsops::metadata_from_path(&target)?,
            );
            return Ok(manifest);
        }

        let raw = downloads.path().join(&asset.name);
        info!(asset = %asset.name, "Downloading archive");
        self.download(&asset.url, &raw).await?;

        let strip = policy.strip_components();
        let archive_path = raw.clone();
        let extracted = tokio::task::spawn_blocking(move || {
            let mut archive = SafeArchive::open(&archive_path)?;
            debug!(
                archive = %archive_path.display(),
                entries = archive.len(),
                common_root = %archive.common_root().display(),
                "Extracting"
            );
            archive.extract(&destination, strip)
        })
        .await
        .map_err(join_error)??;

        tokio::fs::remove_file(&raw).await?;
        Ok(extracted.rebase(policy.destination()))
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<(), UpdateError> {
        self.client
            .transport()
            .download(url, dest)
            .await
            .map_err(|source| UpdateError::Download {
                url: url.to_string(),
                source,
            })
    }
}

fn join_error(e: tokio::task::JoinError) -> UpdateError {
    UpdateError::Io(io::Error::other(e))
}

fn is_safe_asset_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

/// Where the staging tree goes; by default next to the install root so the
/// swap is a rename.
fn staging_parent(install_root: &Path, requested: Option<&Path>) -> Result<PathBuf, UpdateError> {
    if install_root.file_name().is_none() {
        return Err(UpdateError::InvalidInstallRoot(install_root.to_path_buf()));
    }
    let default_parent = install_root
        .parent()
        .ok_or_else(|| UpdateError::InvalidInstallRoot(install_root.to_path_buf()))?;

    let Some(requested) = requested else {
        return Ok(default_parent.to_path_buf());
    };
    let requested = std::path::absolute(requested)?;
    if requested.starts_with(install_root) {
        return Err(UpdateError::StagingInsideInstallRoot {
            staging: requested,
            install_root: install_root.to_path_buf(),
        });
    }
    Ok(requested)
}

struct SwapFailure {
    error: UpdateError,
    /// Some preserved data is still inside the staging tree.
    stranded: bool,
}

/// Carry preserved paths over from the current install, then swap the
/// staged tree into place.
///
/// If anything fails, preserved paths already moved into staging are put
/// back so the current install is left as it was.
fn preserve_and_swap(
    tree: &Path,
    install_root: &Path,
    preserved: &BTreeSet<PathBuf>,
    mut manifest: InstallManifest,
    tag: &str,
) -> Result<InstallManifest, SwapFailure> {
    let mut moved = Vec::new();
    let result = preserve(tree, install_root, preserved, &mut manifest, &mut moved)
        .and_then(|()| swap_into_place(tree, install_root, tag));

    match result {
        Ok(()) => Ok(manifest),
        Err(error) => Err(SwapFailure {
            error,
            stranded: !restore_preserved(tree, install_root, &moved),
        }),
    }
}

fn preserve(
    tree: &Path,
    install_root: &Path,
    preserved: &BTreeSet<PathBuf>,
    manifest: &mut InstallManifest,
    moved: &mut Vec<PathBuf>,
) -> Result<(), UpdateError> {
    for relative in preserved {
        let source = install_root.join(relative);
        if !fsops::exists(&source) {
            debug!(path = %relative.display(), "Preserved path not present, skipping");
            continue;
        }

        let target = tree.join(relative);
        if fsops::exists(&target) {
            fsops::delete_path(&target)?;
        }
        let mut created = Vec::new();
        let mut ancestor = relative.parent();
        while let Some(dir) = ancestor.filter(|dir| !dir.as_os_str().is_empty()) {
            if fsops::exists(&tree.join(dir)) {
                break;
            }
            created.push(dir.to_path_buf());
            ancestor = dir.parent();
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        info!(path = %relative.display(), "Preserving");
        fsops::move_path(&source, &target)?;
        moved.push(relative.clone());

        manifest.remove_subtree(relative);
        for dir in created {
            let metadata = fsops::metadata_from_path(&tree.join(&dir))?;
            manifest.insert(dir, metadata);
        }
        manifest.merge(fsops::collect_tree(&target, tree)?);
    }
    Ok(())
}

/// Move preserved paths back out of staging. Returns whether all of them
/// made it.
fn restore_preserved(tree: &Path, install_root: &Path, moved: &[PathBuf]) -> bool {
    let mut restored_all = true;
    for relative in moved {
        let source = tree.join(relative);
        let target = install_root.join(relative);
        let restored = target
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|()| fsops::move_path(&source, &target));
        if let Err(e) = restored {
            warn!(
                path = %relative.display(),
                staged = %source.display(),
                error = %e,
                "Failed to restore preserved path"
            );
            restored_all = false;
        }
    }
    restored_all
}

/// Replace `install_root` with `tree` and record `tag` in its marker.
///
/// The old root is renamed to a hidden sibling first and only deleted once
/// the new tree and its marker are in place. On failure the new tree goes
/// back to `tree` (or its partial copy is removed) and the old root is
/// renamed back.
fn swap_into_place(tree: &Path, install_root: &Path, tag: &str) -> Result<(), UpdateError> {
    swap_with(tree, install_root, tag, fsops::move_path)
}

fn swap_with(
    tree: &Path,
    install_root: &Path,
    tag: &str,
    move_tree: impl Fn(&Path, &Path) -> io::Result<()>,
) -> Result<(), UpdateError> {
    let parent = install_root
        .parent()
        .ok_or_else(|| UpdateError::InvalidInstallRoot(install_root.to_path_buf()))?;
    let root_name = install_root
        .file_name()
        .ok_or_else(|| UpdateError::InvalidInstallRoot(install_root.to_path_buf()))?;
    fs::create_dir_all(parent)?;

    let backup = if fsops::exists(install_root) {
        let backup = parent.join(format!(
            ".{}.relup-old-{:08x}",
            root_name.to_string_lossy(),
            rand::random::<u32>()
        ));
        fsops::make_writable(install_root)?;
        fs::rename(install_root, &backup)?;
        debug!(backup = %backup.display(), "Moved previous installation aside");
        Some(backup)
    } else {
        None
    };

    let installed = move_tree(tree, install_root)
        .and_then(|()| fs::write(version_marker_path(install_root), tag));
    if let Err(e) = installed {
        warn!(
            install_root = %install_root.display(),
            error = %e,
            "Failed to move new installation into place, rolling back"
        );
        let cleared = if fsops::exists(tree) {
            fsops::delete_path(install_root)
        } else {
            fsops::move_path(install_root, tree)
        };
        let rolled_back = cleared.and_then(|()| match &backup {
            Some(backup) => fs::rename(backup, install_root),
            None => Ok(()),
        });
        if let Err(rollback) = rolled_back {
            warn!(
                install_root = %install_root.display(),
                backup = ?backup,
                error = %rollback,
                "Rollback failed"
            );
        }
        return Err(e.into());
    }

    if let Some(backup) = backup {
        if let Err(e) = fsops::delete_path(&backup) {
            warn!(backup = %backup.display(), error = %e, "Failed to remove previous installation");
        }
    }
    Ok(())
}

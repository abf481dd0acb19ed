//! Updater configuration: which assets a release must carry, where they go
//! and which user paths survive an update.
//!
//! Every invariant is checked when the configuration is built, so a bad
//! configuration fails before any network or disk activity.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use relup_schema::{ArchiveFormat, AssetPattern, GitHubRepo, RepoError};
use serde::Deserialize;
use thiserror::Error;

use crate::paths;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid asset pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error(transparent)]
    Repository(#[from] RepoError),

    #[error("Asset matching {pattern} has an absolute destination: {}", .destination.display())]
    AbsoluteDestination {
        pattern: String,
        destination: PathBuf,
    },

    #[error("Asset matching {pattern} has a destination outside the install root: {}", .destination.display())]
    EscapingDestination {
        pattern: String,
        destination: PathBuf,
    },

    #[error("Asset matching {pattern} is not an archive, but strip_components was specified")]
    StripWithoutArchive { pattern: String },

    #[error("Asset matching {pattern} is an archive, but rename was specified")]
    RenameOnArchive { pattern: String },

    #[error("Asset matching {pattern} has an invalid rename target: {rename:?}")]
    InvalidRename { pattern: String, rename: String },

    #[error("Preserved path is an absolute path: {}", .0.display())]
    AbsolutePreservedPath(PathBuf),

    #[error("Preserved path must name something inside the install root: {}", .0.display())]
    InvalidPreservedPath(PathBuf),

    #[error("Application name {0:?} cannot be used as a directory name")]
    InvalidName(String),

    #[error("No install root configured for {0} and no data directory could be determined")]
    NoInstallRoot(String),

    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// One `[[assets]]` table as written by the user, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssetSpec {
    /// Full-match regular expression over asset file names.
    pub pattern: String,
    /// Archive container, or `None` for a raw file.
    #[serde(default)]
    pub archive: Option<ArchiveFormat>,
    /// Where the asset lands, relative to the install root.
    #[serde(default)]
    pub destination: Option<PathBuf>,
    /// Leading path components to drop from every archive entry.
    #[serde(default)]
    pub strip_components: usize,
    /// New file name for a raw asset.
    #[serde(default)]
    pub rename: Option<String>,
}

/// A validated description of one expected release asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetPolicy {
    pattern: AssetPattern,
    archive: Option<ArchiveFormat>,
    destination: PathBuf,
    strip_components: usize,
    rename: Option<String>,
}

impl AssetPolicy {
    pub fn new(spec: AssetSpec) -> Result<Self, ConfigError> {
        let pattern = AssetPattern::new(&spec.pattern).map_err(|source| ConfigError::Pattern {
            pattern: spec.pattern.clone(),
            source,
        })?;
        let destination = spec.destination.unwrap_or_default();
        let policy = Self {
            destination: normalize_destination(&pattern, &destination)?,
            pattern,
            archive: spec.archive,
            strip_components: spec.strip_components,
            rename: spec.rename.filter(|r| !r.is_empty()),
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Check the archive/strip/rename combination.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let pattern = self.pattern.to_string();
        match (&self.archive, &self.rename) {
            (Some(_), Some(_)) => return Err(ConfigError::RenameOnArchive { pattern }),
            (None, _) if self.strip_components != 0 => {
                return Err(ConfigError::StripWithoutArchive { pattern });
            }
            (None, Some(rename)) if !is_plain_file_name(rename) => {
                return Err(ConfigError::InvalidRename {
                    pattern,
                    rename: rename.clone(),
                });
            }
            _ => {}
        }
        Ok(())
    }

    pub fn pattern(&self) -> &AssetPattern {
        &self.pattern
    }

    pub fn archive(&self) -> Option<ArchiveFormat> {
        self.archive
    }

    /// Destination relative to the install root; empty means the root itself.
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn strip_components(&self) -> usize {
        self.strip_components
    }

    pub fn rename(&self) -> Option<&str> {
        self.rename.as_deref()
    }
}

fn normalize_destination(pattern: &AssetPattern, destination: &Path) -> Result<PathBuf, ConfigError> {
    if destination.is_absolute() || destination.has_root() {
        return Err(ConfigError::AbsoluteDestination {
            pattern: pattern.to_string(),
            destination: destination.to_path_buf(),
        });
    }
    let mut normalized = PathBuf::new();
    for component in destination.components() {
        match component {
            Component::CurDir => {}
            Component::Normal(part) => normalized.push(part),
            _ => {
                return Err(ConfigError::EscapingDestination {
                    pattern: pattern.to_string(),
                    destination: destination.to_path_buf(),
                });
            }
        }
    }
    Ok(normalized)
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
}

/// Everything the updater needs to know about one application.
#[derive(Debug, Clone)]
pub struct UpdaterConfig {
    name: String,
    repository: GitHubRepo,
    assets: Vec<AssetPolicy>,
    preserved_paths: BTreeSet<PathBuf>,
    install_root: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    name: String,
    repository: String,
    #[serde(default)]
    assets: Vec<AssetSpec>,
    #[serde(default)]
    preserved_paths: Vec<PathBuf>,
    #[serde(default)]
    install_root: Option<PathBuf>,
}

impl UpdaterConfig {
    /// Build a configuration; `assets` are applied in the given order.
    pub fn new<P: Into<PathBuf>>(
        name: impl Into<String>,
        repository: GitHubRepo,
        assets: Vec<AssetPolicy>,
        preserved_paths: impl IntoIterator<Item = P>,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        if !is_plain_file_name(&name) {
            return Err(ConfigError::InvalidName(name));
        }

        let mut preserved = BTreeSet::new();
        for path in preserved_paths {
            let path: PathBuf = path.into();
            if path.is_absolute() || path.has_root() {
                return Err(ConfigError::AbsolutePreservedPath(path));
            }
            let normalized: PathBuf = path
                .components()
                .filter(|c| !matches!(c, Component::CurDir))
                .collect();
            if normalized.as_os_str().is_empty()
                || normalized
                    .components()
                    .any(|c| !matches!(c, Component::Normal(_)))
            {
                return Err(ConfigError::InvalidPreservedPath(path));
            }
            preserved.insert(normalized);
        }

        Ok(Self {
            name,
            repository,
            assets,
            preserved_paths: preserved,
            install_root: None,
        })
    }

    /// Install somewhere other than the conventional data directory.
    pub fn with_install_root(mut self, install_root: impl Into<PathBuf>) -> Self {
        self.install_root = Some(install_root.into());
        self
    }

    /// Parse a TOML configuration.
    pub fn from_toml_str(content: &str, origin: &Path) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;

        let repository = GitHubRepo::new(&file.repository)?;
        let assets = file
            .assets
            .into_iter()
            .map(AssetPolicy::new)
            .collect::<Result<Vec<_>, _>>()?;

        let config = Self::new(file.name, repository, assets, file.preserved_paths)?;
        Ok(match file.install_root {
            Some(root) => config.with_install_root(root),
            None => config,
        })
    }

    /// Asynchronously load and validate a configuration file.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_toml_str(&content, path)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn repository(&self) -> &GitHubRepo {
        &self.repository
    }

    pub fn assets(&self) -> &[AssetPolicy] {
        &self.assets
    }

    pub fn preserved_paths(&self) -> &BTreeSet<PathBuf> {
        &self.preserved_paths
    }

    /// The configured install root, or the conventional one for this name.
    pub fn install_root(&self) -> Result<PathBuf, ConfigError> {
        match &self.install_root {
            Some(root) => Ok(root.clone()),
            None => paths::default_install_root(&self.name)
                .ok_or_else(|| ConfigError::NoInstallRoot(self.name.clone())),
        }
    }
}

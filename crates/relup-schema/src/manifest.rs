//! Install manifests: what an update wrote, with permission bits.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::btree_map;
use std::path::{Path, PathBuf};

/// The nine POSIX permission bits (`0o777`), without setuid/setgid/sticky.
pub const POSIX_PERMISSIONS_MASK: u32 = 0o777;

/// Permission bits and kind of one installed filesystem object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Metadata {
    /// POSIX permission bits, always within [`POSIX_PERMISSIONS_MASK`].
    pub permissions: u32,
    /// Whether the object is a directory.
    pub is_directory: bool,
}

impl Metadata {
    /// Metadata for a regular file.
    pub fn file(permissions: u32) -> Self {
        Self {
            permissions: permissions & POSIX_PERMISSIONS_MASK,
            is_directory: false,
        }
    }

    /// Metadata for a directory.
    pub fn directory(permissions: u32) -> Self {
        Self {
            permissions: permissions & POSIX_PERMISSIONS_MASK,
            is_directory: true,
        }
    }
}

/// Relative path to [`Metadata`] for everything an update installed.
///
/// Iteration order puts every directory before its descendants: paths are
/// compared component by component, so `a` < `a/b` < `a/b/c.txt`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallManifest(BTreeMap<PathBuf, Metadata>);

impl InstallManifest {
    /// An empty manifest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `path`, returning the metadata it replaced, if any.
    pub fn insert(&mut self, path: impl Into<PathBuf>, metadata: Metadata) -> Option<Metadata> {
        self.0.insert(path.into(), metadata)
    }

    /// Metadata recorded for `path`.
    pub fn get(&self, path: impl AsRef<Path>) -> Option<&Metadata> {
        self.0.get(path.as_ref())
    }

    /// Whether `path` is recorded.
    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        self.0.contains_key(path.as_ref())
    }

    /// Number of recorded paths.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Entries in root-before-descendant order.
    pub fn iter(&self) -> btree_map::Iter<'_, PathBuf, Metadata> {
        self.0.iter()
    }

    /// Recorded paths in root-before-descendant order.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.0.keys().map(PathBuf::as_path)
    }

    /// Prefix every path with `base`. An empty `base` leaves paths unchanged.
    pub fn rebase(self, base: &Path) -> Self {
        if base.as_os_str().is_empty() {
            return self;
        }
        self.0
            .into_iter()
            .map(|(path, metadata)| (base.join(path), metadata))
            .collect()
    }

    /// Drop `root` and everything beneath it.
    pub fn remove_subtree(&mut self, root: &Path) {
        self.0.retain(|path, _| !path.starts_with(root));
    }

    /// Merge `other` into `self`; later entries win.
    ///
    /// Returns the paths that were already present, so callers can report
    /// the overwrite.
    pub fn merge(&mut self, other: InstallManifest) -> Vec<PathBuf> {
        let mut collisions = Vec::new();
        for (path, metadata) in other.0 {
            if self.0.contains_key(&path) {
                collisions.push(path.clone());
            }
            self.0.insert(path, metadata);
        }
        collisions
    }

    /// One line per entry: octal permission bits, then the path, with a
    /// trailing separator for directories.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (path, metadata) in &self.0 {
            let suffix = if metadata.is_directory {
                std::path::MAIN_SEPARATOR_STR
            } else {
                ""
            };
            out.push_str(&format!(
                "{:03o} {}{suffix}\n",
                metadata.permissions,
                path.display()
            ));
        }
        out
    }
}

impl<'a> IntoIterator for &'a InstallManifest {
    type Item = (&'a PathBuf, &'a Metadata);
    type IntoIter = btree_map::Iter<'a, PathBuf, Metadata>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl IntoIterator for InstallManifest {
    type Item = (PathBuf, Metadata);
    type IntoIter = btree_map::IntoIter<PathBuf, Metadata>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl FromIterator<(PathBuf, Metadata)> for InstallManifest {
    fn from_iter<I: IntoIterator<Item = (PathBuf, Metadata)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

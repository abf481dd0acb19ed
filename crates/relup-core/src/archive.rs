//! Zip inspection and extraction for untrusted release archives.
//!
//! Opening an archive validates every entry up front: symlinks, absolute
//! paths, `..` traversal and duplicate paths reject the whole archive before
//! a single byte is written. Only a fully validated [`SafeArchive`] can be
//! extracted.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

use relup_schema::{InstallManifest, Metadata, POSIX_PERMISSIONS_MASK};
use thiserror::Error;
use tracing::debug;
use zip::ZipArchive;

use crate::fsops;

const S_IFMT: u32 = 0o170_000;
const S_IFLNK: u32 = 0o120_000;
const S_IFDIR: u32 = 0o040_000;

/// Bits every entry is granted on top of what the archive records, so the
/// installing user can always read, write and (for directories) traverse.
const OWNER_DIR_BITS: u32 = 0o700;
const OWNER_FILE_BITS: u32 = 0o600;

/// An archive entry that would escape or subvert the extraction root.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecurityViolation {
    #[error("entry {0:?} is a symbolic link, which is not supported")]
    Symlink(String),

    #[error("entry {0:?} has an absolute path")]
    AbsolutePath(String),

    #[error("entry {0:?} attempts directory traversal (zip slip)")]
    Traversal(String),
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Archive {} rejected: {violation}", .archive.display())]
    Security {
        archive: PathBuf,
        violation: SecurityViolation,
    },

    #[error(
        "Archive {} has more than one entry for the same path: {}",
        .archive.display(),
        .path.display()
    )]
    DuplicatePath { archive: PathBuf, path: PathBuf },

    #[error(
        "Archive {} only has {depth} common root component(s), but {requested} were requested to be stripped",
        .archive.display()
    )]
    StripTooDeep {
        archive: PathBuf,
        depth: usize,
        requested: usize,
    },
}

impl ArchiveError {
    /// The security violation behind this error, if it is one.
    pub fn violation(&self) -> Option<&SecurityViolation> {
        match self {
            Self::Security { violation, .. } => Some(violation),
            _ => None,
        }
    }
}

/// One validated archive entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Name exactly as stored in the archive.
    pub source_name: String,
    /// Normalized path relative to the extraction root.
    pub relative_path: PathBuf,
    pub metadata: Metadata,
    index: usize,
}

/// A zip archive whose entries have all been checked and are safe to extract.
pub struct SafeArchive {
    path: PathBuf,
    archive: ZipArchive<File>,
    entries: BTreeMap<PathBuf, ArchiveEntry>,
    common_root: PathBuf,
}

impl std::fmt::Debug for SafeArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafeArchive")
            .field("path", &self.path)
            .field("entries", &self.entries.len())
            .field("common_root", &self.common_root)
            .finish_non_exhaustive()
    }
}

impl SafeArchive {
    /// Open `path` read-only and validate every entry.
    ///
    /// Fails on the first symlink, absolute path, traversal or duplicate.
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let path = path.canonicalize()?;
        let file = File::open(&path)?;
        let mut archive = ZipArchive::new(file)?;

        let security = |violation| ArchiveError::Security {
            archive: path.clone(),
            violation,
        };

        let mut entries = BTreeMap::new();
        let mut common_root: Option<Vec<String>> = None;

        for index in 0..archive.len() {
            let entry = archive.by_index_raw(index)?;
            let source_name = entry.name().to_string();
            let mode = entry.unix_mode().unwrap_or(0);
            let is_directory = entry.is_dir() || mode & S_IFMT == S_IFDIR;

            if mode & S_IFMT == S_IFLNK {
                return Err(security(SecurityViolation::Symlink(source_name)));
            }

            let Some(components) = normalize_entry_name(&source_name).map_err(&security)? else {
                debug!(entry = %source_name, "Skipping entry that names the archive root");
                continue;
            };
            let relative_path: PathBuf = components.iter().collect();

            let parent_dir = if is_directory {
                &components[..]
            } else {
                &components[..components.len() - 1]
            };
            common_root = Some(match common_root {
                None => parent_dir.to_vec(),
                Some(root) => common_prefix(&root, parent_dir),
            });

            let owner_bits = if is_directory {
                OWNER_DIR_BITS
            } else {
                OWNER_FILE_BITS
            };
            let permissions = (mode & POSIX_PERMISSIONS_MASK) | owner_bits;
            let metadata = Metadata {
                permissions,
                is_directory,
            };

            if entries.contains_key(&relative_path) {
                return Err(ArchiveError::DuplicatePath {
                    archive: path.clone(),
                    path: relative_path,
                });
            }
            entries.insert(
                relative_path.clone(),
                ArchiveEntry {
                    source_name,
                    relative_path,
                    metadata,
                    index,
                },
            );
        }

        let common_root: PathBuf = common_root.unwrap_or_default().iter().collect();
        debug!(
            archive = %path.display(),
            entries = entries.len(),
            common_root = %common_root.display(),
            "Validated archive"
        );

        Ok(Self {
            path,
            archive,
            entries,
            common_root,
        })
    }

    /// Where the archive lives on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Validated entries, every directory before its descendants.
    pub fn entries(&self) -> impl Iterator<Item = &ArchiveEntry> {
        self.entries.values()
    }

    /// Number of entries (excluding any that named the archive root itself).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Deepest directory that contains every entry. Empty when entries
    /// share no wrapper directory.
    pub fn common_root(&self) -> &Path {
        &self.common_root
    }

    pub fn common_root_depth(&self) -> usize {
        self.common_root.components().count()
    }

    /// Extract into `destination`, dropping the first `strip_components`
    /// path components of every entry.
    ///
    /// Anything already at a target path is removed first. Returns a manifest
    /// of what was written, keyed relative to `destination`.
    pub fn extract(
        &mut self,
        destination: &Path,
        strip_components: usize,
    ) -> Result<InstallManifest, ArchiveError> {
        let depth = self.common_root_depth();
        if strip_components > depth {
            return Err(ArchiveError::StripTooDeep {
                archive: self.path.clone(),
                depth,
                requested: strip_components,
            });
        }

        fs::create_dir_all(destination)?;
        let mut manifest = InstallManifest::new();

        for entry in self.entries.values() {
            let stripped: PathBuf = entry
                .relative_path
                .components()
                .skip(strip_components)
                .collect();
            if stripped.as_os_str().is_empty() {
                debug!(entry = %entry.source_name, "Skipping stripped component");
                continue;
            }

            let target = destination.join(&stripped);
            if fsops::exists(&target) {
                fsops::delete_path(&target)?;
            }

            if entry.metadata.is_directory {
                fs::create_dir_all(&target)?;
            } else {
                // Directories are not required to have entries of their own.
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                let mut reader = self.archive.by_index(entry.index)?;
                let mut out = File::create(&target)?;
                io::copy(&mut reader, &mut out)?;
            }
            fsops::set_mode(&target, entry.metadata.permissions)?;

            manifest.insert(stripped, entry.metadata);
        }

        Ok(manifest)
    }
}

/// Lexically normalize an archive entry name into path components.
///
/// `.` and empty segments vanish and `x/..` collapses. Backslashes are
/// treated as separators. `Ok(None)` means the name refers to the root
/// itself (e.g. `./`).
fn normalize_entry_name(name: &str) -> Result<Option<Vec<String>>, SecurityViolation> {
    let unified = name.replace('\\', "/");
    if unified.starts_with('/') || has_drive_prefix(&unified) {
        return Err(SecurityViolation::AbsolutePath(name.to_string()));
    }

    let mut parts: Vec<String> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|last| last != "..") {
                    parts.pop();
                } else {
                    parts.push("..".to_string());
                }
            }
            other => parts.push(other.to_string()),
        }
    }

    // Checked on the normalized form so `a/../../b` cannot slip through.
    if parts.iter().any(|p| p == "..") {
        return Err(SecurityViolation::Traversal(name.to_string()));
    }
    let normalized: PathBuf = parts.iter().collect();
    if normalized
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(SecurityViolation::AbsolutePath(name.to_string()));
    }

    Ok((!parts.is_empty()).then_some(parts))
}

fn has_drive_prefix(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

fn common_prefix(a: &[String], b: &[String]) -> Vec<String> {
    a.iter()
        .zip(b)
        .take_while(|(x, y)| x == y)
        .map(|(x, _)| x.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{ZipEntrySpec, write_zip};
    use tempfile::tempdir;

    fn open_err(entries: &[ZipEntrySpec]) -> ArchiveError {
        let dir = tempdir().unwrap();
        let path = write_zip(dir.path(), "bad.zip", entries);
        SafeArchive::open(&path).unwrap_err()
    }

    #[test]
    fn test_normalize_collapses_dots() {
        assert_eq!(
            normalize_entry_name("a/./b//c.txt").unwrap(),
            Some(vec!["a".into(), "b".into(), "c.txt".into()])
        );
        assert_eq!(
            normalize_entry_name("a/x/../b.txt").unwrap(),
            Some(vec!["a".into(), "b.txt".into()])
        );
        assert_eq!(normalize_entry_name("./").unwrap(), None);
    }

    #[test]
    fn test_normalize_rejects_escapes() {
        assert!(matches!(
            normalize_entry_name("../../etc/passwd"),
            Err(SecurityViolation::Traversal(_))
        ));
        assert!(matches!(
            normalize_entry_name("a/../../b"),
            Err(SecurityViolation::Traversal(_))
        ));
        assert!(matches!(
            normalize_entry_name("a\\..\\..\\b"),
            Err(SecurityViolation::Traversal(_))
        ));
        assert!(matches!(
            normalize_entry_name("/etc/passwd"),
            Err(SecurityViolation::AbsolutePath(_))
        ));
        assert!(matches!(
            normalize_entry_name("C:/Windows/win.ini"),
            Err(SecurityViolation::AbsolutePath(_))
        ));
    }

    #[test]
    fn test_traversal_entry_rejected_without_side_effects() {
        let dir = tempdir().unwrap();
        let path = write_zip(
            dir.path(),
            "slip.zip",
            &[
                ZipEntrySpec::file("ok.txt", b"fine"),
                ZipEntrySpec::file("../../etc/passwd", b"root::0:0"),
            ],
        );
        let before: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();

        let err = SafeArchive::open(&path).unwrap_err();
        assert!(matches!(
            err.violation(),
            Some(SecurityViolation::Traversal(_))
        ));

        let after: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(before.len(), after.len());
        assert!(!dir.path().join("ok.txt").exists());
    }

    #[test]
    fn test_symlink_rejected() {
        let err = open_err(&[
            ZipEntrySpec::dir("app/"),
            ZipEntrySpec::symlink("app/link", "harmless.txt"),
        ]);
        assert!(matches!(err.violation(), Some(SecurityViolation::Symlink(_))));
    }

    #[test]
    fn test_absolute_rejected() {
        let err = open_err(&[ZipEntrySpec::file("/tmp/evil", b"x")]);
        assert!(matches!(
            err.violation(),
            Some(SecurityViolation::AbsolutePath(_))
        ));
    }

    #[test]
    fn test_duplicate_after_normalization_rejected() {
        let err = open_err(&[
            ZipEntrySpec::file("a/./b.txt", b"one"),
            ZipEntrySpec::file("a/b.txt", b"two"),
        ]);
        assert!(matches!(err, ArchiveError::DuplicatePath { ref path, .. } if path == Path::new("a/b.txt")));
    }

    #[test]
    fn test_common_root() {
        let dir = tempdir().unwrap();
        let path = write_zip(
            dir.path(),
            "wrapped.zip",
            &[
                ZipEntrySpec::dir("Tool-1.0/"),
                ZipEntrySpec::dir("Tool-1.0/bin/"),
                ZipEntrySpec::file("Tool-1.0/bin/tool", b"bin"),
                ZipEntrySpec::file("Tool-1.0/README", b"readme"),
            ],
        );
        let archive = SafeArchive::open(&path).unwrap();
        assert_eq!(archive.common_root(), Path::new("Tool-1.0"));
        assert_eq!(archive.common_root_depth(), 1);
    }

    #[test]
    fn test_single_file_root_is_its_parent() {
        let dir = tempdir().unwrap();
        let path = write_zip(
            dir.path(),
            "single.zip",
            &[ZipEntrySpec::file("wrapper/inner/tool", b"bin")],
        );
        let archive = SafeArchive::open(&path).unwrap();
        assert_eq!(archive.common_root(), Path::new("wrapper/inner"));
        assert_eq!(archive.common_root_depth(), 2);
    }

    #[test]
    fn test_flat_archive_has_no_common_root() {
        let dir = tempdir().unwrap();
        let path = write_zip(
            dir.path(),
            "flat.zip",
            &[
                ZipEntrySpec::file("a.txt", b"a"),
                ZipEntrySpec::file("b.txt", b"b"),
            ],
        );
        let archive = SafeArchive::open(&path).unwrap();
        assert_eq!(archive.common_root_depth(), 0);
    }

    #[test]
    fn test_manifest_ordering() {
        let dir = tempdir().unwrap();
        let path = write_zip(
            dir.path(),
            "nested.zip",
            &[
                ZipEntrySpec::file("a/b/c.txt", b"c"),
                ZipEntrySpec::dir("a/b/"),
                ZipEntrySpec::dir("a/"),
            ],
        );
        let mut archive = SafeArchive::open(&path).unwrap();
        let manifest = archive.extract(&dir.path().join("out"), 0).unwrap();
        let order: Vec<_> = manifest.paths().map(Path::to_path_buf).collect();
        assert_eq!(
            order,
            vec![
                PathBuf::from("a"),
                PathBuf::from("a/b"),
                PathBuf::from("a/b/c.txt")
            ]
        );
    }

    #[test]
    fn test_strip_wrapper_directory() {
        let dir = tempdir().unwrap();
        let path = write_zip(
            dir.path(),
            "wrapped.zip",
            &[
                ZipEntrySpec::dir("Peacock-v8/"),
                ZipEntrySpec::file("Peacock-v8/chunk0.js", b"js"),
                ZipEntrySpec::dir("Peacock-v8/options/"),
                ZipEntrySpec::file("Peacock-v8/options/a.ini", b"a"),
                ZipEntrySpec::file("Peacock-v8/PeacockPatcher.exe", b"exe"),
            ],
        );
        let out = dir.path().join("out");
        let mut archive = SafeArchive::open(&path).unwrap();
        let manifest = archive.extract(&out, 1).unwrap();

        let paths: Vec<_> = manifest.paths().map(Path::to_path_buf).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("PeacockPatcher.exe"),
                PathBuf::from("chunk0.js"),
                PathBuf::from("options"),
                PathBuf::from("options/a.ini"),
            ]
        );
        assert_eq!(fs::read_to_string(out.join("chunk0.js")).unwrap(), "js");
        assert!(!out.join("Peacock-v8").exists());
    }

    #[test]
    fn test_strip_too_deep_writes_nothing() {
        let dir = tempdir().unwrap();
        let path = write_zip(
            dir.path(),
            "wrapped.zip",
            &[ZipEntrySpec::file("wrapper/file.txt", b"x")],
        );
        let out = dir.path().join("out");
        let mut archive = SafeArchive::open(&path).unwrap();
        let err = archive.extract(&out, 2).unwrap_err();
        assert!(matches!(
            err,
            ArchiveError::StripTooDeep {
                depth: 1,
                requested: 2,
                ..
            }
        ));
        assert!(!out.exists());
    }

    #[test]
    fn test_extract_replaces_existing_paths() {
        let dir = tempdir().unwrap();
        let path = write_zip(
            dir.path(),
            "tool.zip",
            &[ZipEntrySpec::file("config.ini", b"new")],
        );
        let out = dir.path().join("out");
        fs::create_dir_all(out.join("config.ini/stale")).unwrap();

        let mut archive = SafeArchive::open(&path).unwrap();
        archive.extract(&out, 0).unwrap();
        assert_eq!(fs::read_to_string(out.join("config.ini")).unwrap(), "new");
    }

    #[cfg(unix)]
    #[test]
    fn test_permissions_applied_with_owner_bits() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = write_zip(
            dir.path(),
            "perms.zip",
            &[
                ZipEntrySpec::dir("bin/").mode(0o555),
                ZipEntrySpec::file("bin/tool", b"#!/bin/sh").mode(0o755),
                ZipEntrySpec::file("bin/readonly.txt", b"r").mode(0o444),
            ],
        );
        let out = dir.path().join("out");
        let mut archive = SafeArchive::open(&path).unwrap();
        let manifest = archive.extract(&out, 0).unwrap();

        assert_eq!(manifest.get("bin").unwrap().permissions, 0o755);
        assert_eq!(manifest.get("bin/readonly.txt").unwrap().permissions, 0o644);

        let mode = |p: &str| fs::metadata(out.join(p)).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode("bin/tool"), 0o755);
        assert_eq!(mode("bin/readonly.txt"), 0o644);
        assert_eq!(mode("bin"), 0o755);
    }

    #[test]
    fn test_files_without_directory_entries() {
        let dir = tempdir().unwrap();
        let path = write_zip(
            dir.path(),
            "nodirs.zip",
            &[ZipEntrySpec::file("deep/er/file.txt", b"x")],
        );
        let out = dir.path().join("out");
        let mut archive = SafeArchive::open(&path).unwrap();
        let manifest = archive.extract(&out, 0).unwrap();
        assert_eq!(manifest.len(), 1);
        assert!(out.join("deep/er/file.txt").is_file());
    }
}

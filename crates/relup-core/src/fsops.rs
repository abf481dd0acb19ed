//! Filesystem helpers shared by extraction and the install swap.
//!
//! Everything here is synchronous; callers on the async side either accept
//! the short block or hand the work to `spawn_blocking`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use relup_schema::{InstallManifest, Metadata, POSIX_PERMISSIONS_MASK};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Whether anything (including a dangling symlink) exists at `path`.
pub fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Forcibly remove whatever is at `path`.
///
/// Directories are made owner-writable first (recursively) so read-only
/// trees installed from archives can still be removed. A missing path is
/// not an error.
pub fn delete_path(path: &Path) -> io::Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    if meta.is_dir() {
        warn!(path = %path.display(), "Deleting directory");
        make_writable(path)?;
        fs::remove_dir_all(path)
    } else {
        warn!(path = %path.display(), "Deleting file");
        if meta.is_file() {
            set_mode(path, 0o600)?;
        }
        fs::remove_file(path)
    }
}

/// Add owner `rwx` to `root` and every directory beneath it.
///
/// Each directory is fixed before it is listed, so trees containing
/// unreadable directories can still be walked.
pub fn make_writable(root: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(root)?;
    if !meta.is_dir() {
        return Ok(());
    }
    set_mode(root, mode_of(&meta) | 0o700)?;
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            make_writable(&entry.path())?;
        }
    }
    Ok(())
}

/// Move `src` to `dst`, which must not exist.
///
/// A plain rename is tried first; when that fails (typically because the
/// two paths are on different filesystems) the tree is copied and the
/// source removed.
pub fn move_path(src: &Path, dst: &Path) -> io::Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!(
                src = %src.display(),
                dst = %dst.display(),
                error = %e,
                "Rename failed, falling back to copy and delete"
            );
            copy_then_delete(src, dst)
        }
    }
}

fn copy_then_delete(src: &Path, dst: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(src)?;
    if meta.is_dir() {
        fs::create_dir_all(dst)?;
        let options = fs_extra::dir::CopyOptions::new().content_only(true);
        fs_extra::dir::copy(src, dst, &options).map_err(io::Error::other)?;
        set_mode(dst, mode_of(&meta))?;
        make_writable(src)?;
        fs::remove_dir_all(src)?;
    } else {
        let options = fs_extra::file::CopyOptions::new();
        fs_extra::file::move_file(src, dst, &options).map_err(io::Error::other)?;
    }
    Ok(())
}

/// Read the permission bits and kind of an existing object.
pub fn metadata_from_path(path: &Path) -> io::Result<Metadata> {
    let meta = fs::metadata(path)?;
    let permissions = mode_of(&meta);
    Ok(if meta.is_dir() {
        Metadata::directory(permissions)
    } else {
        Metadata::file(permissions)
    })
}

/// Manifest for `path` and, if it is a directory, everything beneath it.
///
/// Keys are relative to `base`.
pub fn collect_tree(path: &Path, base: &Path) -> io::Result<InstallManifest> {
    let mut manifest = InstallManifest::new();
    for entry in WalkDir::new(path).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        let relative: PathBuf = entry
            .path()
            .strip_prefix(base)
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!(
                        "{} is not under {}",
                        entry.path().display(),
                        base.display()
                    ),
                )
            })?
            .to_path_buf();
        manifest.insert(relative, metadata_from_path(entry.path())?);
    }
    Ok(manifest)
}

/// Set the permission bits of `path`. No-op off Unix.
pub fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode & POSIX_PERMISSIONS_MASK))?;
    }
    #[cfg(not(unix))]
    {
        let _ = (path, mode);
    }
    Ok(())
}

fn mode_of(meta: &fs::Metadata) -> u32 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & POSIX_PERMISSIONS_MASK
    }
    #[cfg(not(unix))]
    {
        match (meta.is_dir(), meta.permissions().readonly()) {
            (true, false) => 0o777,
            (true, true) => 0o555,
            (false, false) => 0o666,
            (false, true) => 0o444,
        }
    }
}

//! Inspect command
use anyhow::{Context, Result};
use crossterm::style::Stylize;
use relup_core::{InstallManifest, SafeArchive};
use std::path::Path;

use super::LABEL_WIDTH;

/// Validate an archive and list the entries it would install.
///
/// Fails on the same symlink, traversal and duplicate checks an update
/// applies before extracting anything.
pub fn inspect(path: &Path) -> Result<()> {
    let archive = SafeArchive::open(path)
        .with_context(|| format!("Archive {} failed validation", path.display()))?;

    let root = archive.common_root();
    println!("{:<LABEL_WIDTH$}{}", "Archive:", archive.path().display());
    println!("{:<LABEL_WIDTH$}{}", "Entries:", archive.len());
    if root.as_os_str().is_empty() {
        println!("{:<LABEL_WIDTH$}{}", "Common root:", "<none>".dark_grey());
    } else {
        println!("{:<LABEL_WIDTH$}{}", "Common root:", root.display());
    }
    println!("{:<LABEL_WIDTH$}{}", "Max strip:", archive.common_root_depth());

    let manifest: InstallManifest = archive
        .entries()
        .map(|entry| (entry.relative_path.clone(), entry.metadata))
        .collect();
    println!();
    print!("{}", manifest.render());
    Ok(())
}

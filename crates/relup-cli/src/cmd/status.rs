//! Status command
use anyhow::{Context, Result};
use crossterm::style::Stylize;
use std::path::Path;

use super::LABEL_WIDTH;

/// Print the installed tag and install root of an application.
pub async fn status(config_path: &Path, install_root: Option<&Path>) -> Result<()> {
    let config = super::load_config(config_path).await?;
    let root = match install_root {
        Some(root) => root.to_path_buf(),
        None => config.install_root()?,
    };
    let tag = relup_core::installed_tag(&root)
        .await
        .with_context(|| format!("Failed to read installed version in {}", root.display()))?;

    println!("{:<LABEL_WIDTH$}{}", "Name:", config.name());
    println!("{:<LABEL_WIDTH$}{}", "Repository:", config.repository());
    println!("{:<LABEL_WIDTH$}{}", "Install root:", root.display());
    if tag.is_empty() {
        println!("{:<LABEL_WIDTH$}{}", "Installed:", "not installed".dark_grey());
    } else {
        println!("{:<LABEL_WIDTH$}{}", "Installed:", tag.as_str().green());
    }
    Ok(())
}

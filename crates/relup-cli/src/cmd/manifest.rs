//! Manifest command
use anyhow::Result;
use crossterm::style::Stylize;
use std::path::Path;

use super::LABEL_WIDTH;

/// Print a validated config without touching the network or the install.
pub async fn manifest(config_path: &Path) -> Result<()> {
    let config = super::load_config(config_path).await?;

    println!("{:<LABEL_WIDTH$}{}", "Name:", config.name());
    println!("{:<LABEL_WIDTH$}{}", "Repository:", config.repository());
    match config.install_root() {
        Ok(root) => println!("{:<LABEL_WIDTH$}{}", "Install root:", root.display()),
        Err(e) => println!("{:<LABEL_WIDTH$}{}", "Install root:", e.to_string().dark_grey()),
    }

    println!();
    println!("{}", "Assets".dark_grey());
    for asset in config.assets() {
        let kind = asset
            .archive()
            .map_or_else(|| "file".to_string(), |format| format.to_string());
        let destination = if asset.destination().as_os_str().is_empty() {
            ".".to_string()
        } else {
            asset.destination().display().to_string()
        };
        print!("  {}  {kind}  -> {destination}", asset.pattern().as_str().cyan());
        if asset.strip_components() > 0 {
            print!("  (strip {})", asset.strip_components());
        }
        if let Some(rename) = asset.rename() {
            print!("  (as {rename})");
        }
        println!();
    }

    println!();
    println!("{}", "Preserved paths".dark_grey());
    if config.preserved_paths().is_empty() {
        println!("  {}", "none".dark_grey());
    }
    for path in config.preserved_paths() {
        println!("  {}", path.display());
    }
    Ok(())
}

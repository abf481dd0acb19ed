//! Subcommand implementations.

pub mod inspect;
pub mod manifest;
pub mod status;
pub mod update;

use anyhow::{Context, Result};
use relup_core::UpdaterConfig;
use std::path::Path;

/// Load and validate an application config.
pub(crate) async fn load_config(path: &Path) -> Result<UpdaterConfig> {
    UpdaterConfig::load(path)
        .await
        .with_context(|| format!("Invalid config {}", path.display()))
}

pub(crate) const LABEL_WIDTH: usize = 14;

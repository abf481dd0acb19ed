//! Update command
use anyhow::{Context, Result};
use crossterm::style::Stylize;
use relup_core::{ReleaseClient, ReqwestTransport, UpdateOptions, UpdateOutcome, Updater};
use std::path::Path;

/// Install or update the application described by `config_path`.
pub async fn update(
    config_path: &Path,
    options: &UpdateOptions,
    api_url: &str,
    quiet: bool,
) -> Result<()> {
    let config = super::load_config(config_path).await?;
    let name = config.name().to_string();

    let transport = ReqwestTransport::new().context("Failed to build HTTP client")?;
    let client = ReleaseClient::new(config.repository().clone(), transport).with_api_base(api_url);
    let updater = Updater::new(config, client);

    let outcome = updater
        .update(options)
        .await
        .with_context(|| format!("Failed to update {name}"))?;

    match outcome {
        UpdateOutcome::NoRelease => {
            println!("{}", format!("No release available for {name}").dark_grey());
        }
        UpdateOutcome::UpToDate { tag } => {
            println!("{name} {tag} is already up to date");
        }
        UpdateOutcome::Updated {
            previous_tag,
            tag,
            manifest,
        } => {
            match previous_tag {
                Some(previous) => println!(
                    "Updated {name}  {}  ->  {}",
                    previous.as_str().dark_grey(),
                    tag.as_str().green()
                ),
                None => println!("Installed {name} {}", tag.as_str().green()),
            }
            if !quiet {
                println!();
                print!("{}", manifest.render());
            }
        }
    }
    Ok(())
}

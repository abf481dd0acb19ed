//! relup - release updater CLI

use anyhow::Result;
use clap::Parser;
use relup_core::UpdateOptions;
use tracing_subscriber::EnvFilter;

use relup_cli::cmd;
use relup_cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins unless -v was given.
    let filter = if cli.verbose {
        EnvFilter::new("relup_core=debug,relup_cli=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("relup_core=info,relup_cli=info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Update {
            config,
            tag,
            install_root,
            staging_dir,
            quiet,
            api_url,
        } => {
            let options = UpdateOptions {
                tag,
                install_root,
                staging_parent: staging_dir,
            };
            cmd::update::update(&config, &options, &api_url, quiet).await
        }
        Commands::Status {
            config,
            install_root,
        } => cmd::status::status(&config, install_root.as_deref()).await,
        Commands::Inspect { archive } => cmd::inspect::inspect(&archive),
        Commands::Manifest { config } => cmd::manifest::manifest(&config).await,
    }
}

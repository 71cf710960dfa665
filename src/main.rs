//! multipush - multi-architecture container build-and-publish
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use multipush::cli::{Cli, Commands};
use multipush::config::{Config, ConfigManager};
use multipush::error::{Outcome, PublishError};
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Outcome<ExitCode> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => {
            let cwd = std::env::current_dir()
                .map_err(|e| PublishError::io("getting current directory", e))?;
            match ConfigManager::find_local_config(&cwd) {
                Some(path) => ConfigManager::with_path(path),
                None => ConfigManager::new(),
            }
        }
    };

    let config = config_manager.load().await?;
    init_logging(cli.verbose, &config);
    debug!("Using config {}", config_manager.path().display());

    multipush::ui::init_theme();

    match cli.command {
        Commands::Publish(args) => multipush::cli::commands::publish(args, &config).await,
        Commands::Plan(args) => {
            multipush::cli::commands::plan(args, &config).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Cache(args) => {
            multipush::cli::commands::cache(args, &config).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config(args) => {
            multipush::cli::commands::config(args, &config, &config_manager).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// 0 = warn (spinners only), 1 = info, 2+ = debug. `RUST_LOG` overrides.
fn init_logging(verbose: u8, config: &Config) {
    let default = match verbose {
        0 => "multipush=warn",
        1 => "multipush=info",
        _ => "multipush=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    if config.general.log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .without_time()
            .with_writer(std::io::stderr)
            .init();
    }
}

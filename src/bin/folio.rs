//! Folio CLI Binary
//!
//! Command-line interface for resumable long-form document generation.

use anyhow::{Context, Result};
use clap::Parser;
use folio::cli::{drives_generation, Cli, RunContext};
use folio::config::{paths, ConfigLoader};
use folio::logging::{init_logging, LoggingConfig};
use std::path::PathBuf;
use std::process;
use tracing::{error, info};

fn main() {
    let cli = Cli::parse();

    let logging_config = build_logging_config(&cli);
    if let Err(e) = init_logging(Some(&logging_config)) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    info!("Folio CLI starting");

    match run(&cli) {
        Ok(output) => {
            info!("Command completed successfully");
            println!("{}", output);
        }
        Err(e) => {
            error!("Command failed: {:#}", e);
            eprintln!("{:#}", e);
            process::exit(1);
        }
    }
}

fn run(cli: &Cli) -> Result<String> {
    let context = RunContext::new(cli.workspace.clone(), cli.config.clone(), cli.project.clone())
        .map_err(|e| anyhow::anyhow!(folio::cli::map_error(&e)))
        .with_context(|| format!("Failed to open workspace {}", cli.workspace.display()))?;
    info!("CLI context initialized");

    if drives_generation(&cli.command) {
        info!("Generation command; Ctrl-C pauses after the current request");
    }
    context
        .execute(&cli.command)
        .map_err(|e| anyhow::anyhow!(folio::cli::map_error(&e)))
}

/// Build logging configuration from CLI args, environment, and config file
fn build_logging_config(cli: &Cli) -> LoggingConfig {
    let mut config = if let Some(ref config_path) = cli.config {
        ConfigLoader::load_from_file(config_path)
            .ok()
            .map(|c| c.logging)
            .unwrap_or_default()
    } else {
        ConfigLoader::load(&cli.workspace)
            .ok()
            .map(|c| c.logging)
            .unwrap_or_default()
    };

    // Without --verbose only warnings reach the terminal.
    if !cli.verbose {
        config.level = "warn".to_string();
    }

    if let Some(ref level) = cli.log_level {
        config.level = level.clone();
    }
    if let Some(ref format) = cli.log_format {
        config.format = format.clone();
    }
    if let Some(ref output) = cli.log_output {
        config.output = output.clone();
    }
    if let Some(ref file) = cli.log_file {
        config.file = file.clone();
    } else if config.file == PathBuf::from("folio.log") {
        if let Ok(data_dir) = paths::workspace_data_dir(&cli.workspace) {
            config.file = data_dir.join("folio.log");
        }
    }

    config
}

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};

mod cli;

use cli::Cli;
use cli::commands::Commands;
use cli::replay::Fixture;
use unillm::StreamConfig;
use unillm::types::Role;

fn setup_logging() -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("unillm")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("unillm.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn run_application(cli: &Cli, config: &StreamConfig) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Replay { fixture, max_retries } => {
            let mut config = config.clone();
            if let Some(max_retries) = max_retries {
                config.retry.max_retries = *max_retries;
            }
            handle_replay_command(fixture, &config, cli.is_verbose())
        }
        Commands::ShowConfig => handle_show_config_command(config),
    }
}

fn handle_replay_command(path: &Path, config: &StreamConfig, verbose: bool) -> Result<()> {
    info!("Replaying fixture {}", path.display());
    let fixture = Fixture::load(path)?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let history = runtime.block_on(cli::replay::run(&fixture, config, verbose))?;

    if verbose {
        println!();
        println!("{}", "History:".bold());
        for message in &history {
            let role = match message.role {
                Role::System => "system".magenta(),
                Role::User => "user".blue(),
                Role::Assistant => "assistant".green(),
                Role::Tool => "tool".cyan(),
            };
            match &message.tool_call_id {
                Some(id) => println!("  {} [{}] {}", role, id, message.content),
                None => println!("  {} {}", role, message.content),
            }
        }
    }
    Ok(())
}

fn handle_show_config_command(config: &StreamConfig) -> Result<()> {
    let yaml = serde_yaml::to_string(config).context("Failed to serialize config")?;
    print!("{}", yaml);
    Ok(())
}

fn main() -> Result<()> {
    // Setup logging first
    setup_logging().context("Failed to setup logging")?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = StreamConfig::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!("Starting with config from: {:?}", cli.config);

    run_application(&cli, &config).context("Application failed")?;

    Ok(())
}

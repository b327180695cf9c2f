use clap::Parser;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::PathBuf;

use pipetrace::{Config, LogLevel};

mod cli;
mod commands;

use cli::{Cli, Commands};

fn setup_logging(log_level: &LogLevel, verbose: bool) -> Result<()> {
    let mut builder = env_logger::Builder::new();

    // RUST_LOG env var takes precedence, otherwise use config log_level
    if std::env::var("RUST_LOG").is_ok() {
        builder.parse_default_env();
    } else {
        builder.filter_level(log_level.as_filter());
    }

    if verbose {
        builder.target(env_logger::Target::Stderr).init();
        return Ok(());
    }

    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pipetrace")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("pipetrace.log");

    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    builder.target(env_logger::Target::Pipe(target)).init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn run(cli: Cli, config: Config) -> Result<()> {
    match cli.command {
        Commands::Observe { run_id, filter, last } => commands::observe::run(&run_id, filter.as_deref(), last, &config),
        Commands::Report { run_id, step, format } => {
            commands::report::run(&run_id, step.as_deref(), cli::OutputFormat::resolve(format), &config)
        }
        Commands::Runs { format } => commands::runs::run(cli::OutputFormat::resolve(format), &config),
        Commands::Demo { runs, fail } => commands::demo::run(runs, fail, &config),
        Commands::Config { action } => commands::config::run(action, &config),
        Commands::Completions { shell } => commands::completions::run(shell),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration (before logging, so log messages in Config::load are silent)
    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    if let Some(dir) = &cli.output_dir {
        config.observability.output_dir = dir.clone();
    }

    setup_logging(&config.log_level, cli.verbose).context("Failed to setup logging")?;

    info!("Starting pipetrace with config from: {:?}", cli.config);

    run(cli, config).context("Command failed")?;

    Ok(())
}

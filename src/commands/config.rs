use colored::*;
use eyre::Result;

use pipetrace::Config;

use crate::cli::{ConfigAction, OutputFormat};

pub fn run(action: ConfigAction, config: &Config) -> Result<()> {
    match action {
        ConfigAction::Show { format } => show(OutputFormat::resolve(format), config),
    }
}

fn show(format: OutputFormat, config: &Config) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(config)?);
        }
        OutputFormat::Yaml => {
            println!("{}", serde_yaml::to_string(config)?);
        }
        OutputFormat::Text => {
            println!("{}", "pipetrace Configuration".bold());
            println!();

            println!("{}: {}", "log_level".cyan(), config.log_level.as_filter());
            println!();

            let obs = &config.observability;
            println!("{}:", "observability".cyan());
            println!("  enabled: {}", obs.enabled);
            let sinks: Vec<String> = obs.sinks.iter().map(|s| format!("{:?}", s).to_lowercase()).collect();
            println!("  sinks: {}", sinks.join(", "));
            println!("  output_dir: {}", obs.resolved_output_dir().display());
            println!("  persist_event_types: {}", obs.persist_event_types.join(", "));
        }
    }

    Ok(())
}

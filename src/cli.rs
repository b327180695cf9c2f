use clap::{Parser, Subcommand, ValueEnum};
use std::io::IsTerminal;
use std::path::PathBuf;

/// Output format for commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
}

impl OutputFormat {
    /// Resolve the effective output format.
    /// If user specified a format, use it.
    /// Otherwise: TTY → Text, non-TTY (pipe) → Json
    pub fn resolve(user_choice: Option<OutputFormat>) -> OutputFormat {
        match user_choice {
            Some(fmt) => fmt,
            None => {
                if std::io::stdout().is_terminal() {
                    OutputFormat::Text
                } else {
                    OutputFormat::Json
                }
            }
        }
    }
}

#[derive(Parser)]
#[command(
    name = "pipetrace",
    about = "Inspect and exercise pipeline run events",
    version,
    after_help = "Logs are written to: ~/.local/share/pipetrace/logs/pipetrace.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to pipetrace.yaml config file")]
    pub config: Option<PathBuf>,

    /// Directory holding per-run event logs (overrides config)
    #[arg(long, global = true)]
    pub output_dir: Option<PathBuf>,

    /// Log to stderr instead of the log file
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Follow a run's events as they are written
    Observe {
        /// Run id
        run_id: String,

        /// Only show events whose type contains this text
        #[arg(long, short)]
        filter: Option<String>,

        /// Show the last N events before tailing
        #[arg(long, default_value_t = 10)]
        last: usize,
    },

    /// Summarize step durations and metrics of a persisted run
    Report {
        /// Run id
        run_id: String,

        /// Only include steps matching this regex
        #[arg(long)]
        step: Option<String>,

        /// Output format (default: text for TTY, json for pipes)
        #[arg(long, short = 'o', value_enum)]
        format: Option<OutputFormat>,
    },

    /// List persisted runs
    Runs {
        /// Output format (default: text for TTY, json for pipes)
        #[arg(long, short = 'o', value_enum)]
        format: Option<OutputFormat>,
    },

    /// Run concurrent sample pipelines through the configured subscribers
    Demo {
        /// Number of concurrent runs
        #[arg(long, default_value_t = 3)]
        runs: usize,

        /// Make one step of every run fail
        #[arg(long)]
        fail: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show {
        /// Output format (default: text for TTY, json for pipes)
        #[arg(long, short = 'o', value_enum)]
        format: Option<OutputFormat>,
    },
}

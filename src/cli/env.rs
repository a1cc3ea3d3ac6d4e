use clap::Parser;
use std::path::PathBuf;

use super::commands::Commands;
use super::output::OutputFormat;

/// Turn `!baiact` lines from an AI chat transcript into page actions.
#[derive(Parser)]
#[command(name = "baibridge", author, version, about)]
#[command(propagate_version = true)]
pub struct CliArgs {
    /// YAML configuration file; defaults to config/config.yaml, then the user config dir
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// trace, debug, info, warn or error; RUST_LOG takes precedence
    #[arg(short, long, default_value = "warn", global = true)]
    pub log_level: String,

    /// Shorthand for --log-level debug
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// How results are printed on stdout
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Human, global = true)]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

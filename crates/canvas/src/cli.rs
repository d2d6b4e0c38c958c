//! Command-line interface handling for the canvas server.
//!
//! Every flag overrides the matching setting of the configuration file.

use clap::Parser;
use std::path::PathBuf;

/// Command line arguments parsed from user input.
#[derive(Debug, Clone, Parser)]
#[command(name = "canvas", version, about = "Collaborative pixel canvas server")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short, long = "config", value_name = "FILE", default_value = "config.toml")]
    pub config_path: PathBuf,

    /// WebSocket bind address (e.g., 127.0.0.1:8080)
    #[arg(short, long = "bind", value_name = "ADDRESS")]
    pub bind_address: Option<String>,

    /// HTTP query/admin bind address
    #[arg(long = "http", value_name = "ADDRESS")]
    pub http_address: Option<String>,

    /// Journal file backing balances and placements
    #[arg(short, long, value_name = "FILE")]
    pub journal: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Output logs in JSON format
    #[arg(long)]
    pub json_logs: bool,
}

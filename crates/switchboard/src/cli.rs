//! Command-line argument parsing

use clap::Parser;
use std::path::PathBuf;

/// Connection multiplexer: a controller process and a pool of socket workers
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    ///
    /// If the file doesn't exist, a default configuration will be created.
    #[arg(short, long, default_value = "switchboard.toml")]
    pub config: PathBuf,

    /// Listening port
    ///
    /// An explicit port takes precedence over the cloud environment and
    /// disables the encrypted listener.
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Bind address (e.g. 0.0.0.0 or 127.0.0.1)
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Number of worker processes (0 for one per CPU core)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,

    /// Output logs in JSON format
    #[arg(long)]
    pub json_logs: bool,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            config: PathBuf::from("switchboard.toml"),
            port: None,
            bind: None,
            workers: None,
            debug: false,
            json_logs: false,
        }
    }
}

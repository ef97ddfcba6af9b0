//! Command-line interface for Corral.

use clap::{Parser, Subcommand};

/// Corral - bootstrap and configuration supervisor for distributed
/// key-value clusters.
#[derive(Parser)]
#[command(name = "corral")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "CORRAL_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "CORRAL_LOG_JSON")]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Synthesize the config, start the store, and bootstrap the cluster
    Run,

    /// Synthesize the store configuration file and exit
    RenderConfig,

    /// Reconcile the identity file against freshly resolved peer addresses
    Remap,

    /// Wait for a node to become ready (TCP + liveness ping)
    Wait {
        /// Target to probe (host[:port])
        target: String,

        /// Deadline in seconds
        #[arg(short, long, default_value = "60")]
        timeout: u64,
    },

    /// Show version information
    Version,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

//! Command-line argument parsing for the switchyard proxy.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Switchyard command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "switchyard", about = "Backend-switching game proxy")]
pub struct CliArgs {
    /// Address to listen on, e.g. 0.0.0.0:25565.
    #[arg(long)]
    pub bind: Option<String>,

    /// Name of the backend new connections start on.
    #[arg(long)]
    pub backend: Option<String>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref bind) = args.bind {
            self.proxy.bind = bind.clone();
        }
        if let Some(ref backend) = args.backend {
            self.backends.default = backend.clone();
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}

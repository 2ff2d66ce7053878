//! Configuration system for the switchyard proxy.
//!
//! Settings persist to disk as a RON file and can be overridden from the
//! command line via clap. Missing fields fall back to defaults, so older and
//! newer config files keep loading.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{
    BackendConfig, BackendEntry, Config, DebugConfig, ProxyConfig, SessionConfig, SwitchCommand,
    default_config_dir,
};
pub use error::ConfigError;

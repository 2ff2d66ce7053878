//! Configuration structs with sensible defaults and RON persistence.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Name of the configuration file inside the config directory.
const CONFIG_FILE: &str = "config.ron";

/// Top-level proxy configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Listener settings.
    pub proxy: ProxyConfig,
    /// Backend servers players can be routed to.
    pub backends: BackendConfig,
    /// Chat commands that move a player to another backend.
    pub switch_commands: Vec<SwitchCommand>,
    /// Per-session tunables.
    pub session: SessionConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProxyConfig {
    /// Address clients connect to.
    pub bind: String,
    /// Maximum concurrent client connections.
    pub max_connections: usize,
    /// Name appended to the client brand.
    pub brand: String,
    /// Largest accepted frame payload, in bytes.
    pub max_frame_size: u32,
}

/// Backend servers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend every new connection starts on.
    pub default: String,
    /// Known backends.
    pub servers: Vec<BackendEntry>,
}

/// A named backend server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendEntry {
    /// Name used by `default` and switch commands.
    pub name: String,
    /// `host:port` of the server.
    pub address: String,
}

/// Maps a chat line to a backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SwitchCommand {
    /// Exact chat line, e.g. `/hub`.
    pub trigger: String,
    /// Backend name to move to.
    pub backend: String,
}

/// Per-session configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Delay before the first keepalive, in milliseconds.
    pub keepalive_initial_delay_ms: u64,
    /// Period between keepalives, in milliseconds.
    pub keepalive_interval_ms: u64,
    /// Maximum plugin channels a client may register.
    pub max_plugin_channels: usize,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Also write JSON logs to a file.
    pub json_log_file: bool,
    /// Directory for the JSON log file. Defaults to `<config dir>/logs`.
    pub log_dir: Option<PathBuf>,
}

// --- Default implementations ---

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:25565".to_string(),
            max_connections: 1024,
            brand: "switchyard".to_string(),
            max_frame_size: 2 * 1024 * 1024,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            default: "lobby".to_string(),
            servers: vec![
                BackendEntry {
                    name: "lobby".to_string(),
                    address: "127.0.0.1:25566".to_string(),
                },
                BackendEntry {
                    name: "games".to_string(),
                    address: "127.0.0.1:25567".to_string(),
                },
            ],
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keepalive_initial_delay_ms: 5_000,
            keepalive_interval_ms: 15_000,
            max_plugin_channels: 128,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_log_file: false,
            log_dir: None,
        }
    }
}

impl SessionConfig {
    /// Delay before the first keepalive.
    pub fn keepalive_initial_delay(&self) -> Duration {
        Duration::from_millis(self.keepalive_initial_delay_ms)
    }

    /// Period between keepalives.
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }
}

/// Default config directory: `<platform config dir>/switchyard`, or the
/// working directory when the platform has none.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("switchyard"))
        .unwrap_or_else(|| PathBuf::from("."))
}

// --- Lookup / Validation ---

impl Config {
    /// Look up a backend by name.
    pub fn backend(&self, name: &str) -> Option<&BackendEntry> {
        self.backends.servers.iter().find(|entry| entry.name == name)
    }

    /// Parsed listener address.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_addr("proxy.bind", &self.proxy.bind)
    }

    /// Check cross-references and value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;

        if self.proxy.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                field: "proxy.max_connections",
                reason: "must be at least 1",
            });
        }
        if self.proxy.max_frame_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "proxy.max_frame_size",
                reason: "must be at least 1",
            });
        }
        if self.session.max_plugin_channels == 0 {
            return Err(ConfigError::InvalidValue {
                field: "session.max_plugin_channels",
                reason: "must be at least 1",
            });
        }
        if self.session.keepalive_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "session.keepalive_interval_ms",
                reason: "must be at least 1",
            });
        }

        let mut names = HashSet::new();
        for entry in &self.backends.servers {
            if !names.insert(entry.name.as_str()) {
                return Err(ConfigError::DuplicateBackend(entry.name.clone()));
            }
            parse_addr(&format!("backend '{}'", entry.name), &entry.address)?;
        }

        if !names.contains(self.backends.default.as_str()) {
            return Err(ConfigError::UnknownBackend {
                field: "backends.default".to_string(),
                name: self.backends.default.clone(),
            });
        }
        for command in &self.switch_commands {
            if !names.contains(command.backend.as_str()) {
                return Err(ConfigError::UnknownBackend {
                    field: format!("switch command '{}'", command.trigger),
                    name: command.backend.clone(),
                });
            }
        }
        Ok(())
    }
}

fn parse_addr(field: &str, value: &str) -> Result<SocketAddr, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidAddress {
        field: field.to_string(),
        value: value.to_string(),
    })
}

// --- Load / Save ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join(CONFIG_FILE);
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(4)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }
}

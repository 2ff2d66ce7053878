//! Runtime settings resolved from the loaded [`Config`].

use std::net::SocketAddr;
use std::sync::Arc;

use switchyard_config::{Config, ConfigError};
use switchyard_net::{BackendTarget, FrameConfig};
use switchyard_session::{CommandSwitchPolicy, LivenessConfig, SessionOptions, SwitchPolicy};

use crate::ProxyError;

/// Everything a running proxy needs, with addresses parsed and names resolved.
#[derive(Clone)]
pub struct ProxySettings {
    /// Listener address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent client connections.
    pub max_connections: usize,
    /// Backend new connections start on.
    pub default_backend: BackendTarget,
    /// Chat-driven backend selection.
    pub policy: Arc<dyn SwitchPolicy>,
    /// Per-session tunables.
    pub session: SessionOptions,
    /// Keepalive timing.
    pub liveness: LivenessConfig,
    /// Frame limits for client and backend links.
    pub frame: FrameConfig,
}

impl ProxySettings {
    /// Validate `config` and resolve it into runtime settings.
    pub fn from_config(config: &Config) -> Result<Self, ProxyError> {
        config.validate()?;
        Ok(Self {
            bind_addr: config.bind_addr()?,
            max_connections: config.proxy.max_connections,
            default_backend: resolve_backend(config, &config.backends.default)?,
            policy: Arc::new(switch_policy(config)?),
            session: SessionOptions {
                max_plugin_channels: config.session.max_plugin_channels,
                proxy_brand: config.proxy.brand.clone(),
            },
            liveness: LivenessConfig {
                initial_delay: config.session.keepalive_initial_delay(),
                interval: config.session.keepalive_interval(),
            },
            frame: FrameConfig {
                max_payload_size: config.proxy.max_frame_size,
            },
        })
    }
}

/// Build the chat-command policy from the `switch_commands` section,
/// resolving every trigger to its backend.
pub fn switch_policy(config: &Config) -> Result<CommandSwitchPolicy, ProxyError> {
    let mut commands = CommandSwitchPolicy::new();
    for command in &config.switch_commands {
        let target = resolve_backend(config, &command.backend)?;
        commands.insert(command.trigger.clone(), target);
    }
    Ok(commands)
}

fn resolve_backend(config: &Config, name: &str) -> Result<BackendTarget, ProxyError> {
    let entry = config
        .backend(name)
        .ok_or_else(|| ProxyError::UnknownBackend(name.to_string()))?;
    let address = entry
        .address
        .parse()
        .map_err(|_| ConfigError::InvalidAddress {
            field: format!("backend '{name}'"),
            value: entry.address.clone(),
        })?;
    Ok(BackendTarget {
        name: entry.name.clone(),
        address,
    })
}

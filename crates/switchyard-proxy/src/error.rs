//! Proxy error types.

use switchyard_config::ConfigError;

/// Errors that stop the proxy from starting or running.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The configuration is unusable.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A switch command or the default points at a backend that is not
    /// configured.
    #[error("unknown backend '{0}'")]
    UnknownBackend(String),

    /// Binding the listener failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

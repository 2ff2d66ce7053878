//! Configuration error types.

/// Errors that can occur when loading, saving, parsing or validating
/// configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the config file from disk.
    #[error("failed to read config: {0}")]
    ReadError(#[source] std::io::Error),

    /// Failed to write the config file to disk.
    #[error("failed to write config: {0}")]
    WriteError(#[source] std::io::Error),

    /// Failed to parse RON content.
    #[error("failed to parse config: {0}")]
    ParseError(#[source] ron::error::SpannedError),

    /// Failed to serialize config to RON.
    #[error("failed to serialize config: {0}")]
    SerializeError(#[source] ron::Error),

    /// An address field is not a valid `host:port` socket address.
    #[error("invalid address '{value}' for {field}")]
    InvalidAddress {
        /// Which setting held the address.
        field: String,
        /// The offending value.
        value: String,
    },

    /// A setting names a backend that is not configured.
    #[error("{field} refers to unknown backend '{name}'")]
    UnknownBackend {
        /// Which setting held the reference.
        field: String,
        /// The missing backend name.
        name: String,
    },

    /// Two backends share a name.
    #[error("backend '{0}' is configured more than once")]
    DuplicateBackend(String),

    /// A numeric setting is out of range.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// Which setting is wrong.
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}

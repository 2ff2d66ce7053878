//! Session error types.

use switchyard_net::plugin::ChannelListError;

/// Conditions that end a session. Everything recoverable is absorbed by the
/// session itself and never surfaces here.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The client answered a keepalive with the wrong nonce, or answered one
    /// that was never sent.
    #[error("client sent invalid keepalive; expected {expected:?}, got {got}")]
    KeepAliveMismatch {
        /// Latest nonce issued, if any.
        expected: Option<i64>,
        /// Nonce the client sent.
        got: i64,
    },

    /// Registering another plugin channel would exceed the limit.
    #[error("too many plugin message channels registered (limit {limit})")]
    TooManyChannels {
        /// Configured maximum.
        limit: usize,
    },

    /// A REGISTER/UNREGISTER payload could not be read.
    #[error("malformed channel list: {0}")]
    MalformedChannelList(#[from] ChannelListError),
}

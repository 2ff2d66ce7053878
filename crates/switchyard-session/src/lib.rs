//! Per-connection session engine for the switchyard proxy.
//!
//! Owns everything the proxy has to remember about one client: spawn state,
//! keepalive nonce, registered plugin channels, brand, settings, boss bars and
//! a mirror of the backend scoreboard. The I/O lives behind
//! [`switchyard_net::Relay`], so the engine is driven identically by real
//! sockets and by test doubles.

pub mod channels;
pub mod error;
pub mod keepalive;
pub mod policy;
pub mod scoreboard;
pub mod session;

pub use channels::{ChannelRegistry, MAX_PLUGIN_CHANNELS};
pub use error::SessionError;
pub use keepalive::{KeepAliveChallenge, LivenessConfig, LivenessMonitor};
pub use policy::{CommandSwitchPolicy, NoSwitching, SwitchPolicy};
pub use scoreboard::Scoreboard;
pub use session::{Outcome, Session, SessionOptions, SessionState};

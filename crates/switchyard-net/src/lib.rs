//! Wire-level plumbing for the switchyard proxy: packet model and codec,
//! framing, plugin channel helpers, the relay I/O boundary and backend links.

pub mod backend;
pub mod framing;
pub mod packets;
pub mod plugin;
pub mod relay;

pub use backend::{BackendConnection, BackendEvent, BackendTarget};
pub use framing::{FrameConfig, FrameError, read_frame, write_frame};
pub use packets::{Packet, PacketError};
pub use relay::{Inbound, OUTBOUND_QUEUE, Relay, RelayWriter, spawn_reader};

//! Outbound connections from the proxy to backend game servers.
//!
//! A [`BackendConnection`] owns the writer half through a [`RelayWriter`] and a
//! reader task that tags every inbound event with the connection's generation,
//! so the session driver can ignore traffic from a backend it already left.

use std::fmt;
use std::net::SocketAddr;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::framing::FrameConfig;
use crate::packets::Packet;
use crate::relay::{Inbound, Relay, RelayWriter, spawn_reader};

/// A backend the proxy can connect a player to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendTarget {
    /// Configured server name.
    pub name: String,
    /// Socket address of the server.
    pub address: SocketAddr,
}

impl fmt::Display for BackendTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.address)
    }
}

/// Inbound traffic from a backend, tagged with the link generation.
#[derive(Debug)]
pub struct BackendEvent {
    /// Generation of the [`BackendConnection`] that produced the event.
    pub generation: u64,
    /// What was observed.
    pub inbound: Inbound,
}

/// Live link to one backend server.
pub struct BackendConnection {
    target: BackendTarget,
    generation: u64,
    writer: RelayWriter,
    reader: JoinHandle<()>,
}

impl BackendConnection {
    /// Connect to `target`. Inbound traffic is delivered to `events`.
    pub async fn connect(
        target: BackendTarget,
        generation: u64,
        config: FrameConfig,
        events: mpsc::Sender<BackendEvent>,
    ) -> std::io::Result<Self> {
        let stream = TcpStream::connect(target.address).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();

        let writer = RelayWriter::spawn(writer, config.clone(), "backend");
        let reader = spawn_reader(reader, config, events, "backend", move |inbound| {
            BackendEvent {
                generation,
                inbound,
            }
        });

        tracing::debug!("Connected to backend {target} (generation {generation})");
        Ok(Self {
            target,
            generation,
            writer,
            reader,
        })
    }

    /// The server this link points at.
    pub fn target(&self) -> &BackendTarget {
        &self.target
    }

    /// Generation number assigned at connect time.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the backend stopped reading and the link closed itself.
    pub fn overflowed(&self) -> bool {
        self.writer.overflowed()
    }
}

impl Relay for BackendConnection {
    fn write(&mut self, packet: Packet) {
        self.writer.write(packet);
    }

    fn delayed_write(&mut self, packet: Packet) {
        self.writer.delayed_write(packet);
    }

    fn flush(&mut self) {
        self.writer.flush();
    }

    fn close(&mut self, reason: Option<String>) {
        self.reader.abort();
        if self.writer.is_closed() {
            return;
        }
        self.writer.close(reason);
        tracing::debug!(
            "Disconnected from backend {} (generation {})",
            self.target,
            self.generation
        );
    }

    fn is_closed(&self) -> bool {
        self.writer.is_closed()
    }
}

impl Drop for BackendConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

//! Per-connection session driver.
//!
//! One task per client owns that client's [`Session`] and [`LivenessMonitor`]
//! and selects over client packets, backend events, finished backend connects,
//! keepalive ticks and server shutdown. Nothing else touches the session, so
//! timer ticks and packet handling never overlap.

use std::sync::Arc;

use switchyard_net::{
    BackendConnection, BackendEvent, BackendTarget, Inbound, Relay, RelayWriter, spawn_reader,
};
use switchyard_session::{LivenessMonitor, Outcome, Session, SessionError};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::server::ConnectionId;
use crate::settings::ProxySettings;

/// Depth of the inbound queues between reader tasks and the driver.
const INBOUND_QUEUE: usize = 256;

/// Prefix of the disconnect reason sent on fatal session errors.
pub const EXCEPTION_PREFIX: &str = "An exception occurred in your connection: ";

/// Result of a backend connect started for a switch.
struct SwitchAttempt {
    target: BackendTarget,
    generation: u64,
    result: std::io::Result<BackendConnection>,
}

/// What the select loop does after one event.
enum Step {
    Continue,
    /// End the session, closing the client with this reason if any.
    End(Option<String>),
}

/// Drive one client connection until either side goes away.
pub async fn drive_session(
    id: ConnectionId,
    stream: TcpStream,
    settings: Arc<ProxySettings>,
    shutdown: watch::Receiver<bool>,
) {
    let (reader, writer) = stream.into_split();
    let client = RelayWriter::spawn(writer, settings.frame.clone(), "client");
    let (client_tx, client_rx) = mpsc::channel(INBOUND_QUEUE);
    let client_reader = spawn_reader(
        reader,
        settings.frame.clone(),
        client_tx,
        "client",
        |inbound| inbound,
    );

    let (backend_tx, backend_rx) = mpsc::channel(INBOUND_QUEUE);
    let session = Session::new(
        client,
        Arc::clone(&settings.policy),
        settings.session.clone(),
    );

    let mut driver = Driver {
        id,
        session,
        settings,
        backend_tx,
        backend_rx,
        client_rx,
        client_reader,
        switch_tx: None,
        generation: 0,
        pending_generation: None,
        early_events: Vec::new(),
    };
    driver.run(shutdown).await;
}

struct Driver {
    id: ConnectionId,
    session: Session<RelayWriter, BackendConnection>,
    settings: Arc<ProxySettings>,
    backend_tx: mpsc::Sender<BackendEvent>,
    backend_rx: mpsc::Receiver<BackendEvent>,
    client_rx: mpsc::Receiver<Inbound>,
    client_reader: JoinHandle<()>,
    switch_tx: Option<mpsc::Sender<SwitchAttempt>>,
    /// Last generation handed out. Never reused.
    generation: u64,
    /// Generation of the switch connect still in flight, if any.
    pending_generation: Option<u64>,
    /// Events from the pending backend that beat its connect result here.
    early_events: Vec<BackendEvent>,
}

impl Driver {
    async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let initial = self.settings.default_backend.clone();
        if let Err(e) = self.connect_initial(initial.clone()).await {
            tracing::warn!("Connection {:?}: could not reach {initial}: {e}", self.id);
            self.finish(Some(format!("Could not connect to a default server: {e}")));
            return;
        }

        let (switch_tx, mut switch_rx) = mpsc::channel(4);
        self.switch_tx = Some(switch_tx);
        let mut liveness = LivenessMonitor::start(&self.settings.liveness);

        let reason = loop {
            let step = tokio::select! {
                inbound = self.client_rx.recv() => self.on_client(inbound),
                Some(event) = self.backend_rx.recv() => self.on_backend(event),
                Some(attempt) = switch_rx.recv() => self.on_switch_attempt(attempt),
                _ = liveness.tick() => {
                    self.session.send_keepalive();
                    Step::Continue
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        Step::End(Some("Proxy shutting down".to_string()))
                    } else {
                        Step::Continue
                    }
                }
            };
            let step = match step {
                Step::Continue => self.check_links(),
                end => end,
            };
            if let Step::End(reason) = step {
                break reason;
            }
        };

        liveness.stop();
        self.finish(reason);
    }

    async fn connect_initial(&mut self, target: BackendTarget) -> std::io::Result<()> {
        let link = BackendConnection::connect(
            target,
            self.generation,
            self.settings.frame.clone(),
            self.backend_tx.clone(),
        )
        .await?;
        tracing::info!(
            "Connection {:?} joined {} (generation {})",
            self.id,
            link.target(),
            link.generation()
        );
        self.session.attach_backend(link);
        Ok(())
    }

    /// Generation of the attached backend, if any.
    fn current_generation(&self) -> Option<u64> {
        self.session.backend().map(BackendConnection::generation)
    }

    fn backend_name(&self) -> String {
        self.session
            .backend()
            .map(|link| link.target().name.clone())
            .unwrap_or_default()
    }

    /// End the session if either relay gave up on a peer that stopped reading.
    fn check_links(&self) -> Step {
        if self.session.client().overflowed() {
            tracing::warn!(
                "Connection {:?}: client stopped reading, ending session",
                self.id
            );
            return Step::End(None);
        }
        if self.session.backend().is_some_and(BackendConnection::overflowed) {
            let name = self.backend_name();
            tracing::warn!(
                "Connection {:?}: backend {name} stopped reading, ending session",
                self.id
            );
            return Step::End(Some(format!("Lost connection to server {name}")));
        }
        Step::Continue
    }

    fn on_client(&mut self, inbound: Option<Inbound>) -> Step {
        match inbound {
            Some(Inbound::Packet(packet)) => {
                let result = self.session.handle_client_packet(packet);
                self.settle(result)
            }
            Some(Inbound::Closed(Some(e))) => {
                tracing::warn!("Connection {:?}: client stream failed: {e}", self.id);
                Step::End(Some(format!("{EXCEPTION_PREFIX}{e}")))
            }
            Some(Inbound::Closed(None)) | None => {
                tracing::info!("Connection {:?}: client disconnected", self.id);
                Step::End(None)
            }
        }
    }

    fn on_backend(&mut self, event: BackendEvent) -> Step {
        if self.pending_generation == Some(event.generation) {
            self.early_events.push(event);
            return Step::Continue;
        }
        if Some(event.generation) != self.current_generation() {
            tracing::trace!(
                "Connection {:?}: ignoring event from stale backend generation {}",
                self.id,
                event.generation
            );
            return Step::Continue;
        }
        match event.inbound {
            Inbound::Packet(packet) => {
                let result = self.session.handle_backend_packet(packet);
                self.settle(result)
            }
            Inbound::Closed(error) => {
                let name = self.backend_name();
                match error {
                    Some(e) => tracing::warn!("Connection {:?}: backend {name} failed: {e}", self.id),
                    None => tracing::info!("Connection {:?}: backend {name} closed", self.id),
                }
                Step::End(Some(format!("Lost connection to server {name}")))
            }
        }
    }

    fn settle(&mut self, result: Result<Outcome, SessionError>) -> Step {
        match result {
            Ok(Outcome::Continue) => Step::Continue,
            Ok(Outcome::Switch(target)) => {
                self.start_switch(target);
                Step::Continue
            }
            // The backend's own disconnect packet has already been relayed.
            Ok(Outcome::End(reason)) => {
                tracing::info!("Connection {:?}: backend ended session: {reason}", self.id);
                Step::End(None)
            }
            Err(e) => {
                tracing::warn!("Connection {:?}: protocol violation: {e}", self.id);
                Step::End(Some(format!("{EXCEPTION_PREFIX}{e}")))
            }
        }
    }

    fn start_switch(&mut self, target: BackendTarget) {
        let Some(switch_tx) = self.switch_tx.clone() else {
            return;
        };
        self.generation += 1;
        let generation = self.generation;
        self.pending_generation = Some(generation);
        self.early_events.clear();
        let frame = self.settings.frame.clone();
        let events = self.backend_tx.clone();
        tracing::info!(
            "Connection {:?}: switching to {target} (generation {generation})",
            self.id
        );

        tokio::spawn(async move {
            let result =
                BackendConnection::connect(target.clone(), generation, frame, events).await;
            let attempt = SwitchAttempt {
                target,
                generation,
                result,
            };
            // The session may be gone by now; the link is dropped with it.
            let _ = switch_tx.send(attempt).await;
        });
    }

    fn on_switch_attempt(&mut self, attempt: SwitchAttempt) -> Step {
        let SwitchAttempt {
            target,
            generation,
            result,
        } = attempt;
        match result {
            Ok(link) if self.pending_generation == Some(generation) => {
                self.pending_generation = None;
                tracing::debug!(
                    "Connection {:?}: attaching {} (generation {})",
                    self.id,
                    link.target(),
                    link.generation()
                );
                self.session.attach_backend(link);
                for event in std::mem::take(&mut self.early_events) {
                    if let Step::End(reason) = self.on_backend(event) {
                        return Step::End(reason);
                    }
                }
            }
            Ok(mut link) => {
                tracing::debug!(
                    "Connection {:?}: discarding superseded link to {} (generation {})",
                    self.id,
                    link.target(),
                    link.generation()
                );
                link.close(None);
            }
            Err(e) if self.pending_generation == Some(generation) => {
                self.pending_generation = None;
                self.early_events.clear();
                tracing::warn!(
                    "Connection {:?}: could not connect to {target}, staying put: {e}",
                    self.id
                );
            }
            Err(e) => {
                tracing::debug!(
                    "Connection {:?}: superseded connect to {target} failed: {e}",
                    self.id
                );
            }
        }
        Step::Continue
    }

    fn finish(&mut self, reason: Option<String>) {
        if self.session.disconnect(reason) {
            tracing::debug!("Connection {:?}: session torn down", self.id);
        }
        self.client_reader.abort();
    }
}

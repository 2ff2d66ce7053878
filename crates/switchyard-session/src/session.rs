//! Per-connection protocol session.
//!
//! A [`Session`] sits between one client and its current backend. It decides
//! for every packet whether to forward, rewrite or absorb it, mirrors the
//! backend state the client will need cleaned up later, and replays the
//! switch choreography when a new backend sends its join-game.
//!
//! All methods take `&mut self`; the owner runs them from a single task, so
//! packet handling and keepalive ticks for one session never interleave.

use std::collections::HashSet;
use std::sync::Arc;

use switchyard_net::packets::{
    BossBar, BossBarAction, ClientSettings, JoinGame, KeepAlive, Packet, PluginMessage, Respawn,
};
use switchyard_net::plugin::{self, REGISTER_CHANNEL, UNREGISTER_CHANNEL};
use switchyard_net::{BackendTarget, Relay};
use uuid::Uuid;

use crate::SessionError;
use crate::channels::{ChannelRegistry, MAX_PLUGIN_CHANNELS};
use crate::keepalive::KeepAliveChallenge;
use crate::policy::SwitchPolicy;
use crate::scoreboard::Scoreboard;

/// Spawn state of a session. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No backend has sent a join-game yet.
    AwaitingSpawn,
    /// The client is in a world. Later joins are backend switches.
    Spawned,
}

/// What the owner of the session should do after a packet was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Keep relaying.
    Continue,
    /// Connect to this backend and attach it.
    Switch(BackendTarget),
    /// The backend ended the session with this reason.
    End(String),
}

/// Tunables for a session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Maximum plugin channels a client may register.
    pub max_plugin_channels: usize,
    /// Name the proxy adds to the client brand.
    pub proxy_brand: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            max_plugin_channels: MAX_PLUGIN_CHANNELS,
            proxy_brand: "switchyard".to_string(),
        }
    }
}

/// Protocol session for one client connection.
pub struct Session<C: Relay, B: Relay> {
    state: SessionState,
    client: C,
    backend: Option<B>,
    current_dimension: i32,
    keepalive: KeepAliveChallenge,
    boss_bars: HashSet<Uuid>,
    client_settings: Option<ClientSettings>,
    brand: Option<PluginMessage>,
    scoreboard: Scoreboard,
    channels: ChannelRegistry,
    policy: Arc<dyn SwitchPolicy>,
    proxy_brand: String,
    torn_down: bool,
}

impl<C: Relay, B: Relay> Session<C, B> {
    /// Create a session for `client`. A backend is attached separately.
    pub fn new(client: C, policy: Arc<dyn SwitchPolicy>, options: SessionOptions) -> Self {
        Self {
            state: SessionState::AwaitingSpawn,
            client,
            backend: None,
            current_dimension: 0,
            keepalive: KeepAliveChallenge::new(),
            boss_bars: HashSet::new(),
            client_settings: None,
            brand: None,
            scoreboard: Scoreboard::new(),
            channels: ChannelRegistry::new(options.max_plugin_channels),
            policy,
            proxy_brand: options.proxy_brand,
            torn_down: false,
        }
    }

    // -- client → backend ---------------------------------------------------

    /// Handle a packet the client sent.
    pub fn handle_client_packet(&mut self, packet: Packet) -> Result<Outcome, SessionError> {
        match packet {
            Packet::KeepAlive(reply) => {
                // Liveness is the proxy's business; backends never see these.
                self.keepalive.verify(&reply)?;
            }
            Packet::ClientSettings(settings) => {
                self.client_settings = Some(settings.clone());
                self.write_backend(Packet::ClientSettings(settings));
            }
            Packet::Chat(chat) => {
                if let Some(target) = self.policy.on_chat(&chat.message) {
                    tracing::info!("Chat command '{}' requests switch to {target}", chat.message);
                    return Ok(Outcome::Switch(target));
                }
                self.write_backend(Packet::Chat(chat));
            }
            Packet::PluginMessage(message) => self.handle_client_plugin_message(message)?,
            other => self.write_backend(other),
        }
        Ok(Outcome::Continue)
    }

    /// Takes the message by value: its payload is released when this returns,
    /// on every path, unless it was forwarded unchanged.
    fn handle_client_plugin_message(&mut self, message: PluginMessage) -> Result<(), SessionError> {
        tracing::debug!("Client plugin message on '{}'", message.channel);

        if message.channel == REGISTER_CHANNEL {
            let requested = plugin::channels(&message)?;
            let added = self.channels.register(requested)?;
            if !added.is_empty() {
                tracing::debug!("Rewritten register packet: {added:?}");
                let register = plugin::channels_message(REGISTER_CHANNEL, &added);
                self.write_backend(Packet::PluginMessage(register));
            }
            return Ok(());
        }

        if message.channel == UNREGISTER_CHANNEL {
            match plugin::channels(&message) {
                Ok(removed) => self.channels.unregister(&removed),
                Err(e) => tracing::debug!("Ignoring unreadable UNREGISTER list: {e}"),
            }
            self.write_backend(Packet::PluginMessage(message));
            return Ok(());
        }

        if plugin::is_brand_channel(&message.channel) {
            let rewritten = plugin::rewrite_brand(&message, &self.proxy_brand);
            self.brand = Some(rewritten.clone());
            self.write_backend(Packet::PluginMessage(rewritten));
            return Ok(());
        }

        self.write_backend(Packet::PluginMessage(message));
        Ok(())
    }

    // -- backend → client ---------------------------------------------------

    /// Handle a packet the current backend sent.
    pub fn handle_backend_packet(&mut self, packet: Packet) -> Result<Outcome, SessionError> {
        match packet {
            Packet::JoinGame(join) => self.handle_join_game(join),
            Packet::KeepAlive(ping) => {
                // Answered here; the client only ever sees the proxy's nonces.
                self.write_backend(Packet::KeepAlive(ping));
            }
            Packet::Respawn(respawn) => {
                self.current_dimension = respawn.dimension;
                self.client.write(Packet::Respawn(respawn));
            }
            Packet::BossBar(bar) => {
                match bar.action {
                    BossBarAction::Add { .. } => {
                        self.boss_bars.insert(bar.uuid);
                    }
                    BossBarAction::Remove => {
                        self.boss_bars.remove(&bar.uuid);
                    }
                    _ => {}
                }
                self.client.write(Packet::BossBar(bar));
            }
            packet @ (Packet::ScoreboardDisplay(_)
            | Packet::ScoreboardObjective(_)
            | Packet::ScoreboardSetScore(_)
            | Packet::ScoreboardTeam(_)) => {
                self.scoreboard.observe(&packet);
                self.client.write(packet);
            }
            Packet::Disconnect(notice) => {
                let reason = notice.reason.clone();
                self.client.write(Packet::Disconnect(notice));
                return Ok(Outcome::End(reason));
            }
            other => self.client.write(other),
        }
        Ok(Outcome::Continue)
    }

    fn handle_join_game(&mut self, join: JoinGame) {
        if self.state == SessionState::AwaitingSpawn {
            self.state = SessionState::Spawned;
            self.current_dimension = join.dimension;
            self.client.write(Packet::JoinGame(join));
            return;
        }

        tracing::info!(
            "Switching client world from dimension {} to {}",
            self.current_dimension,
            join.dimension
        );

        // A respawn into the dimension the client thinks it is already in does
        // not reload the world, so bounce through a different one first.
        let dimension = join.dimension;
        let bounce = intermediate_dimension(dimension);
        let via = Respawn::for_join(&join, bounce);
        let into = Respawn::for_join(&join, dimension);
        self.client.delayed_write(Packet::JoinGame(join));
        self.client.delayed_write(Packet::Respawn(via));
        self.client.delayed_write(Packet::Respawn(into));
        self.current_dimension = dimension;

        if let Some(settings) = &self.client_settings {
            let settings = Packet::ClientSettings(settings.clone());
            if let Some(backend) = self.backend.as_mut() {
                backend.delayed_write(settings);
            }
        }

        for uuid in self.boss_bars.drain() {
            self.client.delayed_write(Packet::BossBar(BossBar::removal(uuid)));
        }

        let teardown = self.scoreboard.take_teardown();
        tracing::debug!("Clearing {} scoreboard entries", teardown.len());
        for packet in teardown {
            self.client.delayed_write(packet);
        }

        if let Some(backend) = self.backend.as_mut() {
            if !self.channels.is_empty() {
                let register = plugin::channels_message(REGISTER_CHANNEL, self.channels.iter());
                backend.delayed_write(Packet::PluginMessage(register));
            }
            if let Some(brand) = &self.brand {
                backend.delayed_write(Packet::PluginMessage(brand.clone()));
            }
            backend.flush();
        }
        self.client.flush();
    }

    // -- liveness and lifecycle ---------------------------------------------

    /// Send a fresh keepalive challenge to the client.
    pub fn send_keepalive(&mut self) -> KeepAlive {
        let ping = self.keepalive.issue();
        self.client.write(Packet::KeepAlive(ping));
        ping
    }

    /// Link a new backend. The previous one, if any, is closed.
    pub fn attach_backend(&mut self, backend: B) {
        if let Some(mut previous) = self.backend.replace(backend) {
            previous.close(None);
        }
    }

    /// Tear the session down: close the backend, then the client with
    /// `reason`. Returns `false` if the session was already torn down.
    pub fn disconnect(&mut self, reason: Option<String>) -> bool {
        if self.torn_down {
            return false;
        }
        self.torn_down = true;
        if let Some(backend) = self.backend.as_mut() {
            backend.close(None);
        }
        self.client.close(reason);
        true
    }

    fn write_backend(&mut self, packet: Packet) {
        match self.backend.as_mut() {
            Some(backend) => backend.write(packet),
            None => tracing::trace!("No backend linked, dropping packet 0x{:02x}", packet.id()),
        }
    }

    // -- accessors ----------------------------------------------------------

    /// Current spawn state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Dimension the client is in, as far as the proxy knows.
    pub fn current_dimension(&self) -> i32 {
        self.current_dimension
    }

    /// Last client settings seen.
    pub fn client_settings(&self) -> Option<&ClientSettings> {
        self.client_settings.as_ref()
    }

    /// Rewritten brand message replayed on switches.
    pub fn brand(&self) -> Option<&PluginMessage> {
        self.brand.as_ref()
    }

    /// Boss bars the current backend has shown.
    pub fn boss_bars(&self) -> &HashSet<Uuid> {
        &self.boss_bars
    }

    /// Shadow scoreboard of the current backend.
    pub fn scoreboard(&self) -> &Scoreboard {
        &self.scoreboard
    }

    /// Channels the client has registered.
    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    /// Outstanding keepalive nonce.
    pub fn keepalive(&self) -> &KeepAliveChallenge {
        &self.keepalive
    }

    /// Client side of the relay.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Current backend link.
    pub fn backend(&self) -> Option<&B> {
        self.backend.as_ref()
    }

    /// Whether [`Session::disconnect`] has run.
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }
}

/// Dimension to bounce through when switching into `target`.
pub fn intermediate_dimension(target: i32) -> i32 {
    if target == 0 { -1 } else { 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{CommandSwitchPolicy, NoSwitching};
    use bytes::Bytes;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use switchyard_net::packets::{
        Chat, Disconnect, OBJECTIVE_CREATE, OBJECTIVE_REMOVE, RawPacket, SCORE_REMOVE, SCORE_SET,
        ScoreboardObjective, ScoreboardSetScore, ScoreboardTeam, TEAM_CREATE, TEAM_REMOVE,
    };
    use switchyard_net::plugin::{BRAND_CHANNEL, read_string, write_string};

    // -- recording relay ----------------------------------------------------

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Write(Packet),
        Delayed(Packet),
        Flush,
        Close(Option<String>),
    }

    #[derive(Clone, Default)]
    struct Recorder {
        events: Arc<Mutex<Vec<Event>>>,
        closed: bool,
    }

    impl Recorder {
        fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }

        /// Packets in the order the peer would receive them.
        fn delivered(&self) -> Vec<Packet> {
            let mut out = Vec::new();
            let mut buffered = Vec::new();
            for event in self.events() {
                match event {
                    Event::Write(p) => out.push(p),
                    Event::Delayed(p) => buffered.push(p),
                    Event::Flush => out.append(&mut buffered),
                    Event::Close(_) => {}
                }
            }
            out
        }

        fn flushes(&self) -> usize {
            self.events()
                .iter()
                .filter(|e| matches!(e, Event::Flush))
                .count()
        }

        fn clear(&self) {
            self.events.lock().unwrap().clear();
        }
    }

    impl Relay for Recorder {
        fn write(&mut self, packet: Packet) {
            self.events.lock().unwrap().push(Event::Write(packet));
        }
        fn delayed_write(&mut self, packet: Packet) {
            self.events.lock().unwrap().push(Event::Delayed(packet));
        }
        fn flush(&mut self) {
            self.events.lock().unwrap().push(Event::Flush);
        }
        fn close(&mut self, reason: Option<String>) {
            self.closed = true;
            self.events.lock().unwrap().push(Event::Close(reason));
        }
        fn is_closed(&self) -> bool {
            self.closed
        }
    }

    // -- fixtures -----------------------------------------------------------

    struct Harness {
        session: Session<Recorder, Recorder>,
        client: Recorder,
        backend: Recorder,
    }

    fn harness_with(policy: Arc<dyn SwitchPolicy>, options: SessionOptions) -> Harness {
        let client = Recorder::default();
        let backend = Recorder::default();
        let mut session = Session::new(client.clone(), policy, options);
        session.attach_backend(backend.clone());
        Harness {
            session,
            client,
            backend,
        }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(NoSwitching), SessionOptions::default())
    }

    impl Harness {
        /// Attach a fresh backend recorder, as the driver does on a switch.
        fn switch_backend(&mut self) -> Recorder {
            let next = Recorder::default();
            self.session.attach_backend(next.clone());
            self.client.clear();
            next
        }
    }

    fn join(dimension: i32) -> Packet {
        Packet::JoinGame(JoinGame {
            entity_id: 1,
            gamemode: 0,
            dimension,
            difficulty: 2,
            max_players: 60,
            level_type: "default".to_string(),
            reduced_debug_info: false,
        })
    }

    fn respawn(dimension: i32) -> Packet {
        Packet::Respawn(Respawn {
            dimension,
            difficulty: 2,
            gamemode: 0,
            level_type: "default".to_string(),
        })
    }

    fn settings(locale: &str) -> ClientSettings {
        ClientSettings {
            locale: locale.to_string(),
            view_distance: 8,
            chat_visibility: 0,
            chat_colors: true,
            skin_parts: 0x7F,
            main_hand: 1,
        }
    }

    fn plugin_message(channel: &str, data: &'static [u8]) -> Packet {
        Packet::PluginMessage(PluginMessage {
            channel: channel.to_string(),
            data: Bytes::from_static(data),
        })
    }

    fn objective(id: &str, mode: u8) -> Packet {
        Packet::ScoreboardObjective(ScoreboardObjective {
            id: id.to_string(),
            mode,
            display_name: id.to_string(),
            kind: "integer".to_string(),
        })
    }

    fn set_score(objective: &str, entity: &str, value: i32) -> Packet {
        Packet::ScoreboardSetScore(ScoreboardSetScore {
            entity: entity.to_string(),
            action: SCORE_SET,
            objective: objective.to_string(),
            value,
        })
    }

    fn team(id: &str, mode: u8) -> Packet {
        Packet::ScoreboardTeam(ScoreboardTeam {
            id: id.to_string(),
            mode,
            info: None,
            players: Vec::new(),
        })
    }

    fn boss_bar(uuid: Uuid, action: BossBarAction) -> Packet {
        Packet::BossBar(BossBar { uuid, action })
    }

    fn add_bar() -> BossBarAction {
        BossBarAction::Add {
            title: "Ender Dragon".to_string(),
            health: 1.0,
            color: 5,
            overlay: 0,
            flags: 0,
        }
    }

    fn registered_names(packet: &Packet) -> Vec<String> {
        match packet {
            Packet::PluginMessage(m) if m.channel == REGISTER_CHANNEL => {
                let mut names = plugin::channels(m).unwrap();
                names.sort();
                names
            }
            other => panic!("expected REGISTER message, got {other:?}"),
        }
    }

    // -- keepalive ----------------------------------------------------------

    #[test]
    fn test_matching_keepalive_is_absorbed() {
        let mut h = harness();
        let ping = h.session.send_keepalive();
        assert_eq!(h.client.delivered(), vec![Packet::KeepAlive(ping)]);

        let outcome = h.session.handle_client_packet(Packet::KeepAlive(ping)).unwrap();
        assert_eq!(outcome, Outcome::Continue);
        assert!(h.backend.events().is_empty());
    }

    #[test]
    fn test_mismatched_keepalive_is_fatal() {
        let mut h = harness();
        let ping = h.session.send_keepalive();
        let reply = KeepAlive {
            random_id: ping.random_id.wrapping_add(1),
        };
        let result = h.session.handle_client_packet(Packet::KeepAlive(reply));
        assert!(matches!(result, Err(SessionError::KeepAliveMismatch { .. })));
        assert!(h.backend.events().is_empty());
    }

    #[test]
    fn test_backend_keepalive_echoed_to_backend_only() {
        let mut h = harness();
        let ping = Packet::KeepAlive(KeepAlive { random_id: 77 });
        h.session.handle_backend_packet(ping.clone()).unwrap();
        assert_eq!(h.backend.delivered(), vec![ping]);
        assert!(h.client.events().is_empty());
    }

    // -- client packets -----------------------------------------------------

    #[test]
    fn test_client_settings_stored_and_forwarded() {
        let mut h = harness();
        let packet = Packet::ClientSettings(settings("en_us"));
        h.session.handle_client_packet(packet.clone()).unwrap();
        assert_eq!(h.session.client_settings(), Some(&settings("en_us")));
        assert_eq!(h.backend.delivered(), vec![packet]);
    }

    #[test]
    fn test_plain_chat_and_opaque_forwarded_verbatim() {
        let mut h = harness();
        let chat = Packet::Chat(Chat {
            message: "hello".to_string(),
            position: 0,
        });
        let opaque = Packet::Opaque(RawPacket {
            id: 0x42,
            body: Bytes::from_static(&[1, 2, 3]),
        });
        h.session.handle_client_packet(chat.clone()).unwrap();
        h.session.handle_client_packet(opaque.clone()).unwrap();
        assert_eq!(h.backend.delivered(), vec![chat, opaque]);
    }

    #[test]
    fn test_chat_command_requests_switch_and_is_consumed() {
        let target = BackendTarget {
            name: "hub".to_string(),
            address: "127.0.0.1:25566".parse().unwrap(),
        };
        let mut policy = CommandSwitchPolicy::new();
        policy.insert("/hub", target.clone());
        let mut h = harness_with(Arc::new(policy), SessionOptions::default());

        let outcome = h
            .session
            .handle_client_packet(Packet::Chat(Chat {
                message: "/hub".to_string(),
                position: 0,
            }))
            .unwrap();
        assert_eq!(outcome, Outcome::Switch(target));
        assert!(h.backend.events().is_empty());
    }

    #[test]
    fn test_packets_dropped_without_backend() {
        let client = Recorder::default();
        let mut session: Session<Recorder, Recorder> =
            Session::new(client, Arc::new(NoSwitching), SessionOptions::default());
        let outcome = session
            .handle_client_packet(Packet::ClientSettings(settings("de_de")))
            .unwrap();
        assert_eq!(outcome, Outcome::Continue);
        assert!(session.backend().is_none());
        assert!(session.client_settings().is_some());
    }

    // -- plugin channels ----------------------------------------------------

    #[test]
    fn test_register_forwards_only_new_channels() {
        let mut h = harness();
        h.session
            .handle_client_packet(plugin_message(REGISTER_CHANNEL, b"WECUI\0FML|HS"))
            .unwrap();
        h.session
            .handle_client_packet(plugin_message(REGISTER_CHANNEL, b"WECUI"))
            .unwrap();
        h.session
            .handle_client_packet(plugin_message(REGISTER_CHANNEL, b"WECUI\0Voice"))
            .unwrap();

        let sent = h.backend.delivered();
        assert_eq!(sent.len(), 2);
        assert_eq!(registered_names(&sent[0]), vec!["FML|HS", "WECUI"]);
        assert_eq!(registered_names(&sent[1]), vec!["Voice"]);
        assert_eq!(h.session.channels().len(), 3);
    }

    #[test]
    fn test_register_past_capacity_is_fatal() {
        let options = SessionOptions {
            max_plugin_channels: 2,
            ..SessionOptions::default()
        };
        let mut h = harness_with(Arc::new(NoSwitching), options);
        h.session
            .handle_client_packet(plugin_message(REGISTER_CHANNEL, b"a\0b"))
            .unwrap();
        let result = h
            .session
            .handle_client_packet(plugin_message(REGISTER_CHANNEL, b"c"));
        assert!(matches!(
            result,
            Err(SessionError::TooManyChannels { limit: 2 })
        ));
    }

    #[test]
    fn test_register_up_to_default_capacity() {
        let mut h = harness();
        let names: Vec<String> = (0..MAX_PLUGIN_CHANNELS).map(|i| format!("c{i}")).collect();
        let message = plugin::channels_message(REGISTER_CHANNEL, &names);
        h.session
            .handle_client_packet(Packet::PluginMessage(message))
            .unwrap();
        assert_eq!(h.session.channels().len(), MAX_PLUGIN_CHANNELS);

        let result = h
            .session
            .handle_client_packet(plugin_message(REGISTER_CHANNEL, b"one-more"));
        assert!(result.is_err());
    }

    #[test]
    fn test_malformed_register_is_fatal() {
        let mut h = harness();
        let result = h
            .session
            .handle_client_packet(plugin_message(REGISTER_CHANNEL, b"\xC3\x28"));
        assert!(matches!(result, Err(SessionError::MalformedChannelList(_))));
    }

    #[test]
    fn test_unregister_removes_and_forwards_unchanged() {
        let mut h = harness();
        h.session
            .handle_client_packet(plugin_message(REGISTER_CHANNEL, b"a\0b"))
            .unwrap();
        let unregister = plugin_message(UNREGISTER_CHANNEL, b"a");
        h.session.handle_client_packet(unregister.clone()).unwrap();

        assert!(!h.session.channels().contains("a"));
        assert!(h.session.channels().contains("b"));
        assert_eq!(h.backend.delivered().last(), Some(&unregister));
    }

    #[test]
    fn test_malformed_unregister_is_forwarded() {
        let mut h = harness();
        h.session
            .handle_client_packet(plugin_message(REGISTER_CHANNEL, b"a"))
            .unwrap();
        let unregister = plugin_message(UNREGISTER_CHANNEL, b"\xFF\xFE");
        let result = h.session.handle_client_packet(unregister.clone());

        assert!(matches!(result, Ok(Outcome::Continue)));
        assert!(h.session.channels().contains("a"));
        assert_eq!(h.backend.delivered().last(), Some(&unregister));
    }

    #[test]
    fn test_brand_rewritten_and_retained() {
        let mut h = harness();
        let mut data = Vec::new();
        write_string(&mut data, "vanilla");
        h.session
            .handle_client_packet(Packet::PluginMessage(PluginMessage {
                channel: BRAND_CHANNEL.to_string(),
                data: Bytes::from(data),
            }))
            .unwrap();

        let brand = h.session.brand().unwrap().clone();
        assert_eq!(
            read_string(&brand.data).as_deref(),
            Some("vanilla (switchyard)")
        );
        assert_eq!(h.backend.delivered(), vec![Packet::PluginMessage(brand)]);
    }

    #[test]
    fn test_other_plugin_messages_forwarded() {
        let mut h = harness();
        let message = plugin_message("BungeeCord", b"\x00\x07Connect");
        h.session.handle_client_packet(message.clone()).unwrap();
        assert_eq!(h.backend.delivered(), vec![message]);
    }

    struct Tracked {
        data: Vec<u8>,
        drops: Arc<AtomicUsize>,
    }

    impl AsRef<[u8]> for Tracked {
        fn as_ref(&self) -> &[u8] {
            &self.data
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn tracked_message(channel: &str, data: Vec<u8>, drops: &Arc<AtomicUsize>) -> Packet {
        Packet::PluginMessage(PluginMessage {
            channel: channel.to_string(),
            data: Bytes::from_owner(Tracked {
                data,
                drops: Arc::clone(drops),
            }),
        })
    }

    #[test]
    fn test_replaced_payloads_released_once() {
        let mut brand = Vec::new();
        write_string(&mut brand, "vanilla");
        let cases = vec![
            (REGISTER_CHANNEL, b"a\0b".to_vec()),
            (REGISTER_CHANNEL, b"a".to_vec()),
            (BRAND_CHANNEL, brand),
        ];

        let mut h = harness();
        for (channel, data) in cases {
            let drops = Arc::new(AtomicUsize::new(0));
            h.session
                .handle_client_packet(tracked_message(channel, data, &drops))
                .unwrap();
            assert_eq!(drops.load(Ordering::SeqCst), 1, "{channel} payload");
        }
    }

    #[test]
    fn test_failed_register_payload_released_once() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut h = harness();
        let result = h.session.handle_client_packet(tracked_message(
            REGISTER_CHANNEL,
            vec![0xFF, 0xFE],
            &drops,
        ));
        assert!(result.is_err());
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_forwarded_payload_released_once_by_relay() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut h = harness();
        h.session
            .handle_client_packet(tracked_message("BungeeCord", b"x".to_vec(), &drops))
            .unwrap();
        // The backend relay now owns it.
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        h.backend.clear();
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    // -- backend packets ----------------------------------------------------

    #[test]
    fn test_first_join_is_forwarded_once() {
        let mut h = harness();
        h.session.handle_backend_packet(join(0)).unwrap();

        assert_eq!(h.session.state(), SessionState::Spawned);
        assert_eq!(h.session.current_dimension(), 0);
        assert_eq!(h.client.delivered(), vec![join(0)]);
        assert!(h.backend.events().is_empty());
    }

    #[test]
    fn test_first_join_skips_teardown() {
        let mut h = harness();
        let bar = Uuid::from_u128(1);
        h.session.handle_backend_packet(boss_bar(bar, add_bar())).unwrap();
        h.session
            .handle_backend_packet(objective("health", OBJECTIVE_CREATE))
            .unwrap();
        h.client.clear();

        h.session.handle_backend_packet(join(0)).unwrap();
        assert_eq!(h.client.delivered(), vec![join(0)]);
        assert!(h.session.boss_bars().contains(&bar));
        assert_eq!(h.session.scoreboard().objective_count(), 1);
    }

    #[test]
    fn test_scoreboard_packets_mirrored_and_forwarded() {
        let mut h = harness();
        let packets = vec![
            objective("health", OBJECTIVE_CREATE),
            set_score("health", "Alice", 20),
            team("red", TEAM_CREATE),
        ];
        for packet in &packets {
            h.session.handle_backend_packet(packet.clone()).unwrap();
        }
        assert_eq!(h.client.delivered(), packets);
        assert_eq!(h.session.scoreboard().score_count(), 1);
        assert_eq!(h.session.scoreboard().team_count(), 1);
    }

    #[test]
    fn test_boss_bar_tracking() {
        let mut h = harness();
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        h.session.handle_backend_packet(boss_bar(a, add_bar())).unwrap();
        h.session.handle_backend_packet(boss_bar(b, add_bar())).unwrap();
        h.session
            .handle_backend_packet(boss_bar(a, BossBarAction::UpdateHealth { health: 0.5 }))
            .unwrap();
        h.session
            .handle_backend_packet(boss_bar(a, BossBarAction::Remove))
            .unwrap();

        assert_eq!(h.session.boss_bars().len(), 1);
        assert!(h.session.boss_bars().contains(&b));
        assert_eq!(h.client.delivered().len(), 4);
    }

    #[test]
    fn test_backend_respawn_updates_dimension() {
        let mut h = harness();
        h.session.handle_backend_packet(join(0)).unwrap();
        h.session.handle_backend_packet(respawn(-1)).unwrap();
        assert_eq!(h.session.current_dimension(), -1);
        assert_eq!(h.client.delivered().last(), Some(&respawn(-1)));
    }

    #[test]
    fn test_backend_disconnect_ends_session() {
        let mut h = harness();
        let notice = Packet::Disconnect(Disconnect {
            reason: "Server closed".to_string(),
        });
        let outcome = h.session.handle_backend_packet(notice.clone()).unwrap();
        assert_eq!(outcome, Outcome::End("Server closed".to_string()));
        assert_eq!(h.client.delivered(), vec![notice]);
    }

    // -- switching ----------------------------------------------------------

    #[test]
    fn test_switch_example_scenario() {
        let mut h = harness();
        h.session.handle_backend_packet(join(0)).unwrap();
        h.session
            .handle_client_packet(Packet::ClientSettings(settings("en")))
            .unwrap();
        h.session
            .handle_backend_packet(objective("health", OBJECTIVE_CREATE))
            .unwrap();
        h.session
            .handle_backend_packet(set_score("health", "Alice", 20))
            .unwrap();

        let next = h.switch_backend();
        h.session.handle_backend_packet(join(1)).unwrap();

        assert_eq!(
            h.client.events(),
            vec![
                Event::Delayed(join(1)),
                Event::Delayed(respawn(0)),
                Event::Delayed(respawn(1)),
                Event::Delayed(Packet::ScoreboardSetScore(ScoreboardSetScore::removal(
                    "health", "Alice"
                ))),
                Event::Delayed(Packet::ScoreboardObjective(ScoreboardObjective::removal(
                    "health"
                ))),
                Event::Flush,
            ]
        );
        assert_eq!(
            next.events(),
            vec![
                Event::Delayed(Packet::ClientSettings(settings("en"))),
                Event::Flush,
            ]
        );
        assert_eq!(h.session.current_dimension(), 1);
        assert!(h.session.scoreboard().is_empty());
    }

    #[test]
    fn test_switch_into_dimension_zero_bounces_through_nether() {
        let mut h = harness();
        h.session.handle_backend_packet(join(0)).unwrap();
        h.switch_backend();
        h.session.handle_backend_packet(join(0)).unwrap();

        let sent = h.client.delivered();
        assert_eq!(sent[1..3], [respawn(-1), respawn(0)]);
    }

    #[test]
    fn test_switch_into_same_nonzero_dimension_bounces_through_zero() {
        let mut h = harness();
        h.session.handle_backend_packet(join(5)).unwrap();
        h.switch_backend();
        h.session.handle_backend_packet(join(5)).unwrap();

        let sent = h.client.delivered();
        assert_eq!(sent[1..3], [respawn(0), respawn(5)]);
        assert_eq!(intermediate_dimension(5), 0);
        assert_eq!(intermediate_dimension(0), -1);
    }

    #[test]
    fn test_switch_tears_down_everything_once() {
        let mut h = harness();
        h.session.handle_backend_packet(join(0)).unwrap();
        for packet in [
            objective("a", OBJECTIVE_CREATE),
            objective("b", OBJECTIVE_CREATE),
            objective("gone", OBJECTIVE_CREATE),
            objective("gone", OBJECTIVE_REMOVE),
            set_score("a", "Alice", 1),
            set_score("a", "Bob", 2),
            set_score("a", "Alice", 3),
            set_score("b", "Carol", 4),
            set_score("missing", "Dave", 5),
            team("red", TEAM_CREATE),
            team("blue", TEAM_CREATE),
            team("blue", TEAM_REMOVE),
        ] {
            h.session.handle_backend_packet(packet).unwrap();
        }
        let bars = [Uuid::from_u128(10), Uuid::from_u128(11)];
        for bar in bars {
            h.session.handle_backend_packet(boss_bar(bar, add_bar())).unwrap();
        }

        h.switch_backend();
        h.session.handle_backend_packet(join(1)).unwrap();

        let sent = h.client.delivered();
        let count = |pred: &dyn Fn(&Packet) -> bool| sent.iter().filter(|p| pred(p)).count();
        assert_eq!(
            count(&|p| matches!(p, Packet::ScoreboardSetScore(s) if s.action == SCORE_REMOVE)),
            3
        );
        assert_eq!(
            count(&|p| matches!(p, Packet::ScoreboardObjective(o) if o.mode == OBJECTIVE_REMOVE)),
            2
        );
        assert_eq!(
            count(&|p| matches!(p, Packet::ScoreboardTeam(t) if t.mode == TEAM_REMOVE)),
            1
        );
        let removed_bars: HashSet<Uuid> = sent
            .iter()
            .filter_map(|p| match p {
                Packet::BossBar(b) if b.action == BossBarAction::Remove => Some(b.uuid),
                _ => None,
            })
            .collect();
        assert_eq!(removed_bars, HashSet::from(bars));
        assert_eq!(h.client.flushes(), 1);
        assert!(h.session.scoreboard().is_empty());
        assert!(h.session.boss_bars().is_empty());

        // A second switch has nothing left to tear down.
        h.switch_backend();
        h.session.handle_backend_packet(join(0)).unwrap();
        assert_eq!(h.client.delivered(), vec![join(0), respawn(-1), respawn(0)]);
    }

    #[test]
    fn test_switch_replays_channels_and_brand_to_new_backend() {
        let mut h = harness();
        h.session.handle_backend_packet(join(0)).unwrap();
        h.session
            .handle_client_packet(plugin_message(REGISTER_CHANNEL, b"b\0a"))
            .unwrap();
        let mut brand = Vec::new();
        write_string(&mut brand, "fabric");
        h.session
            .handle_client_packet(Packet::PluginMessage(PluginMessage {
                channel: BRAND_CHANNEL.to_string(),
                data: Bytes::from(brand),
            }))
            .unwrap();

        let next = h.switch_backend();
        h.session.handle_backend_packet(join(0)).unwrap();

        let sent = next.delivered();
        assert_eq!(sent.len(), 2);
        assert_eq!(registered_names(&sent[0]), vec!["a", "b"]);
        match &sent[1] {
            Packet::PluginMessage(m) => {
                assert_eq!(read_string(&m.data).as_deref(), Some("fabric (switchyard)"))
            }
            other => panic!("expected brand, got {other:?}"),
        }
        assert_eq!(next.flushes(), 1);
        assert!(
            next.events()
                .iter()
                .all(|e| matches!(e, Event::Delayed(_) | Event::Flush))
        );
    }

    // -- lifecycle ----------------------------------------------------------

    #[test]
    fn test_attach_backend_closes_previous() {
        let mut h = harness();
        h.switch_backend();
        assert_eq!(h.backend.events(), vec![Event::Close(None)]);
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let mut h = harness();
        assert!(h.session.disconnect(Some("bye".to_string())));
        assert!(!h.session.disconnect(Some("again".to_string())));
        assert!(h.session.is_torn_down());
        assert_eq!(h.backend.events(), vec![Event::Close(None)]);
        assert_eq!(h.client.events(), vec![Event::Close(Some("bye".to_string()))]);
    }
}

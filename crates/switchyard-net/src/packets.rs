//! Packet model and wire codec.
//!
//! Only the packets the proxy has to inspect or synthesize are modelled as
//! typed variants. Everything else travels as [`Packet::Opaque`] and is
//! re-emitted byte for byte without its body ever being decoded.
//!
//! Wire format of a frame payload:
//!
//! ```text
//! +--------------+-------------+---------------------------------+
//! | version (u8) | packet id   | body                            |
//! |              | (u8)        | postcard (typed) / raw (opaque) |
//! +--------------+-------------+---------------------------------+
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current wire-protocol version. First byte of every frame payload.
pub const PROTOCOL_VERSION: u8 = 1;

// ---------------------------------------------------------------------------
// Packet ids
// ---------------------------------------------------------------------------

/// Keepalive challenge (proxy → client) and response (client → proxy).
pub const KEEP_ALIVE_ID: u8 = 0x00;
/// Chat line, either direction.
pub const CHAT_ID: u8 = 0x01;
/// Client display/locale preferences.
pub const CLIENT_SETTINGS_ID: u8 = 0x02;
/// Plugin channel message, either direction.
pub const PLUGIN_MESSAGE_ID: u8 = 0x03;
/// Backend world join.
pub const JOIN_GAME_ID: u8 = 0x04;
/// Dimension change.
pub const RESPAWN_ID: u8 = 0x05;
/// Boss bar add/remove/update.
pub const BOSS_BAR_ID: u8 = 0x06;
/// Scoreboard display slot assignment.
pub const SCOREBOARD_DISPLAY_ID: u8 = 0x07;
/// Scoreboard objective create/remove/update.
pub const SCOREBOARD_OBJECTIVE_ID: u8 = 0x08;
/// Scoreboard score set/remove.
pub const SCOREBOARD_SET_SCORE_ID: u8 = 0x09;
/// Scoreboard team create/remove/update.
pub const SCOREBOARD_TEAM_ID: u8 = 0x0A;
/// Connection termination with a reason.
pub const DISCONNECT_ID: u8 = 0x0B;

// ---------------------------------------------------------------------------
// Top-level enum
// ---------------------------------------------------------------------------

/// A decoded packet. Dispatch is an exhaustive `match` on the variant.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Keepalive challenge or response.
    KeepAlive(KeepAlive),
    /// Chat line.
    Chat(Chat),
    /// Client settings snapshot.
    ClientSettings(ClientSettings),
    /// Plugin channel message.
    PluginMessage(PluginMessage),
    /// Backend world join.
    JoinGame(JoinGame),
    /// Dimension change.
    Respawn(Respawn),
    /// Boss bar update.
    BossBar(BossBar),
    /// Scoreboard display slot.
    ScoreboardDisplay(ScoreboardDisplay),
    /// Scoreboard objective.
    ScoreboardObjective(ScoreboardObjective),
    /// Scoreboard score.
    ScoreboardSetScore(ScoreboardSetScore),
    /// Scoreboard team.
    ScoreboardTeam(ScoreboardTeam),
    /// Disconnect with reason.
    Disconnect(Disconnect),
    /// Any packet the proxy relays without interpreting.
    Opaque(RawPacket),
}

// ---------------------------------------------------------------------------
// Payload structs
// ---------------------------------------------------------------------------

/// Keepalive with its random nonce.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeepAlive {
    /// Nonce echoed back by the receiver.
    pub random_id: i64,
}

/// Chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chat {
    /// Raw message text (commands included).
    pub message: String,
    /// Display position (0 = chat box).
    pub position: u8,
}

/// Client settings, replayed to every new backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientSettings {
    /// Locale tag, e.g. `en_us`.
    pub locale: String,
    /// Render distance in chunks.
    pub view_distance: i8,
    /// Chat visibility mode.
    pub chat_visibility: i32,
    /// Whether colored chat is enabled.
    pub chat_colors: bool,
    /// Displayed skin parts bitmask.
    pub skin_parts: u8,
    /// Main hand (0 = left, 1 = right).
    pub main_hand: i32,
}

/// Plugin channel message. The payload is reference-counted and released
/// when the last owner drops it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginMessage {
    /// Channel name (case-sensitive).
    pub channel: String,
    /// Channel-specific payload.
    pub data: Bytes,
}

/// World join sent by a backend right after login.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JoinGame {
    /// Entity id the backend assigned to the player.
    pub entity_id: i32,
    /// Game mode.
    pub gamemode: u8,
    /// Dimension the player spawns in.
    pub dimension: i32,
    /// World difficulty.
    pub difficulty: u8,
    /// Player slot count shown in the tab list.
    pub max_players: u8,
    /// World generator type.
    pub level_type: String,
    /// Hide coordinates on the debug screen.
    pub reduced_debug_info: bool,
}

/// Dimension change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Respawn {
    /// Target dimension.
    pub dimension: i32,
    /// World difficulty.
    pub difficulty: u8,
    /// Game mode.
    pub gamemode: u8,
    /// World generator type.
    pub level_type: String,
}

impl Respawn {
    /// Respawn into `dimension` carrying the world parameters of `join`.
    pub fn for_join(join: &JoinGame, dimension: i32) -> Self {
        Self {
            dimension,
            difficulty: join.difficulty,
            gamemode: join.gamemode,
            level_type: join.level_type.clone(),
        }
    }
}

/// Boss bar update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BossBar {
    /// Bar identity.
    pub uuid: Uuid,
    /// What happens to the bar.
    pub action: BossBarAction,
}

impl BossBar {
    /// Packet that removes the bar from the client.
    pub fn removal(uuid: Uuid) -> Self {
        Self {
            uuid,
            action: BossBarAction::Remove,
        }
    }
}

/// Boss bar actions, in protocol order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum BossBarAction {
    /// Show a new bar.
    Add {
        /// Bar title.
        title: String,
        /// Fill fraction, 0.0 to 1.0.
        health: f32,
        /// Color index.
        color: i32,
        /// Division style.
        overlay: i32,
        /// Darken-sky / fog flags.
        flags: u8,
    },
    /// Hide the bar.
    Remove,
    /// Change the fill fraction.
    UpdateHealth {
        /// Fill fraction, 0.0 to 1.0.
        health: f32,
    },
    /// Change the title.
    UpdateTitle {
        /// Bar title.
        title: String,
    },
    /// Change color and divisions.
    UpdateStyle {
        /// Color index.
        color: i32,
        /// Division style.
        overlay: i32,
    },
    /// Change flags.
    UpdateFlags {
        /// Darken-sky / fog flags.
        flags: u8,
    },
}

/// Scoreboard display slot assignment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreboardDisplay {
    /// Display slot (0 = list, 1 = sidebar, 2 = below name).
    pub position: u8,
    /// Objective shown in the slot.
    pub display_name: String,
}

/// Objective mode: create (or overwrite) the objective.
pub const OBJECTIVE_CREATE: u8 = 0;
/// Objective mode: remove the objective.
pub const OBJECTIVE_REMOVE: u8 = 1;
/// Objective mode: update the display text.
pub const OBJECTIVE_UPDATE: u8 = 2;

/// Scoreboard objective.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreboardObjective {
    /// Objective id.
    pub id: String,
    /// One of the `OBJECTIVE_*` modes.
    pub mode: u8,
    /// Display text.
    pub display_name: String,
    /// Render type, e.g. `integer` or `hearts`.
    pub kind: String,
}

impl ScoreboardObjective {
    /// Packet that removes objective `id` from the client.
    pub fn removal(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            mode: OBJECTIVE_REMOVE,
            display_name: String::new(),
            kind: String::new(),
        }
    }
}

/// Score action: set the value.
pub const SCORE_SET: u8 = 0;
/// Score action: remove the entry.
pub const SCORE_REMOVE: u8 = 1;

/// Scoreboard score entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreboardSetScore {
    /// Entity (player name or arbitrary string) the score belongs to.
    pub entity: String,
    /// [`SCORE_SET`] or [`SCORE_REMOVE`].
    pub action: u8,
    /// Owning objective id.
    pub objective: String,
    /// Score value (ignored on removal).
    pub value: i32,
}

impl ScoreboardSetScore {
    /// Packet that removes `entity`'s score under `objective`.
    pub fn removal(objective: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            action: SCORE_REMOVE,
            objective: objective.into(),
            value: 0,
        }
    }
}

/// Team mode: create the team.
pub const TEAM_CREATE: u8 = 0;
/// Team mode: remove the team.
pub const TEAM_REMOVE: u8 = 1;
/// Team mode: update team info.
pub const TEAM_UPDATE_INFO: u8 = 2;
/// Team mode: add players.
pub const TEAM_ADD_PLAYERS: u8 = 3;
/// Team mode: remove players.
pub const TEAM_REMOVE_PLAYERS: u8 = 4;

/// Scoreboard team.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreboardTeam {
    /// Team id.
    pub id: String,
    /// One of the `TEAM_*` modes.
    pub mode: u8,
    /// Present on create and info updates.
    pub info: Option<TeamInfo>,
    /// Present on create and player add/remove.
    pub players: Vec<String>,
}

impl ScoreboardTeam {
    /// Packet that removes team `id` from the client.
    pub fn removal(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            mode: TEAM_REMOVE,
            info: None,
            players: Vec::new(),
        }
    }
}

/// Team display metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TeamInfo {
    /// Display text.
    pub display_name: String,
    /// Name prefix.
    pub prefix: String,
    /// Name suffix.
    pub suffix: String,
    /// Friendly-fire / see-invisible bitmask.
    pub friendly_flags: u8,
    /// Name tag visibility rule.
    pub name_tag_visibility: String,
    /// Color index.
    pub color: i8,
}

/// Disconnect notice.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Disconnect {
    /// Human-readable reason.
    pub reason: String,
}

/// A packet relayed without decoding its body.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPacket {
    /// Packet id as seen on the wire.
    pub id: u8,
    /// Undecoded body.
    pub body: Bytes,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur while encoding or decoding packets.
#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    /// The payload was empty (no version byte).
    #[error("empty payload, no version byte")]
    EmptyPayload,

    /// The version byte does not match [`PROTOCOL_VERSION`].
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// The payload ended before the packet id.
    #[error("missing packet id")]
    MissingId,

    /// Body of a known packet id failed to decode.
    #[error("malformed body for packet 0x{id:02x}: {source}")]
    MalformedBody {
        /// Packet id whose body was rejected.
        id: u8,
        /// Postcard error.
        #[source]
        source: postcard::Error,
    },

    /// Postcard serialization failed.
    #[error("serialization error: {0}")]
    Encode(#[from] postcard::Error),
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

impl Packet {
    /// Wire id of this packet.
    pub fn id(&self) -> u8 {
        match self {
            Packet::KeepAlive(_) => KEEP_ALIVE_ID,
            Packet::Chat(_) => CHAT_ID,
            Packet::ClientSettings(_) => CLIENT_SETTINGS_ID,
            Packet::PluginMessage(_) => PLUGIN_MESSAGE_ID,
            Packet::JoinGame(_) => JOIN_GAME_ID,
            Packet::Respawn(_) => RESPAWN_ID,
            Packet::BossBar(_) => BOSS_BAR_ID,
            Packet::ScoreboardDisplay(_) => SCOREBOARD_DISPLAY_ID,
            Packet::ScoreboardObjective(_) => SCOREBOARD_OBJECTIVE_ID,
            Packet::ScoreboardSetScore(_) => SCOREBOARD_SET_SCORE_ID,
            Packet::ScoreboardTeam(_) => SCOREBOARD_TEAM_ID,
            Packet::Disconnect(_) => DISCONNECT_ID,
            Packet::Opaque(raw) => raw.id,
        }
    }

    /// Encode into a versioned frame payload.
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let mut out = vec![PROTOCOL_VERSION, self.id()];
        match self {
            Packet::KeepAlive(p) => append(&mut out, p)?,
            Packet::Chat(p) => append(&mut out, p)?,
            Packet::ClientSettings(p) => append(&mut out, p)?,
            Packet::PluginMessage(p) => append(&mut out, p)?,
            Packet::JoinGame(p) => append(&mut out, p)?,
            Packet::Respawn(p) => append(&mut out, p)?,
            Packet::BossBar(p) => append(&mut out, p)?,
            Packet::ScoreboardDisplay(p) => append(&mut out, p)?,
            Packet::ScoreboardObjective(p) => append(&mut out, p)?,
            Packet::ScoreboardSetScore(p) => append(&mut out, p)?,
            Packet::ScoreboardTeam(p) => append(&mut out, p)?,
            Packet::Disconnect(p) => append(&mut out, p)?,
            Packet::Opaque(raw) => out.extend_from_slice(&raw.body),
        }
        Ok(out)
    }

    /// Decode a versioned frame payload.
    ///
    /// Unknown ids become [`Packet::Opaque`] and their body is not inspected.
    pub fn decode(data: Bytes) -> Result<Packet, PacketError> {
        let Some(&version) = data.first() else {
            return Err(PacketError::EmptyPayload);
        };
        if version != PROTOCOL_VERSION {
            return Err(PacketError::UnsupportedVersion(version));
        }
        let id = *data.get(1).ok_or(PacketError::MissingId)?;
        let body = data.slice(2..);

        let packet = match id {
            KEEP_ALIVE_ID => Packet::KeepAlive(parse(id, &body)?),
            CHAT_ID => Packet::Chat(parse(id, &body)?),
            CLIENT_SETTINGS_ID => Packet::ClientSettings(parse(id, &body)?),
            PLUGIN_MESSAGE_ID => Packet::PluginMessage(parse(id, &body)?),
            JOIN_GAME_ID => Packet::JoinGame(parse(id, &body)?),
            RESPAWN_ID => Packet::Respawn(parse(id, &body)?),
            BOSS_BAR_ID => Packet::BossBar(parse(id, &body)?),
            SCOREBOARD_DISPLAY_ID => Packet::ScoreboardDisplay(parse(id, &body)?),
            SCOREBOARD_OBJECTIVE_ID => Packet::ScoreboardObjective(parse(id, &body)?),
            SCOREBOARD_SET_SCORE_ID => Packet::ScoreboardSetScore(parse(id, &body)?),
            SCOREBOARD_TEAM_ID => Packet::ScoreboardTeam(parse(id, &body)?),
            DISCONNECT_ID => Packet::Disconnect(parse(id, &body)?),
            _ => Packet::Opaque(RawPacket { id, body }),
        };
        Ok(packet)
    }
}

fn append<T: Serialize>(out: &mut Vec<u8>, body: &T) -> Result<(), PacketError> {
    let encoded = postcard::to_allocvec(body)?;
    out.extend_from_slice(&encoded);
    Ok(())
}

fn parse<'a, T: Deserialize<'a>>(id: u8, body: &'a [u8]) -> Result<T, PacketError> {
    postcard::from_bytes(body).map_err(|source| PacketError::MalformedBody { id, source })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Shadow copy of the backend's scoreboard.
//!
//! Rebuilt from the scoreboard packets a backend sends to the client, so that
//! on a backend switch the proxy knows exactly which objectives, scores and
//! teams the client is still displaying and can remove them.
//!
//! Teams are tracked by id only. Removal needs nothing else, so member lists
//! and display metadata are not mirrored.

use std::collections::HashMap;

use switchyard_net::packets::{
    OBJECTIVE_CREATE, Packet, SCORE_REMOVE, SCORE_SET, ScoreboardDisplay, ScoreboardObjective,
    ScoreboardSetScore, ScoreboardTeam, TEAM_CREATE, TEAM_REMOVE,
};

/// One entity's value under an objective.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Score {
    /// Entity the score belongs to.
    pub target: String,
    /// Current value.
    pub value: i32,
}

/// A scoreboard objective and its scores, keyed by entity name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Objective {
    /// Objective id.
    pub id: String,
    /// Display text.
    pub display_name: String,
    /// Render type.
    pub kind: String,
    /// Scores keyed by target entity.
    pub scores: HashMap<String, Score>,
}

/// A team, tracked by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Team {
    /// Team id.
    pub id: String,
}

/// Mirror of everything scoreboard-related the current backend has shown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scoreboard {
    position: u8,
    display_name: String,
    objectives: HashMap<String, Objective>,
    teams: HashMap<String, Team>,
}

impl Scoreboard {
    /// Create an empty scoreboard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a backend packet into the mirror. Non-scoreboard packets are
    /// ignored. Returns whether the packet was a scoreboard packet.
    pub fn observe(&mut self, packet: &Packet) -> bool {
        match packet {
            Packet::ScoreboardDisplay(p) => self.apply_display(p),
            Packet::ScoreboardObjective(p) => self.apply_objective(p),
            Packet::ScoreboardSetScore(p) => self.apply_score(p),
            Packet::ScoreboardTeam(p) => self.apply_team(p),
            _ => return false,
        }
        true
    }

    /// Last write wins.
    pub fn apply_display(&mut self, packet: &ScoreboardDisplay) {
        self.position = packet.position;
        self.display_name = packet.display_name.clone();
    }

    /// Mode [`OBJECTIVE_CREATE`] inserts or overwrites; every other mode
    /// removes the objective together with its scores.
    pub fn apply_objective(&mut self, packet: &ScoreboardObjective) {
        if packet.mode == OBJECTIVE_CREATE {
            let objective = Objective {
                id: packet.id.clone(),
                display_name: packet.display_name.clone(),
                kind: packet.kind.clone(),
                scores: HashMap::new(),
            };
            self.objectives.insert(packet.id.clone(), objective);
        } else {
            self.objectives.remove(&packet.id);
        }
    }

    /// Scores for unknown objectives are dropped.
    pub fn apply_score(&mut self, packet: &ScoreboardSetScore) {
        let Some(objective) = self.objectives.get_mut(&packet.objective) else {
            tracing::trace!(
                "Ignoring score for unknown objective '{}'",
                packet.objective
            );
            return;
        };
        match packet.action {
            SCORE_SET => {
                let score = Score {
                    target: packet.entity.clone(),
                    value: packet.value,
                };
                objective.scores.insert(packet.entity.clone(), score);
            }
            SCORE_REMOVE => {
                objective.scores.remove(&packet.entity);
            }
            _ => {}
        }
    }

    /// Only creation and removal change what needs tearing down.
    pub fn apply_team(&mut self, packet: &ScoreboardTeam) {
        match packet.mode {
            TEAM_CREATE => {
                let team = Team {
                    id: packet.id.clone(),
                };
                self.teams.insert(packet.id.clone(), team);
            }
            TEAM_REMOVE => {
                self.teams.remove(&packet.id);
            }
            _ => {}
        }
    }

    /// Build the packets that wipe this scoreboard from the client and reset
    /// the mirror to empty.
    ///
    /// For each objective: one removal per score, then the objective removal.
    /// Team removals follow.
    pub fn take_teardown(&mut self) -> Vec<Packet> {
        let board = std::mem::take(self);
        let mut packets = Vec::new();

        for objective in board.objectives.into_values() {
            for score in objective.scores.into_values() {
                packets.push(Packet::ScoreboardSetScore(ScoreboardSetScore::removal(
                    objective.id.clone(),
                    score.target,
                )));
            }
            packets.push(Packet::ScoreboardObjective(ScoreboardObjective::removal(
                objective.id,
            )));
        }
        for team in board.teams.into_values() {
            packets.push(Packet::ScoreboardTeam(ScoreboardTeam::removal(team.id)));
        }

        packets
    }

    /// Display slot from the last display packet.
    pub fn position(&self) -> u8 {
        self.position
    }

    /// Objective shown by the last display packet.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Look up an objective.
    pub fn objective(&self, id: &str) -> Option<&Objective> {
        self.objectives.get(id)
    }

    /// Look up a team.
    pub fn team(&self, id: &str) -> Option<&Team> {
        self.teams.get(id)
    }

    /// Number of tracked objectives.
    pub fn objective_count(&self) -> usize {
        self.objectives.len()
    }

    /// Number of tracked teams.
    pub fn team_count(&self) -> usize {
        self.teams.len()
    }

    /// Total number of scores across all objectives.
    pub fn score_count(&self) -> usize {
        self.objectives.values().map(|o| o.scores.len()).sum()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.objectives.is_empty() && self.teams.is_empty()
    }
}

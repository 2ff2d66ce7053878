//! Backend selection seam.
//!
//! Which chat lines move a player, and where to, is decided outside the
//! session engine. The session only asks.

use std::collections::HashMap;

use switchyard_net::BackendTarget;

/// Decides whether a chat line asks for a backend switch.
pub trait SwitchPolicy: Send + Sync {
    /// Return the backend to move to, or `None` to relay the line normally.
    fn on_chat(&self, message: &str) -> Option<BackendTarget>;
}

/// Policy that never switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSwitching;

impl SwitchPolicy for NoSwitching {
    fn on_chat(&self, _message: &str) -> Option<BackendTarget> {
        None
    }
}

/// Exact-match table of chat commands to backends.
#[derive(Debug, Clone, Default)]
pub struct CommandSwitchPolicy {
    commands: HashMap<String, BackendTarget>,
}

impl CommandSwitchPolicy {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `trigger` (e.g. `/hub`) to `target`, replacing any earlier mapping.
    pub fn insert(&mut self, trigger: impl Into<String>, target: BackendTarget) {
        self.commands.insert(trigger.into(), target);
    }

    /// Number of configured triggers.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether no trigger is configured.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl SwitchPolicy for CommandSwitchPolicy {
    fn on_chat(&self, message: &str) -> Option<BackendTarget> {
        self.commands.get(message.trim()).cloned()
    }
}

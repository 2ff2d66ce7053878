//! Plugin channels the client has registered.

use std::collections::HashSet;

use crate::SessionError;

/// Default cap on registered channels per client.
pub const MAX_PLUGIN_CHANNELS: usize = 128;

/// Bounded set of channel names. Names are compared case-sensitively.
#[derive(Debug, Clone)]
pub struct ChannelRegistry {
    channels: HashSet<String>,
    capacity: usize,
}

impl ChannelRegistry {
    /// Create an empty registry holding at most `capacity` channels.
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: HashSet::new(),
            capacity,
        }
    }

    /// Register `names`, returning the ones that were not yet present, in the
    /// order given.
    ///
    /// Fails with [`SessionError::TooManyChannels`] as soon as a new name would
    /// push the registry past its capacity.
    pub fn register<I>(&mut self, names: I) -> Result<Vec<String>, SessionError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut added = Vec::new();
        for name in names {
            if self.channels.contains(&name) {
                continue;
            }
            if self.channels.len() >= self.capacity {
                return Err(SessionError::TooManyChannels {
                    limit: self.capacity,
                });
            }
            self.channels.insert(name.clone());
            added.push(name);
        }
        Ok(added)
    }

    /// Remove `names`. Unknown names are ignored.
    pub fn unregister<'a, I>(&mut self, names: I)
    where
        I: IntoIterator<Item = &'a String>,
    {
        for name in names {
            self.channels.remove(name);
        }
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.channels.contains(name)
    }

    /// Registered channel names, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(String::as_str)
    }

    /// Number of registered channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether no channel is registered.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Maximum number of channels.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new(MAX_PLUGIN_CHANNELS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_register_returns_only_new_names() {
        let mut registry = ChannelRegistry::default();
        let added = registry.register(names(&["a", "b"])).unwrap();
        assert_eq!(added, names(&["a", "b"]));

        let added = registry.register(names(&["b", "c", "c"])).unwrap();
        assert_eq!(added, names(&["c"]));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_names_are_case_sensitive() {
        let mut registry = ChannelRegistry::default();
        registry.register(names(&["WECUI", "wecui"])).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_fill_to_capacity_succeeds() {
        let mut registry = ChannelRegistry::new(MAX_PLUGIN_CHANNELS);
        let all: Vec<String> = (0..MAX_PLUGIN_CHANNELS).map(|i| format!("ch{i}")).collect();
        let added = registry.register(all).unwrap();
        assert_eq!(added.len(), MAX_PLUGIN_CHANNELS);
        assert_eq!(registry.len(), MAX_PLUGIN_CHANNELS);

        // Re-registering known names at capacity is fine.
        assert!(registry.register(names(&["ch0"])).unwrap().is_empty());
    }

    #[test]
    fn test_one_past_capacity_fails() {
        let mut registry = ChannelRegistry::new(2);
        registry.register(names(&["a", "b"])).unwrap();
        let result = registry.register(names(&["c"]));
        assert!(matches!(
            result,
            Err(SessionError::TooManyChannels { limit: 2 })
        ));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_unregister_frees_room() {
        let mut registry = ChannelRegistry::new(1);
        registry.register(names(&["a"])).unwrap();
        registry.unregister(&names(&["a", "unknown"]));
        assert!(registry.is_empty());
        assert_eq!(registry.register(names(&["b"])).unwrap(), names(&["b"]));
        assert!(registry.contains("b"));
    }
}

//! Session Registry - who is watching which room
//!
//! Presence is a multiset: an identity with two open tabs on the same room holds two
//! references, and stays present until both are released. A room entry is dropped as
//! soon as its last reference goes away.

use crate::entities::{Identity, RoomId};
use dashmap::DashMap;
use std::collections::HashMap;
use tracing::{debug, instrument};

pub struct SessionRegistry {
    rooms: DashMap<RoomId, HashMap<Identity, usize>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        SessionRegistry {
            rooms: DashMap::new(),
        }
    }

    /// Adds one presence reference for `identity` in room `rid`.
    #[instrument(skip(self))]
    pub fn join(&self, rid: RoomId, identity: &str) {
        let mut members = self.rooms.entry(rid).or_default();
        let count = members.entry(identity.to_string()).or_insert(0);
        *count += 1;
        debug!(references = *count, "Presence joined");
    }

    /// Releases one presence reference. Returns `false` when there was nothing to
    /// release, which is not an error.
    #[instrument(skip(self))]
    pub fn leave(&self, rid: RoomId, identity: &str) -> bool {
        let (released, now_empty) = match self.rooms.get_mut(&rid) {
            Some(mut members) => {
                let released = match members.get_mut(identity) {
                    Some(count) if *count > 1 => {
                        *count -= 1;
                        true
                    }
                    Some(_) => {
                        members.remove(identity);
                        true
                    }
                    None => false,
                };
                (released, members.is_empty())
            }
            None => (false, false),
        };

        // the shard guard is released above; re-check under the lock before removing
        if now_empty {
            self.rooms.remove_if(&rid, |_, members| members.is_empty());
            debug!("Room presence discarded");
        }
        released
    }

    pub fn is_present(&self, rid: RoomId, identity: &str) -> bool {
        self.rooms
            .get(&rid)
            .is_some_and(|members| members.contains_key(identity))
    }

    /// Identities currently present in a room, in no particular order.
    pub fn present_in(&self, rid: RoomId) -> Vec<Identity> {
        self.rooms
            .get(&rid)
            .map(|members| members.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of rooms with at least one present identity.
    pub fn active_rooms(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_then_leave_discards_room() {
        let registry = SessionRegistry::new();

        registry.join(1, "S");
        assert!(registry.is_present(1, "S"));
        assert!(!registry.is_present(1, "B"));
        assert_eq!(registry.active_rooms(), 1);

        assert!(registry.leave(1, "S"));
        assert!(!registry.is_present(1, "S"));
        assert_eq!(registry.active_rooms(), 0);
    }

    #[test]
    fn second_tab_keeps_presence() {
        let registry = SessionRegistry::new();

        registry.join(1, "S");
        registry.join(1, "S");
        assert_eq!(registry.present_in(1), vec!["S".to_string()]);

        registry.leave(1, "S");
        assert!(registry.is_present(1, "S"), "one tab is still open");

        registry.leave(1, "S");
        assert!(!registry.is_present(1, "S"));
    }

    #[test]
    fn leave_when_absent_is_a_no_op() {
        let registry = SessionRegistry::new();

        assert!(!registry.leave(3, "S"));
        registry.join(3, "B");
        assert!(!registry.leave(3, "S"));
        assert!(registry.is_present(3, "B"));
    }

    #[test]
    fn rooms_are_independent() {
        let registry = SessionRegistry::new();

        registry.join(1, "S");
        registry.join(2, "S");
        registry.leave(1, "S");

        assert!(!registry.is_present(1, "S"));
        assert!(registry.is_present(2, "S"));
        assert_eq!(registry.active_rooms(), 1);
    }

    #[test]
    fn reconnect_does_not_duplicate_presence() {
        let registry = SessionRegistry::new();

        registry.join(1, "S");
        registry.leave(1, "S");
        registry.join(1, "S");
        registry.leave(1, "S");

        assert!(!registry.is_present(1, "S"));
        assert_eq!(registry.active_rooms(), 0);
    }

    #[test]
    fn registries_share_nothing() {
        let first = SessionRegistry::new();
        let second = SessionRegistry::new();

        first.join(1, "S");
        assert!(!second.is_present(1, "S"));
    }
}

//! Project room membership.
//!
//! Membership is a set of users per project, not a count of connections: two
//! tabs opened by the same user collapse into a single presence entry.

use std::collections::{BTreeMap, HashMap};

use super::protocol::PresenceMember;
use crate::models::{ProjectId, UserId};

#[derive(Debug, Default)]
pub struct PresenceRegistry {
    rooms: HashMap<ProjectId, BTreeMap<UserId, String>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the user was not present before.
    pub fn join(&mut self, project_id: ProjectId, user_id: UserId, username: &str) -> bool {
        self.rooms
            .entry(project_id)
            .or_default()
            .insert(user_id, username.to_string())
            .is_none()
    }

    /// Returns true when the user was present. Empty rooms are pruned.
    pub fn leave(&mut self, project_id: ProjectId, user_id: UserId) -> bool {
        let Some(members) = self.rooms.get_mut(&project_id) else {
            return false;
        };
        let removed = members.remove(&user_id).is_some();
        if members.is_empty() {
            self.rooms.remove(&project_id);
        }
        removed
    }

    pub fn remove_room(&mut self, project_id: ProjectId) {
        self.rooms.remove(&project_id);
    }

    pub fn contains(&self, project_id: ProjectId, user_id: UserId) -> bool {
        self.rooms
            .get(&project_id)
            .is_some_and(|members| members.contains_key(&user_id))
    }

    pub fn members(&self, project_id: ProjectId) -> Vec<PresenceMember> {
        self.rooms
            .get(&project_id)
            .map(|members| {
                members
                    .iter()
                    .map(|(user_id, username)| PresenceMember { user_id: *user_id, username: username.clone() })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn rooms_of(&self, user_id: UserId) -> Vec<ProjectId> {
        self.rooms
            .iter()
            .filter(|(_, members)| members.contains_key(&user_id))
            .map(|(project_id, _)| *project_id)
            .collect()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_is_idempotent() {
        let mut registry = PresenceRegistry::new();
        assert!(registry.join(1, 10, "ann"));
        assert!(!registry.join(1, 10, "ann"));
        assert_eq!(registry.members(1).len(), 1);
    }

    #[test]
    fn test_leave_prunes_empty_rooms() {
        let mut registry = PresenceRegistry::new();
        registry.join(1, 10, "ann");
        assert!(registry.leave(1, 10));
        assert!(!registry.leave(1, 10));
        assert_eq!(registry.room_count(), 0);
        assert!(!registry.leave(99, 10));
    }

    #[test]
    fn test_rooms_of_user() {
        let mut registry = PresenceRegistry::new();
        registry.join(1, 10, "ann");
        registry.join(2, 10, "ann");
        registry.join(2, 11, "bob");

        let mut rooms = registry.rooms_of(10);
        rooms.sort();
        assert_eq!(rooms, vec![1, 2]);
        registry.leave(1, 10);
        assert_eq!(registry.rooms_of(10), vec![2]);
        assert!(registry.contains(2, 11));
    }

    #[test]
    fn test_members_are_ordered_by_user_id() {
        let mut registry = PresenceRegistry::new();
        registry.join(5, 30, "cat");
        registry.join(5, 20, "bob");
        let ids: Vec<UserId> = registry.members(5).iter().map(|m| m.user_id).collect();
        assert_eq!(ids, vec![20, 30]);
    }
}

//! Live connection table, room subscriptions and fan-out.
//!
//! The hub owns all process-wide realtime state behind a single lock so that a
//! join, leave or disconnect updates subscriptions and presence atomically.
//! It never makes authorization decisions; callers check access first.

use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::presence::PresenceRegistry;
use super::protocol::{CollaboratorsUpdate, PresenceMember, ServerEvent};
use crate::models::{ProjectId, UserId};

pub type ConnectionId = Uuid;

pub type EventSender = mpsc::Sender<ServerEvent>;
pub type EventReceiver = mpsc::Receiver<ServerEvent>;

/// Events buffered per connection before it counts as too slow to keep.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

struct ConnectionEntry {
    user_id: UserId,
    username: String,
    sender: EventSender,
    rooms: HashSet<ProjectId>,
    closed: CancellationToken,
}

#[derive(Default)]
struct HubState {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    subscribers: HashMap<ProjectId, HashSet<ConnectionId>>,
    presence: PresenceRegistry,
}

impl HubState {
    fn deliver(&self, connection_id: &ConnectionId, event: ServerEvent) -> bool {
        match self.connections.get(connection_id) {
            Some(entry) => match entry.sender.try_send(event) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    // A reader this far behind is cut off; its socket loop cleans up.
                    if !entry.closed.is_cancelled() {
                        warn!(connection_id = %connection_id, user_id = entry.user_id, "Outbound queue full, closing connection");
                        entry.closed.cancel();
                    }
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(connection_id = %connection_id, "Dropping event for closing connection");
                    false
                }
            },
            None => false,
        }
    }

    fn fan_out(&self, project_id: ProjectId, exclude: Option<ConnectionId>, event: &ServerEvent) -> usize {
        let Some(subscribers) = self.subscribers.get(&project_id) else {
            return 0;
        };

        subscribers
            .iter()
            .filter(|id| Some(**id) != exclude)
            .filter(|id| self.deliver(id, event.clone()))
            .count()
    }

    fn broadcast_presence(&self, project_id: ProjectId) {
        let update = ServerEvent::CollaboratorsUpdate(CollaboratorsUpdate {
            project_id,
            collaborators: self.presence.members(project_id),
        });
        self.fan_out(project_id, None, &update);
    }

    fn unsubscribe(&mut self, connection_id: ConnectionId, project_id: ProjectId) {
        if let Some(subscribers) = self.subscribers.get_mut(&project_id) {
            subscribers.remove(&connection_id);
            if subscribers.is_empty() {
                self.subscribers.remove(&project_id);
            }
        }
        if let Some(entry) = self.connections.get_mut(&connection_id) {
            entry.rooms.remove(&project_id);
        }
    }

    /// Whether any live connection of the user is still subscribed to the room.
    fn user_subscribed(&self, project_id: ProjectId, user_id: UserId) -> bool {
        self.subscribers.get(&project_id).is_some_and(|subscribers| {
            subscribers
                .iter()
                .any(|id| self.connections.get(id).is_some_and(|entry| entry.user_id == user_id))
        })
    }
}

/// Outcome of a successful join.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinOutcome {
    pub newly_present: bool,
    pub members: Vec<PresenceMember>,
}

pub struct Hub {
    state: RwLock<HubState>,
    outbound_capacity: usize,
}

impl Default for Hub {
    fn default() -> Self {
        Self::with_outbound_capacity(DEFAULT_OUTBOUND_CAPACITY)
    }
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outbound_capacity(outbound_capacity: usize) -> Self {
        Self { state: RwLock::new(HubState::default()), outbound_capacity: outbound_capacity.max(1) }
    }

    /// Register an authenticated connection and hand back its outbound queue.
    pub async fn register(&self, user_id: UserId, username: &str) -> (ConnectionId, EventReceiver) {
        let (sender, receiver) = mpsc::channel(self.outbound_capacity);
        let connection_id = Uuid::new_v4();

        let mut state = self.state.write().await;
        state.connections.insert(
            connection_id,
            ConnectionEntry {
                user_id,
                username: username.to_string(),
                sender,
                rooms: HashSet::new(),
                closed: CancellationToken::new(),
            },
        );

        info!(connection_id = %connection_id, user_id, "Connection registered");
        (connection_id, receiver)
    }

    /// Fires when the hub gives up on a connection, e.g. because it stopped reading.
    pub async fn closed_signal(&self, connection_id: ConnectionId) -> Option<CancellationToken> {
        let state = self.state.read().await;
        state.connections.get(&connection_id).map(|entry| entry.closed.clone())
    }

    /// Drop a connection. Its user leaves every room this connection was in,
    /// unless another of the user's connections is still subscribed there.
    pub async fn disconnect(&self, connection_id: ConnectionId) -> Vec<ProjectId> {
        let mut state = self.state.write().await;
        let Some(entry) = state.connections.remove(&connection_id) else {
            return Vec::new();
        };
        entry.closed.cancel();

        for project_id in &entry.rooms {
            if let Some(subscribers) = state.subscribers.get_mut(project_id) {
                subscribers.remove(&connection_id);
                if subscribers.is_empty() {
                    state.subscribers.remove(project_id);
                }
            }
        }

        let mut affected = Vec::new();
        for project_id in &entry.rooms {
            if state.user_subscribed(*project_id, entry.user_id) {
                continue;
            }
            if state.presence.leave(*project_id, entry.user_id) {
                state.broadcast_presence(*project_id);
                affected.push(*project_id);
            }
        }

        info!(
            connection_id = %connection_id,
            user_id = entry.user_id,
            rooms = affected.len(),
            "Connection closed"
        );
        affected
    }

    /// Subscribe the connection to the project room and record the user's presence.
    /// The refreshed member list goes to the whole room, joiner included.
    pub async fn join(&self, connection_id: ConnectionId, project_id: ProjectId) -> Option<JoinOutcome> {
        let mut state = self.state.write().await;
        let (user_id, username) = {
            let entry = state.connections.get_mut(&connection_id)?;
            entry.rooms.insert(project_id);
            (entry.user_id, entry.username.clone())
        };

        state.subscribers.entry(project_id).or_default().insert(connection_id);
        let newly_present = state.presence.join(project_id, user_id, &username);
        state.broadcast_presence(project_id);

        debug!(connection_id = %connection_id, user_id, project_id, newly_present, "Joined project room");
        Some(JoinOutcome { newly_present, members: state.presence.members(project_id) })
    }

    /// Unsubscribe the connection and remove its user from the room. No-op if absent.
    pub async fn leave(&self, connection_id: ConnectionId, project_id: ProjectId) -> bool {
        let mut state = self.state.write().await;
        let Some(user_id) = state.connections.get(&connection_id).map(|entry| entry.user_id) else {
            return false;
        };

        state.unsubscribe(connection_id, project_id);
        let removed = state.presence.leave(project_id, user_id);
        if removed {
            state.broadcast_presence(project_id);
        }

        debug!(connection_id = %connection_id, user_id, project_id, removed, "Left project room");
        removed
    }

    /// Force every connection of `user_id` out of the room, optionally telling the user why.
    pub async fn evict_user(&self, project_id: ProjectId, user_id: UserId, notice: Option<ServerEvent>) -> usize {
        let mut state = self.state.write().await;
        let connections: Vec<ConnectionId> = state
            .connections
            .iter()
            .filter(|(_, entry)| entry.user_id == user_id)
            .map(|(id, _)| *id)
            .collect();

        let mut evicted = 0;
        for connection_id in &connections {
            let subscribed = state
                .subscribers
                .get(&project_id)
                .is_some_and(|subscribers| subscribers.contains(connection_id));
            if subscribed {
                state.unsubscribe(*connection_id, project_id);
                evicted += 1;
            }
            if let Some(event) = &notice {
                state.deliver(connection_id, event.clone());
            }
        }

        if state.presence.leave(project_id, user_id) {
            state.broadcast_presence(project_id);
        }

        info!(user_id, project_id, evicted, "Evicted user from project room");
        evicted
    }

    /// Tear down a room, sending `notice` to every subscribed connection first.
    pub async fn close_room(&self, project_id: ProjectId, notice: ServerEvent) -> usize {
        let mut state = self.state.write().await;
        let notified = state.fan_out(project_id, None, &notice);

        if let Some(subscribers) = state.subscribers.remove(&project_id) {
            for connection_id in subscribers {
                if let Some(entry) = state.connections.get_mut(&connection_id) {
                    entry.rooms.remove(&project_id);
                }
            }
        }
        state.presence.remove_room(project_id);

        info!(project_id, notified, "Closed project room");
        notified
    }

    /// Send `event` to every connection subscribed to the room except `exclude`.
    /// Returns the number of connections the event was queued for.
    pub async fn fan_out(&self, project_id: ProjectId, exclude: Option<ConnectionId>, event: ServerEvent) -> usize {
        let state = self.state.read().await;
        state.fan_out(project_id, exclude, &event)
    }

    pub async fn send_to_connection(&self, connection_id: ConnectionId, event: ServerEvent) -> bool {
        let state = self.state.read().await;
        state.deliver(&connection_id, event)
    }

    /// Push an event to every live connection of a user, regardless of rooms.
    pub async fn send_to_user(&self, user_id: UserId, event: ServerEvent) -> usize {
        let state = self.state.read().await;
        state
            .connections
            .iter()
            .filter(|(_, entry)| entry.user_id == user_id)
            .filter(|(id, _)| state.deliver(id, event.clone()))
            .count()
    }

    /// Re-send the member list to the room.
    pub async fn broadcast_presence(&self, project_id: ProjectId) {
        let state = self.state.read().await;
        state.broadcast_presence(project_id);
    }

    pub async fn members(&self, project_id: ProjectId) -> Vec<PresenceMember> {
        self.state.read().await.presence.members(project_id)
    }

    pub async fn is_present(&self, project_id: ProjectId, user_id: UserId) -> bool {
        self.state.read().await.presence.contains(project_id, user_id)
    }

    pub async fn is_subscribed(&self, connection_id: ConnectionId, project_id: ProjectId) -> bool {
        self.state
            .read()
            .await
            .subscribers
            .get(&project_id)
            .is_some_and(|subscribers| subscribers.contains(&connection_id))
    }

    pub async fn rooms_of_user(&self, user_id: UserId) -> Vec<ProjectId> {
        self.state.read().await.presence.rooms_of(user_id)
    }

    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::protocol::ErrorPayload;

    fn drain(receiver: &mut EventReceiver) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_join_broadcasts_members_to_whole_room() {
        let hub = Hub::new();
        let (ann, mut ann_rx) = hub.register(1, "ann").await;
        let (bob, mut bob_rx) = hub.register(2, "bob").await;

        hub.join(ann, 7).await.unwrap();
        drain(&mut ann_rx);

        let outcome = hub.join(bob, 7).await.unwrap();
        assert!(outcome.newly_present);
        assert_eq!(outcome.members.len(), 2);

        for rx in [&mut ann_rx, &mut bob_rx] {
            let events = drain(rx);
            assert_eq!(events.len(), 1);
            assert!(matches!(&events[0], ServerEvent::CollaboratorsUpdate(u) if u.collaborators.len() == 2));
        }
    }

    #[tokio::test]
    async fn test_two_tabs_collapse_to_one_member() {
        let hub = Hub::new();
        let (tab1, _rx1) = hub.register(1, "ann").await;
        let (tab2, _rx2) = hub.register(1, "ann").await;

        hub.join(tab1, 7).await.unwrap();
        let outcome = hub.join(tab2, 7).await.unwrap();
        assert!(!outcome.newly_present);
        assert_eq!(hub.members(7).await.len(), 1);
        assert!(hub.is_subscribed(tab1, 7).await);
        assert!(hub.is_subscribed(tab2, 7).await);
    }

    #[tokio::test]
    async fn test_fan_out_excludes_sender() {
        let hub = Hub::new();
        let (ann, mut ann_rx) = hub.register(1, "ann").await;
        let (bob, mut bob_rx) = hub.register(2, "bob").await;
        let (_outsider, mut outsider_rx) = hub.register(3, "cat").await;
        hub.join(ann, 7).await.unwrap();
        hub.join(bob, 7).await.unwrap();
        drain(&mut ann_rx);
        drain(&mut bob_rx);

        let delivered = hub.fan_out(7, Some(ann), ServerEvent::error("ping")).await;
        assert_eq!(delivered, 1);
        assert!(drain(&mut ann_rx).is_empty());
        assert_eq!(drain(&mut bob_rx), vec![ServerEvent::Error(ErrorPayload { message: "ping".into() })]);
        assert!(drain(&mut outsider_rx).is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_clears_presence_everywhere() {
        let hub = Hub::new();
        let (ann, _ann_rx) = hub.register(1, "ann").await;
        let (bob, mut bob_rx) = hub.register(2, "bob").await;
        hub.join(ann, 7).await.unwrap();
        hub.join(ann, 8).await.unwrap();
        hub.join(bob, 7).await.unwrap();
        drain(&mut bob_rx);

        let mut affected = hub.disconnect(ann).await;
        affected.sort();
        assert_eq!(affected, vec![7, 8]);
        assert!(hub.rooms_of_user(1).await.is_empty());
        assert_eq!(hub.connection_count().await, 1);

        let events = drain(&mut bob_rx);
        assert!(matches!(&events[..], [ServerEvent::CollaboratorsUpdate(u)] if u.collaborators.len() == 1));
        assert!(hub.disconnect(ann).await.is_empty());
    }

    #[tokio::test]
    async fn test_closing_one_tab_keeps_the_other_present() {
        let hub = Hub::new();
        let (tab1, _rx1) = hub.register(1, "ann").await;
        let (tab2, _rx2) = hub.register(1, "ann").await;
        let (lobby, _rx3) = hub.register(1, "ann").await;
        hub.join(tab1, 7).await.unwrap();
        hub.join(tab2, 7).await.unwrap();

        // a tab that never joined anything leaves presence untouched
        assert!(hub.disconnect(lobby).await.is_empty());
        assert!(hub.is_present(7, 1).await);

        assert!(hub.disconnect(tab1).await.is_empty());
        assert!(hub.is_present(7, 1).await);

        assert_eq!(hub.disconnect(tab2).await, vec![7]);
        assert!(!hub.is_present(7, 1).await);
    }

    #[tokio::test]
    async fn test_slow_reader_is_cut_off() {
        let hub = Hub::with_outbound_capacity(2);
        let (ann, mut ann_rx) = hub.register(1, "ann").await;
        let (bob, _bob_rx) = hub.register(2, "bob").await;
        let closed = hub.closed_signal(ann).await.unwrap();
        hub.join(ann, 7).await.unwrap();
        hub.join(bob, 7).await.unwrap();
        assert!(!closed.is_cancelled());

        // ann's queue now holds two member lists and is never read
        assert_eq!(hub.fan_out(7, Some(bob), ServerEvent::error("one too many")).await, 0);
        assert!(closed.is_cancelled());
        assert_eq!(drain(&mut ann_rx).len(), 2);

        hub.disconnect(ann).await;
        assert!(hub.closed_signal(ann).await.is_none());
    }

    #[tokio::test]
    async fn test_leave_is_noop_when_absent() {
        let hub = Hub::new();
        let (ann, mut ann_rx) = hub.register(1, "ann").await;
        assert!(!hub.leave(ann, 7).await);
        assert!(drain(&mut ann_rx).is_empty());
    }

    #[tokio::test]
    async fn test_evict_user_notifies_and_unsubscribes() {
        let hub = Hub::new();
        let (ann, mut ann_rx) = hub.register(1, "ann").await;
        let (bob, mut bob_rx) = hub.register(2, "bob").await;
        hub.join(ann, 7).await.unwrap();
        hub.join(bob, 7).await.unwrap();
        drain(&mut ann_rx);
        drain(&mut bob_rx);

        let evicted = hub.evict_user(7, 2, Some(ServerEvent::error("bye"))).await;
        assert_eq!(evicted, 1);
        assert!(!hub.is_subscribed(bob, 7).await);
        assert!(!hub.is_present(7, 2).await);

        assert_eq!(drain(&mut bob_rx), vec![ServerEvent::error("bye")]);
        let ann_events = drain(&mut ann_rx);
        assert!(matches!(&ann_events[..], [ServerEvent::CollaboratorsUpdate(u)] if u.collaborators.len() == 1));
    }

    #[tokio::test]
    async fn test_close_room_removes_everyone() {
        let hub = Hub::new();
        let (ann, mut ann_rx) = hub.register(1, "ann").await;
        hub.join(ann, 7).await.unwrap();
        drain(&mut ann_rx);

        assert_eq!(hub.close_room(7, ServerEvent::error("gone")).await, 1);
        assert!(hub.members(7).await.is_empty());
        assert!(!hub.is_subscribed(ann, 7).await);
        assert_eq!(hub.fan_out(7, None, ServerEvent::error("late")).await, 0);
    }

    #[tokio::test]
    async fn test_send_to_user_reaches_all_tabs() {
        let hub = Hub::new();
        let (_tab1, mut rx1) = hub.register(1, "ann").await;
        let (_tab2, mut rx2) = hub.register(1, "ann").await;
        let (_bob, mut bob_rx) = hub.register(2, "bob").await;

        assert_eq!(hub.send_to_user(1, ServerEvent::error("hi")).await, 2);
        assert_eq!(drain(&mut rx1).len(), 1);
        assert_eq!(drain(&mut rx2).len(), 1);
        assert!(drain(&mut bob_rx).is_empty());
    }
}

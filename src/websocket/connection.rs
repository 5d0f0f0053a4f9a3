use std::collections::HashSet;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::types::WsMessage;

pub type WsSender = mpsc::UnboundedSender<WsMessage>;
pub type ConnectionId = Uuid;

struct Connection {
    user_id: Uuid,
    sender: WsSender,
    rooms: HashSet<Uuid>,
}

/// Registry of live sockets and the conversation rooms they joined.
///
/// No method holds a guard on one map while touching another.
#[derive(Clone, Default)]
pub struct ConnectionManager {
    connections: Arc<DashMap<ConnectionId, Connection>>,
    users: Arc<DashMap<Uuid, HashSet<ConnectionId>>>,
    rooms: Arc<DashMap<Uuid, HashSet<ConnectionId>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a socket for `user_id`. The flag is `true` for the user's first
    /// live connection.
    pub fn register(&self, user_id: Uuid, sender: WsSender) -> (ConnectionId, bool) {
        let connection_id = Uuid::new_v4();
        self.connections.insert(
            connection_id,
            Connection {
                user_id,
                sender,
                rooms: HashSet::new(),
            },
        );

        let mut sockets = self.users.entry(user_id).or_default();
        sockets.insert(connection_id);
        let first = sockets.len() == 1;

        tracing::info!("Connection {} registered for user {}", connection_id, user_id);
        (connection_id, first)
    }

    /// Drops the socket and its room memberships. Returns the owner and whether
    /// it was their last live connection.
    pub fn unregister(&self, connection_id: ConnectionId) -> Option<(Uuid, bool)> {
        let (_, connection) = self.connections.remove(&connection_id)?;

        for room in &connection.rooms {
            self.detach(*room, connection_id);
        }

        // Deciding `last` and dropping the entry happen under one shard lock, so a
        // concurrent `register` either sees the entry gone or keeps it alive.
        let last = match self.users.entry(connection.user_id) {
            Entry::Occupied(mut sockets) => {
                sockets.get_mut().remove(&connection_id);
                if sockets.get().is_empty() {
                    sockets.remove();
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(_) => true,
        };

        tracing::info!("Connection {} closed for user {}", connection_id, connection.user_id);
        Some((connection.user_id, last))
    }

    pub fn join_room(&self, connection_id: ConnectionId, conversation_id: Uuid) -> bool {
        match self.connections.get_mut(&connection_id) {
            Some(mut connection) => {
                connection.rooms.insert(conversation_id);
            }
            None => return false,
        }
        self.rooms.entry(conversation_id).or_default().insert(connection_id);
        true
    }

    pub fn leave_room(&self, connection_id: ConnectionId, conversation_id: Uuid) {
        if let Some(mut connection) = self.connections.get_mut(&connection_id) {
            connection.rooms.remove(&conversation_id);
        }
        self.detach(conversation_id, connection_id);
    }

    fn detach(&self, conversation_id: Uuid, connection_id: ConnectionId) {
        if let Some(mut members) = self.rooms.get_mut(&conversation_id) {
            members.remove(&connection_id);
        }
        self.rooms.remove_if(&conversation_id, |_, members| members.is_empty());
    }

    #[cfg(test)]
    pub fn is_in_room(&self, connection_id: ConnectionId, conversation_id: Uuid) -> bool {
        self.rooms
            .get(&conversation_id)
            .map(|members| members.contains(&connection_id))
            .unwrap_or(false)
    }

    #[cfg(test)]
    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.users.contains_key(&user_id)
    }

    pub fn send_to_connection(&self, connection_id: ConnectionId, message: WsMessage) {
        if let Some(connection) = self.connections.get(&connection_id) {
            let _ = connection.sender.send(message);
        }
    }

    pub fn send_to_user(&self, user_id: &Uuid, message: WsMessage) {
        let sockets: Vec<ConnectionId> = self
            .users
            .get(user_id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();

        for connection_id in sockets {
            self.send_to_connection(connection_id, message.clone());
        }
    }

    pub fn send_to_users(&self, user_ids: &[Uuid], message: WsMessage) {
        for user_id in user_ids {
            self.send_to_user(user_id, message.clone());
        }
    }

    /// Fans `message` out to every socket in the room, skipping all sockets of
    /// `exclude` when given.
    pub fn broadcast_room(&self, conversation_id: Uuid, message: WsMessage, exclude: Option<Uuid>) {
        let members: Vec<ConnectionId> = self
            .rooms
            .get(&conversation_id)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default();

        for connection_id in members {
            if let Some(connection) = self.connections.get(&connection_id) {
                if Some(connection.user_id) == exclude {
                    continue;
                }
                let _ = connection.sender.send(message.clone());
            }
        }
    }

    /// Detaches every socket of `user_id` from the room.
    pub fn evict_user_from_room(&self, user_id: Uuid, conversation_id: Uuid) {
        let sockets: Vec<ConnectionId> = self
            .users
            .get(&user_id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();

        for connection_id in sockets {
            self.leave_room(connection_id, conversation_id);
        }
    }

    pub fn close_room(&self, conversation_id: Uuid) {
        let Some((_, members)) = self.rooms.remove(&conversation_id) else {
            return;
        };
        for connection_id in members {
            if let Some(mut connection) = self.connections.get_mut(&connection_id) {
                connection.rooms.remove(&conversation_id);
            }
        }
    }

    pub fn room_size(&self, conversation_id: Uuid) -> usize {
        self.rooms.get(&conversation_id).map(|m| m.len()).unwrap_or(0)
    }
}

//! Connection registry: authenticated identity → live outbound channel.
//!
//! Each connection owns a bounded queue of `ServerNotification`s drained by
//! its transport writer. Delivery never blocks the coordinator: a full queue
//! drops the notification with a warning.

use std::collections::BTreeMap;

use kingside_wire::{Identity, ServerNotification, UserId};
use tokio::sync::mpsc::{self, error::TrySendError};

/// Server-assigned id of one transport connection.
pub type ConnectionId = u64;

/// Outbound notification queue of one connection.
pub type Outbox = mpsc::Sender<ServerNotification>;

struct Connection {
    id: ConnectionId,
    identity: Identity,
    outbox: Outbox,
}

/// Result of registering a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    New,
    /// The identity was already connected; the old connection was told it
    /// is superseded and its mapping dropped.
    Replaced { previous: ConnectionId },
}

/// Emitted when a live mapping is removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveEvent {
    pub identity: Identity,
    pub connection_id: ConnectionId,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    connections: BTreeMap<UserId, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `identity` to a connection, replacing any previous one.
    pub fn register(
        &mut self,
        identity: Identity,
        connection_id: ConnectionId,
        outbox: Outbox,
    ) -> Registration {
        let user_id = identity.user_id.clone();
        let connection = Connection {
            id: connection_id,
            identity,
            outbox,
        };

        match self.connections.insert(user_id.clone(), connection) {
            None => {
                tracing::debug!(%user_id, connection_id, "connection registered");
                Registration::New
            }
            Some(old) => {
                tracing::info!(
                    %user_id,
                    previous = old.id,
                    connection_id,
                    "connection superseded"
                );
                deliver(&old, ServerNotification::superseded());
                Registration::Replaced { previous: old.id }
            }
        }
    }

    /// Remove the mapping for `user_id` if it still points at `connection_id`.
    ///
    /// A disconnect from a connection that was already superseded is stale
    /// and yields nothing.
    pub fn unregister(
        &mut self,
        user_id: &UserId,
        connection_id: ConnectionId,
    ) -> Option<LeaveEvent> {
        if !self.is_current(user_id, connection_id) {
            tracing::debug!(%user_id, connection_id, "stale disconnect ignored");
            return None;
        }
        let connection = self.connections.remove(user_id)?;
        tracing::debug!(%user_id, connection_id, "connection unregistered");
        Some(LeaveEvent {
            identity: connection.identity,
            connection_id: connection.id,
        })
    }

    /// Whether `connection_id` is the live connection of `user_id`.
    pub fn is_current(&self, user_id: &UserId, connection_id: ConnectionId) -> bool {
        self.connections
            .get(user_id)
            .is_some_and(|c| c.id == connection_id)
    }

    pub fn identity(&self, user_id: &UserId) -> Option<&Identity> {
        self.connections.get(user_id).map(|c| &c.identity)
    }

    /// Send to every registered connection. Returns how many accepted it.
    pub fn broadcast(&self, notification: &ServerNotification) -> usize {
        self.connections
            .values()
            .filter(|c| deliver(c, notification.clone()))
            .count()
    }

    /// Send to one identity.
    pub fn send_to(&self, user_id: &UserId, notification: ServerNotification) -> bool {
        match self.connections.get(user_id) {
            Some(connection) => deliver(connection, notification),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

fn deliver(connection: &Connection, notification: ServerNotification) -> bool {
    let kind = notification.kind_name();
    match connection.outbox.try_send(notification) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            tracing::warn!(
                user_id = %connection.identity.user_id,
                connection_id = connection.id,
                kind,
                "outbound queue full, notification dropped"
            );
            false
        }
        Err(TrySendError::Closed(_)) => {
            tracing::debug!(
                user_id = %connection.identity.user_id,
                connection_id = connection.id,
                kind,
                "outbound queue closed"
            );
            false
        }
    }
}

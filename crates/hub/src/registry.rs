// Connection registry: the authoritative map of live websocket
// connections and room membership. Each connection owns an unbounded
// outbound channel drained by its own socket task, so fan-out to a room
// never blocks on a slow peer.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use strata_common::protocol::ws::ServerEvent;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Control messages pushed to a connection's socket task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Event(ServerEvent),
    /// Instructs the socket task to send a close frame and tear down.
    Close { reason: &'static str },
}

#[derive(Debug, Clone)]
struct ConnectionRecord {
    conn_id: Uuid,
    room_id: String,
    outbound: mpsc::UnboundedSender<Outbound>,
    connected_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    connections: HashMap<Uuid, ConnectionRecord>,
    rooms: HashMap<String, HashSet<Uuid>>,
}

/// A prior connection displaced by a reconnect, with the room it was in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplacedConnection {
    pub conn_id: Uuid,
    pub room_id: String,
}

/// Outcome of pushing a forced close to a user's connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForceCloseOutcome {
    /// The close control was delivered to the socket task.
    Signaled,
    /// The socket task's channel is gone; the caller must tear down.
    ChannelClosed { room_id: String, conn_id: Uuid },
    NotConnected,
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl ConnectionRegistry {
    /// Install a connection for a user, joining them to the room.
    ///
    /// A user holds at most one connection. If a prior connection is
    /// still registered it is told to close with reason `replaced` before
    /// the new record takes its place, and the displaced record is
    /// returned so the caller can clean up its room state.
    pub async fn register(
        &self,
        user_id: Uuid,
        room_id: &str,
        conn_id: Uuid,
        outbound: mpsc::UnboundedSender<Outbound>,
    ) -> Option<DisplacedConnection> {
        let mut guard = self.inner.write().await;

        let previous = guard.connections.insert(
            user_id,
            ConnectionRecord {
                conn_id,
                room_id: room_id.to_string(),
                outbound,
                connected_at: Utc::now(),
            },
        );

        let displaced = previous.map(|record| {
            if record.room_id != room_id {
                remove_from_room(&mut guard.rooms, &record.room_id, user_id);
            }
            let _ = record.outbound.send(Outbound::Close { reason: "replaced" });
            DisplacedConnection { conn_id: record.conn_id, room_id: record.room_id }
        });

        guard.rooms.entry(room_id.to_string()).or_default().insert(user_id);
        displaced
    }

    /// Remove a connection, returning the room it left.
    ///
    /// Guarded by `conn_id`: a stale teardown from a replaced connection
    /// cannot remove its successor's record.
    pub async fn remove(&self, user_id: Uuid, conn_id: Uuid) -> Option<String> {
        let mut guard = self.inner.write().await;

        match guard.connections.get(&user_id) {
            Some(record) if record.conn_id == conn_id => {}
            _ => return None,
        }

        let record = guard.connections.remove(&user_id)?;
        remove_from_room(&mut guard.rooms, &record.room_id, user_id);
        Some(record.room_id)
    }

    /// Push an event to every member of a room, optionally excluding one
    /// user. Senders are collected under the read lock and the pushes
    /// happen outside it. Returns the number of channels reached.
    pub async fn broadcast(
        &self,
        room_id: &str,
        event: ServerEvent,
        exclude: Option<Uuid>,
    ) -> usize {
        let mut recipients = Vec::new();
        {
            let guard = self.inner.read().await;
            if let Some(members) = guard.rooms.get(room_id) {
                for user_id in members {
                    if Some(*user_id) == exclude {
                        continue;
                    }
                    if let Some(record) = guard.connections.get(user_id) {
                        recipients.push(record.outbound.clone());
                    }
                }
            }
        }

        let mut sent_count = 0;
        for recipient in recipients {
            if recipient.send(Outbound::Event(event.clone())).is_ok() {
                sent_count += 1;
            }
        }

        sent_count
    }

    /// Push an event to a single user's connection.
    pub async fn send_to(&self, user_id: Uuid, event: ServerEvent) -> bool {
        let sender = {
            let guard = self.inner.read().await;
            guard.connections.get(&user_id).map(|record| record.outbound.clone())
        };

        match sender {
            Some(sender) => sender.send(Outbound::Event(event)).is_ok(),
            None => false,
        }
    }

    /// Tell a user's socket task to close the transport.
    pub async fn force_close(&self, user_id: Uuid, reason: &'static str) -> ForceCloseOutcome {
        let target = {
            let guard = self.inner.read().await;
            guard.connections.get(&user_id).map(|record| {
                (record.outbound.clone(), record.room_id.clone(), record.conn_id)
            })
        };

        match target {
            Some((sender, room_id, conn_id)) => {
                if sender.send(Outbound::Close { reason }).is_ok() {
                    ForceCloseOutcome::Signaled
                } else {
                    ForceCloseOutcome::ChannelClosed { room_id, conn_id }
                }
            }
            None => ForceCloseOutcome::NotConnected,
        }
    }

    /// Current members of a room, sorted for stable output.
    pub async fn room_members(&self, room_id: &str) -> Vec<Uuid> {
        let guard = self.inner.read().await;
        let mut members: Vec<Uuid> = guard
            .rooms
            .get(room_id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    pub async fn room_count(&self) -> usize {
        self.inner.read().await.rooms.len()
    }

    pub async fn connected_since(&self, user_id: Uuid) -> Option<DateTime<Utc>> {
        self.inner.read().await.connections.get(&user_id).map(|record| record.connected_at)
    }
}

fn remove_from_room(rooms: &mut HashMap<String, HashSet<Uuid>>, room_id: &str, user_id: Uuid) {
    if let Some(members) = rooms.get_mut(room_id) {
        members.remove(&user_id);
        if members.is_empty() {
            rooms.remove(room_id);
        }
    }
}

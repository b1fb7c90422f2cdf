use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use lobby_types::events::ServerEvent;
use lobby_types::models::Identity;

pub type ConnectionId = Uuid;

/// A serialized event, shared by every recipient of one fan-out.
pub type Outbound = Arc<str>;

/// Default capacity of each connection's outbound queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Tracks live connections and the rooms they have joined, and fans events
/// out to room members.
///
/// Each connection owns a bounded outbound queue. Delivery never waits on a
/// queue: a full or closed queue drops that one event for that one
/// connection and every other member still receives it.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    state: RwLock<RegistryState>,
    queue_capacity: usize,
}

#[derive(Default)]
struct RegistryState {
    /// connection_id -> peer (identity, queue, joined rooms)
    connections: HashMap<ConnectionId, Peer>,

    /// channel_id -> member connections
    rooms: HashMap<String, HashSet<ConnectionId>>,
}

struct Peer {
    identity: Identity,
    tx: mpsc::Sender<Outbound>,
    rooms: HashSet<String>,
}

impl Registry {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                state: RwLock::new(RegistryState::default()),
                queue_capacity: queue_capacity.max(1),
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.inner.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.inner.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit a connection. Returns its id and the receiving end of its queue.
    pub fn register(&self, identity: Identity) -> (ConnectionId, mpsc::Receiver<Outbound>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.inner.queue_capacity);
        self.write().connections.insert(
            conn_id,
            Peer {
                identity,
                tx,
                rooms: HashSet::new(),
            },
        );
        (conn_id, rx)
    }

    /// Send an event to one connection only.
    pub fn send_to(&self, conn_id: ConnectionId, event: &ServerEvent) -> bool {
        let Some(payload) = encode(event) else {
            return false;
        };
        let state = self.read();
        match state.connections.get(&conn_id) {
            Some(peer) => deliver(conn_id, peer, payload),
            None => false,
        }
    }

    /// Add a connection to a room.
    ///
    /// The joiner always gets `channel:joined`; other members get
    /// `user:joined` only when the connection was not already a member.
    /// Returns whether membership changed.
    pub fn join(&self, conn_id: ConnectionId, channel_id: &str) -> bool {
        let now = Utc::now();
        let mut state = self.write();
        let RegistryState { connections, rooms } = &mut *state;

        let Some(peer) = connections.get_mut(&conn_id) else {
            return false;
        };
        let newly_joined = peer.rooms.insert(channel_id.to_string());
        let identity = peer.identity.clone();

        if newly_joined {
            rooms.entry(channel_id.to_string()).or_default().insert(conn_id);
            info!(
                "{} ({}) joined {} [conn={}]",
                identity.user_name, identity.user_id, channel_id, conn_id
            );
            fan_out(
                connections,
                rooms,
                channel_id,
                &ServerEvent::UserJoined {
                    channel_id: channel_id.to_string(),
                    user_id: identity.user_id,
                    user_name: identity.user_name,
                    timestamp: now,
                },
                Some(conn_id),
            );
        }

        if let (Some(peer), Some(payload)) = (
            connections.get(&conn_id),
            encode(&ServerEvent::ChannelJoined {
                channel_id: channel_id.to_string(),
                timestamp: now,
            }),
        ) {
            deliver(conn_id, peer, payload);
        }

        newly_joined
    }

    /// Remove a connection from a room. The leaver gets `channel:left`;
    /// remaining members get `user:left`. Leaving a room not joined sends
    /// nothing. Returns whether it was a member.
    pub fn leave(&self, conn_id: ConnectionId, channel_id: &str) -> bool {
        let now = Utc::now();
        let mut state = self.write();
        let RegistryState { connections, rooms } = &mut *state;

        let Some(peer) = connections.get_mut(&conn_id) else {
            return false;
        };
        if !peer.rooms.remove(channel_id) {
            return false;
        }
        let user_id = peer.identity.user_id.clone();

        remove_member(rooms, channel_id, conn_id);
        info!("{} left {} [conn={}]", user_id, channel_id, conn_id);
        fan_out(
            connections,
            rooms,
            channel_id,
            &ServerEvent::UserLeft {
                channel_id: channel_id.to_string(),
                user_id,
                timestamp: now,
            },
            None,
        );

        if let (Some(peer), Some(payload)) = (
            connections.get(&conn_id),
            encode(&ServerEvent::ChannelLeft {
                channel_id: channel_id.to_string(),
                timestamp: now,
            }),
        ) {
            deliver(conn_id, peer, payload);
        }

        true
    }

    /// Drop a connection and leave every room it was in, announcing
    /// `user:left` to each room's remaining members. Returns those rooms.
    pub fn disconnect(&self, conn_id: ConnectionId) -> Vec<String> {
        let now = Utc::now();
        let mut state = self.write();
        let RegistryState { connections, rooms } = &mut *state;

        let Some(peer) = connections.remove(&conn_id) else {
            return Vec::new();
        };

        let mut left: Vec<String> = peer.rooms.into_iter().collect();
        left.sort();
        for channel_id in &left {
            remove_member(rooms, channel_id, conn_id);
            fan_out(
                connections,
                rooms,
                channel_id,
                &ServerEvent::UserLeft {
                    channel_id: channel_id.clone(),
                    user_id: peer.identity.user_id.clone(),
                    timestamp: now,
                },
                None,
            );
        }

        debug!(
            "Connection {} for {} removed from {} rooms",
            conn_id,
            peer.identity.user_id,
            left.len()
        );
        left
    }

    /// Deliver `event` to every connection in `channel_id`, optionally
    /// skipping one. Returns how many queues accepted it.
    pub fn broadcast(&self, channel_id: &str, event: &ServerEvent, except: Option<ConnectionId>) -> usize {
        let state = self.read();
        fan_out(&state.connections, &state.rooms, channel_id, event, except)
    }

    pub fn members(&self, channel_id: &str) -> Vec<ConnectionId> {
        self.read()
            .rooms
            .get(channel_id)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn rooms_of(&self, conn_id: ConnectionId) -> Vec<String> {
        self.read()
            .connections
            .get(&conn_id)
            .map(|p| p.rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_member(&self, conn_id: ConnectionId, channel_id: &str) -> bool {
        self.read()
            .connections
            .get(&conn_id)
            .is_some_and(|p| p.rooms.contains(channel_id))
    }

    pub fn connection_count(&self) -> usize {
        self.read().connections.len()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

fn encode(event: &ServerEvent) -> Option<Outbound> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            error!("Failed to serialize event: {}", e);
            None
        }
    }
}

fn fan_out(
    connections: &HashMap<ConnectionId, Peer>,
    rooms: &HashMap<String, HashSet<ConnectionId>>,
    channel_id: &str,
    event: &ServerEvent,
    except: Option<ConnectionId>,
) -> usize {
    let Some(members) = rooms.get(channel_id) else {
        return 0;
    };
    let Some(payload) = encode(event) else {
        return 0;
    };

    let mut delivered = 0;
    for &conn_id in members {
        if Some(conn_id) == except {
            continue;
        }
        if let Some(peer) = connections.get(&conn_id) {
            if deliver(conn_id, peer, payload.clone()) {
                delivered += 1;
            }
        }
    }
    delivered
}

fn deliver(conn_id: ConnectionId, peer: &Peer, payload: Outbound) -> bool {
    match peer.tx.try_send(payload) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!(
                "Outbound queue full for {} [conn={}], dropping event",
                peer.identity.user_id, conn_id
            );
            false
        }
        Err(TrySendError::Closed(_)) => {
            debug!("Outbound queue closed [conn={}]", conn_id);
            false
        }
    }
}

fn remove_member(rooms: &mut HashMap<String, HashSet<ConnectionId>>, channel_id: &str, conn_id: ConnectionId) {
    if let Some(members) = rooms.get_mut(channel_id) {
        members.remove(&conn_id);
        if members.is_empty() {
            rooms.remove(channel_id);
        }
    }
}

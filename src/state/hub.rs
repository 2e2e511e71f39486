//! Connection registry and message router
//!
//! The hub owns the live set of display connections, the active content
//! pointer and the last published timer state behind a single lock. Nothing in
//! here awaits: every send is a `try_send`, and a connection whose queue is
//! full or closed is evicted on the spot.
//!
//! Any change to the live set republishes the roster inside the same critical
//! section, so the last `client_list` a display receives matches the set as it
//! stands.

use crate::protocol::{ServerMessage, SetResult};
use crate::types::*;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A serialized frame, shared between all recipients of a broadcast
pub type Outbound = Arc<str>;

pub const REJECTION_MESSAGE: &str = "Server connection limit reached";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    #[error("connection limit of {max} reached")]
    CapacityReached { max: usize },

    #[error("connection closed before registration")]
    Closed,
}

/// A not-yet-registered connection: its identity and the sending half of its queue
#[derive(Debug)]
pub struct Connection {
    pub id: ConnId,
    pub addr: String,
    tx: mpsc::Sender<Outbound>,
}

impl Connection {
    /// Create a connection with a fresh id and a bounded outbound queue
    pub fn open(addr: impl Into<String>, queue_depth: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let conn = Self {
            id: ulid::Ulid::new().to_string(),
            addr: addr.into(),
            tx,
        };
        (conn, rx)
    }
}

struct Member {
    tx: mpsc::Sender<Outbound>,
    addr: String,
    identity: String,
    name: String,
    display_mode: String,
    connected_at: DateTime<Utc>,
}

impl Member {
    fn roster_entry(&self, conn_id: &ConnId) -> RosterEntry {
        RosterEntry {
            id: self.identity.clone(),
            conn_id: conn_id.clone(),
            name: if self.name.is_empty() {
                UNKNOWN_NAME.to_string()
            } else {
                self.name.clone()
            },
            addr: self.addr.clone(),
            display_mode: self.display_mode.clone(),
            connected_at: self.connected_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

/// Members removed under the lock; their queues close when this is dropped
type Evicted = Vec<(ConnId, Member)>;

#[derive(Default)]
struct Registry {
    members: HashMap<ConnId, Member>,
    active_content: String,
    timer: TimerState,
}

impl Registry {
    fn roster(&self) -> Vec<RosterEntry> {
        let mut roster: Vec<_> = self
            .members
            .iter()
            .map(|(id, member)| member.roster_entry(id))
            .collect();
        RosterEntry::sort(&mut roster);
        roster
    }

    fn send_all(&mut self, json: &Outbound, evicted: &mut Evicted) -> usize {
        let mut failed = Vec::new();
        let mut delivered = 0;
        for (id, member) in self.members.iter() {
            if member.tx.try_send(json.clone()).is_ok() {
                delivered += 1;
            } else {
                failed.push(id.clone());
            }
        }
        for id in failed {
            if let Some(member) = self.members.remove(&id) {
                evicted.push((id, member));
            }
        }
        delivered
    }

    /// Queue `json` for every member; if that evicts anyone the roster follows
    fn fan_out(&mut self, json: &Outbound, evicted: &mut Evicted) -> usize {
        let before = evicted.len();
        let delivered = self.send_all(json, evicted);
        if evicted.len() > before {
            self.publish_roster(evicted);
        }
        delivered
    }

    /// Repeats until a roster goes out without evicting anyone
    fn publish_roster(&mut self, evicted: &mut Evicted) {
        loop {
            let Some(json) = encode(&ServerMessage::ClientList(self.roster())) else {
                return;
            };
            let before = evicted.len();
            self.send_all(&json, evicted);
            if evicted.len() == before {
                return;
            }
        }
    }

    fn send_one(&mut self, id: &str, json: Outbound, evicted: &mut Evicted) -> bool {
        let Some(member) = self.members.get(id) else {
            return false;
        };
        if member.tx.try_send(json).is_ok() {
            return true;
        }
        if let Some(member) = self.members.remove(id) {
            evicted.push((id.to_string(), member));
        }
        self.publish_roster(evicted);
        false
    }
}

fn encode<T: Serialize + ?Sized>(msg: &T) -> Option<Outbound> {
    match serde_json::to_string(msg) {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            tracing::error!("Failed to serialize outbound message: {}", e);
            None
        }
    }
}

/// Called once the lock is released
fn log_evictions(evicted: Evicted) {
    for (id, member) in evicted {
        tracing::warn!("Evicting slow client {} ({})", member.addr, id);
    }
}

pub struct Hub {
    registry: Mutex<Registry>,
    max_clients: usize,
}

impl Hub {
    /// `max_clients == 0` disables the limit
    pub fn new(max_clients: usize) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            max_clients,
        }
    }

    /// Add a connection to the live set.
    ///
    /// Before the connection becomes visible to broadcasts its queue receives
    /// the last published timer state, the active content (if any) and its
    /// display mode, in that order. Over capacity the connection gets a single
    /// `error` message and its queue is closed.
    pub fn register(&self, conn: Connection) -> Result<ConnId, HubError> {
        let Connection { id, addr, tx } = conn;
        let mut evicted = Vec::new();

        {
            let mut registry = self.registry.lock();

            if self.max_clients > 0 && registry.members.len() >= self.max_clients {
                drop(registry);
                tracing::warn!("Client rejected (limit reached): {}", addr);
                if let Some(json) = encode(&ServerMessage::Error(REJECTION_MESSAGE.to_string())) {
                    let _ = tx.try_send(json);
                }
                // dropping tx closes the queue; the writer flushes the error and hangs up
                return Err(HubError::CapacityReached {
                    max: self.max_clients,
                });
            }

            let mut initial = vec![ServerMessage::TimerUpdate(registry.timer.clone())];
            if !registry.active_content.is_empty() {
                initial.push(ServerMessage::SetResult(SetResult {
                    file: registry.active_content.clone(),
                }));
            }
            initial.push(ServerMessage::DisplayMode(SHOW_RESULT.to_string()));

            for msg in &initial {
                if let Some(json) = encode(msg) {
                    if tx.try_send(json).is_err() {
                        return Err(HubError::Closed);
                    }
                }
            }

            registry.members.insert(
                id.clone(),
                Member {
                    tx,
                    addr: addr.clone(),
                    identity: String::new(),
                    name: String::new(),
                    display_mode: SHOW_RESULT.to_string(),
                    connected_at: Utc::now(),
                },
            );
            registry.publish_roster(&mut evicted);
        }

        tracing::info!("Client connected: {} ({})", addr, id);
        log_evictions(evicted);
        Ok(id)
    }

    /// Remove a connection and close its queue.
    ///
    /// Safe to call any number of times from any number of tasks. Only the
    /// call that actually removes the member republishes the roster, and only
    /// that call returns true.
    pub fn unregister(&self, id: &str) -> bool {
        let mut evicted = Vec::new();
        let removed = {
            let mut registry = self.registry.lock();
            let removed = registry.members.remove(id);
            if removed.is_some() {
                registry.publish_roster(&mut evicted);
            }
            removed
        };

        let was_member = removed.is_some();
        if let Some(member) = removed {
            tracing::info!("Client disconnected: {} ({})", member.addr, id);
        }
        log_evictions(evicted);
        was_member
    }

    /// Record the identity a display announced and republish the roster
    pub fn handshake(&self, id: &str, identity: String, name: String) -> bool {
        let mut evicted = Vec::new();
        let updated = {
            let mut registry = self.registry.lock();
            match registry.members.get_mut(id) {
                Some(member) => {
                    tracing::info!("Client handshake: {} ({})", name, member.addr);
                    member.identity = identity;
                    member.name = name;
                    registry.publish_roster(&mut evicted);
                    true
                }
                None => false,
            }
        };

        log_evictions(evicted);
        updated
    }

    /// Store a member's display mode, send it `display_mode` and republish the
    /// roster. Returns whether the `display_mode` message was queued.
    pub fn switch_display_mode(&self, id: &str, mode: &str) -> bool {
        let Some(json) = encode(&ServerMessage::DisplayMode(mode.to_string())) else {
            return false;
        };

        let mut evicted = Vec::new();
        let delivered = {
            let mut registry = self.registry.lock();
            match registry.members.get_mut(id) {
                Some(member) => member.display_mode = mode.to_string(),
                None => return false,
            }
            // a failed send has already republished after the eviction
            let delivered = registry.send_one(id, json, &mut evicted);
            if delivered {
                registry.publish_roster(&mut evicted);
            }
            delivered
        };

        log_evictions(evicted);
        delivered
    }

    /// Find a live connection by server id, falling back to its remote address
    pub fn resolve_target(&self, target: &str) -> Option<ConnId> {
        let registry = self.registry.lock();
        if registry.members.contains_key(target) {
            return Some(target.to_string());
        }
        registry
            .members
            .iter()
            .find(|(_, member)| member.addr == target)
            .map(|(id, _)| id.clone())
    }

    pub fn active_content(&self) -> String {
        self.registry.lock().active_content.clone()
    }

    /// Set the active content without announcing it
    pub fn set_active_content(&self, file: impl Into<String>) {
        self.registry.lock().active_content = file.into();
    }

    /// Set the active content and queue `announcement` for every live
    /// connection in one step. A connection registering at the same time gets
    /// either the new content in its initial state or the announcement.
    pub fn publish_active_content<T: Serialize + ?Sized>(
        &self,
        file: impl Into<String>,
        announcement: &T,
    ) -> usize {
        let json = encode(announcement);
        let mut evicted = Vec::new();
        let delivered = {
            let mut registry = self.registry.lock();
            registry.active_content = file.into();
            match json {
                Some(json) => registry.fan_out(&json, &mut evicted),
                None => 0,
            }
        };
        log_evictions(evicted);
        delivered
    }

    /// Timer state handed to newly registered connections
    pub fn timer_state(&self) -> TimerState {
        self.registry.lock().timer.clone()
    }

    /// Record `state` as the current timer state and send it to every live connection
    pub fn publish_timer(&self, state: TimerState) -> usize {
        let json = encode(&ServerMessage::TimerUpdate(state.clone()));
        let mut evicted = Vec::new();
        let delivered = {
            let mut registry = self.registry.lock();
            registry.timer = state;
            match json {
                Some(json) => registry.fan_out(&json, &mut evicted),
                None => 0,
            }
        };
        log_evictions(evicted);
        delivered
    }

    /// Queue a message for one connection.
    ///
    /// Returns false if the connection is unknown or had to be evicted.
    pub fn send_to<T: Serialize + ?Sized>(&self, id: &str, msg: &T) -> bool {
        let Some(json) = encode(msg) else {
            return false;
        };
        let mut evicted = Vec::new();
        let delivered = self.registry.lock().send_one(id, json, &mut evicted);
        log_evictions(evicted);
        delivered
    }

    /// Queue a message for every live connection, evicting any that cannot
    /// take it. Returns the number of connections that received it.
    pub fn broadcast<T: Serialize + ?Sized>(&self, msg: &T) -> usize {
        let Some(json) = encode(msg) else {
            return 0;
        };
        let mut evicted = Vec::new();
        let delivered = self.registry.lock().fan_out(&json, &mut evicted);
        log_evictions(evicted);
        delivered
    }

    /// Current roster in display order
    pub fn roster(&self) -> Vec<RosterEntry> {
        self.registry.lock().roster()
    }

    /// Close every queue; used on shutdown
    pub fn close_all(&self) -> usize {
        let drained: Vec<_> = self.registry.lock().members.drain().collect();
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.registry.lock().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.registry.lock().members.contains_key(id)
    }
}

//! Connection registry and subscription routing

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::protocol::ServerMessage;

/// Identifier of a live connection
pub type ConnectionId = Uuid;

/// What a connection can subscribe to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubscriptionKey {
    Task(String),
    File(String),
}

#[derive(Default)]
struct HubState {
    connections: HashMap<ConnectionId, mpsc::Sender<ServerMessage>>,
    subscribers: HashMap<SubscriptionKey, HashSet<ConnectionId>>,
    /// Reverse index so a disconnect only touches that connection's keys
    subscriptions: HashMap<ConnectionId, HashSet<SubscriptionKey>>,
}

impl HubState {
    fn remove_connection(&mut self, conn: ConnectionId) -> bool {
        let existed = self.connections.remove(&conn).is_some();
        if let Some(keys) = self.subscriptions.remove(&conn) {
            for key in keys {
                if let Some(set) = self.subscribers.get_mut(&key) {
                    set.remove(&conn);
                    if set.is_empty() {
                        self.subscribers.remove(&key);
                    }
                }
            }
        }
        existed
    }
}

/// In-memory publish/subscribe router for live status updates
pub struct NotificationHub {
    state: Mutex<HubState>,
    /// Outbound messages buffered per connection
    buffer: usize,
}

impl NotificationHub {
    pub fn new(buffer: usize) -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            buffer: buffer.max(1),
        }
    }

    /// Register a connection; messages for it arrive on the returned receiver
    pub fn connect(&self) -> (ConnectionId, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(self.buffer);
        let conn = Uuid::new_v4();

        let mut state = self.state.lock();
        state.connections.insert(conn, tx);
        tracing::info!("Hub connection {} opened ({} live)", conn, state.connections.len());

        (conn, rx)
    }

    /// Remove a connection and all of its subscriptions
    pub fn disconnect(&self, conn: ConnectionId) {
        let mut state = self.state.lock();
        if state.remove_connection(conn) {
            tracing::info!("Hub connection {} closed ({} live)", conn, state.connections.len());
        }
    }

    /// Subscribe `conn` to `key`; repeated subscriptions are no-ops
    pub fn subscribe(&self, key: SubscriptionKey, conn: ConnectionId) {
        let mut state = self.state.lock();
        if !state.connections.contains_key(&conn) {
            tracing::warn!("Ignoring subscription from unknown connection {}", conn);
            return;
        }
        state.subscriptions.entry(conn).or_default().insert(key.clone());
        state.subscribers.entry(key).or_default().insert(conn);
    }

    /// Unsubscribe `conn` from `key`; unknown pairs are ignored
    pub fn unsubscribe(&self, key: &SubscriptionKey, conn: ConnectionId) {
        let mut state = self.state.lock();
        if let Some(keys) = state.subscriptions.get_mut(&conn) {
            keys.remove(key);
        }
        if let Some(set) = state.subscribers.get_mut(key) {
            set.remove(&conn);
            if set.is_empty() {
                state.subscribers.remove(key);
            }
        }
    }

    /// Deliver `message` to the current subscribers of `key`, returning how many got it
    pub fn publish_to_key(&self, key: &SubscriptionKey, message: ServerMessage) -> usize {
        let mut state = self.state.lock();
        let targets: Vec<ConnectionId> = match state.subscribers.get(key) {
            Some(set) => set.iter().copied().collect(),
            None => return 0,
        };
        Self::fan_out(&mut state, targets, message)
    }

    /// Deliver `message` to every live connection
    pub fn broadcast(&self, message: ServerMessage) -> usize {
        let mut state = self.state.lock();
        let targets: Vec<ConnectionId> = state.connections.keys().copied().collect();
        Self::fan_out(&mut state, targets, message)
    }

    fn fan_out(state: &mut HubState, targets: Vec<ConnectionId>, message: ServerMessage) -> usize {
        let mut delivered = 0;
        let mut broken = Vec::new();

        for conn in targets {
            let Some(tx) = state.connections.get(&conn) else {
                continue;
            };
            match tx.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!("Dropping hub connection {}: {}", conn, e);
                    broken.push(conn);
                }
            }
        }

        for conn in broken {
            state.remove_connection(conn);
        }

        delivered
    }

    /// Push a `task_update` event
    pub fn publish_task_update(&self, task_id: &str, data: Value) -> usize {
        self.publish_to_key(
            &SubscriptionKey::Task(task_id.to_string()),
            ServerMessage::TaskUpdate {
                task_id: task_id.to_string(),
                data,
            },
        )
    }

    /// Push a `file_update` event
    pub fn publish_file_update(&self, file_id: &str, data: Value) -> usize {
        self.publish_to_key(
            &SubscriptionKey::File(file_id.to_string()),
            ServerMessage::FileUpdate {
                file_id: file_id.to_string(),
                data,
            },
        )
    }

    /// Broadcast a `system_message` event
    pub fn broadcast_system_message(&self, message: impl Into<String>) -> usize {
        self.broadcast(ServerMessage::SystemMessage {
            message: message.into(),
            timestamp: Utc::now(),
        })
    }

    pub fn is_connected(&self, conn: ConnectionId) -> bool {
        self.state.lock().connections.contains_key(&conn)
    }

    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    pub fn subscriber_count(&self, key: &SubscriptionKey) -> usize {
        self.state
            .lock()
            .subscribers
            .get(key)
            .map(|set| set.len())
            .unwrap_or(0)
    }

    /// Keys `conn` is subscribed to
    pub fn subscriptions_of(&self, conn: ConnectionId) -> HashSet<SubscriptionKey> {
        self.state
            .lock()
            .subscriptions
            .get(&conn)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new(256)
    }
}

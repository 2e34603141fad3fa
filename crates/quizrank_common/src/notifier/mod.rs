//! Real-time Notifier
//!
//! Best-effort push of state changes to connected clients. Connections arrive
//! already authenticated; each gets a bounded channel. Delivery never blocks:
//! a full or closed channel drops the event. There is no replay, so clients
//! re-read current state after reconnecting.

pub mod events;

pub use events::{AchievementSummary, ServerEvent};

use crate::config::NotifierConfig;
use crate::leaderboard::WindowType;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

pub type ConnectionId = Uuid;

/// Identity verified by the auth layer before the connection is handed over
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedIdentity {
    pub user_id: Uuid,
    pub username: String,
}

struct Connection {
    user_id: Uuid,
    sender: mpsc::Sender<ServerEvent>,
    rooms: HashSet<WindowType>,
}

#[derive(Default)]
struct Registry {
    connections: HashMap<ConnectionId, Connection>,
    users: HashMap<Uuid, HashSet<ConnectionId>>,
}

impl Registry {
    fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        let conn = self.connections.remove(&id)?;
        if let Some(ids) = self.users.get_mut(&conn.user_id) {
            ids.remove(&id);
            if ids.is_empty() {
                self.users.remove(&conn.user_id);
            }
        }
        Some(conn)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifierStats {
    pub connections: usize,
    pub users: usize,
    pub delivered: u64,
    pub dropped: u64,
}

pub struct Notifier {
    registry: RwLock<Registry>,
    config: NotifierConfig,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl Notifier {
    pub fn new(config: NotifierConfig) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            config,
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Register a connection and return its event stream
    pub async fn connect(
        &self,
        identity: AuthenticatedIdentity,
    ) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let (sender, receiver) = mpsc::channel(self.config.channel_capacity.max(1));
        let id = Uuid::new_v4();

        let mut registry = self.registry.write().await;
        registry.connections.insert(
            id,
            Connection {
                user_id: identity.user_id,
                sender,
                rooms: HashSet::new(),
            },
        );
        registry.users.entry(identity.user_id).or_default().insert(id);
        info!(user_id = %identity.user_id, username = %identity.username, connection = %id, "Client connected");
        (id, receiver)
    }

    pub async fn disconnect(&self, id: ConnectionId) {
        if let Some(conn) = self.registry.write().await.remove(id) {
            info!(user_id = %conn.user_id, connection = %id, "Client disconnected");
        }
    }

    /// Join the leaderboard room for `window`. False for unknown connections.
    pub async fn subscribe(&self, id: ConnectionId, window: WindowType) -> bool {
        match self.registry.write().await.connections.get_mut(&id) {
            Some(conn) => {
                conn.rooms.insert(window);
                true
            }
            None => false,
        }
    }

    pub async fn unsubscribe(&self, id: ConnectionId, window: WindowType) -> bool {
        match self.registry.write().await.connections.get_mut(&id) {
            Some(conn) => conn.rooms.remove(&window),
            None => false,
        }
    }

    /// Deliver to every connection of one user; returns how many received it
    pub async fn notify_user(&self, user_id: Uuid, event: ServerEvent) -> usize {
        self.deliver(event, |registry| {
            registry
                .users
                .get(&user_id)
                .map(|ids| ids.iter().copied().collect())
                .unwrap_or_default()
        })
        .await
    }

    /// Deliver to every subscriber of the `window` room
    pub async fn broadcast_room(&self, window: WindowType, event: ServerEvent) -> usize {
        self.deliver(event, |registry| {
            registry
                .connections
                .iter()
                .filter(|(_, conn)| conn.rooms.contains(&window))
                .map(|(id, _)| *id)
                .collect()
        })
        .await
    }

    /// Deliver to every connected client
    pub async fn broadcast_global(&self, event: ServerEvent) -> usize {
        self.deliver(event, |registry| registry.connections.keys().copied().collect())
            .await
    }

    /// Level-ups landing on a multiple of the configured step are announced
    pub fn is_level_milestone(&self, level: u32) -> bool {
        let every = self.config.level_milestone_every;
        every > 0 && level > 1 && level % every == 0
    }

    pub fn is_streak_milestone(&self, streak: u32) -> bool {
        self.config.streak_milestones.contains(&streak)
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.registry.read().await.users.contains_key(&user_id)
    }

    pub async fn stats(&self) -> NotifierStats {
        let registry = self.registry.read().await;
        NotifierStats {
            connections: registry.connections.len(),
            users: registry.users.len(),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    async fn deliver<F>(&self, event: ServerEvent, targets: F) -> usize
    where
        F: FnOnce(&Registry) -> Vec<ConnectionId>,
    {
        let mut sent = 0;
        let mut closed = Vec::new();
        {
            let registry = self.registry.read().await;
            for id in targets(&*registry) {
                let Some(conn) = registry.connections.get(&id) else {
                    continue;
                };
                match conn.sender.try_send(event.clone()) {
                    Ok(()) => sent += 1,
                    Err(TrySendError::Full(_)) => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        debug!(connection = %id, event = event.name(), "Client buffer full, dropping event");
                    }
                    Err(TrySendError::Closed(_)) => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        closed.push(id);
                    }
                }
            }
        }
        self.delivered.fetch_add(sent as u64, Ordering::Relaxed);

        if !closed.is_empty() {
            let mut registry = self.registry.write().await;
            for id in closed {
                registry.remove(id);
            }
        }
        sent
    }
}

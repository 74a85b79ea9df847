//! Shared server runtime state, wrapped in `Arc` for use across connection
//! tasks and the idle detector: a registry of per-connection handles (an
//! outbound queue and a cancellation token apiece) plus the domain state
//! each subsystem owns.

use std::{
    collections::HashMap,
    sync::Arc,
    time::Instant,
};

use bytes::Bytes;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{config::ServerConfig, history::HistoryTable, presence::PresenceRegistry, router::ChannelRouter};

/// What a connection's write loop forwards to the socket: an application
/// frame, or a transport-level keepalive ping.
#[derive(Debug, Clone)]
pub enum OutboundMsg {
    Frame(Bytes),
    Ping,
}

/// Opaque per-connection identifier, used as the subscription table and
/// connection table key. Not part of the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(Uuid);

impl ConnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the router needs to deliver a frame to one connection: a bounded
/// outbound queue, and a cancellation token it can trip to force that
/// connection closed when the queue is full.
pub struct ConnHandle {
    pub username: Bytes,
    pub outbound: mpsc::Sender<OutboundMsg>,
    pub cancel: CancellationToken,
}

pub struct ServerState {
    pub config: ServerConfig,
    pub presence: RwLock<PresenceRegistry>,
    pub router: ChannelRouter,
    pub histories: HistoryTable,
    pub connections: RwLock<HashMap<ConnId, ConnHandle>>,
    /// Reverse index alongside `connections`, kept in sync by
    /// `register_connection`/`remove_connection`. Lets `enter_active`
    /// resolve an already-registered peer's live `ConnId` so it can be
    /// subscribed to a pair channel freshly derived for a new arrival,
    /// without scanning `connections` on every join.
    by_username: RwLock<HashMap<Bytes, ConnId>>,
    /// Tripped on process shutdown; observed by the idle detector and by
    /// every connection's read loop.
    pub shutdown: CancellationToken,
    pub started_at: Instant,
}

impl ServerState {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let histories = HistoryTable::new(config.history_capacity);
        Arc::new(Self {
            histories,
            presence: RwLock::new(PresenceRegistry::new()),
            router: ChannelRouter::new(),
            connections: RwLock::new(HashMap::new()),
            by_username: RwLock::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            started_at: Instant::now(),
            config,
        })
    }

    pub async fn register_connection(&self, id: ConnId, handle: ConnHandle) {
        self.by_username.write().await.insert(handle.username.clone(), id);
        self.connections.write().await.insert(id, handle);
    }

    /// Resolve the live `ConnId` currently registered for `username`, if any.
    pub async fn conn_for_username(&self, username: &[u8]) -> Option<ConnId> {
        self.by_username.read().await.get(username).copied()
    }

    pub async fn remove_connection(&self, id: &ConnId) -> Option<ConnHandle> {
        let handle = self.connections.write().await.remove(id);
        if let Some(handle) = &handle {
            let mut by_username = self.by_username.write().await;
            if by_username.get(&handle.username) == Some(id) {
                by_username.remove(&handle.username);
            }
        }
        handle
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Deliver `frame` to every connection currently subscribed to
    /// `channel`. A subscriber whose outbound queue is full is dropped —
    /// its cancellation token is tripped, which its connection task observes
    /// and tears down through the normal close path — rather than blocking
    /// or delaying delivery to anyone else.
    pub async fn publish(&self, channel: &crate::router::ChannelName, frame: Bytes) {
        let subscriber_ids = self.router.subscribers(channel).await;
        if subscriber_ids.is_empty() {
            return;
        }
        let connections = self.connections.read().await;
        for id in subscriber_ids {
            if let Some(handle) = connections.get(&id) {
                if handle.outbound.try_send(OutboundMsg::Frame(frame.clone())).is_err() {
                    handle.cancel.cancel();
                }
            }
        }
    }

    /// Deliver `frame` to exactly one connection (a requester-only reply).
    /// Subject to the same full-queue drop policy as `publish`.
    pub async fn reply(&self, conn: ConnId, frame: Bytes) {
        let connections = self.connections.read().await;
        if let Some(handle) = connections.get(&conn) {
            if handle.outbound.try_send(OutboundMsg::Frame(frame)).is_err() {
                handle.cancel.cancel();
            }
        }
    }
}

//! Pair-key derivation and the subscription table.
//!
//! Pair channels are keyed by a sorted `(Bytes, Bytes)` tuple rather than a
//! separator-concatenated byte string — commutative and injective without
//! having to reason about whether a separator could collide with an
//! arbitrary-byte username.

use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use tokio::sync::RwLock;

use crate::state::ConnId;

/// The reserved group-channel name. Not a valid username.
pub const GROUP_NAME: &[u8] = b"~";

pub fn is_reserved_name(name: &[u8]) -> bool {
    name == GROUP_NAME
}

/// A channel the subscription table and history table are keyed by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelName {
    Group,
    /// Always stored with the lexicographically smaller username first, so
    /// `pair_channel(a, b) == pair_channel(b, a)`.
    Pair(Bytes, Bytes),
}

/// Derive the canonical channel for a direct message between `a` and `b`.
pub fn pair_channel(a: &[u8], b: &[u8]) -> ChannelName {
    if a <= b {
        ChannelName::Pair(Bytes::copy_from_slice(a), Bytes::copy_from_slice(b))
    } else {
        ChannelName::Pair(Bytes::copy_from_slice(b), Bytes::copy_from_slice(a))
    }
}

/// Resolve the channel a `peer` field addresses from `self`'s point of view:
/// the group channel if `peer` is the reserved name, else the pair channel
/// between `self` and `peer`.
pub fn channel_for(own_username: &[u8], peer: &[u8]) -> ChannelName {
    if is_reserved_name(peer) {
        ChannelName::Group
    } else {
        pair_channel(own_username, peer)
    }
}

/// `channel → {connections}`. Delivery itself (looking up each
/// subscriber's outbound queue) lives in `state::publish`, which needs both
/// this table and the connection table together.
#[derive(Default)]
pub struct ChannelRouter {
    subs: RwLock<HashMap<ChannelName, HashSet<ConnId>>>,
}

impl ChannelRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, conn: ConnId, channel: ChannelName) {
        self.subs.write().await.entry(channel).or_default().insert(conn);
    }

    pub async fn unsubscribe(&self, conn: ConnId, channel: &ChannelName) {
        let mut subs = self.subs.write().await;
        if let Some(set) = subs.get_mut(channel) {
            set.remove(&conn);
            if set.is_empty() {
                subs.remove(channel);
            }
        }
    }

    /// Removes `conn` from every channel it was subscribed to. Returns the
    /// channels it had been part of, so the caller can decide which chat
    /// histories to reap.
    pub async fn unsubscribe_all(&self, conn: ConnId) -> Vec<ChannelName> {
        let mut subs = self.subs.write().await;
        let mut touched = Vec::new();
        subs.retain(|channel, set| {
            if set.remove(&conn) {
                touched.push(channel.clone());
            }
            !set.is_empty()
        });
        touched
    }

    pub async fn subscribers(&self, channel: &ChannelName) -> Vec<ConnId> {
        self.subs
            .read()
            .await
            .get(channel)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }
}

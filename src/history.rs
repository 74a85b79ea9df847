//! Bounded ring-buffered chat histories.
//!
//! A bounded `VecDeque` gives the same "oldest evicted first, stable
//! iteration" contract a raw array plus a wrapping cursor would, without
//! hand-rolled index arithmetic.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use bytes::Bytes;
use tokio::sync::RwLock;

use crate::router::ChannelName;

/// An immutable chat message once appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEntry {
    pub origin_username: Bytes,
    pub content: Bytes,
}

/// A fixed-capacity FIFO of `ChatEntry` for one channel.
#[derive(Debug)]
pub struct ChatHistory {
    capacity: usize,
    entries: VecDeque<ChatEntry>,
}

impl ChatHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Overwrites the oldest entry once `capacity` is reached.
    pub fn append(&mut self, entry: ChatEntry) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Yields up to `capacity` entries, oldest to newest.
    pub fn iterate(&self) -> impl Iterator<Item = &ChatEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The live `channel → history` map.
///
/// The outer lock protects only the map's shape (which channels exist);
/// each channel's `ChatHistory` sits behind its own `RwLock`, so append/read
/// traffic on one channel never contends with another — an independent
/// per-channel lock domain.
pub struct HistoryTable {
    inner: RwLock<HashMap<ChannelName, Arc<RwLock<ChatHistory>>>>,
    capacity: usize,
}

impl HistoryTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Returns the history for `channel`, creating an empty one if absent.
    pub async fn ensure(&self, channel: ChannelName) -> Arc<RwLock<ChatHistory>> {
        let mut map = self.inner.write().await;
        Arc::clone(
            map.entry(channel)
                .or_insert_with(|| Arc::new(RwLock::new(ChatHistory::new(self.capacity)))),
        )
    }

    pub async fn get(&self, channel: &ChannelName) -> Option<Arc<RwLock<ChatHistory>>> {
        self.inner.read().await.get(channel).cloned()
    }

    /// Drops every pair history whose key names `username`.
    pub async fn reap_touching(&self, username: &[u8]) {
        let mut map = self.inner.write().await;
        map.retain(|channel, _| match channel {
            ChannelName::Group => true,
            ChannelName::Pair(a, b) => a.as_ref() != username && b.as_ref() != username,
        });
    }
}

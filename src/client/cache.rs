use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::client::models::entities::{ChatMessage, Conversation, FriendRequest, Group, User};

/// Stable identifier for one named slice of server state. Message keys are
/// peer-scoped, not view-scoped, so a refetch finishing after the user has
/// switched threads still lands in the right entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Conversations,
    DirectMessages(String),
    GroupMessages(String),
    Friends,
    PendingRequests,
    SentRequests,
    AllRequests,
    Groups,
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Conversations => write!(f, "conversations"),
            CacheKey::DirectMessages(peer) => write!(f, "messages:{}", peer),
            CacheKey::GroupMessages(group) => write!(f, "group-messages:{}", group),
            CacheKey::Friends => write!(f, "friends"),
            CacheKey::PendingRequests => write!(f, "requests:pending"),
            CacheKey::SentRequests => write!(f, "requests:sent"),
            CacheKey::AllRequests => write!(f, "requests:all"),
            CacheKey::Groups => write!(f, "groups"),
        }
    }
}

/// Last-known server snapshot for one key.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    Conversations(Vec<Conversation>),
    Messages(Vec<ChatMessage>),
    Friends(Vec<User>),
    Requests(Vec<FriendRequest>),
    Groups(Vec<Group>),
}

impl CacheValue {
    pub fn as_messages(&self) -> Option<&Vec<ChatMessage>> {
        match self {
            CacheValue::Messages(msgs) => Some(msgs),
            _ => None,
        }
    }

    pub fn as_friends(&self) -> Option<&Vec<User>> {
        match self {
            CacheValue::Friends(users) => Some(users),
            _ => None,
        }
    }
}

/// Resolves a cache key to a fresh server snapshot.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, key: &CacheKey) -> anyhow::Result<CacheValue>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: CacheValue,
    stale: bool,
}

/// Keyed store of server resource snapshots.
///
/// The cache exclusively owns the client-side copies of all entities;
/// components read snapshots via [`QueryCache::get`] and write only through
/// [`QueryCache::invalidate`] (stale-and-refetch) or
/// [`QueryCache::set_direct`] (optimistic local mutation). Readers keep the
/// stale value while a refetch is in flight, so invalidation never flashes a
/// view to empty.
#[derive(Clone)]
pub struct QueryCache {
    entries: Arc<Mutex<HashMap<CacheKey, Entry>>>,
    fetcher: Arc<dyn Fetcher>,
    inflight: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl QueryCache {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            fetcher,
            inflight: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
        }
    }

    /// Snapshot of the current value for `key`, stale or not.
    pub fn get(&self, key: &CacheKey) -> Option<CacheValue> {
        let entries = self.entries.lock().unwrap();
        entries.get(key).map(|e| e.value.clone())
    }

    pub fn is_stale(&self, key: &CacheKey) -> bool {
        let entries = self.entries.lock().unwrap();
        entries.get(key).map(|e| e.stale).unwrap_or(true)
    }

    /// Mark `key` stale and schedule a background refetch. Current readers
    /// keep the stale value until the refetch resolves.
    pub fn invalidate(&self, key: CacheKey) {
        {
            let mut entries = self.entries.lock().unwrap();
            if let Some(entry) = entries.get_mut(&key) {
                entry.stale = true;
            }
        }
        log::debug!("[CACHE] invalidated {}", key);
        self.inflight.fetch_add(1, Ordering::SeqCst);
        let cache = self.clone();
        tokio::spawn(async move {
            cache.refresh(key).await;
            if cache.inflight.fetch_sub(1, Ordering::SeqCst) == 1 {
                cache.idle.notify_waiters();
            }
        });
    }

    /// Invalidate a batch of keys. Refetches resolve in any order; readers
    /// must tolerate partially-updated state between them.
    pub fn invalidate_all(&self, keys: &[CacheKey]) {
        for key in keys {
            self.invalidate(key.clone());
        }
    }

    /// Foreground refetch: fetch `key` and install the result. A failed fetch
    /// keeps the stale value (stale-but-consistent over silently-wrong).
    pub async fn refresh(&self, key: CacheKey) {
        match self.fetcher.fetch(&key).await {
            Ok(value) => {
                let mut entries = self.entries.lock().unwrap();
                entries.insert(
                    key.clone(),
                    Entry {
                        value,
                        stale: false,
                    },
                );
                log::debug!("[CACHE] refreshed {}", key);
            }
            Err(e) => {
                log::warn!("[CACHE] refresh failed for {}: {}", key, e);
            }
        }
    }

    /// Synchronously replace the cached value via a pure function of the
    /// previous value. Used only for optimistic low-latency updates where
    /// waiting for a refetch would be visibly slow.
    pub fn set_direct<F>(&self, key: CacheKey, updater: F)
    where
        F: FnOnce(Option<CacheValue>) -> CacheValue,
    {
        let mut entries = self.entries.lock().unwrap();
        let previous = entries.get(&key).map(|e| e.value.clone());
        let stale = entries.get(&key).map(|e| e.stale).unwrap_or(false);
        entries.insert(
            key,
            Entry {
                value: updater(previous),
                stale,
            },
        );
    }

    /// Wait until no background refetch is in flight. Test and shutdown hook.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            if self.inflight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

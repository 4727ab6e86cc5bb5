//! In-process store with per-key TTL and a pub/sub hub.
//!
//! Backs the distributed coordinator in tests and in single-node
//! deployments that want the distributed code path without an external
//! store. TTL is enforced lazily: an expired key is dropped on the next
//! read that touches it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{RemoteStore, Subscription};
use crate::types::Result;

struct StoredValue {
    bytes: Vec<u8>,
    expires_at: Instant,
}

struct TopicSender {
    token: u64,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

/// In-memory [`RemoteStore`] implementation.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, StoredValue>>,
    topics: Mutex<HashMap<String, Vec<TopicSender>>>,
    next_token: AtomicU64,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish_non_exhaustive()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (non-expired) keys. Test observability helper.
    pub fn key_count(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .expect("memory store entries lock poisoned")
            .values()
            .filter(|v| v.expires_at > now)
            .count()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .expect("memory store entries lock poisoned");
        entries.insert(
            key.to_string(),
            StoredValue {
                bytes: value.to_vec(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut entries = self
            .entries
            .lock()
            .expect("memory store entries lock poisoned");
        match entries.get(key) {
            Some(value) if value.expires_at > Instant::now() => Ok(Some(value.bytes.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries
            .lock()
            .expect("memory store entries lock poisoned")
            .remove(key);
        Ok(())
    }

    async fn publish(&self, channel: &str, message: &[u8]) -> Result<()> {
        let mut topics = self
            .topics
            .lock()
            .expect("memory store topics lock poisoned");
        if let Some(senders) = topics.get_mut(channel) {
            // Prune subscribers whose receiver side is gone.
            senders.retain(|s| s.tx.send(message.to_vec()).is_ok());
            if senders.is_empty() {
                topics.remove(channel);
            }
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.topics
            .lock()
            .expect("memory store topics lock poisoned")
            .entry(channel.to_string())
            .or_default()
            .push(TopicSender { token, tx });
        Ok(Subscription::new(channel, token, rx))
    }

    async fn unsubscribe(&self, subscription: Subscription) -> Result<()> {
        let mut topics = self
            .topics
            .lock()
            .expect("memory store topics lock poisoned");
        if let Some(senders) = topics.get_mut(subscription.channel()) {
            senders.retain(|s| s.token != subscription.token());
            if senders.is_empty() {
                topics.remove(subscription.channel());
            }
        }
        Ok(())
    }
}

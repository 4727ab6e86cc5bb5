//! Remote store contract for the distributed coordinator.
//!
//! The coordinator needs exactly two capabilities from its store: a
//! key/value space with per-key TTL and atomic set, and a publish/subscribe
//! channel facility. No multi-key transactions are required. Backends are
//! dumb adapters; all rendezvous logic lives in the coordinator.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::types::Result;

mod memory;
mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

/// An active channel subscription.
///
/// Messages published to the channel after the subscription was created are
/// delivered in order via [`recv`](Subscription::recv). Hand the value back
/// to [`RemoteStore::unsubscribe`] when done; a dropped subscription stops
/// receiving but may leave backend resources until the store prunes it.
#[derive(Debug)]
pub struct Subscription {
    channel: String,
    token: u64,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl Subscription {
    pub(crate) fn new(
        channel: impl Into<String>,
        token: u64,
        rx: mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> Self {
        Self {
            channel: channel.into(),
            token,
            rx,
        }
    }

    /// Receive the next message. Returns `None` when the backend side of
    /// the subscription has gone away.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub(crate) fn token(&self) -> u64 {
        self.token
    }
}

/// Key/value + pub/sub store used by the distributed coordinator.
///
/// Implementations must be safe under concurrent use from arbitrary
/// workers. Backend failures are reported as
/// [`CoordinatorInternal`](crate::types::ErrorKind::CoordinatorInternal);
/// the coordinator decides whether to retry.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Atomically set `key` to `value` with the given time-to-live.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    /// Read a key. Returns `None` for a missing or expired key.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Delete a key. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Publish a message to every current subscriber of `channel`.
    async fn publish(&self, channel: &str, message: &[u8]) -> Result<()>;

    /// Subscribe to `channel`. Messages published from this point on are
    /// delivered to the returned subscription.
    async fn subscribe(&self, channel: &str) -> Result<Subscription>;

    /// Tear down a subscription and release its backend resources.
    async fn unsubscribe(&self, subscription: Subscription) -> Result<()>;
}

//! Redis-backed remote store.
//!
//! Key/value operations run over a [`MultiplexedConnection`], which is
//! cloned cheaply per call; all clones share one TCP connection. Pub/sub
//! needs a dedicated connection per subscription, driven by a forwarding
//! task that pumps messages into the subscription channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use ::redis::aio::MultiplexedConnection;
use ::redis::AsyncCommands;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;

use super::{RemoteStore, Subscription};
use crate::types::{Error, Result};

/// Redis [`RemoteStore`] implementation.
pub struct RedisStore {
    client: ::redis::Client,
    conn: MultiplexedConnection,
    forwarders: Mutex<HashMap<u64, tokio::task::JoinHandle<()>>>,
    next_token: AtomicU64,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to the given endpoint (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(endpoint: &str) -> Result<Self> {
        let client = ::redis::Client::open(endpoint)
            .map_err(|e| Error::internal(format!("invalid store endpoint: {}", e)))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::internal(format!("store connection failed: {}", e)))?;
        Ok(Self {
            client,
            conn,
            forwarders: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(0),
        })
    }

    fn store_err(err: ::redis::RedisError) -> Error {
        Error::internal(format!("store operation failed: {}", err))
    }
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let ttl_ms = ttl.as_millis().max(1) as u64;
        let _: () = ::redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(Self::store_err)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await.map_err(Self::store_err)?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: u64 = conn.del(key).await.map_err(Self::store_err)?;
        Ok(())
    }

    async fn publish(&self, channel: &str, message: &[u8]) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: u64 = conn
            .publish(channel, message)
            .await
            .map_err(Self::store_err)?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(Self::store_err)?;
        pubsub.subscribe(channel).await.map_err(Self::store_err)?;

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let channel_name = channel.to_string();

        let handle = tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: Vec<u8> = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::warn!(
                            "pubsub_payload_decode_failed: channel={}, error={}",
                            channel_name,
                            e
                        );
                        continue;
                    }
                };
                if tx.send(payload).is_err() {
                    // Subscription dropped; stop forwarding.
                    break;
                }
            }
        });

        self.forwarders
            .lock()
            .expect("redis store forwarders lock poisoned")
            .insert(token, handle);

        Ok(Subscription::new(channel, token, rx))
    }

    async fn unsubscribe(&self, subscription: Subscription) -> Result<()> {
        let handle = self
            .forwarders
            .lock()
            .expect("redis store forwarders lock poisoned")
            .remove(&subscription.token());
        if let Some(handle) = handle {
            // Dropping the pubsub connection closes the server-side
            // subscription; aborting the forwarder drops it.
            handle.abort();
        }
        Ok(())
    }
}

impl Drop for RedisStore {
    fn drop(&mut self) {
        let forwarders = self
            .forwarders
            .lock()
            .expect("redis store forwarders lock poisoned");
        for handle in forwarders.values() {
            handle.abort();
        }
    }
}

//! Distributed coordinator over a key/value + pub/sub store.
//!
//! Producer and consumer may be different hosts. The task record lives
//! under `<prefix>task:<task_id>` with a TTL equal to the task timeout;
//! completion envelopes are published on `<prefix>completion:<task_id>`.
//!
//! The wait path is race-safe against lost notifications: it subscribes
//! to the completion channel *first*, then reads the key, so a completion
//! landing between the two is observed either way. The complete path
//! stores the terminal record *before* publishing, so a subscriber that
//! receives a notification can always recover the outcome from the key.
//!
//! Transient store failures are retried a bounded number of times with
//! short backoff before surfacing `CoordinatorInternal`.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::{raise_outcome, TaskCoordinator};
use crate::store::{RemoteStore, Subscription};
use crate::task::codec;
use crate::task::{TaskOutcome, TaskRecord};
use crate::types::{Error, ErrorKind, Result, TaskId};

const STORE_RETRY_ATTEMPTS: u32 = 3;
const STORE_RETRY_BASE: Duration = Duration::from_millis(100);

/// Run a store operation, retrying transient failures with exponential
/// backoff. Only `CoordinatorInternal` errors are retried; everything else
/// is a hard failure.
async fn with_store_retry<T, F, Fut>(operation: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.kind() == ErrorKind::CoordinatorInternal => {
                attempt += 1;
                if attempt >= STORE_RETRY_ATTEMPTS {
                    return Err(err);
                }
                let delay = STORE_RETRY_BASE * 2u32.pow(attempt - 1);
                tracing::warn!(
                    "store_operation_retry: operation={}, attempt={}, error={}",
                    operation,
                    attempt,
                    err
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Removes the waiter registry entry on every exit path of a wait.
struct WaiterGuard<'a> {
    waiters: &'a Mutex<HashSet<TaskId>>,
    task_id: TaskId,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.waiters
            .lock()
            .expect("waiter registry lock poisoned")
            .remove(&self.task_id);
    }
}

/// Store-backed [`TaskCoordinator`] implementation.
pub struct RemoteCoordinator {
    store: Arc<dyn RemoteStore>,
    key_prefix: String,
    task_timeout: Duration,
    /// Process-local registry of suspended waiters, keyed by task id. A
    /// second local wait on the same task is rejected.
    waiters: Mutex<HashSet<TaskId>>,
}

impl std::fmt::Debug for RemoteCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCoordinator")
            .field("key_prefix", &self.key_prefix)
            .field("task_timeout", &self.task_timeout)
            .finish_non_exhaustive()
    }
}

impl RemoteCoordinator {
    pub fn new(store: Arc<dyn RemoteStore>, key_prefix: &str, task_timeout: Duration) -> Self {
        Self {
            store,
            key_prefix: key_prefix.to_string(),
            task_timeout,
            waiters: Mutex::new(HashSet::new()),
        }
    }

    fn task_key(&self, task_id: &TaskId) -> String {
        format!("{}task:{}", self.key_prefix, task_id)
    }

    fn completion_channel(&self, task_id: &TaskId) -> String {
        format!("{}completion:{}", self.key_prefix, task_id)
    }

    fn register_waiter(&self, task_id: &TaskId) -> Result<WaiterGuard<'_>> {
        let mut waiters = self.waiters.lock().expect("waiter registry lock poisoned");
        if !waiters.insert(task_id.clone()) {
            return Err(Error::invalid_argument(format!(
                "task {} already has a waiter in this process",
                task_id
            )));
        }
        Ok(WaiterGuard {
            waiters: &self.waiters,
            task_id: task_id.clone(),
        })
    }

    async fn wait_inner(
        &self,
        task_id: &TaskId,
        subscription: &mut Subscription,
        cancel: CancellationToken,
    ) -> Result<Vec<u8>> {
        // Read after subscribing: a completion that landed before the
        // subscription is recovered from the key.
        let key = self.task_key(task_id);
        let stored = with_store_retry("get", || self.store.get(&key)).await?;
        let record = match stored {
            Some(bytes) => codec::decode_record(&bytes)?,
            None => {
                return Err(Error::not_found(format!(
                    "task {} does not exist (expired or cleaned up)",
                    task_id
                )))
            }
        };
        if record.is_terminal() {
            return raise_outcome(&record);
        }

        let elapsed = (Utc::now() - record.created_at).to_std().unwrap_or_default();
        let deadline = tokio::time::sleep(self.task_timeout.saturating_sub(elapsed));
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                message = subscription.recv() => match message {
                    Some(bytes) => {
                        let record = codec::decode_record(&bytes)?;
                        if record.is_terminal() {
                            return raise_outcome(&record);
                        }
                        tracing::debug!(
                            "ignoring_non_terminal_notification: task_id={}",
                            task_id
                        );
                    }
                    None => {
                        return Err(Error::internal(format!(
                            "completion channel for task {} closed unexpectedly",
                            task_id
                        )))
                    }
                },
                _ = &mut deadline => {
                    return Err(Error::timeout(format!(
                        "task {} deadline exceeded before a completion arrived",
                        task_id
                    )))
                }
                _ = cancel.cancelled() => {
                    return Err(Error::cancelled(format!(
                        "wait for task {} was cancelled",
                        task_id
                    )))
                }
            }
        }
    }
}

#[async_trait]
impl TaskCoordinator for RemoteCoordinator {
    async fn create_task(&self, response_type_tag: &str) -> Result<TaskId> {
        crate::validation::validate_non_empty(response_type_tag, "response_type_tag")?;

        let record = TaskRecord::new(response_type_tag);
        let task_id = record.task_id.clone();
        let key = self.task_key(&task_id);
        let encoded = codec::encode_record(&record)?;

        with_store_retry("set", || self.store.set(&key, &encoded, self.task_timeout)).await?;
        Ok(task_id)
    }

    async fn complete_task(&self, task_id: &TaskId, outcome: TaskOutcome) -> Result<()> {
        let key = self.task_key(task_id);

        let stored = with_store_retry("get", || self.store.get(&key)).await?;
        let Some(bytes) = stored else {
            // The record expired or was cleaned up. The worker must never
            // fail for a missing waiter.
            tracing::warn!("completion_for_missing_task: task_id={}", task_id);
            return Ok(());
        };

        let mut record = codec::decode_record(&bytes)?;
        if !record.apply(outcome) {
            tracing::debug!("completion_for_terminal_task: task_id={}", task_id);
            return Ok(());
        }

        let encoded = codec::encode_record(&record)?;

        // Store first, publish second. A subscriber that races the publish
        // can still recover the outcome by reading the key.
        with_store_retry("set", || self.store.set(&key, &encoded, self.task_timeout)).await?;

        let channel = self.completion_channel(task_id);
        with_store_retry("publish", || self.store.publish(&channel, &encoded)).await?;
        Ok(())
    }

    async fn wait_for_completion(
        &self,
        task_id: &TaskId,
        cancel: CancellationToken,
    ) -> Result<Vec<u8>> {
        let _guard = self.register_waiter(task_id)?;

        // Subscribe before reading the key; see module docs for the race.
        let channel = self.completion_channel(task_id);
        let mut subscription =
            with_store_retry("subscribe", || self.store.subscribe(&channel)).await?;

        let result = self.wait_inner(task_id, &mut subscription, cancel).await;

        if let Err(err) = self.store.unsubscribe(subscription).await {
            tracing::warn!(
                "unsubscribe_failed: task_id={}, error={}",
                task_id,
                err
            );
        }
        result
    }

    async fn cleanup_task(&self, task_id: &TaskId) -> Result<()> {
        // Best effort: the key TTL guarantees eventual cleanup even when
        // the delete is lost.
        let key = self.task_key(task_id);
        if let Err(err) = with_store_retry("delete", || self.store.delete(&key)).await {
            tracing::warn!("cleanup_failed: task_id={}, error={}", task_id, err);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::task::TaskFailure;

    fn coordinator() -> RemoteCoordinator {
        RemoteCoordinator::new(
            Arc::new(MemoryStore::new()),
            "courier:",
            Duration::from_secs(30),
        )
    }

    #[test]
    fn test_keyspace_layout() {
        let coord = coordinator();
        let task_id = TaskId::from_string("abc123".to_string()).unwrap();
        assert_eq!(coord.task_key(&task_id), "courier:task:abc123");
        assert_eq!(
            coord.completion_channel(&task_id),
            "courier:completion:abc123"
        );
    }

    #[tokio::test]
    async fn test_create_writes_pending_record() {
        let store = Arc::new(MemoryStore::new());
        let coord = RemoteCoordinator::new(store.clone(), "courier:", Duration::from_secs(30));

        let task_id = coord.create_task("echo").await.unwrap();
        let bytes = store
            .get(&format!("courier:task:{}", task_id))
            .await
            .unwrap()
            .expect("record should exist");
        let record = codec::decode_record(&bytes).unwrap();
        assert!(record.is_pending());
        assert_eq!(record.response_type_tag, "echo");
    }

    #[tokio::test]
    async fn test_complete_then_wait_recovers_from_key() {
        // Completion lands before the waiter ever subscribes; the stored
        // record must resolve the wait immediately.
        let coord = Arc::new(coordinator());
        let task_id = coord.create_task("echo").await.unwrap();

        coord
            .complete_task(&task_id, TaskOutcome::Success(b"early".to_vec()))
            .await
            .unwrap();

        let payload = coord
            .wait_for_completion(&task_id, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(payload, b"early".to_vec());
    }

    #[tokio::test]
    async fn test_wait_then_complete_via_channel() {
        let coord = Arc::new(coordinator());
        let task_id = coord.create_task("echo").await.unwrap();

        let waiter = {
            let coord = Arc::clone(&coord);
            let task_id = task_id.clone();
            tokio::spawn(async move {
                coord
                    .wait_for_completion(&task_id, CancellationToken::new())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        coord
            .complete_task(&task_id, TaskOutcome::Success(b"late".to_vec()))
            .await
            .unwrap();
        assert_eq!(waiter.await.unwrap().unwrap(), b"late".to_vec());
    }

    #[tokio::test]
    async fn test_wait_unknown_task_is_not_found() {
        let coord = coordinator();
        let err = coord
            .wait_for_completion(&TaskId::new(), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_completion_for_missing_task_is_silent() {
        let coord = coordinator();
        assert!(coord
            .complete_task(&TaskId::new(), TaskOutcome::Success(Vec::new()))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_double_completion_first_wins() {
        let coord = coordinator();
        let task_id = coord.create_task("echo").await.unwrap();

        coord
            .complete_task(&task_id, TaskOutcome::Success(b"A".to_vec()))
            .await
            .unwrap();
        coord
            .complete_task(
                &task_id,
                TaskOutcome::Failure(TaskFailure::new(ErrorKind::HandlerFailed, "late")),
            )
            .await
            .unwrap();

        let payload = coord
            .wait_for_completion(&task_id, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(payload, b"A".to_vec());
    }

    #[tokio::test]
    async fn test_second_local_waiter_rejected() {
        let coord = Arc::new(coordinator());
        let task_id = coord.create_task("echo").await.unwrap();

        let first = {
            let coord = Arc::clone(&coord);
            let task_id = task_id.clone();
            tokio::spawn(async move {
                coord
                    .wait_for_completion(&task_id, CancellationToken::new())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = coord
            .wait_for_completion(&task_id, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        coord
            .complete_task(&task_id, TaskOutcome::Success(Vec::new()))
            .await
            .unwrap();
        assert!(first.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_waiter_registry_cleared_after_failure() {
        let coord = coordinator();
        let task_id = coord.create_task("echo").await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = coord
            .wait_for_completion(&task_id, cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);

        // The registry entry must be gone; a fresh wait is accepted.
        coord
            .complete_task(&task_id, TaskOutcome::Success(Vec::new()))
            .await
            .unwrap();
        assert!(coord
            .wait_for_completion(&task_id, CancellationToken::new())
            .await
            .is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let coord = RemoteCoordinator::new(
            Arc::new(MemoryStore::new()),
            "courier:",
            Duration::from_millis(50),
        );
        let task_id = coord.create_task("slow").await.unwrap();

        let err = coord
            .wait_for_completion(&task_id, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_cleanup_deletes_key() {
        let store = Arc::new(MemoryStore::new());
        let coord = RemoteCoordinator::new(store.clone(), "courier:", Duration::from_secs(30));

        let task_id = coord.create_task("echo").await.unwrap();
        coord.cleanup_task(&task_id).await.unwrap();
        coord.cleanup_task(&task_id).await.unwrap();
        assert_eq!(store.key_count(), 0);
    }

    #[tokio::test]
    async fn test_store_failures_surface_as_internal() {
        // A store whose reads always fail.
        #[derive(Debug)]
        struct BrokenStore;

        #[async_trait]
        impl RemoteStore for BrokenStore {
            async fn set(&self, _: &str, _: &[u8], _: Duration) -> Result<()> {
                Err(Error::internal("set refused"))
            }
            async fn get(&self, _: &str) -> Result<Option<Vec<u8>>> {
                Err(Error::internal("get refused"))
            }
            async fn delete(&self, _: &str) -> Result<()> {
                Err(Error::internal("delete refused"))
            }
            async fn publish(&self, _: &str, _: &[u8]) -> Result<()> {
                Err(Error::internal("publish refused"))
            }
            async fn subscribe(&self, _: &str) -> Result<Subscription> {
                Err(Error::internal("subscribe refused"))
            }
            async fn unsubscribe(&self, _: Subscription) -> Result<()> {
                Ok(())
            }
        }

        tokio::time::pause();
        let coord =
            RemoteCoordinator::new(Arc::new(BrokenStore), "courier:", Duration::from_secs(30));
        let err = coord.create_task("echo").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CoordinatorInternal);

        // Cleanup swallows store failures.
        assert!(coord.cleanup_task(&TaskId::new()).await.is_ok());
    }
}

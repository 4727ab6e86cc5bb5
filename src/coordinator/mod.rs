//! Task coordinator - rendezvous between worker-side completion and
//! waiter-side await.
//!
//! Two interchangeable variants implement the same contract:
//! - [`MemoryCoordinator`]: single-process rendezvous over an in-process
//!   map with wait primitives and a periodic sweeper.
//! - [`RemoteCoordinator`]: multi-process rendezvous over a key/value +
//!   pub/sub store with per-key TTL.
//!
//! Callers observe identical semantics from both; the only divergence is
//! the clock that enforces expiry (monotonic process clock vs. store TTL),
//! and the two may not disagree by more than the cleanup period.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::store::RedisStore;
use crate::task::codec::{self, DecodedOutcome};
use crate::task::{TaskOutcome, TaskRecord};
use crate::types::{CourierOptions, Error, Result, TaskId};

pub mod memory;
pub mod remote;

pub use memory::{MemoryCoordinator, SweeperStats};
pub use remote::RemoteCoordinator;

/// The closed set of operations the bridge and facade consume.
#[async_trait]
pub trait TaskCoordinator: Send + Sync {
    /// Register a fresh pending task expecting a payload of the given
    /// type tag. Returns the generated task id.
    async fn create_task(&self, response_type_tag: &str) -> Result<TaskId>;

    /// Deliver a terminal outcome for a task. The first completion wins;
    /// later completions (and completions for unknown or expired tasks)
    /// are discarded without error so a worker never fails for a missing
    /// waiter.
    async fn complete_task(&self, task_id: &TaskId, outcome: TaskOutcome) -> Result<()>;

    /// Suspend until the task reaches a terminal state, the coordinator's
    /// task timeout elapses, or `cancel` fires.
    ///
    /// Returns the result payload on completion; raises the recorded
    /// failure kind on a failed task; raises `Timeout` / `Cancelled` /
    /// `NotFound` as appropriate. At most one waiter per task id: a
    /// second concurrent wait is rejected with `InvalidArgument`.
    async fn wait_for_completion(
        &self,
        task_id: &TaskId,
        cancel: CancellationToken,
    ) -> Result<Vec<u8>>;

    /// Remove the task record. Idempotent and safe to call while a waiter
    /// is suspended.
    async fn cleanup_task(&self, task_id: &TaskId) -> Result<()>;
}

/// Turn a terminal record into the waiter's observable result: the payload
/// for a completed task, the reconstructed error for a failed one.
pub(crate) fn raise_outcome(record: &TaskRecord) -> Result<Vec<u8>> {
    match codec::outcome_of(record)? {
        DecodedOutcome::Completed(payload) => Ok(payload),
        DecodedOutcome::Failed(failure) => {
            if let Some(origin) = &failure.origin_frame {
                tracing::debug!(
                    "remote_failure_origin: task_id={}, origin={}",
                    record.task_id,
                    origin
                );
            }
            Err(Error::from_kind(failure.kind, failure.message))
        }
    }
}

/// Build the coordinator variant selected by the options.
///
/// Validates the options first; a partially-configured coordinator is
/// never observable. The remote variant connects to the store eagerly so
/// a bad endpoint fails here rather than on first use.
pub async fn build(options: &CourierOptions) -> Result<Arc<dyn TaskCoordinator>> {
    options.validate()?;
    if options.use_in_memory_coordination {
        Ok(Arc::new(MemoryCoordinator::new(
            options.default_task_timeout,
            options.cleanup_interval,
        )))
    } else {
        let store = RedisStore::connect(&options.remote_store_endpoint).await?;
        Ok(Arc::new(RemoteCoordinator::new(
            Arc::new(store),
            &options.remote_key_prefix,
            options.default_task_timeout,
        )))
    }
}

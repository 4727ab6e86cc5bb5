//! In-memory coordinator for single-process deployments.
//!
//! Rendezvous without durability: the task map lives in this process, a
//! oneshot completion slot wakes the waiter, and a background sweeper
//! forces timeouts on abandoned tasks and reclaims aged terminal records.
//!
//! Status transitions are compare-and-set under the map lock, so the
//! monotonicity invariant (`Pending -> Completed | Failed`, first
//! completion wins) holds under arbitrary concurrent completers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{oneshot, Mutex};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use super::{raise_outcome, TaskCoordinator};
use crate::task::{TaskOutcome, TaskRecord};
use crate::types::{Error, Result, TaskId};

// =============================================================================
// Task entry
// =============================================================================

struct TaskEntry {
    record: TaskRecord,
    /// Completion slot: resolved exactly once, on the first terminal
    /// transition (or dropped by cleanup, which the waiter observes as
    /// the task having vanished).
    waker: Option<oneshot::Sender<()>>,
    /// A waiter is currently suspended on this task.
    has_waiter: bool,
}

type TaskMap = Arc<Mutex<HashMap<TaskId, TaskEntry>>>;

// =============================================================================
// Sweeper
// =============================================================================

/// Statistics from one sweep cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweeperStats {
    /// Pending tasks forced to a timeout failure.
    pub timed_out: usize,
    /// Terminal records removed after their retention window.
    pub removed: usize,
}

/// One sweep over the task map.
///
/// Pending records past the task timeout are failed with `Timeout` and
/// their waiters woken; terminal records nobody is waiting on are removed
/// once older than `retention`.
fn run_sweep(tasks: &mut HashMap<TaskId, TaskEntry>, timeout: Duration, retention: Duration) -> SweeperStats {
    let mut stats = SweeperStats::default();

    for entry in tasks.values_mut() {
        if entry.record.is_expired(timeout) && entry.record.force_timeout() {
            stats.timed_out += 1;
            if let Some(waker) = entry.waker.take() {
                let _ = waker.send(());
            }
        }
    }

    let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
    let to_remove: Vec<TaskId> = tasks
        .iter()
        .filter(|(_, entry)| {
            !entry.has_waiter
                && entry
                    .record
                    .terminal_age()
                    .map(|age| age > retention)
                    .unwrap_or(false)
        })
        .map(|(task_id, _)| task_id.clone())
        .collect();

    stats.removed = to_remove.len();
    for task_id in to_remove {
        tasks.remove(&task_id);
    }

    stats
}

// =============================================================================
// Coordinator
// =============================================================================

/// In-memory [`TaskCoordinator`] implementation.
#[derive(Debug)]
pub struct MemoryCoordinator {
    tasks: TaskMap,
    task_timeout: Duration,
    cancel: CancellationToken,
}

impl std::fmt::Debug for TaskEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskEntry")
            .field("record", &self.record)
            .field("has_waiter", &self.has_waiter)
            .finish_non_exhaustive()
    }
}

impl MemoryCoordinator {
    /// Create the coordinator and start its sweeper.
    ///
    /// The sweeper period is the task timeout split four ways, capped at
    /// one minute; `cleanup_interval` is how long terminal records are
    /// retained for late observers before reclamation.
    pub fn new(task_timeout: Duration, cleanup_interval: Duration) -> Self {
        let tasks: TaskMap = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();

        let period = (task_timeout / 4).min(Duration::from_secs(60)).max(Duration::from_millis(10));
        tokio::spawn(sweeper_loop(
            Arc::clone(&tasks),
            task_timeout,
            cleanup_interval,
            period,
            cancel.clone(),
        ));

        Self {
            tasks,
            task_timeout,
            cancel,
        }
    }

    /// Number of live task records. Test observability helper.
    pub async fn task_count(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Whether a record for the task id currently exists.
    pub async fn contains(&self, task_id: &TaskId) -> bool {
        self.tasks.lock().await.contains_key(task_id)
    }

    async fn read_result(&self, task_id: &TaskId) -> Result<Vec<u8>> {
        let tasks = self.tasks.lock().await;
        let entry = tasks
            .get(task_id)
            .ok_or_else(|| Error::not_found(format!("task {} no longer exists", task_id)))?;
        raise_outcome(&entry.record)
    }

    async fn clear_waiter(&self, task_id: &TaskId) {
        let mut tasks = self.tasks.lock().await;
        if let Some(entry) = tasks.get_mut(task_id) {
            entry.has_waiter = false;
            entry.waker = None;
        }
    }
}

async fn sweeper_loop(
    tasks: TaskMap,
    timeout: Duration,
    retention: Duration,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let stats = run_sweep(&mut *tasks.lock().await, timeout, retention);
                if stats != SweeperStats::default() {
                    tracing::debug!(
                        "sweep_cycle_completed: timed_out={}, removed={}",
                        stats.timed_out,
                        stats.removed,
                    );
                }
            }
            _ = cancel.cancelled() => {
                tracing::debug!("task_sweeper_stopped");
                break;
            }
        }
    }
}

#[async_trait]
impl TaskCoordinator for MemoryCoordinator {
    async fn create_task(&self, response_type_tag: &str) -> Result<TaskId> {
        crate::validation::validate_non_empty(response_type_tag, "response_type_tag")?;

        let record = TaskRecord::new(response_type_tag);
        let task_id = record.task_id.clone();

        self.tasks.lock().await.insert(
            task_id.clone(),
            TaskEntry {
                record,
                waker: None,
                has_waiter: false,
            },
        );

        // Deadline watchdog: forces the timeout transition even when no
        // waiter is suspended. Races with a genuine completion resolve by
        // compare-and-set; whichever lands first wins.
        let tasks = Arc::clone(&self.tasks);
        let watchdog_id = task_id.clone();
        let timeout = self.task_timeout;
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {}
                _ = cancel.cancelled() => return,
            }
            let mut tasks = tasks.lock().await;
            if let Some(entry) = tasks.get_mut(&watchdog_id) {
                if entry.record.force_timeout() {
                    tracing::debug!("task_timed_out: task_id={}", watchdog_id);
                    if let Some(waker) = entry.waker.take() {
                        let _ = waker.send(());
                    }
                }
            }
        });

        Ok(task_id)
    }

    async fn complete_task(&self, task_id: &TaskId, outcome: TaskOutcome) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        let Some(entry) = tasks.get_mut(task_id) else {
            tracing::debug!("completion_for_unknown_task: task_id={}", task_id);
            return Ok(());
        };

        if entry.record.apply(outcome) {
            if let Some(waker) = entry.waker.take() {
                let _ = waker.send(());
            }
        } else {
            tracing::debug!("completion_for_terminal_task: task_id={}", task_id);
        }
        Ok(())
    }

    async fn wait_for_completion(
        &self,
        task_id: &TaskId,
        cancel: CancellationToken,
    ) -> Result<Vec<u8>> {
        let (slot, remaining) = {
            let mut tasks = self.tasks.lock().await;
            let entry = tasks
                .get_mut(task_id)
                .ok_or_else(|| Error::not_found(format!("unknown task {}", task_id)))?;

            if entry.record.is_terminal() {
                return raise_outcome(&entry.record);
            }
            if entry.has_waiter {
                return Err(Error::invalid_argument(format!(
                    "task {} already has a waiter",
                    task_id
                )));
            }

            let (tx, rx) = oneshot::channel();
            entry.waker = Some(tx);
            entry.has_waiter = true;

            let elapsed = (Utc::now() - entry.record.created_at)
                .to_std()
                .unwrap_or_default();
            (rx, self.task_timeout.saturating_sub(elapsed))
        };

        let result = tokio::select! {
            resolved = slot => match resolved {
                Ok(()) => self.read_result(task_id).await,
                // Cleanup removed the record while we were suspended.
                Err(_) => Err(Error::not_found(format!(
                    "task {} was cleaned up while waiting",
                    task_id
                ))),
            },
            _ = cancel.cancelled() => Err(Error::cancelled(format!(
                "wait for task {} was cancelled",
                task_id
            ))),
            _ = tokio::time::sleep(remaining) => {
                // Deadline hit on the waiter side. Compare-and-set the
                // timeout; if a completion landed in the same instant,
                // return that instead.
                let mut tasks = self.tasks.lock().await;
                match tasks.get_mut(task_id) {
                    Some(entry) => {
                        entry.record.force_timeout();
                        raise_outcome(&entry.record)
                    }
                    None => Err(Error::not_found(format!(
                        "task {} was cleaned up while waiting",
                        task_id
                    ))),
                }
            }
        };

        self.clear_waiter(task_id).await;
        result
    }

    async fn cleanup_task(&self, task_id: &TaskId) -> Result<()> {
        // Removing the entry drops any unresolved completion slot, which a
        // suspended waiter observes as NotFound.
        self.tasks.lock().await.remove(task_id);
        Ok(())
    }
}

impl Drop for MemoryCoordinator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskFailure;
    use crate::types::ErrorKind;

    fn coordinator() -> MemoryCoordinator {
        MemoryCoordinator::new(Duration::from_secs(30), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_create_then_complete_then_wait() {
        let coord = coordinator();
        let task_id = coord.create_task("echo").await.unwrap();

        coord
            .complete_task(&task_id, TaskOutcome::Success(b"payload".to_vec()))
            .await
            .unwrap();

        let payload = coord
            .wait_for_completion(&task_id, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(payload, b"payload".to_vec());
    }

    #[tokio::test]
    async fn test_wait_then_complete() {
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
    async fn test_failure_is_raised_with_recorded_kind() {
        let coord = coordinator();
        let task_id = coord.create_task("echo").await.unwrap();

        coord
            .complete_task(
                &task_id,
                TaskOutcome::Failure(TaskFailure::new(ErrorKind::HandlerFailed, "exploded")),
            )
            .await
            .unwrap();

        let err = coord
            .wait_for_completion(&task_id, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HandlerFailed);
        assert!(err.to_string().contains("exploded"));
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
            .complete_task(&task_id, TaskOutcome::Success(b"B".to_vec()))
            .await
            .unwrap();

        let payload = coord
            .wait_for_completion(&task_id, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(payload, b"A".to_vec());
    }

    #[tokio::test]
    async fn test_completion_for_unknown_task_is_silent() {
        let coord = coordinator();
        assert!(coord
            .complete_task(&TaskId::new(), TaskOutcome::Success(Vec::new()))
            .await
            .is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let coord = MemoryCoordinator::new(Duration::from_millis(50), Duration::from_secs(60));
        let task_id = coord.create_task("slow").await.unwrap();

        let started = tokio::time::Instant::now();
        let err = coord
            .wait_for_completion(&task_id, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_times_out_unwaited_task() {
        let coord = MemoryCoordinator::new(Duration::from_millis(50), Duration::from_secs(60));
        let task_id = coord.create_task("slow").await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;

        // The record is terminal now; a late wait observes the timeout.
        let err = coord
            .wait_for_completion(&task_id, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_cancellation() {
        let coord = Arc::new(coordinator());
        let task_id = coord.create_task("echo").await.unwrap();

        let cancel = CancellationToken::new();
        let waiter = {
            let coord = Arc::clone(&coord);
            let task_id = task_id.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { coord.wait_for_completion(&task_id, cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let err = waiter.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);

        // The record stays pending: a late completion may still arrive
        // and will be reclaimed by the sweeper.
        assert!(coord.contains(&task_id).await);
    }

    #[tokio::test]
    async fn test_second_waiter_rejected() {
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
    async fn test_cleanup_is_idempotent() {
        let coord = coordinator();
        let task_id = coord.create_task("echo").await.unwrap();

        coord.cleanup_task(&task_id).await.unwrap();
        coord.cleanup_task(&task_id).await.unwrap();
        assert!(!coord.contains(&task_id).await);
    }

    #[tokio::test]
    async fn test_cleanup_wakes_suspended_waiter_with_not_found() {
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

        coord.cleanup_task(&task_id).await.unwrap();
        let err = waiter.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_concurrent_completions_exactly_one_observable() {
        let coord = Arc::new(coordinator());
        let task_id = coord.create_task("echo").await.unwrap();

        let mut completers = Vec::new();
        for i in 0..8u8 {
            let coord = Arc::clone(&coord);
            let task_id = task_id.clone();
            completers.push(tokio::spawn(async move {
                coord
                    .complete_task(&task_id, TaskOutcome::Success(vec![i]))
                    .await
            }));
        }
        for completer in completers {
            completer.await.unwrap().unwrap();
        }

        let payload = coord
            .wait_for_completion(&task_id, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(payload.len(), 1);
    }

    // ── sweeper ─────────────────────────────────────────────────────────

    #[test]
    fn test_sweep_times_out_aged_pending() {
        let mut tasks = HashMap::new();
        let mut record = TaskRecord::new("echo");
        record.created_at = Utc::now() - chrono::Duration::seconds(120);
        let task_id = record.task_id.clone();
        tasks.insert(
            task_id.clone(),
            TaskEntry {
                record,
                waker: None,
                has_waiter: false,
            },
        );

        let stats = run_sweep(&mut tasks, Duration::from_secs(60), Duration::from_secs(3600));
        assert_eq!(stats.timed_out, 1);
        assert_eq!(stats.removed, 0);
        assert!(tasks.get(&task_id).unwrap().record.is_terminal());
    }

    #[test]
    fn test_sweep_removes_aged_terminal() {
        let mut tasks = HashMap::new();
        let mut record = TaskRecord::new("echo");
        record.apply(TaskOutcome::Success(Vec::new()));
        record.completed_at = Some(Utc::now() - chrono::Duration::hours(2));
        let task_id = record.task_id.clone();
        tasks.insert(
            task_id.clone(),
            TaskEntry {
                record,
                waker: None,
                has_waiter: false,
            },
        );

        let stats = run_sweep(&mut tasks, Duration::from_secs(60), Duration::from_secs(3600));
        assert_eq!(stats.removed, 1);
        assert!(!tasks.contains_key(&task_id));
    }

    #[test]
    fn test_sweep_preserves_recent_and_waited_records() {
        let mut tasks = HashMap::new();

        // Fresh pending record: untouched.
        let fresh = TaskRecord::new("echo");
        let fresh_id = fresh.task_id.clone();
        tasks.insert(
            fresh_id.clone(),
            TaskEntry {
                record: fresh,
                waker: None,
                has_waiter: false,
            },
        );

        // Aged terminal record with a live waiter: kept.
        let mut waited = TaskRecord::new("echo");
        waited.apply(TaskOutcome::Success(Vec::new()));
        waited.completed_at = Some(Utc::now() - chrono::Duration::hours(2));
        let waited_id = waited.task_id.clone();
        tasks.insert(
            waited_id.clone(),
            TaskEntry {
                record: waited,
                waker: None,
                has_waiter: true,
            },
        );

        let stats = run_sweep(&mut tasks, Duration::from_secs(60), Duration::from_secs(3600));
        assert_eq!(stats, SweeperStats::default());
        assert!(tasks.contains_key(&fresh_id));
        assert!(tasks.contains_key(&waited_id));
    }
}

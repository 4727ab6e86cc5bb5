//! Task - the cross-process rendezvous unit.
//!
//! A [`TaskRecord`] represents one response-bearing submission from the
//! moment the facade creates it until a waiter (or the sweeper) destroys
//! it. The record is the single source of truth for the task's outcome;
//! both coordinator variants store it and both sides of the rendezvous
//! observe it.
//!
//! Status is monotonic: `Pending -> Completed` or `Pending -> Failed`,
//! nothing else. Exactly one of `result`/`error` is populated in a
//! terminal record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::{ErrorKind, TaskId};

pub mod codec;

// =============================================================================
// Status
// =============================================================================

/// Status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Awaiting a completion from a worker.
    Pending,
    /// A worker delivered a result payload.
    Completed,
    /// A worker delivered a failure, or the deadline forced one.
    Failed,
}

// =============================================================================
// Failure record
// =============================================================================

/// Serialized failure carried inside a terminal record.
///
/// Enough survives the wire to reconstruct an error of the matching kind
/// on the waiter side: the kind tag, a human-readable message, and an
/// opaque origin frame. The remote call stack itself does not travel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub kind: ErrorKind,
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_frame: Option<String>,
}

impl TaskFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            origin_frame: None,
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin_frame = Some(origin.into());
        self
    }
}

// =============================================================================
// Outcome
// =============================================================================

/// Terminal outcome handed to `complete_task` by the bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// Serialized result payload. An empty payload is a valid result and
    /// is distinct from no payload at all.
    Success(Vec<u8>),
    /// Failure descriptor to be reconstructed on the waiter side.
    Failure(TaskFailure),
}

// =============================================================================
// Task record
// =============================================================================

/// The rendezvous record for a single response-bearing submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: TaskId,

    /// Stable identifier of the expected payload type; checked by the
    /// codec when the waiter decodes the completion envelope.
    pub response_type_tag: String,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    pub status: TaskStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Vec<u8>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskFailure>,
}

impl TaskRecord {
    /// Create a fresh pending record with a generated task id.
    pub fn new(response_type_tag: impl Into<String>) -> Self {
        Self::with_id(TaskId::new(), response_type_tag)
    }

    /// Create a fresh pending record with a caller-supplied task id.
    pub fn with_id(task_id: TaskId, response_type_tag: impl Into<String>) -> Self {
        Self {
            task_id,
            response_type_tag: response_type_tag.into(),
            created_at: Utc::now(),
            completed_at: None,
            status: TaskStatus::Pending,
            result: None,
            error: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == TaskStatus::Pending
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_pending()
    }

    /// Apply a terminal outcome if and only if the record is still pending.
    ///
    /// Returns `true` when the transition happened. A record that is
    /// already terminal is left untouched; the first completion wins.
    pub fn apply(&mut self, outcome: TaskOutcome) -> bool {
        if self.is_terminal() {
            return false;
        }
        match outcome {
            TaskOutcome::Success(payload) => {
                self.status = TaskStatus::Completed;
                self.result = Some(payload);
            }
            TaskOutcome::Failure(failure) => {
                self.status = TaskStatus::Failed;
                self.error = Some(failure);
            }
        }
        self.completed_at = Some(Utc::now());
        true
    }

    /// Force a timeout failure if the record is still pending.
    pub fn force_timeout(&mut self) -> bool {
        self.apply(TaskOutcome::Failure(TaskFailure::new(
            ErrorKind::Timeout,
            "task deadline exceeded before a completion arrived",
        )))
    }

    /// Whether a pending record has outlived `timeout`.
    pub fn is_expired(&self, timeout: Duration) -> bool {
        if !self.is_pending() {
            return false;
        }
        let deadline = self.created_at
            + chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX);
        Utc::now() > deadline
    }

    /// Age of the terminal transition, if any.
    pub fn terminal_age(&self) -> Option<chrono::Duration> {
        self.completed_at.map(|at| Utc::now() - at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_is_pending() {
        let record = TaskRecord::new("echo");
        assert!(record.is_pending());
        assert!(!record.is_terminal());
        assert_eq!(record.response_type_tag, "echo");
        assert!(record.completed_at.is_none());
        assert!(record.result.is_none());
        assert!(record.error.is_none());
    }

    #[test]
    fn test_apply_success() {
        let mut record = TaskRecord::new("echo");
        assert!(record.apply(TaskOutcome::Success(b"\"hello\"".to_vec())));

        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.result.as_deref(), Some(&b"\"hello\""[..]));
        assert!(record.error.is_none());
        assert!(record.completed_at.is_some());
    }

    #[test]
    fn test_apply_failure() {
        let mut record = TaskRecord::new("echo");
        let failure =
            TaskFailure::new(ErrorKind::HandlerFailed, "boom").with_origin("echo handler");
        assert!(record.apply(TaskOutcome::Failure(failure.clone())));

        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.error, Some(failure));
        assert!(record.result.is_none());
    }

    #[test]
    fn test_first_completion_wins() {
        let mut record = TaskRecord::new("echo");
        assert!(record.apply(TaskOutcome::Success(b"A".to_vec())));
        assert!(!record.apply(TaskOutcome::Success(b"B".to_vec())));
        assert!(!record.apply(TaskOutcome::Failure(TaskFailure::new(
            ErrorKind::HandlerFailed,
            "late failure"
        ))));

        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.result.as_deref(), Some(&b"A"[..]));
        assert!(record.error.is_none());
    }

    #[test]
    fn test_timeout_does_not_overwrite_completion() {
        let mut record = TaskRecord::new("echo");
        record.apply(TaskOutcome::Success(b"A".to_vec()));
        assert!(!record.force_timeout());
        assert_eq!(record.status, TaskStatus::Completed);
    }

    #[test]
    fn test_completion_does_not_overwrite_timeout() {
        let mut record = TaskRecord::new("echo");
        assert!(record.force_timeout());
        assert!(!record.apply(TaskOutcome::Success(b"late".to_vec())));
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.error.as_ref().unwrap().kind, ErrorKind::Timeout);
    }

    #[test]
    fn test_empty_payload_is_a_result() {
        let mut record = TaskRecord::new("unit");
        record.apply(TaskOutcome::Success(Vec::new()));
        assert_eq!(record.result.as_deref(), Some(&b""[..]));
    }

    #[test]
    fn test_expiry() {
        let mut record = TaskRecord::new("echo");
        assert!(!record.is_expired(Duration::from_secs(60)));

        record.created_at = Utc::now() - chrono::Duration::seconds(120);
        assert!(record.is_expired(Duration::from_secs(60)));

        // Terminal records never expire; the retention path handles them.
        record.apply(TaskOutcome::Success(Vec::new()));
        assert!(!record.is_expired(Duration::from_secs(60)));
    }

    #[test]
    fn test_serde_status_wire_form() {
        let cases = vec![
            (TaskStatus::Pending, "\"pending\""),
            (TaskStatus::Completed, "\"completed\""),
            (TaskStatus::Failed, "\"failed\""),
        ];
        for (variant, expected_json) in cases {
            let serialized = serde_json::to_string(&variant).unwrap();
            assert_eq!(serialized, expected_json, "serialize {:?}", variant);
            let deserialized: TaskStatus = serde_json::from_str(&serialized).unwrap();
            assert_eq!(deserialized, variant, "round-trip {:?}", variant);
        }
    }
}

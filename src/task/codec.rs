//! Completion envelope codec.
//!
//! A completion envelope is a [`TaskRecord`] serialized as self-describing
//! msgpack (`rmp_serde::to_vec_named`, field names on the wire). The same
//! byte string is written to the remote store and published on the
//! completion channel, so producer and consumer may be different binaries
//! of the same release: keyed encoding lets either side tolerate fields
//! the other does not know about.
//!
//! Payload bytes inside the record are opaque to the codec. `None` (no
//! payload) and `Some(vec![])` (an empty payload) round-trip as distinct
//! values.

use crate::task::{TaskFailure, TaskRecord, TaskStatus};
use crate::types::{Error, Result, TaskId};

/// Decoded terminal state of a task, as observed by a waiter.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedOutcome {
    /// The task completed; the payload bytes are returned verbatim.
    Completed(Vec<u8>),
    /// The task failed; the failure descriptor is returned for
    /// reconstruction into an error of the matching kind.
    Failed(TaskFailure),
}

/// Encode a record into an envelope byte string.
pub fn encode_record(record: &TaskRecord) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec_named(record)?)
}

/// Decode an envelope back into a record without interpreting it.
pub fn decode_record(bytes: &[u8]) -> Result<TaskRecord> {
    Ok(rmp_serde::from_slice(bytes)?)
}

/// Build and encode a successful terminal envelope.
pub fn encode_success(task_id: &TaskId, type_tag: &str, payload: Vec<u8>) -> Result<Vec<u8>> {
    let mut record = TaskRecord::with_id(task_id.clone(), type_tag);
    record.apply(crate::task::TaskOutcome::Success(payload));
    encode_record(&record)
}

/// Build and encode a failed terminal envelope.
pub fn encode_failure(task_id: &TaskId, type_tag: &str, failure: TaskFailure) -> Result<Vec<u8>> {
    let mut record = TaskRecord::with_id(task_id.clone(), type_tag);
    record.apply(crate::task::TaskOutcome::Failure(failure));
    encode_record(&record)
}

/// Decode an envelope and extract its terminal outcome.
///
/// Rejects envelopes whose `response_type_tag` does not match
/// `expected_type_tag`, envelopes that are not terminal, and terminal
/// envelopes violating the exactly-one-of result/error invariant.
pub fn decode(bytes: &[u8], expected_type_tag: &str) -> Result<DecodedOutcome> {
    let record = decode_record(bytes)?;

    if record.response_type_tag != expected_type_tag {
        return Err(Error::serialization(format!(
            "response type tag mismatch: expected {}, found {}",
            expected_type_tag, record.response_type_tag
        )));
    }

    outcome_of(&record)
}

/// Extract the terminal outcome of an already-decoded record.
pub fn outcome_of(record: &TaskRecord) -> Result<DecodedOutcome> {
    match record.status {
        TaskStatus::Pending => Err(Error::serialization(format!(
            "envelope for task {} is not terminal",
            record.task_id
        ))),
        TaskStatus::Completed => match (&record.result, &record.error) {
            (Some(payload), None) => Ok(DecodedOutcome::Completed(payload.clone())),
            _ => Err(Error::serialization(format!(
                "completed envelope for task {} must carry exactly a result",
                record.task_id
            ))),
        },
        TaskStatus::Failed => match (&record.result, &record.error) {
            (None, Some(failure)) => Ok(DecodedOutcome::Failed(failure.clone())),
            _ => Err(Error::serialization(format!(
                "failed envelope for task {} must carry exactly an error",
                record.task_id
            ))),
        },
    }
}

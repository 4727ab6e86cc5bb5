//! Identifier newtypes for tasks and jobs.
//!
//! The two ids have different lifecycles and deliberately do not share a
//! definition. A [`TaskId`] is always minted by this crate: 128 random
//! bits rendered as 32 lowercase hex characters, which keeps it safe to
//! splice into store keys and channel names without escaping. A [`JobId`]
//! is whatever opaque string the job engine hands back; it is carried and
//! logged, never interpreted.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one rendezvous record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(String);

impl TaskId {
    /// Mint a fresh id: a random 128-bit value as lowercase hex.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Wrap an id received over the wire. Rejects the empty string; any
    /// other content is accepted as-is, since remote peers may mint ids
    /// with a different scheme.
    pub fn from_string(s: String) -> Result<Self, &'static str> {
        if s.is_empty() {
            return Err("task id must not be empty");
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque job identifier assigned by the job engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    /// Id format used by the in-process engine: `job_` + 16 hex chars.
    /// External engines are free to return anything non-empty.
    pub fn generate() -> Self {
        Self(format!(
            "job_{}",
            &uuid::Uuid::new_v4().simple().to_string()[..16]
        ))
    }

    pub fn from_string(s: String) -> Result<Self, &'static str> {
        if s.is_empty() {
            return Err("job id must not be empty");
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

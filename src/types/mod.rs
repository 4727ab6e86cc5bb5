//! Core types for the courier runtime.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed identifiers (TaskId, JobId)
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: The closed option set with fail-fast validation

mod config;
mod errors;
mod ids;

pub use config::CourierOptions;
pub use errors::{Error, ErrorKind, Result};
pub use ids::{JobId, TaskId};

//! # Courier Core - Background Request/Response Relay
//!
//! A request/response rendezvous layer on top of a fire-and-forget
//! background-job engine:
//! - Submit a unit of work for asynchronous execution on some worker
//! - Optionally await its typed return value across process boundaries
//! - Bounded handler retries with exponential backoff on the worker
//! - Deadline enforcement, cancellation and leak-free cleanup on the waiter
//!
//! ## Architecture
//!
//! ```text
//!  caller ──► Scheduler ──► JobEngine ──► worker ──► JobBridge ──► Dispatcher
//!     │           │                                      │
//!     │      create_task                            complete_task
//!     │           ▼                                      ▼
//!     └──── wait_for_completion ◄──── TaskCoordinator ◄──┘
//!                               (in-memory or store-backed)
//! ```
//!
//! The coordinator comes in two behaviorally interchangeable variants: an
//! in-memory one for single-process deployments and a distributed one over
//! a key/value + pub/sub store for multi-process deployments.

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

// Re-export public API
pub mod bridge;
pub mod coordinator;
pub mod dispatch;
pub mod engine;
pub mod scheduler;
pub mod store;
pub mod task;
pub mod types;

// Internal utilities
pub mod observability;
mod validation;

pub use scheduler::Scheduler;
pub use types::{CourierOptions, Error, ErrorKind, JobId, Result, TaskId};

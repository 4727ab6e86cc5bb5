//! Job engine consumer contract.
//!
//! The background job engine is an external collaborator: it persists
//! jobs, ships their arguments to some worker, and invokes the bridge
//! entry point there. This module defines only what the core requires of
//! it, plus the serializable argument bundle the bridge receives.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::dispatch::JobRequest;
use crate::types::{JobId, Result, TaskId};

pub mod local;

pub use local::LocalJobEngine;

/// How the bridge hands the request to the dispatcher on the worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    /// Route to the single handler registered for the request type.
    #[default]
    Dispatch,
    /// Fan out to every handler registered for the notification type.
    Publish,
}

/// Arguments for one bridge invocation, shipped losslessly to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeInvocation {
    /// Human-readable name shown in job tooling.
    pub display_name: String,

    /// The request the handler will process.
    pub request: JobRequest,

    /// Rendezvous task id for response-bearing jobs; absent for
    /// fire-and-forget and notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,

    /// Additional attempts after the first failure.
    #[serde(default)]
    pub retry_budget: u32,

    /// Dispatch to one handler or publish to all of them.
    #[serde(default)]
    pub delivery: Delivery,
}

impl BridgeInvocation {
    /// Fire-and-forget invocation: no rendezvous, handler result discarded.
    pub fn fire_and_forget(display_name: impl Into<String>, request: JobRequest) -> Self {
        Self {
            display_name: display_name.into(),
            request,
            task_id: None,
            retry_budget: 0,
            delivery: Delivery::Dispatch,
        }
    }

    /// Response-bearing invocation bound to a coordinator task.
    pub fn with_result(
        display_name: impl Into<String>,
        request: JobRequest,
        task_id: TaskId,
        retry_budget: u32,
    ) -> Self {
        Self {
            display_name: display_name.into(),
            request,
            task_id: Some(task_id),
            retry_budget,
            delivery: Delivery::Dispatch,
        }
    }

    /// Notification invocation: fanned out to every handler for the
    /// notification type. Produces nothing, so it never carries a task id.
    pub fn notify(display_name: impl Into<String>, notification: JobRequest) -> Self {
        Self {
            display_name: display_name.into(),
            request: notification,
            task_id: None,
            retry_budget: 0,
            delivery: Delivery::Publish,
        }
    }
}

/// When a scheduled job should run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScheduleAt {
    /// After the given delay from now.
    After(Duration),
    /// At the given wall-clock instant.
    At(DateTime<Utc>),
}

impl ScheduleAt {
    /// Remaining delay from now; an instant in the past runs immediately.
    pub fn delay_from_now(&self) -> Duration {
        match self {
            ScheduleAt::After(delay) => *delay,
            ScheduleAt::At(instant) => (*instant - Utc::now()).to_std().unwrap_or_default(),
        }
    }
}

/// What the core requires from the background job engine.
#[async_trait]
pub trait JobEngine: Send + Sync {
    /// Enqueue for immediate execution on some worker.
    async fn enqueue(&self, invocation: BridgeInvocation) -> Result<JobId>;

    /// Enqueue for execution at a later time.
    async fn schedule(&self, invocation: BridgeInvocation, when: ScheduleAt) -> Result<JobId>;

    /// Create or replace a named recurring job.
    async fn add_or_update(
        &self,
        name: &str,
        invocation: BridgeInvocation,
        cron_expr: &str,
        zone: Option<&str>,
    ) -> Result<()>;

    /// Run a named recurring job now.
    async fn trigger(&self, name: &str) -> Result<()>;

    /// Remove a named recurring job.
    async fn remove(&self, name: &str) -> Result<()>;
}

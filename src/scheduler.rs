//! Scheduler facade - the user-facing surface.
//!
//! A thin binding from user operations to job-engine primitives plus the
//! coordinator rendezvous. The facade owns no logic beyond validation and
//! the create/enqueue/wait/cleanup choreography of response-bearing
//! submissions. Dependencies are passed in explicitly at wire-up time; no
//! process-wide locator exists.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::coordinator::{self, TaskCoordinator};
use crate::dispatch::{JobRequest, RequestDispatcher};
use crate::engine::{BridgeInvocation, JobEngine, LocalJobEngine, ScheduleAt};
use crate::types::{CourierOptions, JobId, Result};
use crate::validation::validate_non_empty;

/// User-facing facade over the job engine and the task coordinator.
#[derive(Clone)]
pub struct Scheduler {
    engine: Arc<dyn JobEngine>,
    coordinator: Arc<dyn TaskCoordinator>,
    default_retry_budget: u32,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("default_retry_budget", &self.default_retry_budget)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Build a facade from explicit collaborators.
    pub fn new(
        engine: Arc<dyn JobEngine>,
        coordinator: Arc<dyn TaskCoordinator>,
        default_retry_budget: u32,
    ) -> Self {
        Self {
            engine,
            coordinator,
            default_retry_budget,
        }
    }

    /// Wire up a full in-process runtime from options: validates them,
    /// initializes tracing, selects the coordinator variant, and runs
    /// jobs on a [`LocalJobEngine`] invoking `dispatcher`.
    pub async fn from_options(
        options: CourierOptions,
        dispatcher: Arc<dyn RequestDispatcher>,
    ) -> Result<Self> {
        options.validate()?;
        crate::observability::init_tracing_with(&options);

        let coordinator = coordinator::build(&options).await?;
        let engine = Arc::new(LocalJobEngine::new(
            dispatcher,
            Arc::clone(&coordinator),
            &options,
        ));
        Ok(Self::new(engine, coordinator, options.default_retry_budget))
    }

    /// The coordinator behind this facade.
    pub fn coordinator(&self) -> &Arc<dyn TaskCoordinator> {
        &self.coordinator
    }

    /// Fire-and-forget submission. No task record is created; the
    /// handler's return value, if any, is discarded.
    pub async fn enqueue(&self, display_name: &str, request: JobRequest) -> Result<JobId> {
        validate_non_empty(display_name, "display_name")?;
        validate_non_empty(&request.request_type, "request_type")?;

        self.engine
            .enqueue(BridgeInvocation::fire_and_forget(display_name, request))
            .await
    }

    /// Submit a request and await its typed result with the default retry
    /// budget.
    pub async fn enqueue_with_result<T: DeserializeOwned>(
        &self,
        display_name: &str,
        request: JobRequest,
    ) -> Result<T> {
        self.enqueue_with_result_opts(
            display_name,
            request,
            self.default_retry_budget,
            CancellationToken::new(),
        )
        .await
    }

    /// Submit a request and await its typed result.
    ///
    /// Creates the rendezvous task, enqueues the bridge invocation, then
    /// suspends until completion, timeout or cancellation. The task record
    /// is cleaned up on every exit path.
    pub async fn enqueue_with_result_opts<T: DeserializeOwned>(
        &self,
        display_name: &str,
        request: JobRequest,
        retry_budget: u32,
        cancel: CancellationToken,
    ) -> Result<T> {
        validate_non_empty(display_name, "display_name")?;
        validate_non_empty(&request.request_type, "request_type")?;

        // The response type tag is the request type: stable across
        // binaries, and the handler registry already keys on it.
        let task_id = self.coordinator.create_task(&request.request_type).await?;

        let invocation =
            BridgeInvocation::with_result(display_name, request, task_id.clone(), retry_budget);

        let wait_result = match self.engine.enqueue(invocation).await {
            Ok(_job_id) => self.coordinator.wait_for_completion(&task_id, cancel).await,
            Err(err) => Err(err),
        };

        if let Err(err) = self.coordinator.cleanup_task(&task_id).await {
            tracing::warn!("task_cleanup_failed: task_id={}, error={}", task_id, err);
        }

        let payload = wait_result?;
        Ok(serde_json::from_slice(&payload)?)
    }

    /// Fan a notification out to every handler registered for it on a
    /// worker. Notifications carry no response; any handler failure is
    /// recorded against the job.
    pub async fn publish(&self, display_name: &str, notification: JobRequest) -> Result<JobId> {
        validate_non_empty(display_name, "display_name")?;
        validate_non_empty(&notification.request_type, "request_type")?;

        self.engine
            .enqueue(BridgeInvocation::notify(display_name, notification))
            .await
    }

    /// Submit a request for execution at a later time (fire-and-forget).
    pub async fn schedule(
        &self,
        display_name: &str,
        request: JobRequest,
        when: ScheduleAt,
    ) -> Result<JobId> {
        validate_non_empty(display_name, "display_name")?;
        validate_non_empty(&request.request_type, "request_type")?;

        self.engine
            .schedule(BridgeInvocation::fire_and_forget(display_name, request), when)
            .await
    }

    /// Create or replace a named recurring submission.
    pub async fn add_or_update(
        &self,
        name: &str,
        request: JobRequest,
        cron_expr: &str,
        zone: Option<&str>,
    ) -> Result<()> {
        validate_non_empty(name, "name")?;
        validate_non_empty(&request.request_type, "request_type")?;

        self.engine
            .add_or_update(
                name,
                BridgeInvocation::fire_and_forget(name, request),
                cron_expr,
                zone,
            )
            .await
    }

    /// Run a named recurring submission now.
    pub async fn trigger(&self, name: &str) -> Result<()> {
        self.engine.trigger(name).await
    }

    /// Remove a named recurring submission.
    pub async fn remove(&self, name: &str) -> Result<()> {
        self.engine.remove(name).await
    }
}

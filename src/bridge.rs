//! Job bridge - the worker-side entry point.
//!
//! The job engine invokes the bridge with a [`BridgeInvocation`]; the
//! bridge runs the user handler under a bounded retry loop and delivers
//! the terminal outcome to the coordinator. Requests go to the single
//! registered handler; notifications fan out to every handler for the
//! notification type via the dispatcher's `publish`.
//!
//! The success/failure contract is asymmetric by design. Response-bearing
//! jobs always deliver an envelope and return normally, even on
//! exhaustion: the waiter is the record of the outcome, and raising would
//! make the engine's own retry policy re-run the handler on top of ours.
//! Fire-and-forget jobs have no rendezvous, so exhaustion propagates and
//! the engine records the failure.
//!
//! A panicking handler is isolated in a spawned task and treated as a
//! failed attempt; it never takes down the worker.

use std::sync::Arc;
use std::time::Duration;

use crate::coordinator::TaskCoordinator;
use crate::dispatch::{JobRequest, RequestDispatcher};
use crate::engine::{BridgeInvocation, Delivery};
use crate::task::{TaskFailure, TaskOutcome};
use crate::types::{Error, ErrorKind, Result};
use crate::validation::validate_non_empty;

/// Base delay of the exponential backoff schedule.
pub const RETRY_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Cap on a single backoff delay; keeps large retry budgets from
/// producing pathological waits.
pub const RETRY_BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Backoff before the next attempt after `failed_attempts` failures:
/// `base * 2^(n-1)`, capped.
pub fn backoff_delay(failed_attempts: u32) -> Duration {
    let exponent = failed_attempts.saturating_sub(1).min(31);
    RETRY_BACKOFF_BASE
        .saturating_mul(2u32.saturating_pow(exponent))
        .min(RETRY_BACKOFF_CAP)
}

fn validate(invocation: &BridgeInvocation) -> Result<()> {
    validate_non_empty(&invocation.display_name, "display_name")?;
    validate_non_empty(&invocation.request.request_type, "request_type")?;
    if let Some(task_id) = &invocation.task_id {
        validate_non_empty(task_id.as_str(), "task_id")?;
    }
    // Notifications produce nothing a waiter could receive.
    if invocation.delivery == Delivery::Publish && invocation.task_id.is_some() {
        return Err(Error::invalid_argument(
            "task_id must be absent for published notifications",
        ));
    }
    Ok(())
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic (no message)".to_string()
    }
}

/// Run one handler attempt in its own task so a panic is captured
/// instead of unwinding into the worker. Notifications fan out through
/// `publish` and yield a null result.
async fn run_attempt(
    dispatcher: Arc<dyn RequestDispatcher>,
    request: JobRequest,
    delivery: Delivery,
) -> Result<serde_json::Value> {
    let handle = tokio::spawn(async move {
        match delivery {
            Delivery::Dispatch => dispatcher.dispatch(&request).await,
            Delivery::Publish => dispatcher
                .publish(&request)
                .await
                .map(|()| serde_json::Value::Null),
        }
    });
    match handle.await {
        Ok(result) => result,
        Err(join_err) if join_err.is_panic() => {
            let message = panic_message(join_err.into_panic());
            tracing::error!("handler_panic_recovered: panic={}", message);
            Err(Error::handler_failed(format!(
                "handler panicked: {}",
                message
            )))
        }
        Err(_) => Err(Error::handler_failed("handler task was aborted")),
    }
}

/// Execute a bridge invocation on a worker.
///
/// The handler runs at most `1 + retry_budget` times. On success the
/// result payload is delivered to the coordinator (when a task id is
/// present) and the job returns normally. On exhaustion, response-bearing
/// jobs deliver a `HandlerFailed` envelope and return normally;
/// fire-and-forget jobs re-raise the last error.
pub async fn execute(
    invocation: BridgeInvocation,
    dispatcher: Arc<dyn RequestDispatcher>,
    coordinator: Arc<dyn TaskCoordinator>,
) -> Result<()> {
    if let Err(err) = validate(&invocation) {
        // A valid task id means a waiter exists; it gets the validation
        // failure as its envelope instead of hanging until timeout.
        if let Some(task_id) = invocation
            .task_id
            .as_ref()
            .filter(|id| !id.as_str().is_empty())
        {
            let failure = TaskFailure::new(ErrorKind::InvalidArgument, err.to_string());
            coordinator
                .complete_task(task_id, TaskOutcome::Failure(failure))
                .await?;
            return Ok(());
        }
        return Err(err);
    }

    let max_attempts = invocation.retry_budget + 1;
    let mut failed_attempts = 0u32;

    loop {
        let result = run_attempt(
            Arc::clone(&dispatcher),
            invocation.request.clone(),
            invocation.delivery,
        )
        .await;

        match result {
            Ok(value) => {
                if let Some(task_id) = &invocation.task_id {
                    let outcome = match serde_json::to_vec(&value) {
                        Ok(payload) => TaskOutcome::Success(payload),
                        Err(err) => TaskOutcome::Failure(
                            TaskFailure::new(ErrorKind::SerializationFailed, err.to_string())
                                .with_origin(invocation.request.request_type.clone()),
                        ),
                    };
                    coordinator.complete_task(task_id, outcome).await?;
                }
                tracing::debug!(
                    "job_succeeded: display_name={}, attempts={}",
                    invocation.display_name,
                    failed_attempts + 1,
                );
                return Ok(());
            }
            Err(err) => {
                failed_attempts += 1;
                tracing::warn!(
                    "handler_attempt_failed: display_name={}, attempt={}/{}, error={}",
                    invocation.display_name,
                    failed_attempts,
                    max_attempts,
                    err,
                );

                if failed_attempts < max_attempts {
                    tokio::time::sleep(backoff_delay(failed_attempts)).await;
                    continue;
                }

                // Retry budget exhausted.
                if let Some(task_id) = &invocation.task_id {
                    let failure = TaskFailure::new(ErrorKind::HandlerFailed, err.to_string())
                        .with_origin(format!(
                            "{}::{}",
                            invocation.display_name, invocation.request.request_type
                        ));
                    coordinator
                        .complete_task(task_id, TaskOutcome::Failure(failure))
                        .await?;
                    return Ok(());
                }
                return Err(err);
            }
        }
    }
}

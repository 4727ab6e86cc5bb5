//! In-process job engine.
//!
//! A minimal [`JobEngine`] for single-process deployments and tests:
//! jobs run as spawned tasks on the current runtime under a concurrency
//! semaphore, bounded by the configured execution timeout. Named
//! recurring jobs are kept in a registry; their cron expression is stored
//! verbatim and they run when triggered (driving `trigger` from an
//! external scheduler tick is the deployment's concern).

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;

use super::{BridgeInvocation, JobEngine, ScheduleAt};
use crate::bridge;
use crate::coordinator::TaskCoordinator;
use crate::dispatch::RequestDispatcher;
use crate::types::{CourierOptions, Error, JobId, Result};
use crate::validation::validate_non_empty;

/// A named recurring job entry.
#[derive(Debug, Clone)]
pub struct RecurringJob {
    pub invocation: BridgeInvocation,
    pub cron_expr: String,
    pub zone: Option<String>,
}

/// Record of a finished job, retained for inspection until pruned.
#[derive(Debug, Clone)]
pub struct FinishedJob {
    pub job_id: JobId,
    pub display_name: String,
    pub succeeded: bool,
    pub finished_at: DateTime<Utc>,
}

/// In-process [`JobEngine`] implementation.
pub struct LocalJobEngine {
    dispatcher: Arc<dyn RequestDispatcher>,
    coordinator: Arc<dyn TaskCoordinator>,
    limiter: Arc<Semaphore>,
    execution_timeout: Duration,
    retention: Duration,
    auto_delete_successful: bool,
    recurring: Mutex<HashMap<String, RecurringJob>>,
    finished: Arc<Mutex<VecDeque<FinishedJob>>>,
}

impl std::fmt::Debug for LocalJobEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalJobEngine")
            .field("execution_timeout", &self.execution_timeout)
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

impl LocalJobEngine {
    pub fn new(
        dispatcher: Arc<dyn RequestDispatcher>,
        coordinator: Arc<dyn TaskCoordinator>,
        options: &CourierOptions,
    ) -> Self {
        Self {
            dispatcher,
            coordinator,
            limiter: Arc::new(Semaphore::new(options.max_concurrent_jobs)),
            execution_timeout: options.job_execution_timeout,
            retention: options.job_retention_period,
            auto_delete_successful: options.auto_delete_successful_jobs,
            recurring: Mutex::new(HashMap::new()),
            finished: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Snapshot of retained finished-job records.
    pub fn finished_jobs(&self) -> Vec<FinishedJob> {
        self.finished
            .lock()
            .expect("finished jobs lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// Names of the registered recurring jobs.
    pub fn recurring_names(&self) -> Vec<String> {
        self.recurring
            .lock()
            .expect("recurring jobs lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    fn spawn_job(&self, invocation: BridgeInvocation, delay: Duration) -> JobId {
        let job_id = JobId::generate();
        tracing::debug!(
            "job_enqueued: job_id={}, display_name={}, delay_ms={}",
            job_id,
            invocation.display_name,
            delay.as_millis(),
        );

        let dispatcher = Arc::clone(&self.dispatcher);
        let coordinator = Arc::clone(&self.coordinator);
        let limiter = Arc::clone(&self.limiter);
        let finished = Arc::clone(&self.finished);
        let execution_timeout = self.execution_timeout;
        let retention = self.retention;
        let auto_delete_successful = self.auto_delete_successful;
        let spawned_id = job_id.clone();

        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let Ok(_permit) = limiter.acquire_owned().await else {
                return;
            };

            let display_name = invocation.display_name.clone();
            let result = tokio::time::timeout(
                execution_timeout,
                bridge::execute(invocation, dispatcher, coordinator),
            )
            .await;

            let succeeded = match &result {
                Ok(Ok(())) => {
                    tracing::debug!(
                        "job_completed: job_id={}, display_name={}",
                        spawned_id,
                        display_name
                    );
                    true
                }
                Ok(Err(err)) => {
                    tracing::error!(
                        "job_failed: job_id={}, display_name={}, error={}",
                        spawned_id,
                        display_name,
                        err
                    );
                    false
                }
                Err(_elapsed) => {
                    tracing::error!(
                        "job_execution_timed_out: job_id={}, display_name={}, timeout_ms={}",
                        spawned_id,
                        display_name,
                        execution_timeout.as_millis(),
                    );
                    false
                }
            };

            let mut finished = finished.lock().expect("finished jobs lock poisoned");
            if !(succeeded && auto_delete_successful) {
                finished.push_back(FinishedJob {
                    job_id: spawned_id,
                    display_name,
                    succeeded,
                    finished_at: Utc::now(),
                });
            }
            // Prune records past the retention window.
            let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
            let cutoff = Utc::now() - retention;
            while finished
                .front()
                .map(|job| job.finished_at < cutoff)
                .unwrap_or(false)
            {
                finished.pop_front();
            }
        });

        job_id
    }
}

#[async_trait]
impl JobEngine for LocalJobEngine {
    async fn enqueue(&self, invocation: BridgeInvocation) -> Result<JobId> {
        Ok(self.spawn_job(invocation, Duration::ZERO))
    }

    async fn schedule(&self, invocation: BridgeInvocation, when: ScheduleAt) -> Result<JobId> {
        Ok(self.spawn_job(invocation, when.delay_from_now()))
    }

    async fn add_or_update(
        &self,
        name: &str,
        invocation: BridgeInvocation,
        cron_expr: &str,
        zone: Option<&str>,
    ) -> Result<()> {
        validate_non_empty(name, "name")?;
        validate_non_empty(cron_expr, "cron_expr")?;

        self.recurring
            .lock()
            .expect("recurring jobs lock poisoned")
            .insert(
                name.to_string(),
                RecurringJob {
                    invocation,
                    cron_expr: cron_expr.to_string(),
                    zone: zone.map(str::to_string),
                },
            );
        Ok(())
    }

    async fn trigger(&self, name: &str) -> Result<()> {
        let entry = self
            .recurring
            .lock()
            .expect("recurring jobs lock poisoned")
            .get(name)
            .cloned();
        match entry {
            Some(job) => {
                self.spawn_job(job.invocation, Duration::ZERO);
                Ok(())
            }
            None => Err(Error::not_found(format!(
                "recurring job {} is not registered",
                name
            ))),
        }
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.recurring
            .lock()
            .expect("recurring jobs lock poisoned")
            .remove(name);
        Ok(())
    }
}

// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::app::errors::{AppError, AppResult, codes};
use crate::app::ports::CommandRunnerPort;
use crate::app::services::slurm::{
    SACCT_FORMAT, SlurmStateClass, classify_slurm_state, parse_sacct_records,
};
use crate::app::types::SimpleDuration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedJob {
    pub job_id: String,
    pub scheduler_id: String,
    pub output_file_globs: Vec<String>,
    running_reported: bool,
    failed_deliveries: u32,
}

impl TrackedJob {
    pub fn new(job_id: &str, scheduler_id: &str, output_file_globs: Vec<String>) -> Self {
        Self {
            job_id: job_id.to_string(),
            scheduler_id: scheduler_id.to_string(),
            output_file_globs,
            running_reported: false,
            failed_deliveries: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlurmEvent {
    Running,
    Ended { elapsed: SimpleDuration },
    Failed { state: String, elapsed: SimpleDuration },
    Timeout { elapsed: SimpleDuration },
}

impl SlurmEvent {
    /// End events untrack the job, so they are the ones that must not be lost.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SlurmEvent::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlurmUpdate {
    pub job: TrackedJob,
    pub event: SlurmEvent,
}

/// Attempts at delivering an end event before the job is given up on.
pub const MAX_DELIVERY_ATTEMPTS: u32 = 3;

/// Receives scheduler events. End events whose delivery failed are delivered
/// again on the next tick, so listeners must tolerate repeats.
#[async_trait]
pub trait SlurmEventListener: Send + Sync {
    async fn on_event(&self, update: &SlurmUpdate) -> AppResult<()>;

    /// Called once the end event of `job` failed `MAX_DELIVERY_ATTEMPTS` times.
    async fn on_abandoned(&self, _job: &TrackedJob, _error: &AppError) {}
}

/// Polls `sacct` for every submitted job in one batch and turns scheduler state
/// changes into events. A job stops being tracked once its end state has been
/// delivered to every listener or given up on.
pub struct SlurmPollAgent {
    runner: Arc<dyn CommandRunnerPort>,
    // Keyed by scheduler id.
    tracked: Mutex<HashMap<String, TrackedJob>>,
    listeners: Mutex<Vec<Arc<dyn SlurmEventListener>>>,
}

impl SlurmPollAgent {
    pub fn new(runner: Arc<dyn CommandRunnerPort>) -> Self {
        Self {
            runner,
            tracked: Mutex::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn SlurmEventListener>) {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(listener);
    }

    fn listeners(&self) -> Vec<Arc<dyn SlurmEventListener>> {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Idempotent; re-tracking keeps the "running already reported" flag.
    pub fn track(&self, job_id: &str, scheduler_id: &str, output_file_globs: Vec<String>) {
        let mut tracked = self.lock();
        tracked
            .entry(scheduler_id.to_string())
            .or_insert_with(|| TrackedJob::new(job_id, scheduler_id, output_file_globs));
    }

    pub fn untrack(&self, job_id: &str) -> Option<TrackedJob> {
        let mut tracked = self.lock();
        let scheduler_id = tracked
            .values()
            .find(|job| job.job_id == job_id)
            .map(|job| job.scheduler_id.clone())?;
        tracked.remove(&scheduler_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, TrackedJob>> {
        self.tracked
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// One reconciliation tick: polls, then hands every update to every
    /// listener. Returns the number of updates seen.
    pub async fn tick(&self) -> AppResult<usize> {
        if self.is_empty() {
            return Ok(0);
        }
        let listeners = self.listeners();
        if listeners.is_empty() {
            return Err(AppError::internal(
                codes::BACKEND_ERROR,
                "no slurm event listener registered",
            ));
        }
        let updates = self.poll().await?;
        let count = updates.len();
        for update in updates {
            if let Err(err) = deliver(&listeners, &update).await {
                tracing::warn!(
                    "slurm event not delivered job_id={} event={:?} error={}",
                    update.job.job_id,
                    update.event,
                    err
                );
                if update.event.is_terminal() {
                    self.redeliver_or_abandon(&listeners, update.job, &err).await;
                }
            }
        }
        Ok(count)
    }

    async fn redeliver_or_abandon(
        &self,
        listeners: &[Arc<dyn SlurmEventListener>],
        mut job: TrackedJob,
        err: &AppError,
    ) {
        job.failed_deliveries += 1;
        if job.failed_deliveries < MAX_DELIVERY_ATTEMPTS {
            self.lock().entry(job.scheduler_id.clone()).or_insert(job);
            return;
        }
        tracing::error!(
            "giving up on slurm job job_id={} scheduler_id={} attempts={}",
            job.job_id,
            job.scheduler_id,
            job.failed_deliveries
        );
        for listener in listeners {
            listener.on_abandoned(&job, err).await;
        }
    }

    pub async fn poll(&self) -> AppResult<Vec<SlurmUpdate>> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        ids.sort();

        let command = format!(
            "sacct -X -n -P -j {} -o {SACCT_FORMAT}",
            ids.join(",")
        );
        let capture = self.runner.exec_capture(&command).await?;
        if !capture.success() {
            return Err(AppError::internal(
                codes::SCHEDULER_ERROR,
                format!("sacct exited with {}", capture.exit_code),
            )
            .with_context(capture.stderr_lossy()));
        }
        let records = parse_sacct_records(&capture.stdout_lossy()).map_err(|err| {
            AppError::internal(codes::SCHEDULER_ERROR, "unreadable sacct output")
                .with_context(err.to_string())
        })?;

        let mut updates = Vec::new();
        let mut tracked = self.lock();
        for record in records {
            let elapsed = SimpleDuration::from_millis(record.elapsed_secs.saturating_mul(1_000));
            let event = {
                let Some(job) = tracked.get_mut(&record.job_id) else {
                    continue;
                };
                match classify_slurm_state(&record.state) {
                    SlurmStateClass::Queued => continue,
                    SlurmStateClass::Running => {
                        if job.running_reported {
                            continue;
                        }
                        job.running_reported = true;
                        SlurmEvent::Running
                    }
                    SlurmStateClass::Completed => SlurmEvent::Ended { elapsed },
                    SlurmStateClass::Failed => SlurmEvent::Failed {
                        state: record.state.clone(),
                        elapsed,
                    },
                    SlurmStateClass::Timeout => SlurmEvent::Timeout { elapsed },
                }
            };
            let job = if event == SlurmEvent::Running {
                tracked.get(&record.job_id).cloned()
            } else {
                tracked.remove(&record.job_id)
            };
            let Some(job) = job else {
                continue;
            };
            tracing::debug!(
                "slurm state change job_id={} scheduler_id={} state={}",
                job.job_id,
                job.scheduler_id,
                record.state
            );
            updates.push(SlurmUpdate { job, event });
        }
        Ok(updates)
    }
}

/// Every listener sees the update even if an earlier one failed; the first
/// error is returned.
async fn deliver(listeners: &[Arc<dyn SlurmEventListener>], update: &SlurmUpdate) -> AppResult<()> {
    let mut first_error = None;
    for listener in listeners {
        if let Err(err) = listener.on_event(update).await {
            first_error.get_or_insert(err);
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::adapters::slurm::agent::{SlurmEvent, SlurmEventListener, SlurmUpdate, TrackedJob};
use crate::adapters::slurm::workspace::SlurmWorkspace;
use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::JobCallbackPort;
use crate::app::services::sbatch::{STDERR_FILE, STDOUT_FILE};
use crate::app::types::{JobState, JobStateChange, Principal, SimpleDuration};

pub const RUNNING_STATUS: &str = "Running on the cluster";
pub const COLLECTING_STATUS: &str = "Collecting output files";
pub const TIMEOUT_STATUS: &str = "Job exceeded its time limit";
pub const ABANDONED_STATUS: &str = "Could not collect the job result";

/// Translates scheduler events into orchestrator callbacks, acting as the
/// backend's principal.
pub struct SlurmEventBridge {
    principal: Principal,
    workspace: SlurmWorkspace,
    callbacks: Arc<dyn JobCallbackPort>,
}

impl SlurmEventBridge {
    pub fn new(
        principal: Principal,
        workspace: SlurmWorkspace,
        callbacks: Arc<dyn JobCallbackPort>,
    ) -> Self {
        Self {
            principal,
            workspace,
            callbacks,
        }
    }

    pub async fn handle(&self, update: &SlurmUpdate) -> AppResult<()> {
        let job_id = update.job.job_id.as_str();
        match &update.event {
            SlurmEvent::Running => {
                self.callbacks
                    .propose_state_change(
                        JobStateChange::new(job_id, JobState::Running),
                        Some(RUNNING_STATUS.to_string()),
                        &self.principal,
                    )
                    .await
            }
            SlurmEvent::Ended { elapsed } => {
                let collecting = self
                    .callbacks
                    .propose_state_change(
                        JobStateChange::new(job_id, JobState::TransferSuccess),
                        Some(COLLECTING_STATUS.to_string()),
                        &self.principal,
                    )
                    .await;
                match collecting {
                    Ok(()) => {}
                    // A redelivered event finds the job already collecting.
                    Err(err) if err.kind() == AppErrorKind::BadStateTransition => {
                        tracing::debug!("output collection already started job_id={}", job_id);
                    }
                    Err(err) => return Err(err),
                }
                self.push_outputs(job_id, &update.job.output_file_globs)
                    .await?;
                self.callbacks
                    .job_completed(job_id, Some(*elapsed), true, &self.principal)
                    .await
            }
            SlurmEvent::Failed { state, elapsed } => {
                self.fail(job_id, &format!("Slurm reported {state}"), Some(*elapsed))
                    .await
            }
            SlurmEvent::Timeout { elapsed } => {
                self.fail(job_id, TIMEOUT_STATUS, Some(*elapsed)).await
            }
        }
    }

    async fn fail(
        &self,
        job_id: &str,
        status: &str,
        elapsed: Option<SimpleDuration>,
    ) -> AppResult<()> {
        self.callbacks
            .add_status(job_id, status, &self.principal)
            .await?;
        self.callbacks
            .job_completed(job_id, elapsed, false, &self.principal)
            .await
    }

    async fn push_outputs(&self, job_id: &str, globs: &[String]) -> AppResult<()> {
        for (name, path) in [
            (STDOUT_FILE, self.workspace.stdout_path(job_id)),
            (STDERR_FILE, self.workspace.stderr_path(job_id)),
        ] {
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                self.push(job_id, name, &path).await?;
            }
        }

        let work_dir = self.workspace.work_dir(job_id);
        let matcher = build_matcher(globs)?;
        let outputs = tokio::task::spawn_blocking(move || collect_outputs(&work_dir, &matcher))
            .await
            .map_err(|err| {
                AppError::internal(codes::BACKEND_ERROR, "output scan aborted")
                    .with_context(err.to_string())
            })?;
        for (relative, path) in outputs {
            self.push(job_id, &relative, &path).await?;
        }
        Ok(())
    }

    async fn push(&self, job_id: &str, relative: &str, path: &Path) -> AppResult<()> {
        let file = tokio::fs::File::open(path).await.map_err(|err| io_error(path, err))?;
        let length = file
            .metadata()
            .await
            .map_err(|err| io_error(path, err))?
            .len();
        tracing::debug!("pushing output job_id={} path={} bytes={}", job_id, relative, length);
        self.callbacks
            .push_file(
                job_id,
                &self.principal,
                relative,
                length,
                Box::pin(file),
                false,
            )
            .await
    }
}

#[async_trait]
impl SlurmEventListener for SlurmEventBridge {
    async fn on_event(&self, update: &SlurmUpdate) -> AppResult<()> {
        self.handle(update).await
    }

    async fn on_abandoned(&self, job: &TrackedJob, error: &AppError) {
        tracing::warn!(
            "failing job with undeliverable result job_id={} error={}",
            job.job_id,
            error
        );
        if let Err(err) = self.fail(&job.job_id, ABANDONED_STATUS, None).await {
            tracing::error!("could not fail job job_id={} error={}", job.job_id, err);
        }
    }
}

fn build_matcher(globs: &[String]) -> AppResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for glob in globs {
        let glob = Glob::new(glob).map_err(|err| {
            AppError::internal(codes::BACKEND_ERROR, format!("invalid output glob '{glob}'"))
                .with_context(err.to_string())
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|err| {
        AppError::internal(codes::BACKEND_ERROR, "invalid output globs").with_context(err.to_string())
    })
}

/// Regular files below `work_dir` whose relative path matches `matcher`,
/// sorted by relative path.
fn collect_outputs(work_dir: &Path, matcher: &GlobSet) -> Vec<(String, PathBuf)> {
    if matcher.is_empty() {
        return Vec::new();
    }
    let mut outputs: Vec<(String, PathBuf)> = WalkDir::new(work_dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::warn!("skipping unreadable output entry: {err}");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let relative = entry.path().strip_prefix(work_dir).ok()?.to_path_buf();
            matcher
                .is_match(&relative)
                .then(|| (relative.to_string_lossy().into_owned(), entry.into_path()))
        })
        .collect();
    outputs.sort();
    outputs
}

fn io_error(path: &Path, err: std::io::Error) -> AppError {
    AppError::internal(codes::BACKEND_ERROR, format!("cannot read {}", path.display()))
        .with_context(err.to_string())
}

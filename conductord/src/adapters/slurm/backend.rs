// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use walkdir::WalkDir;

use crate::adapters::fs::unpack_tarball;
use crate::adapters::slurm::agent::SlurmPollAgent;
use crate::adapters::slurm::bridge::SlurmEventBridge;
use crate::adapters::slurm::workspace::{SlurmWorkspace, read_stream_slice};
use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{ByteStream, CommandRunnerPort, ComputationBackend, JobCallbackPort};
use crate::app::services::invocation::render_invocation;
use crate::app::services::sbatch::{SbatchSpec, render_sbatch_script};
use crate::app::services::shell::sh_escape;
use crate::app::services::slurm::parse_sbatch_job_id;
use crate::app::types::{
    ArchiveFormat, BackendMetadata, FollowStdStreamsRequest, InternalFollowStdStreamsResult,
    InternalVncParameters, InternalWebParameters, JobState, JobStateChange, Principal,
    ValidatedFileForUpload, VerifiedJob,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlurmSettings {
    pub principal: String,
    pub workspace_root: PathBuf,
    pub partition: Option<String>,
    pub account: Option<String>,
}

/// Runs jobs as sbatch submissions on the cluster reachable from this host.
///
/// The backend reports back through the orchestrator's callback port, which is
/// attached after construction because the orchestrator itself holds the
/// backend in its registry.
pub struct SlurmBackend {
    principal: Principal,
    settings: SlurmSettings,
    workspace: SlurmWorkspace,
    runner: Arc<dyn CommandRunnerPort>,
    agent: SlurmPollAgent,
    callbacks: OnceLock<Arc<dyn JobCallbackPort>>,
}

impl SlurmBackend {
    pub fn new(settings: SlurmSettings, runner: Arc<dyn CommandRunnerPort>) -> Self {
        Self {
            principal: Principal::provider(settings.principal.clone()),
            workspace: SlurmWorkspace::new(settings.workspace_root.clone()),
            agent: SlurmPollAgent::new(runner.clone()),
            settings,
            runner,
            callbacks: OnceLock::new(),
        }
    }

    /// Also registers the event bridge that reports poll results through
    /// `callbacks`.
    pub fn attach_callbacks(&self, callbacks: Arc<dyn JobCallbackPort>) {
        if self.callbacks.set(callbacks.clone()).is_err() {
            tracing::warn!("slurm backend callbacks already attached");
            return;
        }
        self.agent.add_listener(Arc::new(SlurmEventBridge::new(
            self.principal.clone(),
            self.workspace.clone(),
            callbacks,
        )));
    }

    fn callbacks(&self) -> AppResult<&Arc<dyn JobCallbackPort>> {
        self.callbacks.get().ok_or_else(|| {
            AppError::internal(codes::BACKEND_ERROR, "slurm backend is not attached")
        })
    }

    /// Resumes polling for jobs submitted by a previous process.
    pub fn resume_tracking(&self, jobs: &[VerifiedJob]) -> usize {
        let mut resumed = 0;
        for job in jobs {
            if let Some(scheduler_id) = job.scheduler_id.as_deref() {
                self.agent.track(
                    &job.id,
                    scheduler_id,
                    job.application.application.output_file_globs.clone(),
                );
                resumed += 1;
            }
        }
        resumed
    }

    pub fn tracked_jobs(&self) -> usize {
        self.agent.len()
    }

    /// One reconciliation tick. A failing event is logged and does not stop the
    /// remaining events of the batch.
    pub async fn poll_once(&self) -> AppResult<usize> {
        self.agent.tick().await
    }

    async fn report_submission(&self, job: &VerifiedJob, scheduler_id: &str) -> AppResult<()> {
        let callbacks = self.callbacks()?;
        callbacks
            .update_backend_metadata(
                &job.id,
                BackendMetadata {
                    scheduler_id: Some(scheduler_id.to_string()),
                    working_directory: Some(
                        self.workspace.job_dir(&job.id).to_string_lossy().into_owned(),
                    ),
                },
                &self.principal,
            )
            .await?;
        let scheduled = callbacks
            .propose_state_change(
                JobStateChange::new(&job.id, JobState::Scheduled),
                Some(format!("Queued as Slurm job {scheduler_id}")),
                &self.principal,
            )
            .await;
        match scheduled {
            Err(err) if err.kind() == AppErrorKind::BadStateTransition => {
                tracing::info!("job moved on before SCHEDULED was proposed: {}", err);
                Ok(())
            }
            other => other,
        }
    }

    async fn submit(&self, job: &VerifiedJob) -> AppResult<String> {
        let command = render_invocation(&job.application.application.invocation, &job.parameters);
        if command.is_empty() {
            return Err(AppError::internal(
                codes::BACKEND_ERROR,
                format!("application {} has no invocation", job.application_ref()),
            ));
        }
        let job_dir = self.workspace.job_dir(&job.id);
        let work_dir = self.workspace.work_dir(&job.id);
        let job_dir_str = job_dir.to_string_lossy();
        let work_dir_str = work_dir.to_string_lossy();
        let job_name = format!("{}-{}", job.application.application.name, job.id);
        let script = render_sbatch_script(&SbatchSpec {
            job_name: &job_name,
            nodes: job.nodes,
            tasks_per_node: job.tasks_per_node,
            max_time: job.max_time,
            log_dir: &job_dir_str,
            work_dir: &work_dir_str,
            partition: self.settings.partition.as_deref(),
            account: self.settings.account.as_deref(),
            container: job.application.tool.container.as_deref(),
            command: &command,
        });
        let script_path = self.workspace.script_path(&job.id);
        tokio::fs::write(&script_path, script)
            .await
            .map_err(|err| io_error("write job script", &script_path, err))?;

        let capture = self
            .runner
            .exec_capture(&format!(
                "sbatch --parsable {}",
                sh_escape(&script_path.to_string_lossy())
            ))
            .await?;
        if !capture.success() {
            return Err(AppError::internal(
                codes::SCHEDULER_ERROR,
                format!("sbatch exited with {}", capture.exit_code),
            )
            .with_context(capture.stderr_lossy()));
        }
        parse_sbatch_job_id(&capture.stdout_lossy()).ok_or_else(|| {
            AppError::internal(codes::SCHEDULER_ERROR, "sbatch returned no job id")
                .with_context(capture.stdout_lossy())
        })
    }
}

#[async_trait]
impl ComputationBackend for SlurmBackend {
    fn principal(&self) -> &Principal {
        &self.principal
    }

    async fn job_verified(&self, job: &VerifiedJob) -> AppResult<()> {
        self.workspace
            .prepare(&job.id)
            .await
            .map_err(|err| io_error("create workspace", &self.workspace.job_dir(&job.id), err))?;
        Ok(())
    }

    /// Idempotent: a `.scheduler_id` marker means the job was already submitted.
    #[tracing::instrument(name = "slurm", skip_all, fields(job_id = %job.id))]
    async fn job_prepared(&self, job: &VerifiedJob) -> AppResult<()> {
        let globs = job.application.application.output_file_globs.clone();
        let marker = self
            .workspace
            .read_marker(&job.id)
            .await
            .map_err(|err| io_error("read marker", &self.workspace.job_dir(&job.id), err))?;
        if let Some(scheduler_id) = marker {
            tracing::info!("job already submitted scheduler_id={}", scheduler_id);
            self.agent.track(&job.id, &scheduler_id, globs);
            return Ok(());
        }

        self.workspace
            .prepare(&job.id)
            .await
            .map_err(|err| io_error("create workspace", &self.workspace.job_dir(&job.id), err))?;
        let scheduler_id = self.submit(job).await?;
        self.workspace
            .write_marker(&job.id, &scheduler_id)
            .await
            .map_err(|err| io_error("write marker", &self.workspace.job_dir(&job.id), err))?;
        tracing::info!("submitted job scheduler_id={}", scheduler_id);

        // Tracked only once SCHEDULED was proposed so a poll cannot report the
        // job ahead of it. A failed report still tracks it so cleanup cancels it.
        let reported = self.report_submission(job, &scheduler_id).await;
        self.agent.track(&job.id, &scheduler_id, globs);
        reported
    }

    async fn submit_file(
        &self,
        job: &VerifiedJob,
        file: &ValidatedFileForUpload,
        mut data: ByteStream,
    ) -> AppResult<()> {
        let target = self
            .workspace
            .input_path(&job.id, &file.destination_path)
            .ok_or_else(|| {
                AppError::invalid_argument(format!(
                    "destination '{}' is outside the job workspace",
                    file.destination_path
                ))
            })?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| io_error("create directory", parent, err))?;
        }

        let written_to = match file.needs_extraction {
            Some(ArchiveFormat::Tar) => target.with_extension("staging.tar"),
            None => target.clone(),
        };
        let mut out = tokio::fs::File::create(&written_to)
            .await
            .map_err(|err| io_error("create input", &written_to, err))?;
        let bytes = tokio::io::copy(&mut data, &mut out)
            .await
            .map_err(|err| {
                AppError::transfer(format!("could not receive '{}'", file.id))
                    .with_context(err.to_string())
            })?;
        out.flush()
            .await
            .map_err(|err| io_error("write input", &written_to, err))?;
        drop(out);

        if file.needs_extraction.is_some() {
            let archive = written_to.clone();
            let dest = target.clone();
            tokio::task::spawn_blocking(move || unpack_tarball(&archive, &dest))
                .await
                .map_err(|err| io_error("extract input", &target, io::Error::other(err)))?
                .map_err(|err| io_error("extract input", &target, err))?;
            tokio::fs::remove_file(&written_to)
                .await
                .map_err(|err| io_error("remove archive", &written_to, err))?;
        }
        if file.read_only {
            let path = target.clone();
            tokio::task::spawn_blocking(move || make_read_only(&path))
                .await
                .map_err(|err| io_error("protect input", &target, io::Error::other(err)))?
                .map_err(|err| io_error("protect input", &target, err))?;
        }
        tracing::debug!(
            "staged input job_id={} id={} bytes={}",
            job.id,
            file.id,
            bytes
        );
        Ok(())
    }

    async fn follow(
        &self,
        job: &VerifiedJob,
        request: &FollowStdStreamsRequest,
    ) -> AppResult<InternalFollowStdStreamsResult> {
        let finished = job.current_state.is_final();
        let stdout_path = self.workspace.stdout_path(&job.id);
        let stderr_path = self.workspace.stderr_path(&job.id);
        let (stdout, stdout_next_line) = read_stream_slice(
            &stdout_path,
            request.stdout_line_start,
            request.stdout_max_lines,
            finished,
        )
        .await
        .map_err(|err| io_error("read stdout", &stdout_path, err))?;
        let (stderr, stderr_next_line) = read_stream_slice(
            &stderr_path,
            request.stderr_line_start,
            request.stderr_max_lines,
            finished,
        )
        .await
        .map_err(|err| io_error("read stderr", &stderr_path, err))?;
        Ok(InternalFollowStdStreamsResult {
            stdout,
            stdout_next_line,
            stderr,
            stderr_next_line,
        })
    }

    /// Cancels the scheduler job if it never reported an end state, then drops
    /// the work directory. Std-stream logs stay so they can still be followed.
    async fn cleanup(&self, job: &VerifiedJob) -> AppResult<()> {
        let mut cancel_error = None;
        if let Some(tracked) = self.agent.untrack(&job.id) {
            let capture = self
                .runner
                .exec_capture(&format!("scancel {}", sh_escape(&tracked.scheduler_id)))
                .await?;
            if !capture.success() {
                cancel_error = Some(
                    AppError::internal(
                        codes::SCHEDULER_ERROR,
                        format!("scancel exited with {}", capture.exit_code),
                    )
                    .with_context(capture.stderr_lossy()),
                );
            }
        }

        let work_dir = self.workspace.work_dir(&job.id);
        let dir = work_dir.clone();
        tokio::task::spawn_blocking(move || remove_tree(&dir))
            .await
            .map_err(|err| io_error("remove work dir", &work_dir, io::Error::other(err)))?
            .map_err(|err| io_error("remove work dir", &work_dir, err))?;
        match cancel_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn query_internal_vnc_parameters(
        &self,
        _job: &VerifiedJob,
    ) -> AppResult<InternalVncParameters> {
        Err(unsupported("VNC sessions"))
    }

    async fn query_internal_web_parameters(
        &self,
        _job: &VerifiedJob,
    ) -> AppResult<InternalWebParameters> {
        Err(unsupported("web sessions"))
    }
}

fn unsupported(feature: &str) -> AppError {
    AppError::with_message(
        AppErrorKind::Unsupported,
        codes::UNSUPPORTED,
        format!("{feature} are not supported by the slurm backend"),
    )
}

fn io_error(action: &str, path: &Path, err: io::Error) -> AppError {
    AppError::internal(
        codes::BACKEND_ERROR,
        format!("failed to {action} {}", path.display()),
    )
    .with_context(err.to_string())
}

/// Files become read-only; directories keep their bits so cleanup can remove them.
fn make_read_only(path: &Path) -> io::Result<()> {
    for entry in WalkDir::new(path).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        if entry.file_type().is_file() {
            let mut permissions = entry.metadata().map_err(io::Error::other)?.permissions();
            permissions.set_readonly(true);
            std::fs::set_permissions(entry.path(), permissions)?;
        }
    }
    Ok(())
}

fn remove_tree(path: &Path) -> io::Result<()> {
    match std::fs::remove_dir_all(path) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{
    AccountingPort, ByteStream, ClockPort, ComputationBackend, JobCallbackPort, JobStorePort,
    StateUpdate,
};
use crate::app::services::transitions::check_transition;
use crate::app::types::{
    AccessToken, AccountingEvent, BackendMetadata, FollowStdStreamsRequest,
    FollowStdStreamsResponse, JobState, JobStateChange, Page, PaginationRequest, Principal,
    SimpleDuration, StartJobRequest, UnverifiedJob, VerifiedJob, VerifiedJobWithAccessToken,
    VncParameters, WebParameters,
};
use crate::app::usecases::executor::TransitionExecutor;
use crate::app::usecases::registry::BackendRegistry;
use crate::app::usecases::staging::FileStagingService;
use crate::app::usecases::verification::VerificationService;

/// Age after which a job that has not finished is forced into FAILURE.
pub const JOB_MAX_TIME: Duration = Duration::from_secs(200 * 60 * 60);
pub const EXPIRED_STATUS: &str = "Job did not finish within the maximum allowed time";
pub const PREPARED_STATUS: &str = "Input files have been transferred";

const DEFAULT_WALL_DURATION_MS: u64 = 5_000;
const DUPLICATE_LOOKBACK: u32 = 10;
const MAX_TRANSITION_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The state moved and the entry side effect was dispatched.
    Applied,
    /// Same state, new status message.
    StatusUpdated,
    Unchanged,
}

/// Job lifecycle state machine.
///
/// Every state change goes through `apply_transition`: the table check and the
/// compare-and-set write happen first, and only then is the entry side effect of
/// the new state handed to the `TransitionExecutor`.
#[derive(Clone)]
pub struct Orchestrator {
    jobs: Arc<dyn JobStorePort>,
    verification: VerificationService,
    staging: FileStagingService,
    backends: Arc<BackendRegistry>,
    accounting: Arc<dyn AccountingPort>,
    clock: Arc<dyn ClockPort>,
    executor: TransitionExecutor,
    job_max_age: Duration,
}

impl Orchestrator {
    pub fn new(
        jobs: Arc<dyn JobStorePort>,
        verification: VerificationService,
        staging: FileStagingService,
        backends: BackendRegistry,
        accounting: Arc<dyn AccountingPort>,
        clock: Arc<dyn ClockPort>,
        executor: TransitionExecutor,
    ) -> Self {
        Self {
            jobs,
            verification,
            staging,
            backends: Arc::new(backends),
            accounting,
            clock,
            executor,
            job_max_age: JOB_MAX_TIME,
        }
    }

    pub fn with_job_max_age(mut self, job_max_age: Duration) -> Self {
        self.job_max_age = job_max_age;
        self
    }

    pub fn executor(&self) -> &TransitionExecutor {
        &self.executor
    }

    #[tracing::instrument(
        skip_all,
        fields(owner = %principal.username, application = %request.application)
    )]
    pub async fn start_job(
        &self,
        request: StartJobRequest,
        principal: &Principal,
        access_token: AccessToken,
    ) -> AppResult<String> {
        let accept_same_data_retry = request.accept_same_data_retry;
        let verified = self
            .verification
            .verify_or_throw(UnverifiedJob {
                request,
                principal: principal.clone(),
                access_token,
            })
            .await?;
        let backend = self
            .backends
            .get_and_verify_by_name(&verified.job.backend, None)?;
        if !accept_same_data_retry {
            self.check_for_duplicate_job(&verified.job).await?;
        }
        backend.job_verified(&verified.job).await?;
        self.jobs.create(&verified).await?;

        let job_id = verified.job.id.clone();
        tracing::info!(
            "job created job_id={} backend={}",
            job_id,
            verified.job.backend
        );
        if let Err(err) = self.dispatch_entry_effect(verified, JobState::Validated) {
            self.handle_job_error(&job_id, &err).await;
            return Err(err);
        }
        Ok(job_id)
    }

    /// The only way a backend moves one of its jobs forward.
    pub async fn handle_proposed_state_change(
        &self,
        change: JobStateChange,
        new_status: Option<String>,
        caller: &Principal,
    ) -> AppResult<TransitionOutcome> {
        let record = self.find_job_for_backend(&change.job_id, caller).await?;
        match self
            .apply_transition(record, change.new_state, new_status)
            .await
        {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.reject_or_fail(&change.job_id, &err).await;
                Err(err)
            }
        }
    }

    /// Proposes SUCCESS or FAILURE. Accounting is emitted only by the call that
    /// actually moves the job into SUCCESS.
    pub async fn handle_job_complete(
        &self,
        job_id: &str,
        wall_duration: Option<SimpleDuration>,
        success: bool,
        caller: &Principal,
    ) -> AppResult<()> {
        let record = self.find_job_for_backend(job_id, caller).await?;
        let target = if success {
            JobState::Success
        } else {
            JobState::Failure
        };
        let outcome = match self.apply_transition(record.clone(), target, None).await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.reject_or_fail(job_id, &err).await;
                return Err(err);
            }
        };
        if success && outcome == TransitionOutcome::Applied {
            let now = self.clock.now_millis();
            let wall_duration = wall_duration.unwrap_or_else(|| match record.job.started_at_ms {
                Some(started) => SimpleDuration::from_millis(now.saturating_sub(started).max(0) as u64),
                None => SimpleDuration::from_millis(DEFAULT_WALL_DURATION_MS),
            });
            self.accounting.job_completed(AccountingEvent {
                job_id: record.job.id.clone(),
                owner: record.job.owner.clone(),
                application: record.job.application_ref(),
                nodes: record.job.nodes,
                wall_duration,
                success: true,
                timestamp_ms: now,
            });
        }
        Ok(())
    }

    pub async fn handle_incoming_file(
        &self,
        job_id: &str,
        caller: &Principal,
        path: &str,
        length: u64,
        data: ByteStream,
        needs_extraction: bool,
    ) -> AppResult<()> {
        let record = self.find_job_for_backend(job_id, caller).await?;
        if let Err(err) = self
            .staging
            .accept_file(&record.job, path, length, data, needs_extraction)
            .await
        {
            self.handle_job_error(job_id, &err).await;
            return Err(err);
        }
        Ok(())
    }

    pub async fn add_status(&self, job_id: &str, status: &str, caller: &Principal) -> AppResult<()> {
        let record = self.find_job_for_backend(job_id, caller).await?;
        self.jobs
            .update_status(
                job_id,
                record.job.current_state,
                status,
                self.clock.now_millis(),
            )
            .await?;
        Ok(())
    }

    pub async fn update_backend_metadata(
        &self,
        job_id: &str,
        metadata: BackendMetadata,
        caller: &Principal,
    ) -> AppResult<()> {
        self.find_job_for_backend(job_id, caller).await?;
        self.jobs
            .update_backend_metadata(job_id, &metadata, self.clock.now_millis())
            .await
    }

    pub async fn follow_streams(
        &self,
        request: FollowStdStreamsRequest,
        principal: &Principal,
    ) -> AppResult<FollowStdStreamsResponse> {
        let record = self.find_owned_job(&request.job_id, principal).await?;
        let backend = self.backend_for(&record.job)?;
        let streams = backend.follow(&record.job, &request).await?;
        let job = record.job;
        Ok(FollowStdStreamsResponse {
            application: job.application_ref(),
            complete: job.current_state.is_final(),
            id: job.id,
            state: job.current_state,
            status: job.status,
            stdout: streams.stdout,
            stdout_next_line: streams.stdout_next_line,
            stderr: streams.stderr,
            stderr_next_line: streams.stderr_next_line,
        })
    }

    pub async fn find_job(&self, job_id: &str, principal: &Principal) -> AppResult<VerifiedJob> {
        Ok(self.find_owned_job(job_id, principal).await?.job)
    }

    pub async fn list_jobs(
        &self,
        principal: &Principal,
        pagination: PaginationRequest,
    ) -> AppResult<Page<VerifiedJob>> {
        let page = self
            .jobs
            .list(&principal.username, pagination.normalize())
            .await?;
        Ok(Page {
            items_in_total: page.items_in_total,
            items_per_page: page.items_per_page,
            page_number: page.page_number,
            items: page.items.into_iter().map(|r| r.job).collect(),
        })
    }

    pub async fn query_vnc_parameters(
        &self,
        job_id: &str,
        principal: &Principal,
    ) -> AppResult<VncParameters> {
        let job = self.find_running_job(job_id, principal).await?;
        let backend = self.backend_for(&job)?;
        Ok(backend.query_internal_vnc_parameters(&job).await?.into())
    }

    pub async fn query_web_parameters(
        &self,
        job_id: &str,
        principal: &Principal,
    ) -> AppResult<WebParameters> {
        let job = self.find_running_job(job_id, principal).await?;
        let backend = self.backend_for(&job)?;
        Ok(backend.query_internal_web_parameters(&job).await?.into())
    }

    /// Forces every unfinished job older than the maximum age into FAILURE.
    pub async fn remove_expired_jobs(&self) -> AppResult<usize> {
        let max_age_ms = i64::try_from(self.job_max_age.as_millis()).unwrap_or(i64::MAX);
        let cutoff = self.clock.now_millis().saturating_sub(max_age_ms);
        let candidates = self.jobs.find_unfinished_created_before(cutoff).await?;
        let mut expired = 0;
        for record in candidates
            .into_iter()
            .filter(|r| !r.job.current_state.is_final())
        {
            let job_id = record.job.id.clone();
            match self
                .apply_transition(record, JobState::Failure, Some(EXPIRED_STATUS.to_string()))
                .await
            {
                Ok(TransitionOutcome::Applied) => expired += 1,
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!("could not expire job job_id={} error={}", job_id, err);
                }
            }
        }
        if expired > 0 {
            tracing::info!("expired jobs count={}", expired);
        }
        Ok(expired)
    }

    /// Re-dispatches entry effects for jobs that were left in VALIDATED or
    /// PREPARED by a previous process. Both effects are idempotent.
    pub async fn replay_lost_jobs(&self) -> AppResult<usize> {
        let lost = self
            .jobs
            .find_in_states(&[JobState::Validated, JobState::Prepared])
            .await?;
        let count = lost.len();
        for record in lost {
            let state = record.job.current_state;
            let job_id = record.job.id.clone();
            if let Err(err) = self.dispatch_entry_effect(record, state) {
                tracing::warn!("could not replay job job_id={} error={}", job_id, err);
            }
        }
        if count > 0 {
            tracing::info!("replayed lost jobs count={}", count);
        }
        Ok(count)
    }

    async fn apply_transition(
        &self,
        mut record: VerifiedJobWithAccessToken,
        next: JobState,
        status: Option<String>,
    ) -> AppResult<TransitionOutcome> {
        for _ in 0..MAX_TRANSITION_ATTEMPTS {
            let current = record.job.current_state;
            if next == current {
                return self.update_status_only(&record.job, status.as_deref()).await;
            }
            check_transition(&record.job.id, current, next)?;

            let now = self.clock.now_millis();
            let update = StateUpdate {
                status: status.clone(),
                modified_at_ms: now,
                started_at_ms: (next == JobState::Running).then_some(now),
                failed_state: (next == JobState::Failure).then_some(current),
            };
            if self
                .jobs
                .transition(&record.job.id, current, next, &update)
                .await?
            {
                tracing::info!(
                    "job transition job_id={} from={} to={}",
                    record.job.id,
                    current,
                    next
                );
                let job = &mut record.job;
                job.current_state = next;
                job.modified_at_ms = now;
                if let Some(status) = update.status {
                    job.status = status;
                }
                if update.started_at_ms.is_some() {
                    job.started_at_ms = update.started_at_ms;
                }
                if update.failed_state.is_some() {
                    job.failed_state = update.failed_state;
                }
                self.after_transition(record, next).await;
                return Ok(TransitionOutcome::Applied);
            }
            tracing::debug!(
                "job state moved concurrently, re-reading job_id={}",
                record.job.id
            );
            record = self.require_job(&record.job.id).await?;
        }
        Err(AppError::with_message(
            AppErrorKind::Conflict,
            codes::CONFLICT,
            "job state is changing concurrently",
        )
        .with_context(format!("job_id={}", record.job.id)))
    }

    async fn update_status_only(
        &self,
        job: &VerifiedJob,
        status: Option<&str>,
    ) -> AppResult<TransitionOutcome> {
        match status {
            Some(status) if status != job.status => {
                let updated = self
                    .jobs
                    .update_status(&job.id, job.current_state, status, self.clock.now_millis())
                    .await?;
                Ok(if updated {
                    TransitionOutcome::StatusUpdated
                } else {
                    TransitionOutcome::Unchanged
                })
            }
            _ => Ok(TransitionOutcome::Unchanged),
        }
    }

    /// TRANSFER_SUCCESS is awaited: the result folder must exist before the
    /// backend starts pushing output files.
    async fn after_transition(&self, record: VerifiedJobWithAccessToken, next: JobState) {
        let job_id = record.job.id.clone();
        match self.dispatch_entry_effect(record, next) {
            Ok(handle) if next == JobState::TransferSuccess => {
                if let Err(err) = handle.await {
                    tracing::error!("entry effect panicked job_id={} error={}", job_id, err);
                }
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(
                    "could not dispatch entry effect job_id={} state={} error={}",
                    job_id,
                    next,
                    err
                );
            }
        }
    }

    fn dispatch_entry_effect(
        &self,
        record: VerifiedJobWithAccessToken,
        state: JobState,
    ) -> AppResult<JoinHandle<()>> {
        let this = self.clone();
        self.executor.dispatch(Box::pin(async move {
            let job_id = record.job.id.clone();
            if let Err(err) = this.entry_effect(record, state).await {
                this.handle_job_error(&job_id, &err).await;
            }
        }))
    }

    async fn entry_effect(
        &self,
        record: VerifiedJobWithAccessToken,
        state: JobState,
    ) -> AppResult<()> {
        match state {
            JobState::Validated => {
                let backend = self.backend_for(&record.job)?;
                self.staging
                    .transfer_files_to_compute(&record, backend.as_ref())
                    .await?;
                let current = self.require_job(&record.job.id).await?;
                self.apply_transition(current, JobState::Prepared, Some(PREPARED_STATUS.into()))
                    .await?;
                Ok(())
            }
            JobState::Prepared => {
                let backend = self.backend_for(&record.job)?;
                backend.job_prepared(&record.job).await
            }
            JobState::Scheduled | JobState::Running => Ok(()),
            JobState::TransferSuccess => {
                self.staging.initialize_result_folder(&record.job).await?;
                Ok(())
            }
            JobState::Success | JobState::Failure => {
                self.cleanup(&record.job).await;
                Ok(())
            }
        }
    }

    /// Never fails: a job must reach its terminal state even if the backend
    /// cannot clean up after it.
    async fn cleanup(&self, job: &VerifiedJob) {
        let result = match self.backend_for(job) {
            Ok(backend) => backend.cleanup(job).await,
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            tracing::warn!("backend cleanup failed job_id={} error={}", job.id, err);
        }
    }

    /// Rejections leave the job untouched; anything else fails it.
    async fn reject_or_fail(&self, job_id: &str, err: &AppError) {
        match err.kind() {
            AppErrorKind::BadStateTransition
            | AppErrorKind::Conflict
            | AppErrorKind::NotFound
            | AppErrorKind::PermissionDenied => {
                tracing::warn!("rejected job update job_id={} error={}", job_id, err);
            }
            _ => self.handle_job_error(job_id, err).await,
        }
    }

    async fn handle_job_error(&self, job_id: &str, err: &AppError) {
        tracing::warn!(
            "job processing failed job_id={} code={} error={}",
            job_id,
            err.code(),
            err
        );
        if let Err(fail_err) = self.fail_job(job_id, err.job_status_message()).await {
            tracing::error!("could not fail job job_id={} error={}", job_id, fail_err);
        }
    }

    /// Moves a job to FAILURE through the regular transition path. A job that is
    /// already in FAILURE is left alone so repeated errors cannot loop.
    pub async fn fail_job(&self, job_id: &str, message: &str) -> AppResult<()> {
        let Some(record) = self.jobs.find(job_id, None).await? else {
            return Ok(());
        };
        match record.job.current_state {
            JobState::Failure => Ok(()),
            JobState::Success => {
                tracing::debug!("not failing finished job job_id={}", job_id);
                Ok(())
            }
            _ => self
                .apply_transition(record, JobState::Failure, Some(message.to_string()))
                .await
                .map(|_| ()),
        }
    }

    async fn check_for_duplicate_job(&self, job: &VerifiedJob) -> AppResult<()> {
        let recent = self
            .jobs
            .latest_for_owner(&job.owner, DUPLICATE_LOOKBACK)
            .await?;
        if let Some(existing) = recent
            .iter()
            .find(|r| !r.job.current_state.is_final() && same_submission(&r.job, job))
        {
            return Err(AppError::with_message(
                AppErrorKind::Conflict,
                codes::CONFLICT,
                format!(
                    "an identical job ({}) is already in progress; \
                     set accept_same_data_retry to submit it again",
                    existing.job.id
                ),
            ));
        }
        Ok(())
    }

    fn backend_for(&self, job: &VerifiedJob) -> AppResult<Arc<dyn ComputationBackend>> {
        self.backends.get_and_verify_by_name(&job.backend, None)
    }

    async fn require_job(&self, job_id: &str) -> AppResult<VerifiedJobWithAccessToken> {
        self.jobs
            .find(job_id, None)
            .await?
            .ok_or_else(|| AppError::not_found(format!("job '{job_id}' not found")))
    }

    async fn find_job_for_backend(
        &self,
        job_id: &str,
        caller: &Principal,
    ) -> AppResult<VerifiedJobWithAccessToken> {
        let record = self.require_job(job_id).await?;
        self.backends
            .get_and_verify_by_name(&record.job.backend, Some(caller))?;
        Ok(record)
    }

    async fn find_owned_job(
        &self,
        job_id: &str,
        principal: &Principal,
    ) -> AppResult<VerifiedJobWithAccessToken> {
        self.jobs
            .find(job_id, Some(&principal.username))
            .await?
            .ok_or_else(|| AppError::not_found(format!("job '{job_id}' not found")))
    }

    async fn find_running_job(&self, job_id: &str, principal: &Principal) -> AppResult<VerifiedJob> {
        let job = self.find_owned_job(job_id, principal).await?.job;
        if job.current_state != JobState::Running {
            return Err(AppError::invalid_argument(format!(
                "job '{job_id}' is not running (state {})",
                job.current_state
            )));
        }
        Ok(job)
    }
}

fn same_submission(a: &VerifiedJob, b: &VerifiedJob) -> bool {
    let mount_sources = |job: &VerifiedJob| -> Vec<String> {
        job.mounts.iter().map(|m| m.source_path.clone()).collect()
    };
    a.application_ref() == b.application_ref()
        && a.parameters == b.parameters
        && a.nodes == b.nodes
        && a.tasks_per_node == b.tasks_per_node
        && a.max_time == b.max_time
        && a.backend == b.backend
        && mount_sources(a) == mount_sources(b)
}

#[async_trait]
impl JobCallbackPort for Orchestrator {
    async fn propose_state_change(
        &self,
        change: JobStateChange,
        new_status: Option<String>,
        caller: &Principal,
    ) -> AppResult<()> {
        self.handle_proposed_state_change(change, new_status, caller)
            .await
            .map(|_| ())
    }

    async fn job_completed(
        &self,
        job_id: &str,
        wall_duration: Option<SimpleDuration>,
        success: bool,
        caller: &Principal,
    ) -> AppResult<()> {
        self.handle_job_complete(job_id, wall_duration, success, caller)
            .await
    }

    async fn push_file(
        &self,
        job_id: &str,
        caller: &Principal,
        path: &str,
        length: u64,
        data: ByteStream,
        needs_extraction: bool,
    ) -> AppResult<()> {
        self.handle_incoming_file(job_id, caller, path, length, data, needs_extraction)
            .await
    }

    async fn add_status(&self, job_id: &str, status: &str, caller: &Principal) -> AppResult<()> {
        Orchestrator::add_status(self, job_id, status, caller).await
    }

    async fn update_backend_metadata(
        &self,
        job_id: &str,
        metadata: BackendMetadata,
        caller: &Principal,
    ) -> AppResult<()> {
        Orchestrator::update_backend_metadata(self, job_id, metadata, caller).await
    }
}

// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Fakes for the port traits, shared by unit tests across the crate.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::io::AsyncReadExt;

use crate::app::errors::{AppError, AppResult, codes};
use crate::app::ports::{
    AccountingPort, ApplicationCatalogPort, ByteStream, ClockPort, CommandRunnerPort,
    ComputationBackend, Download, ExecCapture, JobCallbackPort, StoragePort,
};
use crate::app::services::job_paths::{home_dir, is_within};
use crate::app::types::{
    AccessToken, AccountingEvent, ApplicationDescription, ApplicationParameter,
    ApplicationWithTool, ArchiveFormat, BackendMetadata, FileStat, FileType, FollowStdStreamsRequest,
    InternalFollowStdStreamsResult, InternalVncParameters, InternalWebParameters, JobState,
    JobStateChange, NameAndVersion, ParameterKind, ParameterValue, Principal, SimpleDuration, ToolDescription,
    ValidatedFileForUpload, VerifiedJob, VerifiedJobWithAccessToken,
};

pub fn figlet_app() -> ApplicationWithTool {
    ApplicationWithTool {
        application: ApplicationDescription {
            name: "figlet".into(),
            version: "1.0.0".into(),
            title: Some("Figlet".into()),
            tool: NameAndVersion::new("figlet", "1.0.0"),
            parameters: vec![ApplicationParameter {
                name: "text".into(),
                optional: false,
                default_value: None,
                kind: ParameterKind::Text,
            }],
            invocation: vec!["figlet".into(), "{text}".into()],
            output_file_globs: vec![],
        },
        tool: ToolDescription {
            name: "figlet".into(),
            version: "1.0.0".into(),
            default_number_of_nodes: 1,
            default_tasks_per_node: 1,
            default_max_time: SimpleDuration::new(1, 0, 0),
            container: None,
        },
    }
}

/// Application with one input file and one optional input directory.
pub fn word_count_app() -> ApplicationWithTool {
    ApplicationWithTool {
        application: ApplicationDescription {
            name: "wc".into(),
            version: "2.0".into(),
            title: None,
            tool: NameAndVersion::new("coreutils", "9.1"),
            parameters: vec![
                ApplicationParameter {
                    name: "input".into(),
                    optional: false,
                    default_value: None,
                    kind: ParameterKind::InputFile,
                },
                ApplicationParameter {
                    name: "extra".into(),
                    optional: true,
                    default_value: None,
                    kind: ParameterKind::InputDirectory,
                },
            ],
            invocation: vec!["wc".into(), "-l".into(), "{input}".into()],
            output_file_globs: vec!["*.out".into()],
        },
        tool: ToolDescription {
            name: "coreutils".into(),
            version: "9.1".into(),
            default_number_of_nodes: 2,
            default_tasks_per_node: 4,
            default_max_time: SimpleDuration::new(0, 30, 0),
            container: None,
        },
    }
}

pub fn sample_job(id: &str, owner: &str, created_at_ms: i64) -> VerifiedJobWithAccessToken {
    let mut parameters = BTreeMap::new();
    parameters.insert(
        "text".to_string(),
        ParameterValue::Text { value: "hi".into() },
    );
    VerifiedJobWithAccessToken {
        job: VerifiedJob {
            id: id.to_string(),
            owner: owner.to_string(),
            application: figlet_app(),
            nodes: 1,
            tasks_per_node: 1,
            max_time: SimpleDuration::new(1, 0, 0),
            parameters,
            files: vec![],
            mounts: vec![],
            backend: "slurm".into(),
            created_at_ms,
            current_state: JobState::Validated,
            status: "Validated".into(),
            modified_at_ms: created_at_ms,
            started_at_ms: None,
            failed_state: None,
            scheduler_id: None,
            working_directory: None,
        },
        access_token: AccessToken::new(format!("token-{owner}")),
    }
}

pub struct FakeClock {
    now: Mutex<OffsetDateTime>,
}

impl FakeClock {
    pub fn at_millis(millis: i64) -> Self {
        let now = OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
            .expect("valid timestamp");
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl ClockPort for FakeClock {
    fn now_utc(&self) -> OffsetDateTime {
        *self.now.lock().unwrap()
    }
}

#[derive(Default)]
pub struct RecordingAccounting {
    events: Mutex<Vec<AccountingEvent>>,
}

impl RecordingAccounting {
    pub fn events(&self) -> Vec<AccountingEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl AccountingPort for RecordingAccounting {
    fn job_completed(&self, event: AccountingEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[derive(Default)]
pub struct StaticCatalog {
    applications: HashMap<NameAndVersion, ApplicationWithTool>,
}

impl StaticCatalog {
    pub fn with(applications: Vec<ApplicationWithTool>) -> Self {
        Self {
            applications: applications
                .into_iter()
                .map(|app| (app.application.name_and_version(), app))
                .collect(),
        }
    }
}

#[async_trait]
impl ApplicationCatalogPort for StaticCatalog {
    async fn find_application(
        &self,
        application: &NameAndVersion,
    ) -> AppResult<Option<ApplicationWithTool>> {
        Ok(self.applications.get(application).cloned())
    }

    async fn list_applications(&self) -> AppResult<Vec<ApplicationDescription>> {
        Ok(self
            .applications
            .values()
            .map(|a| a.application.clone())
            .collect())
    }
}

/// Backend that records every call as `"<call>:<job id>"`.
pub struct RecordingBackend {
    principal: Principal,
    calls: Mutex<Vec<String>>,
    submitted: Mutex<Vec<(String, String, Vec<u8>)>>,
    pub fail_prepared: AtomicBool,
    pub fail_cleanup: AtomicBool,
    pub prepared_delay: Mutex<Option<Duration>>,
    pub follow_result: Mutex<InternalFollowStdStreamsResult>,
}

impl RecordingBackend {
    pub fn new(principal: &str) -> Self {
        Self {
            principal: Principal::provider(principal),
            calls: Mutex::new(Vec::new()),
            submitted: Mutex::new(Vec::new()),
            fail_prepared: AtomicBool::new(false),
            fail_cleanup: AtomicBool::new(false),
            prepared_delay: Mutex::new(None),
            follow_result: Mutex::new(InternalFollowStdStreamsResult::default()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        let prefix = format!("{call}:");
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .count()
    }

    /// `(job id, destination path, bytes)` per `submit_file` call.
    pub fn submitted(&self) -> Vec<(String, String, Vec<u8>)> {
        self.submitted.lock().unwrap().clone()
    }

    fn record(&self, call: &str, job: &VerifiedJob) {
        self.calls.lock().unwrap().push(format!("{call}:{}", job.id));
    }
}

#[async_trait]
impl ComputationBackend for RecordingBackend {
    fn principal(&self) -> &Principal {
        &self.principal
    }

    async fn job_verified(&self, job: &VerifiedJob) -> AppResult<()> {
        self.record("verified", job);
        Ok(())
    }

    async fn job_prepared(&self, job: &VerifiedJob) -> AppResult<()> {
        let delay = *self.prepared_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.record("prepared", job);
        if self.fail_prepared.load(Ordering::SeqCst) {
            return Err(AppError::internal(
                codes::BACKEND_ERROR,
                "sbatch: connection refused",
            ));
        }
        Ok(())
    }

    async fn submit_file(
        &self,
        job: &VerifiedJob,
        file: &ValidatedFileForUpload,
        mut data: ByteStream,
    ) -> AppResult<()> {
        let mut bytes = Vec::new();
        data.read_to_end(&mut bytes)
            .await
            .map_err(|e| AppError::transfer(e.to_string()))?;
        self.record("submit", job);
        self.submitted.lock().unwrap().push((
            job.id.clone(),
            file.destination_path.clone(),
            bytes,
        ));
        Ok(())
    }

    async fn follow(
        &self,
        job: &VerifiedJob,
        _request: &FollowStdStreamsRequest,
    ) -> AppResult<InternalFollowStdStreamsResult> {
        self.record("follow", job);
        Ok(self.follow_result.lock().unwrap().clone())
    }

    async fn cleanup(&self, job: &VerifiedJob) -> AppResult<()> {
        self.record("cleanup", job);
        if self.fail_cleanup.load(Ordering::SeqCst) {
            return Err(AppError::internal(codes::BACKEND_ERROR, "cleanup failed"));
        }
        Ok(())
    }

    async fn query_internal_vnc_parameters(
        &self,
        job: &VerifiedJob,
    ) -> AppResult<InternalVncParameters> {
        self.record("vnc", job);
        Ok(InternalVncParameters {
            host: "10.0.0.5".into(),
            port: 5901,
            path: format!("/vnc/{}", job.id),
            password: Some("pw".into()),
        })
    }

    async fn query_internal_web_parameters(
        &self,
        job: &VerifiedJob,
    ) -> AppResult<InternalWebParameters> {
        self.record("web", job);
        Ok(InternalWebParameters {
            host: "10.0.0.5".into(),
            port: 8080,
            path: format!("/web/{}", job.id),
        })
    }
}

enum Entry {
    File(Vec<u8>),
    Directory,
}

/// In-memory storage keyed by logical path.
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<BTreeMap<String, Entry>>,
    failing_downloads: Mutex<HashSet<String>>,
    extracted: Mutex<Vec<String>>,
}

impl MemoryStorage {
    pub fn put_file(&self, path: &str, bytes: &[u8]) {
        self.entries
            .lock()
            .unwrap()
            .insert(path.to_string(), Entry::File(bytes.to_vec()));
    }

    pub fn put_dir(&self, path: &str) {
        self.entries
            .lock()
            .unwrap()
            .insert(path.to_string(), Entry::Directory);
    }

    pub fn fail_download(&self, path: &str) {
        self.failing_downloads
            .lock()
            .unwrap()
            .insert(path.to_string());
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        match self.entries.lock().unwrap().get(path) {
            Some(Entry::File(bytes)) => Some(bytes.clone()),
            _ => None,
        }
    }

    pub fn is_dir(&self, path: &str) -> bool {
        matches!(
            self.entries.lock().unwrap().get(path),
            Some(Entry::Directory)
        )
    }

    pub fn extracted(&self) -> Vec<String> {
        self.extracted.lock().unwrap().clone()
    }

    fn check_owner(path: &str, username: &str) -> AppResult<()> {
        if is_within(&home_dir(username), path) {
            Ok(())
        } else {
            Err(AppError::permission_denied(format!(
                "{username} may not access {path}"
            )))
        }
    }
}

#[async_trait]
impl StoragePort for MemoryStorage {
    async fn stat(
        &self,
        path: &str,
        username: &str,
        _token: &AccessToken,
    ) -> AppResult<Option<FileStat>> {
        Self::check_owner(path, username)?;
        Ok(self.entries.lock().unwrap().get(path).map(|e| FileStat {
            path: path.to_string(),
            file_type: match e {
                Entry::File(_) => FileType::File,
                Entry::Directory => FileType::Directory,
            },
            size: match e {
                Entry::File(bytes) => bytes.len() as u64,
                Entry::Directory => 0,
            },
            modified_at_ms: 0,
        }))
    }

    async fn download(
        &self,
        path: &str,
        username: &str,
        _token: &AccessToken,
    ) -> AppResult<Download> {
        Self::check_owner(path, username)?;
        if self.failing_downloads.lock().unwrap().contains(path) {
            return Err(AppError::internal(codes::STORAGE_ERROR, "disk on fire"));
        }
        let (bytes, archive) = match self.entries.lock().unwrap().get(path) {
            Some(Entry::File(bytes)) => (bytes.clone(), None),
            Some(Entry::Directory) => (format!("tar:{path}").into_bytes(), Some(ArchiveFormat::Tar)),
            None => return Err(AppError::not_found(format!("{path} not found"))),
        };
        Ok(Download {
            length: Some(bytes.len() as u64),
            stream: Box::pin(std::io::Cursor::new(bytes)),
            archive,
        })
    }

    async fn create_directory(&self, path: &str, _owner: &str) -> AppResult<()> {
        self.put_dir(path);
        Ok(())
    }

    async fn upload(
        &self,
        path: &str,
        _owner: &str,
        _length: u64,
        mut data: ByteStream,
    ) -> AppResult<()> {
        let mut bytes = Vec::new();
        data.read_to_end(&mut bytes)
            .await
            .map_err(|e| AppError::transfer(e.to_string()))?;
        self.put_file(path, &bytes);
        Ok(())
    }

    async fn extract_archive(
        &self,
        path: &str,
        _owner: &str,
        _format: ArchiveFormat,
    ) -> AppResult<()> {
        self.entries.lock().unwrap().remove(path);
        self.extracted.lock().unwrap().push(path.to_string());
        Ok(())
    }
}

/// Command runner answering by command prefix; the latest matching rule wins.
/// Unmatched commands succeed with empty output.
#[derive(Default)]
pub struct FakeCommandRunner {
    rules: Mutex<Vec<(String, ExecCapture)>>,
    commands: Mutex<Vec<String>>,
}

impl FakeCommandRunner {
    pub fn respond(&self, prefix: &str, exit_code: i32, stdout: &str) {
        self.rules.lock().unwrap().push((
            prefix.to_string(),
            ExecCapture {
                stdout: stdout.as_bytes().to_vec(),
                stderr: if exit_code == 0 {
                    Vec::new()
                } else {
                    b"error: simulated failure".to_vec()
                },
                exit_code,
            },
        ));
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }
}

#[async_trait]
impl CommandRunnerPort for FakeCommandRunner {
    async fn exec_capture(&self, command: &str) -> AppResult<ExecCapture> {
        self.commands.lock().unwrap().push(command.to_string());
        let rules = self.rules.lock().unwrap();
        Ok(rules
            .iter()
            .rev()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
            .map(|(_, capture)| capture.clone())
            .unwrap_or_default())
    }
}

/// Callback sink recording what a backend reported, as
/// `"propose:<id>:<STATE>"`, `"status:<id>:<msg>"`, `"metadata:<id>:<scheduler id>"`,
/// `"push:<id>:<path>"` and `"completed:<id>:<success>"`.
#[derive(Default)]
pub struct RecordingCallbacks {
    calls: Mutex<Vec<String>>,
    files: Mutex<Vec<(String, Vec<u8>)>>,
    durations: Mutex<Vec<Option<SimpleDuration>>>,
    statuses: Mutex<Vec<Option<String>>>,
    proposal_failures: Mutex<Vec<AppError>>,
}

impl RecordingCallbacks {
    /// The next proposal fails with `err` and is not recorded.
    pub fn fail_next_proposal(&self, err: AppError) {
        self.proposal_failures.lock().unwrap().push(err);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// `(path, bytes)` per pushed file.
    pub fn files(&self) -> Vec<(String, Vec<u8>)> {
        self.files.lock().unwrap().clone()
    }

    pub fn durations(&self) -> Vec<Option<SimpleDuration>> {
        self.durations.lock().unwrap().clone()
    }

    /// Status messages attached to proposals, in order.
    pub fn proposal_statuses(&self) -> Vec<Option<String>> {
        self.statuses.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl JobCallbackPort for RecordingCallbacks {
    async fn propose_state_change(
        &self,
        change: JobStateChange,
        new_status: Option<String>,
        _caller: &Principal,
    ) -> AppResult<()> {
        {
            let mut failures = self.proposal_failures.lock().unwrap();
            if !failures.is_empty() {
                return Err(failures.remove(0));
            }
        }
        self.statuses.lock().unwrap().push(new_status);
        self.record(format!("propose:{}:{}", change.job_id, change.new_state));
        Ok(())
    }

    async fn job_completed(
        &self,
        job_id: &str,
        wall_duration: Option<SimpleDuration>,
        success: bool,
        _caller: &Principal,
    ) -> AppResult<()> {
        self.durations.lock().unwrap().push(wall_duration);
        self.record(format!("completed:{job_id}:{success}"));
        Ok(())
    }

    async fn push_file(
        &self,
        job_id: &str,
        _caller: &Principal,
        path: &str,
        _length: u64,
        mut data: ByteStream,
        _needs_extraction: bool,
    ) -> AppResult<()> {
        let mut bytes = Vec::new();
        data.read_to_end(&mut bytes)
            .await
            .map_err(|e| AppError::transfer(e.to_string()))?;
        self.files.lock().unwrap().push((path.to_string(), bytes));
        self.record(format!("push:{job_id}:{path}"));
        Ok(())
    }

    async fn add_status(&self, job_id: &str, status: &str, _caller: &Principal) -> AppResult<()> {
        self.record(format!("status:{job_id}:{status}"));
        Ok(())
    }

    async fn update_backend_metadata(
        &self,
        job_id: &str,
        metadata: BackendMetadata,
        _caller: &Principal,
    ) -> AppResult<()> {
        self.record(format!(
            "metadata:{job_id}:{}",
            metadata.scheduler_id.unwrap_or_default()
        ));
        Ok(())
    }
}

// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a job. See `services::transitions` for the allowed moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Validated,
    Prepared,
    Scheduled,
    Running,
    TransferSuccess,
    Success,
    Failure,
}

impl JobState {
    pub const ALL: [JobState; 7] = [
        JobState::Validated,
        JobState::Prepared,
        JobState::Scheduled,
        JobState::Running,
        JobState::TransferSuccess,
        JobState::Success,
        JobState::Failure,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Validated => "VALIDATED",
            JobState::Prepared => "PREPARED",
            JobState::Scheduled => "SCHEDULED",
            JobState::Running => "RUNNING",
            JobState::TransferSuccess => "TRANSFER_SUCCESS",
            JobState::Success => "SUCCESS",
            JobState::Failure => "FAILURE",
        }
    }

    pub fn is_final(self) -> bool {
        matches!(self, JobState::Success | JobState::Failure)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseJobStateError(pub String);

impl fmt::Display for ParseJobStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown job state: {}", self.0)
    }
}

impl std::error::Error for ParseJobStateError {}

impl FromStr for JobState {
    type Err = ParseJobStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        JobState::ALL
            .into_iter()
            .find(|state| state.as_str() == upper)
            .ok_or_else(|| ParseJobStateError(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Admin,
    Service,
    Provider,
}

/// Authenticated identity of a caller (an end user or a computation backend).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub username: String,
    pub role: Role,
}

impl Principal {
    pub fn user(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            role: Role::User,
        }
    }

    pub fn provider(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            role: Role::Provider,
        }
    }
}

/// Bearer credential used to act on behalf of the submitting user.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SimpleDuration {
    pub hours: u32,
    pub minutes: u32,
    pub seconds: u32,
}

impl SimpleDuration {
    pub fn new(hours: u32, minutes: u32, seconds: u32) -> Self {
        Self {
            hours,
            minutes,
            seconds,
        }
    }

    pub fn from_millis(millis: u64) -> Self {
        let total_secs = millis / 1000;
        Self {
            hours: (total_secs / 3600) as u32,
            minutes: ((total_secs % 3600) / 60) as u32,
            seconds: (total_secs % 60) as u32,
        }
    }

    pub fn to_millis(self) -> u64 {
        (u64::from(self.hours) * 3600 + u64::from(self.minutes) * 60 + u64::from(self.seconds))
            * 1000
    }

    pub fn is_valid(self) -> bool {
        self.minutes < 60 && self.seconds < 60 && self.to_millis() > 0
    }
}

/// Rendered as `HH:MM:SS`, which is also what `sbatch --time` accepts.
impl fmt::Display for SimpleDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}:{:02}",
            self.hours, self.minutes, self.seconds
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NameAndVersion {
    pub name: String,
    pub version: String,
}

impl NameAndVersion {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for NameAndVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescription {
    pub name: String,
    pub version: String,
    pub default_number_of_nodes: u32,
    pub default_tasks_per_node: u32,
    pub default_max_time: SimpleDuration,
    /// Optional container image; jobs run natively when absent.
    #[serde(default)]
    pub container: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParameterKind {
    InputFile,
    InputDirectory,
    Text,
    Boolean,
    Integer {
        #[serde(default)]
        min: Option<i64>,
        #[serde(default)]
        max: Option<i64>,
        #[serde(default)]
        unit: Option<String>,
    },
    FloatingPoint {
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
        #[serde(default)]
        unit: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationParameter {
    pub name: String,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub default_value: Option<serde_json::Value>,
    #[serde(flatten)]
    pub kind: ParameterKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationDescription {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub title: Option<String>,
    pub tool: NameAndVersion,
    #[serde(default)]
    pub parameters: Vec<ApplicationParameter>,
    /// Command line template; `{name}` tokens are replaced by parameter values.
    #[serde(default)]
    pub invocation: Vec<String>,
    #[serde(default)]
    pub output_file_globs: Vec<String>,
}

impl ApplicationDescription {
    pub fn name_and_version(&self) -> NameAndVersion {
        NameAndVersion::new(self.name.clone(), self.version.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationWithTool {
    pub application: ApplicationDescription,
    pub tool: ToolDescription,
}

/// Resolved and validated value for one application parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParameterValue {
    File {
        source: String,
        destination: String,
        is_directory: bool,
    },
    Text {
        value: String,
    },
    Boolean {
        value: bool,
    },
    Integer {
        value: i64,
    },
    FloatingPoint {
        value: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    File,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub path: String,
    pub file_type: FileType,
    pub size: u64,
    pub modified_at_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveFormat {
    Tar,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedFileForUpload {
    /// Parameter name, or `mount:<n>` for additional mounts.
    pub id: String,
    pub source_path: String,
    /// Absolute path inside the job workspace, e.g. `/work/input.txt`.
    pub destination_path: String,
    pub destination_file_name: String,
    pub stat: FileStat,
    pub needs_extraction: Option<ArchiveFormat>,
    pub read_only: bool,
}

/// Fully resolved job. The immutable part is created once by verification; the
/// state slice (`current_state` onwards) is overlaid from the persisted record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifiedJob {
    pub id: String,
    pub owner: String,
    pub application: ApplicationWithTool,
    pub nodes: u32,
    pub tasks_per_node: u32,
    pub max_time: SimpleDuration,
    pub parameters: BTreeMap<String, ParameterValue>,
    pub files: Vec<ValidatedFileForUpload>,
    pub mounts: Vec<ValidatedFileForUpload>,
    pub backend: String,
    pub created_at_ms: i64,
    pub current_state: JobState,
    pub status: String,
    #[serde(default)]
    pub modified_at_ms: i64,
    #[serde(default)]
    pub started_at_ms: Option<i64>,
    #[serde(default)]
    pub failed_state: Option<JobState>,
    #[serde(default)]
    pub scheduler_id: Option<String>,
    #[serde(default)]
    pub working_directory: Option<String>,
}

impl VerifiedJob {
    pub fn application_ref(&self) -> NameAndVersion {
        self.application.application.name_and_version()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifiedJobWithAccessToken {
    pub job: VerifiedJob,
    pub access_token: AccessToken,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountRequest {
    pub source: String,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StartJobRequest {
    pub application: NameAndVersion,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub number_of_nodes: Option<u32>,
    #[serde(default)]
    pub tasks_per_node: Option<u32>,
    #[serde(default)]
    pub max_time: Option<SimpleDuration>,
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub mounts: Vec<MountRequest>,
    #[serde(default)]
    pub accept_same_data_retry: bool,
}

impl Default for NameAndVersion {
    fn default() -> Self {
        Self::new("", "")
    }
}

#[derive(Debug, Clone)]
pub struct UnverifiedJob {
    pub request: StartJobRequest,
    pub principal: Principal,
    pub access_token: AccessToken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStateChange {
    pub job_id: String,
    pub new_state: JobState,
}

impl JobStateChange {
    pub fn new(job_id: impl Into<String>, new_state: JobState) -> Self {
        Self {
            job_id: job_id.into(),
            new_state,
        }
    }
}

/// Backend-assigned bookkeeping stored next to the job state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendMetadata {
    pub scheduler_id: Option<String>,
    pub working_directory: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowStdStreamsRequest {
    pub job_id: String,
    pub stdout_line_start: usize,
    pub stdout_max_lines: usize,
    pub stderr_line_start: usize,
    pub stderr_max_lines: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InternalFollowStdStreamsResult {
    pub stdout: String,
    pub stdout_next_line: usize,
    pub stderr: String,
    pub stderr_next_line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowStdStreamsResponse {
    pub id: String,
    pub application: NameAndVersion,
    pub state: JobState,
    pub status: String,
    pub complete: bool,
    pub stdout: String,
    pub stdout_next_line: usize,
    pub stderr: String,
    pub stderr_next_line: usize,
}

/// Provider-internal connection details; never returned to users as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalVncParameters {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VncParameters {
    pub path: String,
    pub password: Option<String>,
}

impl From<InternalVncParameters> for VncParameters {
    fn from(value: InternalVncParameters) -> Self {
        Self {
            path: value.path,
            password: value.password,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalWebParameters {
    pub host: String,
    pub port: u16,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebParameters {
    pub path: String,
}

impl From<InternalWebParameters> for WebParameters {
    fn from(value: InternalWebParameters) -> Self {
        Self { path: value.path }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountingEvent {
    pub job_id: String,
    pub owner: String,
    pub application: NameAndVersion,
    pub nodes: u32,
    pub wall_duration: SimpleDuration,
    pub success: bool,
    pub timestamp_ms: i64,
}

const ALLOWED_PAGE_SIZES: [u32; 4] = [10, 25, 50, 100];
const DEFAULT_PAGE_SIZE: u32 = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaginationRequest {
    pub items_per_page: Option<u32>,
    pub page: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizedPagination {
    pub items_per_page: u32,
    pub page: u32,
}

impl NormalizedPagination {
    pub fn offset(self) -> u64 {
        u64::from(self.items_per_page) * u64::from(self.page)
    }
}

impl PaginationRequest {
    pub fn new(items_per_page: u32, page: u32) -> Self {
        Self {
            items_per_page: Some(items_per_page),
            page: Some(page),
        }
    }

    pub fn normalize(self) -> NormalizedPagination {
        let items_per_page = self
            .items_per_page
            .filter(|size| ALLOWED_PAGE_SIZES.contains(size))
            .unwrap_or(DEFAULT_PAGE_SIZE);
        NormalizedPagination {
            items_per_page,
            page: self.page.unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items_in_total: u64,
    pub items_per_page: u32,
    pub page_number: u32,
    pub items: Vec<T>,
}

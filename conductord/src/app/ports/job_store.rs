// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::errors::AppResult;
use crate::app::types::{
    BackendMetadata, JobState, NormalizedPagination, Page, VerifiedJobWithAccessToken,
};

/// Mutable slice written together with a state change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateUpdate {
    pub status: Option<String>,
    pub modified_at_ms: i64,
    pub started_at_ms: Option<i64>,
    pub failed_state: Option<JobState>,
}

#[async_trait]
/// Durable job records. Only the state slice is mutable after `create`.
pub trait JobStorePort: Send + Sync {
    async fn create(&self, job: &VerifiedJobWithAccessToken) -> AppResult<()>;

    /// When `owner` is given, jobs owned by someone else are reported as absent.
    async fn find(
        &self,
        id: &str,
        owner: Option<&str>,
    ) -> AppResult<Option<VerifiedJobWithAccessToken>>;

    /// Compare-and-set on the state column. Returns `false` (and writes nothing)
    /// when the persisted state is no longer `expected`.
    async fn transition(
        &self,
        id: &str,
        expected: JobState,
        next: JobState,
        update: &StateUpdate,
    ) -> AppResult<bool>;

    /// Updates only the status message, provided the job is still in `expected`.
    async fn update_status(
        &self,
        id: &str,
        expected: JobState,
        status: &str,
        modified_at_ms: i64,
    ) -> AppResult<bool>;

    async fn update_backend_metadata(
        &self,
        id: &str,
        metadata: &BackendMetadata,
        modified_at_ms: i64,
    ) -> AppResult<()>;

    async fn list(
        &self,
        owner: &str,
        pagination: NormalizedPagination,
    ) -> AppResult<Page<VerifiedJobWithAccessToken>>;

    /// Jobs created before the cutoff that are not yet SUCCESS or FAILURE.
    async fn find_unfinished_created_before(
        &self,
        created_before_ms: i64,
    ) -> AppResult<Vec<VerifiedJobWithAccessToken>>;

    async fn find_in_states(&self, states: &[JobState])
    -> AppResult<Vec<VerifiedJobWithAccessToken>>;

    /// Most recently created jobs of `owner`, newest first.
    async fn latest_for_owner(
        &self,
        owner: &str,
        limit: u32,
    ) -> AppResult<Vec<VerifiedJobWithAccessToken>>;
}

// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;

use async_trait::async_trait;

use crate::adapters::db::{JobStore, JobStoreError};
use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{JobStorePort, StateUpdate};
use crate::app::types::{
    BackendMetadata, JobState, NormalizedPagination, Page, VerifiedJobWithAccessToken,
};

#[derive(Clone)]
pub struct SqliteStoreAdapter {
    store: Arc<JobStore>,
}

impl SqliteStoreAdapter {
    pub fn new(store: JobStore) -> Self {
        Self {
            store: Arc::new(store),
        }
    }
}

/// Persistence errors stop here; the app core only sees `AppError`.
fn map_store_error(err: JobStoreError) -> AppError {
    match err {
        JobStoreError::EmptyId => AppError::invalid_argument("job id must not be empty"),
        JobStoreError::DuplicateId(id) => AppError::with_message(
            AppErrorKind::Conflict,
            codes::CONFLICT,
            format!("job '{id}' already exists"),
        ),
        JobStoreError::NotFound(id) => AppError::not_found(format!("job '{id}' not found")),
        other => {
            AppError::internal(codes::STORAGE_ERROR, "job store failure").with_context(other.to_string())
        }
    }
}

#[async_trait]
impl JobStorePort for SqliteStoreAdapter {
    async fn create(&self, job: &VerifiedJobWithAccessToken) -> AppResult<()> {
        self.store.insert_job(job).await.map_err(map_store_error)
    }

    async fn find(
        &self,
        id: &str,
        owner: Option<&str>,
    ) -> AppResult<Option<VerifiedJobWithAccessToken>> {
        self.store.get_job(id, owner).await.map_err(map_store_error)
    }

    async fn transition(
        &self,
        id: &str,
        expected: JobState,
        next: JobState,
        update: &StateUpdate,
    ) -> AppResult<bool> {
        self.store
            .transition_job(id, expected, next, update)
            .await
            .map_err(map_store_error)
    }

    async fn update_status(
        &self,
        id: &str,
        expected: JobState,
        status: &str,
        modified_at_ms: i64,
    ) -> AppResult<bool> {
        self.store
            .update_status(id, expected, status, modified_at_ms)
            .await
            .map_err(map_store_error)
    }

    async fn update_backend_metadata(
        &self,
        id: &str,
        metadata: &BackendMetadata,
        modified_at_ms: i64,
    ) -> AppResult<()> {
        self.store
            .update_backend_metadata(id, metadata, modified_at_ms)
            .await
            .map_err(map_store_error)
    }

    async fn list(
        &self,
        owner: &str,
        pagination: NormalizedPagination,
    ) -> AppResult<Page<VerifiedJobWithAccessToken>> {
        self.store
            .list_jobs_for_owner(owner, pagination)
            .await
            .map_err(map_store_error)
    }

    async fn find_unfinished_created_before(
        &self,
        created_before_ms: i64,
    ) -> AppResult<Vec<VerifiedJobWithAccessToken>> {
        self.store
            .list_unfinished_created_before(created_before_ms)
            .await
            .map_err(map_store_error)
    }

    async fn find_in_states(
        &self,
        states: &[JobState],
    ) -> AppResult<Vec<VerifiedJobWithAccessToken>> {
        self.store
            .list_in_states(states)
            .await
            .map_err(map_store_error)
    }

    async fn latest_for_owner(
        &self,
        owner: &str,
        limit: u32,
    ) -> AppResult<Vec<VerifiedJobWithAccessToken>> {
        self.store
            .latest_for_owner(owner, limit)
            .await
            .map_err(map_store_error)
    }
}

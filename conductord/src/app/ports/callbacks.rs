// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::errors::AppResult;
use crate::app::ports::ByteStream;
use crate::app::types::{BackendMetadata, JobStateChange, Principal, SimpleDuration};

#[async_trait]
/// Inbound calls a backend makes about the jobs it owns. Every call is
/// authenticated as `caller` and checked against the job's backend.
pub trait JobCallbackPort: Send + Sync {
    async fn propose_state_change(
        &self,
        change: JobStateChange,
        new_status: Option<String>,
        caller: &Principal,
    ) -> AppResult<()>;

    /// `wall_duration` is derived from the RUNNING timestamp when absent.
    async fn job_completed(
        &self,
        job_id: &str,
        wall_duration: Option<SimpleDuration>,
        success: bool,
        caller: &Principal,
    ) -> AppResult<()>;

    async fn push_file(
        &self,
        job_id: &str,
        caller: &Principal,
        path: &str,
        length: u64,
        data: ByteStream,
        needs_extraction: bool,
    ) -> AppResult<()>;

    async fn add_status(&self, job_id: &str, status: &str, caller: &Principal) -> AppResult<()>;

    async fn update_backend_metadata(
        &self,
        job_id: &str,
        metadata: BackendMetadata,
        caller: &Principal,
    ) -> AppResult<()>;
}

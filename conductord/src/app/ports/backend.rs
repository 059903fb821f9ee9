// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::errors::AppResult;
use crate::app::ports::ByteStream;
use crate::app::types::{
    FollowStdStreamsRequest, InternalFollowStdStreamsResult, InternalVncParameters,
    InternalWebParameters, Principal, ValidatedFileForUpload, VerifiedJob,
};

#[async_trait]
/// Capability set every computation backend provides.
pub trait ComputationBackend: Send + Sync {
    /// Identity the backend authenticates as when it calls back.
    fn principal(&self) -> &Principal;

    async fn job_verified(&self, job: &VerifiedJob) -> AppResult<()>;

    /// The backend is expected to schedule the job on its own infrastructure.
    async fn job_prepared(&self, job: &VerifiedJob) -> AppResult<()>;

    async fn submit_file(
        &self,
        job: &VerifiedJob,
        file: &ValidatedFileForUpload,
        data: ByteStream,
    ) -> AppResult<()>;

    async fn follow(
        &self,
        job: &VerifiedJob,
        request: &FollowStdStreamsRequest,
    ) -> AppResult<InternalFollowStdStreamsResult>;

    async fn cleanup(&self, job: &VerifiedJob) -> AppResult<()>;

    async fn query_internal_vnc_parameters(
        &self,
        job: &VerifiedJob,
    ) -> AppResult<InternalVncParameters>;

    async fn query_internal_web_parameters(
        &self,
        job: &VerifiedJob,
    ) -> AppResult<InternalWebParameters>;
}

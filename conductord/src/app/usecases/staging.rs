// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;

use futures_util::future::try_join_all;

use crate::app::errors::{AppError, AppResult};
use crate::app::ports::{ByteStream, ComputationBackend, StoragePort};
use crate::app::services::job_paths::{resolve_within, result_folder};
use crate::app::types::{ArchiveFormat, VerifiedJob, VerifiedJobWithAccessToken};

/// Moves inputs to the backend and outputs into the owner's result folder.
#[derive(Clone)]
pub struct FileStagingService {
    storage: Arc<dyn StoragePort>,
}

impl FileStagingService {
    pub fn new(storage: Arc<dyn StoragePort>) -> Self {
        Self { storage }
    }

    pub fn result_folder(job: &VerifiedJob) -> String {
        result_folder(&job.owner, &job.application.application.name, &job.id)
    }

    /// Idempotent.
    pub async fn initialize_result_folder(&self, job: &VerifiedJob) -> AppResult<String> {
        let folder = Self::result_folder(job);
        self.storage.create_directory(&folder, &job.owner).await?;
        Ok(folder)
    }

    #[tracing::instrument(skip(self, job, data), fields(job_id = %job.id))]
    pub async fn accept_file(
        &self,
        job: &VerifiedJob,
        path: &str,
        length: u64,
        data: ByteStream,
        needs_extraction: bool,
    ) -> AppResult<()> {
        let folder = Self::result_folder(job);
        let target = resolve_within(&folder, path).ok_or_else(|| {
            AppError::invalid_argument(format!("output path '{path}' escapes the result folder"))
        })?;
        let parent = target.rsplit_once('/').map_or(folder.as_str(), |(p, _)| p);
        if parent != folder {
            self.storage.create_directory(parent, &job.owner).await?;
        }
        self.storage
            .upload(&target, &job.owner, length, data)
            .await?;
        if needs_extraction {
            self.storage
                .extract_archive(&target, &job.owner, ArchiveFormat::Tar)
                .await?;
        }
        tracing::debug!("accepted output file path={} bytes={}", target, length);
        Ok(())
    }

    /// All-or-nothing: every input is downloaded as the job owner and handed to
    /// the backend concurrently; the first failure aborts the whole transfer.
    pub async fn transfer_files_to_compute(
        &self,
        record: &VerifiedJobWithAccessToken,
        backend: &dyn ComputationBackend,
    ) -> AppResult<()> {
        let job = &record.job;
        let transfers = job.files.iter().chain(job.mounts.iter()).map(|file| async move {
            let download = self
                .storage
                .download(&file.source_path, &job.owner, &record.access_token)
                .await
                .map_err(|err| staging_error(&file.id, err))?;
            backend
                .submit_file(job, file, download.stream)
                .await
                .map_err(|err| staging_error(&file.id, err))
        });
        let staged = try_join_all(transfers).await?;
        tracing::info!(
            "staged input files job_id={} count={}",
            job.id,
            staged.len()
        );
        Ok(())
    }
}

fn staging_error(file_id: &str, err: AppError) -> AppError {
    AppError::transfer(format!("could not stage '{file_id}'")).with_context(err.to_string())
}

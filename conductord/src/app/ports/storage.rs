// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::pin::Pin;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::app::errors::AppResult;
use crate::app::types::{AccessToken, ArchiveFormat, FileStat};

pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

pub struct Download {
    pub stream: ByteStream,
    pub length: Option<u64>,
    /// Set when the storage packed a directory into an archive.
    pub archive: Option<ArchiveFormat>,
}

impl std::fmt::Debug for Download {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Download")
            .field("length", &self.length)
            .field("archive", &self.archive)
            .finish_non_exhaustive()
    }
}

#[async_trait]
/// Narrow storage contract used by verification and staging.
///
/// Reads carry the user's credential so storage can enforce the user's own
/// permissions. Writes into result folders are performed on the owner's behalf.
pub trait StoragePort: Send + Sync {
    async fn stat(
        &self,
        path: &str,
        username: &str,
        token: &AccessToken,
    ) -> AppResult<Option<FileStat>>;

    async fn download(&self, path: &str, username: &str, token: &AccessToken)
    -> AppResult<Download>;

    /// Idempotent.
    async fn create_directory(&self, path: &str, owner: &str) -> AppResult<()>;

    async fn upload(&self, path: &str, owner: &str, length: u64, data: ByteStream)
    -> AppResult<()>;

    /// Expands the archive at `path` into its parent directory and removes it.
    async fn extract_archive(&self, path: &str, owner: &str, format: ArchiveFormat)
    -> AppResult<()>;
}

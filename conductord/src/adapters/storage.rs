// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::adapters::fs::{pack_directory, unpack_tarball};
use crate::app::errors::{AppError, AppResult, codes};
use crate::app::ports::{ByteStream, Download, StoragePort};
use crate::app::services::job_paths::{home_dir, is_within, resolve_within};
use crate::app::types::{AccessToken, ArchiveFormat, FileStat, FileType};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid path '{0}'")]
    InvalidPath(String),
    #[error("{user} may not access '{path}'")]
    PermissionDenied { user: String, path: String },
    #[error("'{0}' not found")]
    NotFound(String),
    #[error("expected {expected} bytes for '{path}', received {actual}")]
    LengthMismatch {
        path: String,
        expected: u64,
        actual: u64,
    },
    #[error("io error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl StorageError {
    fn io(path: &str, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            StorageError::NotFound(path.to_string())
        } else {
            StorageError::Io {
                path: path.to_string(),
                source,
            }
        }
    }
}

fn map_storage_error(err: StorageError) -> AppError {
    match err {
        StorageError::InvalidPath(_) => AppError::invalid_argument(err.to_string()),
        StorageError::PermissionDenied { .. } => AppError::permission_denied(err.to_string()),
        StorageError::NotFound(_) => AppError::not_found(err.to_string()),
        StorageError::LengthMismatch { .. } => AppError::transfer(err.to_string()),
        StorageError::Io { .. } => {
            AppError::internal(codes::STORAGE_ERROR, "storage failure").with_context(err.to_string())
        }
    }
}

/// File storage on the local disk. Logical paths (`/home/<user>/...`) are mapped
/// below `root`; reads on behalf of a user must stay inside that user's home.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn normalize(path: &str) -> Result<String, StorageError> {
        resolve_within("", path).ok_or_else(|| StorageError::InvalidPath(path.to_string()))
    }

    fn physical(&self, logical: &str) -> PathBuf {
        self.root.join(logical.trim_start_matches('/'))
    }

    /// Normalizes `path` and checks it lies in the home of `user`.
    fn authorize(&self, path: &str, user: &str) -> Result<(String, PathBuf), StorageError> {
        let logical = Self::normalize(path)?;
        if !is_within(&home_dir(user), &logical) {
            return Err(StorageError::PermissionDenied {
                user: user.to_string(),
                path: logical,
            });
        }
        let physical = self.physical(&logical);
        Ok((logical, physical))
    }

    async fn stat_inner(&self, path: &str, user: &str) -> Result<Option<FileStat>, StorageError> {
        let (logical, physical) = self.authorize(path, user)?;
        let metadata = match tokio::fs::metadata(&physical).await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StorageError::io(&logical, err)),
        };
        let modified_at_ms = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_millis() as i64);
        Ok(Some(FileStat {
            path: logical,
            file_type: if metadata.is_dir() {
                FileType::Directory
            } else {
                FileType::File
            },
            size: metadata.len(),
            modified_at_ms,
        }))
    }

    async fn download_inner(&self, path: &str, user: &str) -> Result<Download, StorageError> {
        let (logical, physical) = self.authorize(path, user)?;
        let metadata = tokio::fs::metadata(&physical)
            .await
            .map_err(|err| StorageError::io(&logical, err))?;
        if metadata.is_dir() {
            let dir = physical.clone();
            let bytes = tokio::task::spawn_blocking(move || pack_directory(&dir))
                .await
                .map_err(|err| StorageError::io(&logical, io::Error::other(err)))?
                .map_err(|err| StorageError::io(&logical, err))?;
            tracing::debug!("packed directory path={} bytes={}", logical, bytes.len());
            return Ok(Download {
                length: Some(bytes.len() as u64),
                stream: Box::pin(io::Cursor::new(bytes)),
                archive: Some(ArchiveFormat::Tar),
            });
        }
        let file = tokio::fs::File::open(&physical)
            .await
            .map_err(|err| StorageError::io(&logical, err))?;
        Ok(Download {
            stream: Box::pin(file),
            length: Some(metadata.len()),
            archive: None,
        })
    }

    async fn upload_inner(
        &self,
        path: &str,
        owner: &str,
        length: u64,
        mut data: ByteStream,
    ) -> Result<(), StorageError> {
        let (logical, physical) = self.authorize(path, owner)?;
        if let Some(parent) = physical.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| StorageError::io(&logical, err))?;
        }
        let partial = partial_path(&physical);
        let mut file = tokio::fs::File::create(&partial)
            .await
            .map_err(|err| StorageError::io(&logical, err))?;
        let written = tokio::io::copy(&mut data, &mut file)
            .await
            .map_err(|err| StorageError::io(&logical, err))?;
        file.flush()
            .await
            .map_err(|err| StorageError::io(&logical, err))?;
        drop(file);
        if written != length {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(StorageError::LengthMismatch {
                path: logical,
                expected: length,
                actual: written,
            });
        }
        tokio::fs::rename(&partial, &physical)
            .await
            .map_err(|err| StorageError::io(&logical, err))
    }

    async fn extract_inner(&self, path: &str, owner: &str) -> Result<(), StorageError> {
        let (logical, physical) = self.authorize(path, owner)?;
        let dest = physical
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        let archive = physical.clone();
        tokio::task::spawn_blocking(move || unpack_tarball(&archive, &dest))
            .await
            .map_err(|err| StorageError::io(&logical, io::Error::other(err)))?
            .map_err(|err| StorageError::io(&logical, err))?;
        tokio::fs::remove_file(&physical)
            .await
            .map_err(|err| StorageError::io(&logical, err))
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

#[async_trait]
impl StoragePort for LocalStorage {
    #[tracing::instrument(name = "storage", level = "debug", skip(self, _token), fields(op = "stat"))]
    async fn stat(
        &self,
        path: &str,
        username: &str,
        _token: &AccessToken,
    ) -> AppResult<Option<FileStat>> {
        self.stat_inner(path, username)
            .await
            .map_err(map_storage_error)
    }

    #[tracing::instrument(name = "storage", level = "debug", skip(self, _token), fields(op = "download"))]
    async fn download(
        &self,
        path: &str,
        username: &str,
        _token: &AccessToken,
    ) -> AppResult<Download> {
        self.download_inner(path, username)
            .await
            .map_err(map_storage_error)
    }

    #[tracing::instrument(name = "storage", level = "debug", skip(self), fields(op = "mkdir"))]
    async fn create_directory(&self, path: &str, owner: &str) -> AppResult<()> {
        let (logical, physical) = self.authorize(path, owner).map_err(map_storage_error)?;
        tokio::fs::create_dir_all(&physical)
            .await
            .map_err(|err| map_storage_error(StorageError::io(&logical, err)))
    }

    #[tracing::instrument(name = "storage", level = "debug", skip(self, data), fields(op = "upload"))]
    async fn upload(
        &self,
        path: &str,
        owner: &str,
        length: u64,
        data: ByteStream,
    ) -> AppResult<()> {
        self.upload_inner(path, owner, length, data)
            .await
            .map_err(map_storage_error)
    }

    #[tracing::instrument(name = "storage", level = "debug", skip(self), fields(op = "extract"))]
    async fn extract_archive(
        &self,
        path: &str,
        owner: &str,
        format: ArchiveFormat,
    ) -> AppResult<()> {
        match format {
            ArchiveFormat::Tar => self
                .extract_inner(path, owner)
                .await
                .map_err(map_storage_error),
        }
    }
}

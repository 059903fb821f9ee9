// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use uuid::Uuid;

use crate::app::errors::{AppError, AppResult};
use crate::app::ports::{ApplicationCatalogPort, ClockPort, StoragePort};
use crate::app::services::job_paths::{WORKSPACE_ROOT, file_name, resolve_within};
use crate::app::services::parameters::{ParsedParameter, parse_parameter};
use crate::app::types::{
    AccessToken, ArchiveFormat, FileType, JobState, ParameterValue, SimpleDuration,
    UnverifiedJob, ValidatedFileForUpload, VerifiedJob, VerifiedJobWithAccessToken,
};

pub const VERIFIED_STATUS: &str = "Job has been validated";

/// Turns an untrusted start request into an immutable `VerifiedJob`.
#[derive(Clone)]
pub struct VerificationService {
    catalog: Arc<dyn ApplicationCatalogPort>,
    storage: Arc<dyn StoragePort>,
    clock: Arc<dyn ClockPort>,
    default_backend: String,
}

impl VerificationService {
    pub fn new(
        catalog: Arc<dyn ApplicationCatalogPort>,
        storage: Arc<dyn StoragePort>,
        clock: Arc<dyn ClockPort>,
        default_backend: impl Into<String>,
    ) -> Self {
        Self {
            catalog,
            storage,
            clock,
            default_backend: default_backend.into(),
        }
    }

    pub async fn verify_or_throw(
        &self,
        unverified: UnverifiedJob,
    ) -> AppResult<VerifiedJobWithAccessToken> {
        let UnverifiedJob {
            request,
            principal,
            access_token,
        } = unverified;
        let id = Uuid::new_v4().to_string();
        let owner = principal.username;

        let application = self
            .catalog
            .find_application(&request.application)
            .await?
            .ok_or_else(|| {
                AppError::not_found(format!("application '{}' not found", request.application))
            })?;

        let declared: HashSet<&str> = application
            .application
            .parameters
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        if let Some(unknown) = request
            .parameters
            .keys()
            .find(|name| !declared.contains(name.as_str()))
        {
            return Err(AppError::verification(format!(
                "unknown parameter '{unknown}'"
            )));
        }

        let mut parameters = BTreeMap::new();
        let mut files = Vec::new();
        let mut destinations = HashSet::new();
        for param in &application.application.parameters {
            let Some(parsed) = parse_parameter(param, request.parameters.get(&param.name))? else {
                continue;
            };
            let value = match parsed {
                ParsedParameter::Value(value) => value,
                ParsedParameter::File {
                    source,
                    destination,
                    directory,
                } => {
                    let file = self
                        .verify_file(
                            &param.name,
                            &source,
                            destination.as_deref(),
                            directory,
                            &owner,
                            &access_token,
                            false,
                        )
                        .await?;
                    if !destinations.insert(file.destination_path.clone()) {
                        return Err(AppError::verification(format!(
                            "parameter '{}' reuses destination {}",
                            param.name, file.destination_path
                        )));
                    }
                    let value = ParameterValue::File {
                        source: file.source_path.clone(),
                        destination: file.destination_path.clone(),
                        is_directory: directory,
                    };
                    files.push(file);
                    value
                }
            };
            parameters.insert(param.name.clone(), value);
        }

        let mut mounts = Vec::with_capacity(request.mounts.len());
        for (idx, mount) in request.mounts.iter().enumerate() {
            let file = self
                .verify_file(
                    &format!("mount:{idx}"),
                    &mount.source,
                    None,
                    true,
                    &owner,
                    &access_token,
                    mount.read_only,
                )
                .await?;
            if !destinations.insert(file.destination_path.clone()) {
                return Err(AppError::verification(format!(
                    "mount '{}' collides with {}",
                    mount.source, file.destination_path
                )));
            }
            mounts.push(file);
        }

        let tool = &application.tool;
        let nodes = request.number_of_nodes.unwrap_or(tool.default_number_of_nodes);
        let tasks_per_node = request.tasks_per_node.unwrap_or(tool.default_tasks_per_node);
        let max_time = request.max_time.unwrap_or(tool.default_max_time);
        validate_resources(nodes, tasks_per_node, max_time)?;

        let backend = request
            .backend
            .clone()
            .filter(|b| !b.trim().is_empty())
            .unwrap_or_else(|| self.default_backend.clone());
        let now = self.clock.now_millis();

        tracing::debug!(
            "verified job id={} owner={} application={} files={} mounts={}",
            id,
            owner,
            request.application,
            files.len(),
            mounts.len()
        );
        Ok(VerifiedJobWithAccessToken {
            job: VerifiedJob {
                id,
                owner,
                application,
                nodes,
                tasks_per_node,
                max_time,
                parameters,
                files,
                mounts,
                backend,
                created_at_ms: now,
                current_state: JobState::Validated,
                status: VERIFIED_STATUS.to_string(),
                modified_at_ms: now,
                started_at_ms: None,
                failed_state: None,
                scheduler_id: None,
                working_directory: None,
            },
            access_token,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn verify_file(
        &self,
        id: &str,
        source: &str,
        destination: Option<&str>,
        directory: bool,
        owner: &str,
        token: &AccessToken,
        read_only: bool,
    ) -> AppResult<ValidatedFileForUpload> {
        let stat = self
            .storage
            .stat(source, owner, token)
            .await?
            .ok_or_else(|| AppError::verification(format!("'{id}': {source} does not exist")))?;
        let expected = if directory {
            FileType::Directory
        } else {
            FileType::File
        };
        if stat.file_type != expected {
            let wanted = if directory { "a directory" } else { "a file" };
            return Err(AppError::verification(format!(
                "'{id}': {source} is not {wanted}"
            )));
        }

        let requested = destination.unwrap_or_else(|| file_name(source));
        let destination_path = resolve_within(WORKSPACE_ROOT, requested).ok_or_else(|| {
            AppError::verification(format!(
                "'{id}': destination '{requested}' is outside the job workspace"
            ))
        })?;
        let destination_file_name = file_name(&destination_path).to_string();

        Ok(ValidatedFileForUpload {
            id: id.to_string(),
            source_path: source.to_string(),
            destination_path,
            destination_file_name,
            stat,
            needs_extraction: directory.then_some(ArchiveFormat::Tar),
            read_only,
        })
    }
}

fn validate_resources(nodes: u32, tasks_per_node: u32, max_time: SimpleDuration) -> AppResult<()> {
    if nodes == 0 {
        return Err(AppError::verification("number of nodes must be at least 1"));
    }
    if tasks_per_node == 0 {
        return Err(AppError::verification("tasks per node must be at least 1"));
    }
    if !max_time.is_valid() {
        return Err(AppError::verification(format!(
            "invalid max time {max_time}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::errors::AppErrorKind;
    use crate::app::testing::{
        FakeClock, MemoryStorage, StaticCatalog, figlet_app, word_count_app,
    };
    use crate::app::types::{MountRequest, NameAndVersion, Principal, StartJobRequest};
    use serde_json::json;

    fn service(storage: Arc<MemoryStorage>) -> VerificationService {
        VerificationService::new(
            Arc::new(StaticCatalog::with(vec![figlet_app(), word_count_app()])),
            storage,
            Arc::new(FakeClock::at_millis(42_000)),
            "slurm",
        )
    }

    fn unverified(request: StartJobRequest) -> UnverifiedJob {
        UnverifiedJob {
            request,
            principal: Principal::user("alice"),
            access_token: AccessToken::new("tok"),
        }
    }

    fn wc_request(parameters: serde_json::Value) -> StartJobRequest {
        StartJobRequest {
            application: NameAndVersion::new("wc", "2.0"),
            parameters: serde_json::from_value(parameters).unwrap(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn verifies_figlet_with_tool_defaults() {
        let svc = service(Arc::new(MemoryStorage::default()));
        let request = StartJobRequest {
            application: NameAndVersion::new("figlet", "1.0.0"),
            parameters: serde_json::from_value(json!({"text": "hi"})).unwrap(),
            ..Default::default()
        };
        let verified = svc.verify_or_throw(unverified(request)).await.unwrap();
        let job = verified.job;

        assert!(Uuid::parse_str(&job.id).is_ok());
        assert_eq!(job.owner, "alice");
        assert_eq!(job.nodes, 1);
        assert_eq!(job.tasks_per_node, 1);
        assert_eq!(job.max_time, SimpleDuration::new(1, 0, 0));
        assert_eq!(job.backend, "slurm");
        assert_eq!(job.current_state, JobState::Validated);
        assert_eq!(job.created_at_ms, 42_000);
        assert!(job.files.is_empty());
        assert_eq!(
            job.parameters.get("text"),
            Some(&ParameterValue::Text { value: "hi".into() })
        );
        assert_eq!(verified.access_token.expose(), "tok");
    }

    #[tokio::test]
    async fn generates_fresh_ids() {
        let svc = service(Arc::new(MemoryStorage::default()));
        let request = StartJobRequest {
            application: NameAndVersion::new("figlet", "1.0.0"),
            parameters: serde_json::from_value(json!({"text": "hi"})).unwrap(),
            ..Default::default()
        };
        let a = svc.verify_or_throw(unverified(request.clone())).await.unwrap();
        let b = svc.verify_or_throw(unverified(request)).await.unwrap();
        assert_ne!(a.job.id, b.job.id);
    }

    #[tokio::test]
    async fn unknown_application_is_not_found() {
        let svc = service(Arc::new(MemoryStorage::default()));
        let request = StartJobRequest {
            application: NameAndVersion::new("nope", "0"),
            ..Default::default()
        };
        let err = svc.verify_or_throw(unverified(request)).await.unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::NotFound);
    }

    #[tokio::test]
    async fn rejects_unknown_and_mistyped_parameters() {
        let svc = service(Arc::new(MemoryStorage::default()));
        let request = StartJobRequest {
            application: NameAndVersion::new("figlet", "1.0.0"),
            parameters: serde_json::from_value(json!({"text": "hi", "font": "big"})).unwrap(),
            ..Default::default()
        };
        let err = svc.verify_or_throw(unverified(request)).await.unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::Verification);
        assert!(err.message().contains("'font'"));

        let request = StartJobRequest {
            application: NameAndVersion::new("figlet", "1.0.0"),
            parameters: serde_json::from_value(json!({"text": 5})).unwrap(),
            ..Default::default()
        };
        let err = svc.verify_or_throw(unverified(request)).await.unwrap_err();
        assert!(err.message().contains("'text'"));
    }

    #[tokio::test]
    async fn resolves_files_into_the_workspace() {
        let storage = Arc::new(MemoryStorage::default());
        storage.put_file("/home/alice/data/in.txt", b"a\nb\n");
        storage.put_dir("/home/alice/refs");
        let svc = service(storage);

        let request = wc_request(json!({
            "input": "/home/alice/data/in.txt",
            "extra": {"source": "/home/alice/refs", "destination": "/inputs/refs"}
        }));
        let job = svc.verify_or_throw(unverified(request)).await.unwrap().job;

        assert_eq!(job.files.len(), 2);
        let input = &job.files[0];
        assert_eq!(input.id, "input");
        assert_eq!(input.destination_path, "/work/in.txt");
        assert_eq!(input.destination_file_name, "in.txt");
        assert_eq!(input.needs_extraction, None);
        assert_eq!(input.stat.size, 4);

        let extra = &job.files[1];
        assert_eq!(extra.destination_path, "/work/inputs/refs");
        assert_eq!(extra.needs_extraction, Some(ArchiveFormat::Tar));
        assert_eq!(job.nodes, 2);
        assert_eq!(job.tasks_per_node, 4);
    }

    #[tokio::test]
    async fn rejects_destination_escaping_the_workspace() {
        let storage = Arc::new(MemoryStorage::default());
        storage.put_file("/home/alice/in.txt", b"x");
        let svc = service(storage);

        let request = wc_request(json!({
            "input": {"source": "/home/alice/in.txt", "destination": "../../etc/cron.d/x"}
        }));
        let err = svc.verify_or_throw(unverified(request)).await.unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::Verification);
        assert!(err.message().contains("outside the job workspace"));
    }

    #[tokio::test]
    async fn rejects_missing_files_and_type_mismatches() {
        let storage = Arc::new(MemoryStorage::default());
        storage.put_dir("/home/alice/dir");
        let svc = service(storage);

        let err = svc
            .verify_or_throw(unverified(wc_request(json!({"input": "/home/alice/none"}))))
            .await
            .unwrap_err();
        assert!(err.message().contains("does not exist"));

        let err = svc
            .verify_or_throw(unverified(wc_request(json!({"input": "/home/alice/dir"}))))
            .await
            .unwrap_err();
        assert!(err.message().contains("is not a file"));
    }

    #[tokio::test]
    async fn foreign_files_are_refused_by_storage() {
        let storage = Arc::new(MemoryStorage::default());
        storage.put_file("/home/bob/secret", b"x");
        let svc = service(storage);

        let err = svc
            .verify_or_throw(unverified(wc_request(json!({"input": "/home/bob/secret"}))))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::PermissionDenied);
    }

    #[tokio::test]
    async fn mounts_and_explicit_resources() {
        let storage = Arc::new(MemoryStorage::default());
        storage.put_file("/home/alice/in.txt", b"x");
        storage.put_dir("/home/alice/shared");
        let svc = service(storage);

        let mut request = wc_request(json!({"input": "/home/alice/in.txt"}));
        request.mounts = vec![MountRequest {
            source: "/home/alice/shared".into(),
            read_only: true,
        }];
        request.number_of_nodes = Some(3);
        request.max_time = Some(SimpleDuration::new(2, 0, 0));
        request.backend = Some("kubernetes".into());
        let job = svc.verify_or_throw(unverified(request)).await.unwrap().job;

        assert_eq!(job.mounts.len(), 1);
        assert_eq!(job.mounts[0].id, "mount:0");
        assert_eq!(job.mounts[0].destination_path, "/work/shared");
        assert!(job.mounts[0].read_only);
        assert_eq!(job.nodes, 3);
        assert_eq!(job.tasks_per_node, 4);
        assert_eq!(job.max_time, SimpleDuration::new(2, 0, 0));
        assert_eq!(job.backend, "kubernetes");
    }

    #[tokio::test]
    async fn rejects_invalid_resources() {
        let storage = Arc::new(MemoryStorage::default());
        storage.put_file("/home/alice/in.txt", b"x");
        let svc = service(storage);

        let mut request = wc_request(json!({"input": "/home/alice/in.txt"}));
        request.number_of_nodes = Some(0);
        assert!(svc.verify_or_throw(unverified(request)).await.is_err());

        let mut request = wc_request(json!({"input": "/home/alice/in.txt"}));
        request.max_time = Some(SimpleDuration::new(0, 75, 0));
        assert!(svc.verify_or_throw(unverified(request)).await.is_err());
    }
}

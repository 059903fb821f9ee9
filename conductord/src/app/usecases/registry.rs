// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;
use std::sync::Arc;

use crate::app::errors::{AppError, AppResult};
use crate::app::ports::ComputationBackend;
use crate::app::types::Principal;

/// Resolves logical backend names and guards backend callbacks.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn ComputationBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, backend: Arc<dyn ComputationBackend>) {
        self.backends.insert(name.into(), backend);
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.backends.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// With `caller` set, only the backend's own principal is accepted; this is
    /// what stops one backend from acting on another backend's jobs.
    pub fn get_and_verify_by_name(
        &self,
        name: &str,
        caller: Option<&Principal>,
    ) -> AppResult<Arc<dyn ComputationBackend>> {
        let backend = self
            .backends
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("unknown computation backend '{name}'")))?;
        match caller {
            Some(caller) if caller != backend.principal() => Err(AppError::permission_denied(
                format!(
                    "'{}' is not allowed to act for backend '{name}'",
                    caller.username
                ),
            )),
            _ => Ok(backend),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::errors::AppErrorKind;
    use crate::app::testing::RecordingBackend;

    #[test]
    fn resolves_registered_backend_for_its_own_principal() {
        let mut registry = BackendRegistry::new();
        registry.register("slurm", Arc::new(RecordingBackend::new("_slurm")));

        assert!(registry.get_and_verify_by_name("slurm", None).is_ok());
        assert!(
            registry
                .get_and_verify_by_name("slurm", Some(&Principal::provider("_slurm")))
                .is_ok()
        );
    }

    #[test]
    fn rejects_unknown_backend_and_foreign_callers() {
        let mut registry = BackendRegistry::new();
        registry.register("slurm", Arc::new(RecordingBackend::new("_slurm")));
        registry.register("k8s", Arc::new(RecordingBackend::new("_k8s")));

        let err = registry.get_and_verify_by_name("abacus", None).err().unwrap();
        assert_eq!(err.kind(), AppErrorKind::NotFound);

        let err = registry
            .get_and_verify_by_name("slurm", Some(&Principal::provider("_k8s")))
            .err()
            .unwrap();
        assert_eq!(err.kind(), AppErrorKind::PermissionDenied);

        let err = registry
            .get_and_verify_by_name("slurm", Some(&Principal::user("_slurm")))
            .err()
            .unwrap();
        assert_eq!(err.kind(), AppErrorKind::PermissionDenied);
        assert_eq!(registry.names(), vec!["k8s", "slurm"]);
    }
}

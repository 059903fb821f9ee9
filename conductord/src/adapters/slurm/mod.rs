// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Slurm backend: sbatch submission, sacct polling and the per-job workspace
//! on the shared filesystem.

pub mod agent;
pub mod backend;
pub mod bridge;
pub mod workspace;

pub use backend::{SlurmBackend, SlurmSettings};

/// Registry name of the Slurm backend.
pub const BACKEND_NAME: &str = "slurm";

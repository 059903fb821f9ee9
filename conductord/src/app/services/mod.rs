// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod invocation;
pub mod job_paths;
pub mod parameters;
pub mod sbatch;
pub mod shell;
pub mod slurm;
pub mod transitions;

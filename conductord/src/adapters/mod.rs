// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod accounting;
pub mod catalog;
pub mod cli;
pub mod clock;
pub mod db;
pub mod exec;
pub mod fs;
pub mod slurm;
pub mod storage;

// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! `conductord`: accepts computation jobs, drives them through their lifecycle
//! and delegates execution to pluggable computation backends.

pub mod adapters;
pub mod app;
pub mod config;
pub mod logging;
pub mod timer;

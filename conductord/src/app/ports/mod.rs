// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod accounting;
pub mod backend;
pub mod callbacks;
pub mod catalog;
pub mod clock;
pub mod command_runner;
pub mod job_store;
pub mod storage;

pub use accounting::AccountingPort;
pub use backend::ComputationBackend;
pub use callbacks::JobCallbackPort;
pub use catalog::ApplicationCatalogPort;
pub use clock::ClockPort;
pub use command_runner::{CommandRunnerPort, ExecCapture};
pub use job_store::{JobStorePort, StateUpdate};
pub use storage::{ByteStream, Download, StoragePort};

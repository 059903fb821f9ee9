// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod executor;
pub mod orchestrator;
pub mod registry;
pub mod staging;
pub mod verification;

pub use executor::TransitionExecutor;
pub use orchestrator::{Orchestrator, TransitionOutcome};
pub use registry::BackendRegistry;
pub use staging::FileStagingService;
pub use verification::VerificationService;

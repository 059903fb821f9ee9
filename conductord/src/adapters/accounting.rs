// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::ports::AccountingPort;
use crate::app::types::AccountingEvent;

/// Accounting sink that emits one structured event per successful job.
/// Downstream collectors filter on the `conductord::accounting` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAccounting;

impl AccountingPort for TracingAccounting {
    fn job_completed(&self, event: AccountingEvent) {
        let AccountingEvent {
            job_id,
            owner,
            application,
            nodes,
            wall_duration,
            success,
            timestamp_ms,
        } = event;

        tracing::info!(
            target: "conductord::accounting",
            event = "job_completed",
            job_id = %job_id,
            owner = %owner,
            application = %application,
            nodes = nodes,
            wall_seconds = wall_duration.to_millis() / 1_000,
            wall_duration = %wall_duration,
            success = success,
            timestamp_ms = timestamp_ms,
        );
    }
}

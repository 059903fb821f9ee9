// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::types::AccountingEvent;

/// Sink for completion/usage events. Emission is fire-and-forget.
pub trait AccountingPort: Send + Sync {
    fn job_completed(&self, event: AccountingEvent);
}

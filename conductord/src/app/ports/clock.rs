// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use time::OffsetDateTime;

/// Time source boundary for UTC timestamps.
/// Makes time-dependent logic deterministic and testable.
pub trait ClockPort: Send + Sync {
    fn now_utc(&self) -> OffsetDateTime;

    /// Unix epoch milliseconds, the unit job records are stamped with.
    fn now_millis(&self) -> i64 {
        (self.now_utc().unix_timestamp_nanos() / 1_000_000) as i64
    }
}

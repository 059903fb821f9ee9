// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::types::JobState;

/// States reachable from `from`. FAILURE loops onto itself so duplicate
/// failure reports are absorbed.
pub fn allowed_transitions(from: JobState) -> &'static [JobState] {
    use JobState::*;
    match from {
        Validated => &[Prepared, Success, Failure],
        Prepared => &[Scheduled, Running, TransferSuccess, Success, Failure],
        Scheduled => &[Running, TransferSuccess, Success, Failure],
        Running => &[TransferSuccess, Failure],
        TransferSuccess => &[Success, Failure],
        Success => &[],
        Failure => &[Failure],
    }
}

pub fn is_valid_transition(from: JobState, to: JobState) -> bool {
    allowed_transitions(from).contains(&to)
}

pub fn check_transition(job_id: &str, from: JobState, to: JobState) -> AppResult<()> {
    if is_valid_transition(from, to) {
        return Ok(());
    }
    Err(AppError::with_message(
        AppErrorKind::BadStateTransition,
        codes::BAD_STATE_TRANSITION,
        format!("cannot move job from {from} to {to}"),
    )
    .with_context(format!("job_id={job_id}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_is_terminal() {
        for to in JobState::ALL {
            assert!(!is_valid_transition(JobState::Success, to));
        }
    }

    #[test]
    fn failure_only_absorbs_failure() {
        for to in JobState::ALL {
            assert_eq!(
                is_valid_transition(JobState::Failure, to),
                to == JobState::Failure
            );
        }
    }

    #[test]
    fn running_may_be_skipped_after_scheduling() {
        assert!(is_valid_transition(
            JobState::Scheduled,
            JobState::TransferSuccess
        ));
        assert!(is_valid_transition(JobState::Prepared, JobState::Running));
        assert!(!is_valid_transition(JobState::Running, JobState::Success));
        assert!(!is_valid_transition(JobState::Running, JobState::Scheduled));
    }

    #[test]
    fn every_non_terminal_state_can_fail() {
        for from in JobState::ALL.into_iter().filter(|s| !s.is_final()) {
            assert!(is_valid_transition(from, JobState::Failure), "{from}");
        }
    }

    #[test]
    fn rejected_transition_reports_kind_and_job() {
        let err = check_transition("j1", JobState::Validated, JobState::Running).unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::BadStateTransition);
        assert_eq!(err.context(), Some("job_id=j1"));
    }
}

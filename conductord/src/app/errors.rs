// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fmt;

pub mod codes {
    pub const INVALID_ARGUMENT: &str = "invalid_argument";
    pub const VERIFICATION_FAILED: &str = "verification_failed";
    pub const NOT_FOUND: &str = "not_found";
    pub const PERMISSION_DENIED: &str = "permission_denied";
    pub const CONFLICT: &str = "conflict";
    pub const BAD_STATE_TRANSITION: &str = "bad_state_transition";
    pub const TRANSFER_FAILED: &str = "transfer_failed";
    pub const UNSUPPORTED: &str = "unsupported";
    pub const INTERNAL_ERROR: &str = "internal_error";
    pub const STORAGE_ERROR: &str = "storage_error";
    pub const BACKEND_ERROR: &str = "backend_error";
    pub const SCHEDULER_ERROR: &str = "scheduler_error";
}

/// Status recorded on a job when the failure is not safe to show to its owner.
pub const GENERIC_JOB_FAILURE: &str = "Internal error";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppErrorKind {
    InvalidArgument,
    Verification,
    NotFound,
    PermissionDenied,
    Conflict,
    BadStateTransition,
    Transfer,
    Unsupported,
    Internal,
}

#[derive(Debug, Clone)]
pub struct AppError {
    kind: AppErrorKind,
    code: &'static str,
    message: String,
    context: Option<String>,
}

impl AppError {
    pub fn new(kind: AppErrorKind, code: &'static str) -> Self {
        Self {
            kind,
            code,
            message: code.to_string(),
            context: None,
        }
    }

    pub fn with_message(
        kind: AppErrorKind,
        code: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::with_message(AppErrorKind::InvalidArgument, codes::INVALID_ARGUMENT, message)
    }

    pub fn verification(message: impl Into<String>) -> Self {
        Self::with_message(
            AppErrorKind::Verification,
            codes::VERIFICATION_FAILED,
            message,
        )
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::with_message(AppErrorKind::NotFound, codes::NOT_FOUND, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::with_message(
            AppErrorKind::PermissionDenied,
            codes::PERMISSION_DENIED,
            message,
        )
    }

    pub fn transfer(message: impl Into<String>) -> Self {
        Self::with_message(AppErrorKind::Transfer, codes::TRANSFER_FAILED, message)
    }

    pub fn internal(code: &'static str, message: impl Into<String>) -> Self {
        Self::with_message(AppErrorKind::Internal, code, message)
    }

    pub fn kind(&self) -> AppErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Everything except internal failures carries a message meant for the caller.
    pub fn is_client_facing(&self) -> bool {
        self.kind != AppErrorKind::Internal
    }

    /// Message to record as a job's status after this error.
    pub fn job_status_message(&self) -> &str {
        if self.is_client_facing() {
            &self.message
        } else {
            GENERIC_JOB_FAILURE
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ctx) = &self.context {
            write!(f, "{} ({})", self.message, ctx)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::app::errors::{AppError, AppResult, codes};
use crate::app::ports::{CommandRunnerPort, ExecCapture};

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Runs scheduler commands through `sh -c` on the local submit host.
#[derive(Debug, Clone)]
pub struct LocalCommandRunner {
    timeout: Duration,
}

impl LocalCommandRunner {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for LocalCommandRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunnerPort for LocalCommandRunner {
    #[tracing::instrument(name = "exec", level = "debug", skip(self), fields(command = %command))]
    async fn exec_capture(&self, command: &str) -> AppResult<ExecCapture> {
        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                AppError::internal(codes::SCHEDULER_ERROR, format!("failed to spawn shell: {err}"))
            })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|err| {
                AppError::internal(codes::SCHEDULER_ERROR, format!("command failed: {err}"))
            })?,
            Err(_) => {
                return Err(AppError::internal(
                    codes::SCHEDULER_ERROR,
                    format!("command timed out after {}s", self.timeout.as_secs()),
                ));
            }
        };

        let capture = ExecCapture {
            stdout: output.stdout,
            stderr: output.stderr,
            // Killed by a signal.
            exit_code: output.status.code().unwrap_or(-1),
        };
        tracing::debug!("exit_code={}", capture.exit_code);
        Ok(capture)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::errors::AppErrorKind;

    #[tokio::test]
    async fn captures_both_streams_and_exit_code() {
        let runner = LocalCommandRunner::new();
        let capture = runner
            .exec_capture("echo out; echo err >&2; exit 3")
            .await
            .unwrap();
        assert_eq!(capture.stdout_lossy(), "out\n");
        assert_eq!(capture.stderr_lossy(), "err\n");
        assert_eq!(capture.exit_code, 3);
        assert!(!capture.success());
    }

    #[tokio::test]
    async fn slow_commands_time_out() {
        let runner = LocalCommandRunner::with_timeout(Duration::from_millis(50));
        let err = runner.exec_capture("sleep 5").await.unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::Internal);
        assert!(err.message().contains("timed out"));
    }
}

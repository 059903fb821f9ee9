// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

/// Columns requested from `sacct`, in order.
pub const SACCT_FORMAT: &str = "JobID,State,ElapsedRaw";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SlurmParseError {
    #[error("malformed sacct line: {0}")]
    MalformedLine(String),
    #[error("invalid elapsed time '{value}' for job {job_id}")]
    InvalidElapsed { job_id: String, value: String },
}

/// Scheduler job id from `sbatch` output. Accepts both
/// "Submitted batch job 11" and the `--parsable` form "11" / "11;cluster".
pub fn parse_sbatch_job_id(output: &str) -> Option<String> {
    let line = output.lines().map(str::trim).find(|l| !l.is_empty())?;
    let candidate = match line.find("job ") {
        Some(idx) => line[idx + "job ".len()..].trim(),
        None => line.split(';').next().unwrap_or(line).trim(),
    };
    if !candidate.is_empty() && candidate.chars().all(|c| c.is_ascii_digit()) {
        Some(candidate.to_string())
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SacctRecord {
    pub job_id: String,
    pub state: String,
    pub elapsed_secs: u64,
}

/// Parses `sacct -X -n -P -o JobID,State,ElapsedRaw`. Step lines (`123.batch`)
/// are skipped in case `-X` was not honoured.
pub fn parse_sacct_records(output: &str) -> Result<Vec<SacctRecord>, SlurmParseError> {
    let mut records = Vec::new();
    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let mut fields = line.split('|');
        let (Some(job_id), Some(state), Some(elapsed)) =
            (fields.next(), fields.next(), fields.next())
        else {
            return Err(SlurmParseError::MalformedLine(line.to_string()));
        };
        let job_id = job_id.trim();
        if job_id.is_empty() {
            return Err(SlurmParseError::MalformedLine(line.to_string()));
        }
        if job_id.contains('.') {
            continue;
        }
        let elapsed = elapsed.trim();
        let elapsed_secs = if elapsed.is_empty() {
            0
        } else {
            elapsed
                .parse::<u64>()
                .map_err(|_| SlurmParseError::InvalidElapsed {
                    job_id: job_id.to_string(),
                    value: elapsed.to_string(),
                })?
        };
        records.push(SacctRecord {
            job_id: job_id.to_string(),
            state: normalize_slurm_state(state),
            elapsed_secs,
        });
    }
    Ok(records)
}

/// "CANCELLED by 1000" and "CANCELLED+" both normalize to "CANCELLED".
pub fn normalize_slurm_state(state: &str) -> String {
    state
        .split(|c: char| c == '+' || c == ':' || c == '(' || c.is_whitespace())
        .find(|t| !t.is_empty())
        .unwrap_or("")
        .to_ascii_uppercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlurmStateClass {
    Queued,
    Running,
    Completed,
    Failed,
    Timeout,
}

/// Unknown states are treated as still queued so the job keeps being polled.
pub fn classify_slurm_state(state: &str) -> SlurmStateClass {
    match state {
        "RUNNING" | "COMPLETING" => SlurmStateClass::Running,
        "COMPLETED" => SlurmStateClass::Completed,
        "FAILED" | "CANCELLED" | "NODE_FAIL" | "BOOT_FAIL" | "OUT_OF_MEMORY" | "PREEMPTED"
        | "REVOKED" | "SPECIAL_EXIT" => SlurmStateClass::Failed,
        "TIMEOUT" | "DEADLINE" => SlurmStateClass::Timeout,
        _ => SlurmStateClass::Queued,
    }
}

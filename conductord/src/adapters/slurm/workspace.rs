// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::io;
use std::path::{Path, PathBuf};

use crate::app::services::job_paths::{resolve_within, workspace_relative};
use crate::app::services::sbatch::{STDERR_FILE, STDOUT_FILE};

pub const SCRIPT_FILE: &str = "job.sh";
pub const MARKER_FILE: &str = ".scheduler_id";
pub const WORK_DIR: &str = "work";

/// Per-job directory tree on the shared filesystem:
/// `<root>/<job id>/{job.sh, stdout.txt, stderr.txt, .scheduler_id, work/}`.
#[derive(Debug, Clone)]
pub struct SlurmWorkspace {
    root: PathBuf,
}

impl SlurmWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.root.join(job_id)
    }

    pub fn work_dir(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join(WORK_DIR)
    }

    pub fn script_path(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join(SCRIPT_FILE)
    }

    pub fn stdout_path(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join(STDOUT_FILE)
    }

    pub fn stderr_path(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join(STDERR_FILE)
    }

    /// Location of a staged input given its `/work/...` destination, or `None`
    /// when the destination does not name anything inside the work directory.
    pub fn input_path(&self, job_id: &str, destination: &str) -> Option<PathBuf> {
        let relative = resolve_within("", workspace_relative(destination))?;
        Some(self.work_dir(job_id).join(relative.trim_start_matches('/')))
    }

    pub async fn prepare(&self, job_id: &str) -> io::Result<PathBuf> {
        let work = self.work_dir(job_id);
        tokio::fs::create_dir_all(&work).await?;
        Ok(work)
    }

    pub async fn read_marker(&self, job_id: &str) -> io::Result<Option<String>> {
        match tokio::fs::read_to_string(self.job_dir(job_id).join(MARKER_FILE)).await {
            Ok(contents) => {
                let id = contents.trim();
                Ok((!id.is_empty()).then(|| id.to_string()))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn write_marker(&self, job_id: &str, scheduler_id: &str) -> io::Result<()> {
        tokio::fs::write(
            self.job_dir(job_id).join(MARKER_FILE),
            format!("{scheduler_id}\n"),
        )
        .await
    }
}

/// Lines `[start, start + max)` of a std-stream file and the index of the next
/// unread line. A missing file reads as empty.
pub async fn read_stream_slice(
    path: &Path,
    start: usize,
    max: usize,
    include_partial: bool,
) -> io::Result<(String, usize)> {
    let contents = match tokio::fs::read(path).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => String::new(),
        Err(err) => return Err(err),
    };
    Ok(slice_lines(&contents, start, max, include_partial))
}

/// An unterminated last line is only returned with `include_partial`; while the
/// job still writes to the file it is picked up on the next call instead.
pub fn slice_lines(contents: &str, start: usize, max: usize, include_partial: bool) -> (String, usize) {
    let mut out = String::new();
    let mut taken = 0;
    for line in contents
        .split_inclusive('\n')
        .skip(start)
        .filter(|line| include_partial || line.ends_with('\n'))
        .take(max)
    {
        out.push_str(line);
        taken += 1;
    }
    (out, start + taken)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn slices_complete_lines_only_while_running() {
        let text = "one\ntwo\nthr";
        assert_eq!(slice_lines(text, 0, 10, false), ("one\ntwo\n".to_string(), 2));
        assert_eq!(slice_lines(text, 1, 1, false), ("two\n".to_string(), 2));
        assert_eq!(slice_lines(text, 2, 10, false), (String::new(), 2));
        assert_eq!(slice_lines(text, 2, 10, true), ("thr".to_string(), 3));
        assert_eq!(slice_lines(text, 9, 10, true), (String::new(), 9));
    }

    #[test]
    fn input_paths_stay_in_work_dir() {
        let ws = SlurmWorkspace::new("/ws");
        assert_eq!(
            ws.input_path("j1", "/work/data/in.txt"),
            Some(PathBuf::from("/ws/j1/work/data/in.txt"))
        );
        assert_eq!(ws.input_path("j1", "/work/../../etc/passwd"), None);
        assert_eq!(ws.input_path("j1", "/work"), None);
    }

    #[tokio::test]
    async fn marker_round_trip_and_missing_streams() {
        let dir = TempDir::new().unwrap();
        let ws = SlurmWorkspace::new(dir.path());
        ws.prepare("j1").await.unwrap();
        assert_eq!(ws.read_marker("j1").await.unwrap(), None);
        ws.write_marker("j1", "4242").await.unwrap();
        assert_eq!(ws.read_marker("j1").await.unwrap().as_deref(), Some("4242"));

        let (text, next) = read_stream_slice(&ws.stdout_path("j1"), 0, 10, true)
            .await
            .unwrap();
        assert!(text.is_empty());
        assert_eq!(next, 0);
    }
}

// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

/// Root of every job's private workspace as seen by parameters and backends.
pub const WORKSPACE_ROOT: &str = "/work";

pub fn home_dir(owner: &str) -> String {
    format!("/home/{owner}")
}

pub fn result_folder(owner: &str, application: &str, job_id: &str) -> String {
    format!("{}/Jobs/{application}/{job_id}", home_dir(owner))
}

/// Resolves `requested` under `root`. A leading `/` is relative to `root`.
/// Returns `None` when the path is empty or would leave `root` through `..`.
pub fn resolve_within(root: &str, requested: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for component in requested.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(format!("{}/{}", root.trim_end_matches('/'), parts.join("/")))
}

/// `child` equals `parent` or lies below it. Both must already be normalized.
pub fn is_within(parent: &str, child: &str) -> bool {
    let parent = parent.trim_end_matches('/');
    child == parent
        || child
            .strip_prefix(parent)
            .is_some_and(|rest| rest.starts_with('/'))
}

pub fn file_name(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}

/// Path of a workspace destination relative to `WORKSPACE_ROOT`.
pub fn workspace_relative(destination: &str) -> &str {
    destination
        .strip_prefix(WORKSPACE_ROOT)
        .map(|rest| rest.trim_start_matches('/'))
        .unwrap_or(destination)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_leading_slash_relative_to_root() {
        assert_eq!(
            resolve_within(WORKSPACE_ROOT, "/data/in.txt").as_deref(),
            Some("/work/data/in.txt")
        );
        assert_eq!(
            resolve_within("/home/alice/Jobs/x/1", "out/./a.txt").as_deref(),
            Some("/home/alice/Jobs/x/1/out/a.txt")
        );
    }

    #[test]
    fn rejects_traversal_out_of_root() {
        assert_eq!(resolve_within(WORKSPACE_ROOT, "../etc/passwd"), None);
        assert_eq!(resolve_within(WORKSPACE_ROOT, "a/../../b"), None);
        assert_eq!(resolve_within(WORKSPACE_ROOT, "/"), None);
        assert_eq!(
            resolve_within(WORKSPACE_ROOT, "a/../b").as_deref(),
            Some("/work/b")
        );
    }

    #[test]
    fn is_within_respects_component_boundaries() {
        assert!(is_within("/home/alice", "/home/alice/file"));
        assert!(is_within("/home/alice", "/home/alice"));
        assert!(!is_within("/home/alice", "/home/alicebob/file"));
    }

    #[test]
    fn names_and_relative_paths() {
        assert_eq!(file_name("/home/alice/data/"), "data");
        assert_eq!(workspace_relative("/work/dir/a.txt"), "dir/a.txt");
        assert_eq!(
            result_folder("alice", "figlet", "j1"),
            "/home/alice/Jobs/figlet/j1"
        );
    }
}

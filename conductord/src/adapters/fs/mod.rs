// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Blocking tar helpers shared by the storage and Slurm adapters. Callers run
//! them inside `spawn_blocking`.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tar::Builder;
use walkdir::WalkDir;

/// Packs the contents of `source_root` (not the directory itself) into an
/// in-memory tar archive. Symlinks are skipped.
pub fn pack_directory(source_root: &Path) -> io::Result<Vec<u8>> {
    let mut entries: Vec<(PathBuf, bool)> = Vec::new();
    for entry in WalkDir::new(source_root).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        let rel = match entry.path().strip_prefix(source_root) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel.to_path_buf(),
            _ => continue,
        };
        let file_type = entry.file_type();
        if file_type.is_dir() || file_type.is_file() {
            entries.push((rel, file_type.is_dir()));
        }
    }
    entries.sort();

    let mut builder = Builder::new(Vec::new());
    for (rel, is_dir) in entries {
        let src = source_root.join(&rel);
        if is_dir {
            builder.append_dir(&rel, &src)?;
        } else {
            builder.append_path_with_name(&src, &rel)?;
        }
    }
    builder.into_inner()
}

/// Extracts `tarball_path` into `dest_dir`. Entries that would land outside
/// `dest_dir` are skipped by `unpack_in`.
pub fn unpack_tarball(tarball_path: &Path, dest_dir: &Path) -> io::Result<()> {
    let file = File::open(tarball_path)?;
    fs::create_dir_all(dest_dir)?;
    let mut archive = tar::Archive::new(file);
    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.unpack_in(dest_dir)? {
            tracing::warn!(
                "skipped archive entry outside {}: {}",
                dest_dir.display(),
                entry.path().map(|p| p.display().to_string()).unwrap_or_default()
            );
        }
    }
    Ok(())
}

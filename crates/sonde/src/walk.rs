//! File collection for CLI scans: explicit files plus directory walks with
//! pattern, extension, and ignore filters.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

/// Filters applied while walking directories.
#[derive(Debug, Default)]
pub struct WalkFilters {
    /// Glob matched against the path relative to the walked directory.
    pub pattern: Option<String>,
    /// Only analyse files with these extensions (no leading dot).
    pub extensions: Vec<String>,
    /// Directory names to skip entirely.
    pub ignore: Vec<String>,
}

/// Resolve CLI path arguments into (filename, payload) pairs.
///
/// Plain files are read as-is; directories are walked recursively with the
/// filters applied. Unreadable files are skipped with a warning rather than
/// aborting the whole submission.
pub fn collect_files(paths: &[PathBuf], filters: &WalkFilters) -> Result<Vec<(String, Vec<u8>)>> {
    let pattern = filters
        .pattern
        .as_deref()
        .map(glob::Pattern::new)
        .transpose()
        .context("invalid --pattern glob")?;

    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            collect_dir(path, pattern.as_ref(), filters, &mut files);
        } else {
            match std::fs::read(path) {
                Ok(bytes) => files.push((path.display().to_string(), bytes)),
                Err(e) => {
                    return Err(e).with_context(|| format!("cannot read {}", path.display()))
                }
            }
        }
    }
    Ok(files)
}

fn collect_dir(
    root: &Path,
    pattern: Option<&glob::Pattern>,
    filters: &WalkFilters,
    out: &mut Vec<(String, Vec<u8>)>,
) {
    let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
        if entry.file_type().is_dir() {
            let name = entry.file_name().to_string_lossy();
            !filters.ignore.iter().any(|skip| skip == name.as_ref())
        } else {
            true
        }
    });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("walk error under {}: {}", root.display(), e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if let Some(pattern) = pattern {
            let relative = path.strip_prefix(root).unwrap_or(path);
            if !pattern.matches_path(relative) {
                continue;
            }
        }
        if !filters.extensions.is_empty() {
            let ext = path
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            if !filters.extensions.iter().any(|want| want.eq_ignore_ascii_case(&ext)) {
                continue;
            }
        }

        match std::fs::read(path) {
            Ok(bytes) => out.push((path.display().to_string(), bytes)),
            Err(e) => warn!("skipping unreadable file {}: {}", path.display(), e),
        }
    }
}

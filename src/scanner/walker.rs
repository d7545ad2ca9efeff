//! Directory traversal with ignore-set and symlink-loop handling

use crate::types::{Language, LanguageFilter};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A file matched by a language scanner, before its content is read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    /// Absolute path as seen on disk (symlinks not resolved)
    pub path: PathBuf,
    pub language: Language,
}

/// Walk `root` and return every file claimed by a supported language
/// scanner, excluding ignored paths.
///
/// Symlinks are followed; cycles are broken by canonicalizing each file
/// path and visiting each canonical path once. Results are sorted by path
/// so downstream evaluation is deterministic. Per-entry walk errors are
/// logged and skipped.
pub fn discover(
    root: &Path,
    ignored: &[String],
    filter: &LanguageFilter,
) -> Vec<DiscoveredFile> {
    let mut seen_canonical: HashSet<PathBuf> = HashSet::new();
    let mut files = Vec::new();

    for entry in WalkDir::new(root).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if is_ignored(path, ignored) {
            continue;
        }

        let Some(language) = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(Language::from_extension)
        else {
            continue;
        };
        if !filter.allows(language) {
            continue;
        }

        // One visit per canonical path, however many links point at it.
        let canonical = match path.canonicalize() {
            Ok(canonical) => canonical,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot canonicalize, skipping");
                continue;
            }
        };
        if !seen_canonical.insert(canonical) {
            continue;
        }

        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(path))
                .unwrap_or_else(|_| path.to_path_buf())
        };
        files.push(DiscoveredFile {
            path: absolute,
            language,
        });
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    files
}

/// A path is ignored when a bare entry equals one of its components, or a
/// separator-bearing entry appears as a substring of the `/`-normalized
/// path.
fn is_ignored(path: &Path, ignored: &[String]) -> bool {
    let normalized = path.to_string_lossy().replace('\\', "/");
    ignored.iter().any(|entry| {
        if entry.contains('/') {
            normalized.contains(entry.as_str())
        } else {
            path.components()
                .any(|c| c.as_os_str().to_string_lossy() == entry.as_str())
        }
    })
}

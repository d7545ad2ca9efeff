//! Per-language file discovery
//!
//! A scanner claims a language and a set of file extensions. The walker
//! fans the scanner set over a directory tree and yields `(path, content)`
//! pairs; binary files are skipped with a warning and oversized files are
//! truncated and flagged. All per-file errors are non-fatal.

mod walker;

pub use walker::{discover, DiscoveredFile};

use crate::error::{Error, Result};
use crate::types::Language;
use std::path::{Path, PathBuf};

/// A file read and normalized for rule evaluation
#[derive(Debug, Clone)]
pub struct ScannedFile {
    /// Absolute path
    pub path: PathBuf,
    pub language: Language,
    /// UTF-8 content with `\r\n` normalized to `\n`
    pub content: String,
    /// Content was cut at the per-file byte limit
    pub truncated: bool,
}

/// Read a discovered file, enforcing the UTF-8 and size policies.
///
/// Returns `Error::Scanner` for non-UTF-8 content; the caller logs and
/// continues. Truncation happens on a char boundary so the content stays
/// valid UTF-8.
pub async fn read_file(
    path: &Path,
    language: Language,
    max_bytes: usize,
) -> Result<ScannedFile> {
    let bytes = tokio::fs::read(path).await?;

    let truncated = bytes.len() > max_bytes;
    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(_) => {
            return Err(Error::Scanner(format!(
                "skipping binary (non-UTF-8) file: {}",
                path.display()
            )))
        }
    };

    let text = if truncated {
        let mut end = max_bytes;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text[..end].to_string()
    } else {
        text
    };

    // Line numbering is defined on `\n`; normalize Windows endings here so
    // rules never see `\r`.
    let content = text.replace("\r\n", "\n");

    Ok(ScannedFile {
        path: path.to_path_buf(),
        language,
        content,
        truncated,
    })
}

//! Concat demuxer list files.
//!
//! The list format is one line per input: `file '<absolute-path>'`.
//! Paths are escaped for the single-quote wrapper.

use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::MediaResult;

/// Write a concat list for `inputs` to `list_path`.
pub async fn write_concat_list(inputs: &[PathBuf], list_path: &Path) -> MediaResult<()> {
    let mut body = String::new();
    for input in inputs {
        body.push_str("file '");
        body.push_str(&escape_single_quoted(&input.to_string_lossy()));
        body.push_str("'\n");
    }
    fs::write(list_path, body).await?;
    Ok(())
}

/// Escape a path for a single-quoted concat list entry.
///
/// The concat demuxer reads shell-style quoting: a literal `'` closes
/// the string, emits an escaped quote, and reopens it.
fn escape_single_quoted(path: &str) -> String {
    path.replace('\'', r"'\''")
}

//! Removal of invisible characters that reference managers leak into
//! exported BibTeX.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

/// U+200E LEFT-TO-RIGHT MARK. Breaks biber when it ends up inside keys.
pub const LEFT_TO_RIGHT_MARK: char = '\u{200E}';

#[derive(Error, Debug)]
pub enum SanitizeError {
    #[error("failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Returns the text without left-to-right marks, and how many were removed.
pub fn sanitize_text(text: &str) -> (String, usize) {
    let removed = text.matches(LEFT_TO_RIGHT_MARK).count();
    if removed == 0 {
        return (text.to_string(), 0);
    }
    (text.replace(LEFT_TO_RIGHT_MARK, ""), removed)
}

/// Sanitizes a file in place. The file is only rewritten when something
/// was removed.
pub fn sanitize_file(path: &Path) -> Result<usize, SanitizeError> {
    let text = fs::read_to_string(path).map_err(|source| SanitizeError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let (clean, removed) = sanitize_text(&text);
    if removed > 0 {
        fs::write(path, clean).map_err(|source| SanitizeError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), removed, "removed left-to-right marks");
    }

    Ok(removed)
}

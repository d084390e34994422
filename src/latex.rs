//! LaTeX citation parser.
//!
//! Extracts citation keys from commands such as `\cite{key}`,
//! `\parencite[see][p. 4]{a,b}` or `\textcite{key}` in LaTeX sources.
//!
//! Nested braces inside a key list are not supported: `\cite{a{b}}` stops
//! at the first closing brace, so the extractor never sees a partial key.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

lazy_static! {
    /// Any letters-only command containing `cite`, up to two optional
    /// `[...]` groups, then a brace-delimited key list.
    static ref CITE_RE: Regex =
        Regex::new(r"\\([a-zA-Z]*cite[a-zA-Z]*)(?:\[[^\]]*\]){0,2}\{([^}]+)\}")
            .expect("citation pattern is valid");
}

/// Key meaning "every bibliography entry", as in `\nocite{*}`.
pub const WILDCARD: &str = "*";

/// Errors that can occur when scanning documents.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A citation command found in LaTeX text.
#[derive(Debug, Clone, PartialEq)]
pub struct Citation {
    /// The command name without the backslash (e.g., "parencite")
    pub command: String,
    /// The keys in source order, trimmed. May contain the wildcard.
    pub keys: Vec<String>,
    /// Start and end byte positions in the original text
    pub span: (usize, usize),
}

/// The set of distinct keys cited across one or more documents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CitedKeys {
    keys: BTreeSet<String>,
    /// Whether `\nocite{*}` (or any other wildcard citation) was seen.
    wildcard: bool,
}

impl CitedKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a key. The wildcard is recorded as a flag, never as a key.
    pub fn insert(&mut self, key: &str) {
        if key == WILDCARD {
            self.wildcard = true;
        } else if !key.is_empty() {
            self.keys.insert(key.to_string());
        }
    }

    /// Unions another set into this one.
    pub fn merge(&mut self, other: CitedKeys) {
        self.keys.extend(other.keys);
        self.wildcard |= other.wildcard;
    }

    pub fn keys(&self) -> &BTreeSet<String> {
        &self.keys
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn has_wildcard(&self) -> bool {
        self.wildcard
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<S> for CitedKeys {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut cited = CitedKeys::new();
        for key in iter {
            cited.insert(key.as_ref());
        }
        cited
    }
}

/// Extracts all citation commands from the given LaTeX text.
///
/// Malformed invocations (unterminated braces, missing key list) are skipped.
///
/// # Examples
///
/// ```
/// use thesis_tools::extract_citations;
///
/// let citations = extract_citations(r"As shown \parencite[p. 3]{jones2019, doe2021}.");
/// assert_eq!(citations.len(), 1);
/// assert_eq!(citations[0].command, "parencite");
/// assert_eq!(citations[0].keys, vec!["jones2019", "doe2021"]);
/// ```
pub fn extract_citations(text: &str) -> Vec<Citation> {
    CITE_RE
        .captures_iter(text)
        .filter_map(|cap| {
            let full_match = cap.get(0)?;
            let command = cap.get(1)?.as_str().to_string();
            let keys: Vec<String> = cap
                .get(2)?
                .as_str()
                .split(',')
                .map(|k| k.trim())
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect();

            Some(Citation {
                command,
                keys,
                span: (full_match.start(), full_match.end()),
            })
        })
        .collect()
}

/// Extracts the set of keys cited in the given LaTeX text.
///
/// # Examples
///
/// ```
/// use thesis_tools::extract_cited_keys;
///
/// let cited = extract_cited_keys(r"\cite{a} \textcite{a,b} \nocite{*}");
/// assert_eq!(cited.len(), 2);
/// assert!(cited.has_wildcard());
/// ```
pub fn extract_cited_keys(text: &str) -> CitedKeys {
    extract_citations(text)
        .iter()
        .flat_map(|c| c.keys.iter())
        .collect()
}

/// Reads every document and unions the keys they cite.
pub fn scan_documents<P: AsRef<Path>>(paths: &[P]) -> Result<CitedKeys, ScanError> {
    let mut cited = CitedKeys::new();

    for path in paths {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ScanError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let keys = extract_cited_keys(&text);
        debug!(path = %path.display(), keys = keys.len(), "scanned document");
        cited.merge(keys);
    }

    Ok(cited)
}

/// Finds `.tex` files under `root`, sorted by path.
///
/// Files whose name contains any of the `exclude` substrings are skipped.
/// A `root` that is itself a file is returned as the only document.
pub fn discover_tex_files(root: &Path, exclude: &[String]) -> Vec<PathBuf> {
    if root.is_file() {
        return vec![root.to_path_buf()];
    }

    let mut files = Vec::new();

    for entry in WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| match e {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!("skipping directory entry: {}", err);
                None
            }
        })
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().map_or(true, |e| e != "tex") {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if exclude.iter().any(|pattern| name.contains(pattern.as_str())) {
            debug!(path = %path.display(), "excluded document");
            continue;
        }
        files.push(path.to_path_buf());
    }

    files.sort();
    files
}

//! Citation consistency checks.
//!
//! Pure set comparisons between what the documents cite and what the
//! bibliography defines. No I/O happens here; callers decide whether a
//! failed report aborts the build.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::keys::DefinedKeys;
use crate::latex::CitedKeys;

/// Outcome of comparing cited keys against defined keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsistencyReport {
    /// Number of distinct keys cited
    pub cited: usize,
    /// Number of distinct keys defined
    pub defined: usize,
    /// Cited keys with no bibliography entry, sorted
    pub missing: BTreeSet<String>,
}

impl ConsistencyReport {
    pub fn passed(&self) -> bool {
        self.missing.is_empty()
    }
}

impl fmt::Display for ConsistencyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.passed() {
            return write!(f, "all {} cited key(s) are defined", self.cited);
        }
        write!(f, "{} missing citation key(s):", self.missing.len())?;
        for key in &self.missing {
            write!(f, "\n- {}", key)?;
        }
        Ok(())
    }
}

/// Computes `cited - defined`.
///
/// # Examples
///
/// ```
/// use thesis_tools::{check_consistency, extract_cited_keys, DefinedKeys};
///
/// let cited = extract_cited_keys(r"\textcite{lee2022}");
/// let defined: DefinedKeys = ["smith2020"].into_iter().collect();
///
/// let report = check_consistency(&cited, &defined);
/// assert!(!report.passed());
/// assert!(report.missing.contains("lee2022"));
/// ```
pub fn check_consistency(cited: &CitedKeys, defined: &DefinedKeys) -> ConsistencyReport {
    let missing = cited
        .keys()
        .difference(defined.keys())
        .cloned()
        .collect();

    ConsistencyReport {
        cited: cited.len(),
        defined: defined.len(),
        missing,
    }
}

/// Entries defined in the bibliography but never cited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnusedReport {
    /// True when `\nocite{*}` pulls every entry in.
    pub wildcard: bool,
    pub unused: BTreeSet<String>,
}

impl fmt::Display for UnusedReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unused.is_empty() {
            return write!(f, "all bibliography entries are cited");
        }
        write!(f, "{} unused bibliography entries:", self.unused.len())?;
        for key in &self.unused {
            write!(f, "\n- {}", key)?;
        }
        Ok(())
    }
}

/// Computes `defined - cited`. Empty when the wildcard was cited.
pub fn find_unused(cited: &CitedKeys, defined: &DefinedKeys) -> UnusedReport {
    let unused = if cited.has_wildcard() {
        BTreeSet::new()
    } else {
        defined
            .keys()
            .difference(cited.keys())
            .cloned()
            .collect()
    };

    UnusedReport {
        wildcard: cited.has_wildcard(),
        unused,
    }
}

/// Errors reported by [`CitationStats::validate`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StatsError {
    #[error("no citations found in the documents, the cited-only bibliography would be empty")]
    NoCitations,

    #[error("the bibliography defines no entries")]
    NoEntries,
}

/// Sizes of the two bibliographies a thesis prints: the cited-only one and
/// the full one (`\nocite{*}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CitationStats {
    pub cited: usize,
    pub defined: usize,
}

impl CitationStats {
    pub fn new(cited: &CitedKeys, defined: &DefinedKeys) -> Self {
        Self {
            cited: cited.len(),
            defined: defined.len(),
        }
    }

    /// Both bibliographies must be non-empty.
    pub fn validate(&self) -> Result<(), StatsError> {
        if self.cited == 0 {
            return Err(StatsError::NoCitations);
        }
        if self.defined == 0 {
            return Err(StatsError::NoEntries);
        }
        Ok(())
    }
}

impl fmt::Display for CitationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unique citations: {}\nbibliography entries: {}",
            self.cited, self.defined
        )
    }
}

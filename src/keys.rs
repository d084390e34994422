//! Bibliography key extraction.
//!
//! Keys are read with the structured BibTeX parser first. When it rejects
//! the file, or finds no entries at all, a line-oriented `@type{key,` scan
//! takes over. Callers only see the resulting key set and which strategy
//! produced it.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::bibtex::{parse_bibliography, ParseError};

lazy_static! {
    static ref ENTRY_KEY_RE: Regex = Regex::new(r"@\s*(\w+)\s*[{(]\s*([^,\s{}()]+)\s*,")
        .expect("entry key pattern is valid");
    static ref HEADER_RE: Regex = Regex::new(r"^@\s*(\w+)\s*[{(]\s*([^,\s{}()]+)\s*,")
        .expect("entry header pattern is valid");
}

/// Errors raised by a single extraction strategy.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("BibTeX parse failed: {0}")]
    Parse(#[from] ParseError),
}

/// Errors that can occur when loading bibliography keys.
#[derive(Error, Debug)]
pub enum KeysError {
    #[error("failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Which extraction strategy produced a key set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Structured,
    Pattern,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Structured => write!(f, "structured"),
            Strategy::Pattern => write!(f, "pattern"),
        }
    }
}

/// A way of reading entry keys out of bibliography text.
pub trait KeyExtractor {
    fn strategy(&self) -> Strategy;

    fn extract(&self, text: &str) -> Result<BTreeSet<String>, ExtractError>;
}

/// Reads keys with the nom-based BibTeX parser.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredExtractor;

impl KeyExtractor for StructuredExtractor {
    fn strategy(&self) -> Strategy {
        Strategy::Structured
    }

    fn extract(&self, text: &str) -> Result<BTreeSet<String>, ExtractError> {
        let bib = parse_bibliography(text)?;
        Ok(bib.keys().map(str::to_string).collect())
    }
}

/// Degraded mode: finds every `@<type>{<key>,` header and keeps the key.
///
/// A key stops at whitespace, braces and commas, so a fieldless entry or a
/// `@preamble` never swallows the header after it. `@string`, `@preamble`
/// and `@comment` blocks are skipped.
#[derive(Debug, Default, Clone, Copy)]
pub struct PatternExtractor;

impl KeyExtractor for PatternExtractor {
    fn strategy(&self) -> Strategy {
        Strategy::Pattern
    }

    fn extract(&self, text: &str) -> Result<BTreeSet<String>, ExtractError> {
        Ok(ENTRY_KEY_RE
            .captures_iter(text)
            .filter(|cap| !is_special_block(&cap[1]))
            .map(|cap| cap[2].to_string())
            .collect())
    }
}

/// Runs `primary`, and `fallback` when the primary errors or finds nothing.
#[derive(Debug, Clone, Copy)]
pub struct TieredExtractor<P, F> {
    pub primary: P,
    pub fallback: F,
}

impl Default for TieredExtractor<StructuredExtractor, PatternExtractor> {
    fn default() -> Self {
        Self {
            primary: StructuredExtractor,
            fallback: PatternExtractor,
        }
    }
}

impl<P: KeyExtractor, F: KeyExtractor> TieredExtractor<P, F> {
    /// Extracts keys, returning them with the strategy that produced them.
    pub fn extract(&self, text: &str) -> (BTreeSet<String>, Strategy) {
        match self.primary.extract(text) {
            Ok(keys) if !keys.is_empty() => return (keys, self.primary.strategy()),
            Ok(_) => debug!(
                strategy = %self.primary.strategy(),
                "no entries found, falling back to {}",
                self.fallback.strategy()
            ),
            Err(e) => warn!(
                "{}, falling back to {} key extraction",
                e,
                self.fallback.strategy()
            ),
        }

        match self.fallback.extract(text) {
            Ok(keys) => (keys, self.fallback.strategy()),
            Err(e) => {
                warn!("{}", e);
                (BTreeSet::new(), self.fallback.strategy())
            }
        }
    }
}

/// Key of the entry that `block` starts with. `None` for `@string`,
/// `@preamble` and `@comment` blocks, and for anything that is not an
/// entry header.
pub fn header_key(block: &str) -> Option<&str> {
    let cap = HEADER_RE.captures(block)?;
    if is_special_block(cap.get(1)?.as_str()) {
        return None;
    }
    cap.get(2).map(|m| m.as_str())
}

fn is_special_block(entry_type: &str) -> bool {
    ["string", "preamble", "comment"]
        .iter()
        .any(|special| entry_type.eq_ignore_ascii_case(special))
}

/// The set of keys defined by a bibliography file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DefinedKeys {
    keys: BTreeSet<String>,
    strategy: Strategy,
    /// False when the bibliography file does not exist.
    exists: bool,
}

impl DefinedKeys {
    pub fn new(keys: BTreeSet<String>, strategy: Strategy) -> Self {
        Self {
            keys,
            strategy,
            exists: true,
        }
    }

    /// The empty set standing in for an absent bibliography.
    pub fn absent() -> Self {
        Self {
            keys: BTreeSet::new(),
            strategy: Strategy::Structured,
            exists: false,
        }
    }

    pub fn keys(&self) -> &BTreeSet<String> {
        &self.keys
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for DefinedKeys {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        DefinedKeys::new(iter.into_iter().map(Into::into).collect(), Strategy::Structured)
    }
}

/// Extracts the defined keys from bibliography text.
pub fn extract_defined_keys(text: &str) -> DefinedKeys {
    let (keys, strategy) = TieredExtractor::default().extract(text);
    DefinedKeys::new(keys, strategy)
}

/// Loads the keys defined by the bibliography at `path`.
///
/// A missing file yields an empty, `absent` key set rather than an error, so
/// every citation surfaces as unresolved.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read.
pub fn load_defined_keys(path: &Path) -> Result<DefinedKeys, KeysError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!(path = %path.display(), "bibliography not found, no keys defined");
            return Ok(DefinedKeys::absent());
        }
        Err(source) => {
            return Err(KeysError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let defined = extract_defined_keys(&text);
    debug!(
        path = %path.display(),
        keys = defined.len(),
        strategy = %defined.strategy(),
        "loaded bibliography keys"
    );
    Ok(defined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::Strategy;
    use proptest::prelude::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    const WELL_FORMED: &str = r#"
@article{smith2020,
  author = {Smith, Anna},
  title = {One},
}
@book{jones2019, title = {Two}}
@inproceedings{ doe2021 , title = "Three"}
"#;

    // --- StructuredExtractor ---

    #[test]
    fn test_structured_extracts_keys() {
        let keys = StructuredExtractor.extract(WELL_FORMED).unwrap();
        let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
        assert_eq!(keys, vec!["doe2021", "jones2019", "smith2020"]);
    }

    #[test]
    fn test_structured_rejects_malformed() {
        let result = StructuredExtractor.extract("@article{a, title = {unclosed");
        assert!(matches!(result, Err(ExtractError::Parse(_))));
    }

    // --- PatternExtractor ---

    #[test]
    fn test_pattern_extracts_and_trims_keys() {
        let keys = PatternExtractor.extract("@article { spaced ,\n@book{tight,").unwrap();
        assert!(keys.contains("spaced"));
        assert!(keys.contains("tight"));
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn test_pattern_ignores_fieldless_entries() {
        let keys = PatternExtractor.extract("@misc{bare}").unwrap();
        assert!(keys.is_empty());
    }

    #[test]
    fn test_pattern_fieldless_entry_before_entry() {
        let keys = PatternExtractor
            .extract("@misc{bare}\n@article{k2020, title = {Fine}}\n")
            .unwrap();
        assert_eq!(keys.into_iter().collect::<Vec<_>>(), vec!["k2020"]);
    }

    #[test]
    fn test_pattern_preamble_before_entry() {
        let text = "@preamble{\"\\newcommand{\\noop}[1]{}\"}\n@article{k2020, title = {Fine}}\n";
        let keys = PatternExtractor.extract(text).unwrap();
        assert_eq!(keys.into_iter().collect::<Vec<_>>(), vec!["k2020"]);
    }

    #[test]
    fn test_pattern_skips_comment_and_string_blocks() {
        let text = "@comment{note, written by hand}\n@string{jr = {Junior},}\n@article{k2020, title = {Fine}}\n";
        let keys = PatternExtractor.extract(text).unwrap();
        assert_eq!(keys.into_iter().collect::<Vec<_>>(), vec!["k2020"]);
    }

    #[test]
    fn test_fallback_with_fieldless_entry_and_broken_entry() {
        // Given: a fieldless entry, a good entry and an unterminated one
        let text = "@misc{bare}\n@article{k2020, title = {Fine}}\n@book{broken, title = {unclosed\n";

        // When: the structured parser rejects the file
        let defined = extract_defined_keys(text);

        // Then: the pattern scan returns only real keys
        assert_eq!(defined.strategy(), Strategy::Pattern);
        assert!(defined.contains("k2020"));
        assert!(defined.contains("broken"));
        assert_eq!(defined.len(), 2);
    }

    #[test]
    fn test_header_key() {
        assert_eq!(header_key("@article{smith2020,\n title={x}}"), Some("smith2020"));
        assert_eq!(header_key("@Book( jones2019 , title={x})"), Some("jones2019"));
        assert_eq!(header_key("@string{x = {y},"), None);
        assert_eq!(header_key("@misc{bare}"), None);
        assert_eq!(header_key("text @article{late, x={y}}"), None);
    }

    // --- TieredExtractor ---

    #[test]
    fn test_tiered_prefers_structured() {
        // Given: a well-formed bibliography
        // When: we extract through the tiers
        let (keys, strategy) = TieredExtractor::default().extract(WELL_FORMED);

        // Then: the structured parser produced the keys
        assert_eq!(strategy, Strategy::Structured);
        assert_eq!(keys.len(), 3);
    }

    #[test]
    fn test_tiered_falls_back_on_parse_error() {
        // Given: a bibliography whose last entry is unterminated
        let text = "@article{good2020, title={Fine}}\n@book{broken2021, title = {Never closed,\n";

        // When: we extract
        let (keys, strategy) = TieredExtractor::default().extract(text);

        // Then: the pattern scan recovered both well-formed headers
        assert_eq!(strategy, Strategy::Pattern);
        assert!(keys.contains("good2020"));
        assert!(keys.contains("broken2021"));
    }

    #[test]
    fn test_tiered_falls_back_on_zero_entries() {
        struct Empty;
        impl KeyExtractor for Empty {
            fn strategy(&self) -> Strategy {
                Strategy::Structured
            }
            fn extract(&self, _: &str) -> Result<BTreeSet<String>, ExtractError> {
                Ok(BTreeSet::new())
            }
        }

        let tiered = TieredExtractor {
            primary: Empty,
            fallback: PatternExtractor,
        };
        let (keys, strategy) = tiered.extract("@article{k1, x={y}}");
        assert_eq!(strategy, Strategy::Pattern);
        assert!(keys.contains("k1"));
    }

    #[test]
    fn test_tiered_empty_text() {
        let (keys, strategy) = TieredExtractor::default().extract("");
        assert!(keys.is_empty());
        assert_eq!(strategy, Strategy::Pattern);
    }

    // --- load_defined_keys ---

    #[test]
    fn test_load_defined_keys() {
        let file = create_temp_file(WELL_FORMED);
        let defined = load_defined_keys(file.path()).unwrap();
        assert!(defined.exists());
        assert_eq!(defined.len(), 3);
        assert!(defined.contains("jones2019"));
    }

    #[test]
    fn test_load_defined_keys_missing_file() {
        // Given: a path to a non-existent bibliography
        let path = Path::new("/nonexistent/path/bibliography.bib");

        // When: we load its keys
        let defined = load_defined_keys(path).unwrap();

        // Then: nothing is defined, and the absence is recorded
        assert!(defined.is_empty());
        assert!(!defined.exists());
    }

    #[test]
    fn test_load_defined_keys_directory_is_io_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = load_defined_keys(dir.path());
        assert!(matches!(result, Err(KeysError::Io { .. })));
    }

    /// Blocks placed before entries: none of them defines a key.
    const FILLERS: &[&str] = &[
        "",
        "@misc{bare}\n",
        "@string{jr = {Junior}}\n",
        "@preamble{\"\\newcommand{\\noop}[1]{}\"}\n",
        "@comment{jabref-meta: databaseType:bibtex;}\n",
        "@comment{note, written by hand}\n",
    ];

    proptest! {
        /// Whatever the parser thinks of the file, well-formed headers are
        /// always recovered.
        #[test]
        fn fallback_recovers_well_formed_keys(
            keys in proptest::collection::btree_set("[a-z][a-z0-9_]{0,10}", 1..6),
            fillers in proptest::collection::vec(0..FILLERS.len(), 6),
        ) {
            let mut text = String::new();
            for (i, key) in keys.iter().enumerate() {
                text.push_str(FILLERS[fillers[i]]);
                text.push_str(&format!("@article{{{}, title = {{T}}}}\n", key));
            }
            text.push_str("@article{trailing, title = {unterminated\n");

            let defined = extract_defined_keys(&text);
            prop_assert_eq!(defined.strategy(), Strategy::Pattern);
            for key in &keys {
                prop_assert!(defined.contains(key));
            }
            for key in defined.keys() {
                prop_assert!(!key.contains('}') && !key.contains('\n'), "bad key {:?}", key);
            }
        }
    }
}

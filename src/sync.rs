//! One-way sync of Zotero collections into a local BibTeX file.
//!
//! Collections are fetched one after another with a single blocking GET
//! each. A collection that fails is logged and skipped; the sync only fails
//! when nothing at all could be fetched. The output file is overwritten.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::LibraryType;
use crate::keys::header_key;
use crate::sanitize::sanitize_text;

lazy_static! {
    /// Start of a top-level `@` block: an `@` opening a line.
    static ref BLOCK_START_RE: Regex = Regex::new(r"(?m)^[ \t]*@").expect("block pattern is valid");
}

/// Zotero API version sent with every request.
const API_VERSION: &str = "3";

/// Errors that can occur while syncing.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("missing credentials: {0}")]
    MissingCredentials(&'static str),

    #[error("invalid API key: {0}")]
    InvalidApiKey(&'static str),

    #[error("no collections configured")]
    NoCollections,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("collection '{collection}' returned HTTP {status}")]
    Status { collection: String, status: u16 },

    #[error("nothing was fetched from any collection")]
    NothingFetched,

    #[error("failed to read local entries '{path}': {source}")]
    ReadLocal {
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

/// Everything the sync needs, passed in explicitly.
#[derive(Clone)]
pub struct SyncConfig {
    pub api_key: String,
    pub library_id: String,
    pub library_type: LibraryType,
    pub collections: Vec<String>,
    pub output: PathBuf,
    pub local_entries: Option<PathBuf>,
    pub dedupe: bool,
    pub limit: u32,
    pub api_base: String,
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConfig")
            .field("api_key", &"<redacted>")
            .field("library_id", &self.library_id)
            .field("library_type", &self.library_type)
            .field("collections", &self.collections)
            .field("output", &self.output)
            .field("local_entries", &self.local_entries)
            .field("dedupe", &self.dedupe)
            .field("limit", &self.limit)
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl SyncConfig {
    /// Rejects credentials that cannot work, before any request is made.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.api_key.is_empty() {
            return Err(SyncError::MissingCredentials("API key is empty"));
        }
        if self.library_id.is_empty() {
            return Err(SyncError::MissingCredentials("library id is empty"));
        }
        if self.api_key.chars().any(char::is_whitespace) {
            return Err(SyncError::InvalidApiKey("contains whitespace"));
        }
        if self.api_key.starts_with("Bearer") {
            return Err(SyncError::InvalidApiKey("must not include a 'Bearer' prefix"));
        }
        if self.collections.is_empty() {
            return Err(SyncError::NoCollections);
        }
        Ok(())
    }
}

/// Something that can export a collection as BibTeX.
pub trait CollectionSource {
    fn fetch_bibtex(&self, collection: &str) -> Result<String, SyncError>;
}

/// Zotero Web API client.
pub struct ZoteroClient {
    client: reqwest::blocking::Client,
    api_key: String,
    library_path: String,
    limit: u32,
}

impl ZoteroClient {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            api_key: config.api_key.clone(),
            library_path: format!(
                "{}/{}/{}",
                config.api_base.trim_end_matches('/'),
                config.library_type.path_segment(),
                config.library_id
            ),
            limit: config.limit,
        }
    }

    fn collection_url(&self, collection: &str) -> String {
        format!("{}/collections/{}/items", self.library_path, collection)
    }
}

impl CollectionSource for ZoteroClient {
    fn fetch_bibtex(&self, collection: &str) -> Result<String, SyncError> {
        let url = format!(
            "{}?format=bibtex&limit={}",
            self.collection_url(collection),
            self.limit
        );
        debug!(%url, "requesting collection");

        let resp = self
            .client
            .get(&url)
            .header("Zotero-API-Key", self.api_key.as_str())
            .header("Zotero-API-Version", API_VERSION)
            .send()?;

        let status = resp.status();
        if !status.is_success() {
            return Err(SyncError::Status {
                collection: collection.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(resp.text()?)
    }
}

/// What a sync did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub output: PathBuf,
    pub fetched: Vec<String>,
    /// Collections that answered with no entries
    pub empty: Vec<String>,
    pub failed: Vec<String>,
    pub entries: usize,
    pub duplicates: usize,
    pub local_included: bool,
}

/// Fetches every configured collection and overwrites `config.output`.
pub fn sync_bibliography<S: CollectionSource>(
    config: &SyncConfig,
    source: &S,
) -> Result<SyncSummary, SyncError> {
    config.validate()?;
    debug!(api_key_len = config.api_key.len(), library = %config.library_id, "credentials accepted");

    let mut fetched = Vec::new();
    let mut empty = Vec::new();
    let mut failed = Vec::new();
    let mut text = String::new();

    for collection in &config.collections {
        info!(%collection, "syncing collection");
        match source.fetch_bibtex(collection) {
            Ok(body) if body.trim().is_empty() => {
                warn!(%collection, "collection is empty");
                empty.push(collection.clone());
            }
            Ok(body) => {
                append_block(&mut text, &body);
                fetched.push(collection.clone());
            }
            Err(e) => {
                error!(%collection, "failed to fetch collection: {}", e);
                failed.push(collection.clone());
            }
        }
    }

    if fetched.is_empty() {
        return Err(SyncError::NothingFetched);
    }

    let local_included = match &config.local_entries {
        Some(path) if path.exists() => {
            let local = fs::read_to_string(path).map_err(|source| SyncError::ReadLocal {
                path: path.clone(),
                source,
            })?;
            append_block(&mut text, &local);
            true
        }
        Some(path) => {
            warn!(path = %path.display(), "local entries file not found, skipping");
            false
        }
        None => false,
    };

    let (text, removed) = sanitize_text(&text);
    if removed > 0 {
        info!(removed, "removed left-to-right marks from fetched entries");
    }

    let blocks = split_blocks(&text);
    let (blocks, duplicates) = if config.dedupe {
        dedupe_blocks(blocks)
    } else {
        (blocks, 0)
    };
    let entries = blocks.iter().filter(|b| b.key.is_some()).count();

    write_output(&config.output, &blocks)?;
    info!(
        path = %config.output.display(),
        entries,
        duplicates,
        "wrote bibliography"
    );

    Ok(SyncSummary {
        output: config.output.clone(),
        fetched,
        empty,
        failed,
        entries,
        duplicates,
        local_included,
    })
}

fn append_block(text: &mut String, block: &str) {
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
    text.push_str(block);
}

/// A top-level `@` block and, for real entries, its key.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Block<'a> {
    key: Option<String>,
    text: &'a str,
}

/// Splits BibTeX text at every line starting with `@` outside of braces, so
/// an `@` opening a line of an abstract stays inside its entry. Text before
/// the first block is kept as an unkeyed block.
fn split_blocks(text: &str) -> Vec<Block<'_>> {
    let mut starts = vec![0];
    let mut depth = 0;
    let mut scanned = 0;
    for m in BLOCK_START_RE.find_iter(text) {
        depth = brace_depth(&text[scanned..m.start()], depth);
        scanned = m.start();
        if depth == 0 && m.start() > 0 {
            starts.push(m.start());
        }
    }

    starts
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let end = starts.get(i + 1).copied().unwrap_or(text.len());
            let chunk = text[start..end].trim();
            Block {
                key: header_key(chunk).map(str::to_string),
                text: chunk,
            }
        })
        .filter(|b| !b.text.is_empty())
        .collect()
}

/// Brace depth after `text`, starting from `depth`. Stray closing braces
/// never take it below zero.
fn brace_depth(text: &str, depth: usize) -> usize {
    text.bytes().fold(depth, |depth, b| match b {
        b'{' => depth + 1,
        b'}' => depth.saturating_sub(1),
        _ => depth,
    })
}

/// Keeps the first block for every key. Unkeyed blocks are always kept.
fn dedupe_blocks(blocks: Vec<Block<'_>>) -> (Vec<Block<'_>>, usize) {
    let mut seen = std::collections::HashSet::new();
    let mut kept = Vec::with_capacity(blocks.len());
    let mut duplicates = 0;

    for block in blocks {
        match &block.key {
            Some(key) if !seen.insert(key.clone()) => {
                debug!(%key, "dropping duplicate entry");
                duplicates += 1;
            }
            _ => kept.push(block),
        }
    }

    (kept, duplicates)
}

fn write_output(path: &Path, blocks: &[Block<'_>]) -> Result<(), SyncError> {
    let mut out = blocks
        .iter()
        .map(|b| b.text)
        .collect::<Vec<_>>()
        .join("\n\n");
    out.push('\n');

    fs::write(path, out).map_err(|source| SyncError::Write {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    /// Serves canned collection bodies; unknown collections answer 404.
    struct FakeSource {
        bodies: HashMap<&'static str, &'static str>,
    }

    impl FakeSource {
        fn new(bodies: &[(&'static str, &'static str)]) -> Self {
            Self {
                bodies: bodies.iter().copied().collect(),
            }
        }
    }

    impl CollectionSource for FakeSource {
        fn fetch_bibtex(&self, collection: &str) -> Result<String, SyncError> {
            self.bodies
                .get(collection)
                .map(|b| b.to_string())
                .ok_or_else(|| SyncError::Status {
                    collection: collection.to_string(),
                    status: 404,
                })
        }
    }

    fn config(dir: &TempDir, collections: &[&str]) -> SyncConfig {
        SyncConfig {
            api_key: "abc123".to_string(),
            library_id: "42".to_string(),
            library_type: LibraryType::User,
            collections: collections.iter().map(|c| c.to_string()).collect(),
            output: dir.path().join("bibliography.bib"),
            local_entries: None,
            dedupe: true,
            limit: 100,
            api_base: "https://api.zotero.org".to_string(),
        }
    }

    const COLL_A: &str = "@article{smith2020,\n  title = {One}\n}\n\n@book{jones2019,\n  title = {Two}\n}\n";
    const COLL_B: &str = "@article{smith2020,\n  title = {One again}\n}\n@misc{doe2021,\n  title = {Three}\n}\n";

    #[test]
    fn test_sync_writes_all_collections() {
        // Given: two collections sharing one entry
        let dir = TempDir::new().unwrap();
        let config = config(&dir, &["A", "B"]);
        let source = FakeSource::new(&[("A", COLL_A), ("B", COLL_B)]);

        // When: we sync
        let summary = sync_bibliography(&config, &source).unwrap();

        // Then: the duplicate is dropped, first occurrence wins
        assert_eq!(summary.fetched, vec!["A", "B"]);
        assert_eq!(summary.entries, 3);
        assert_eq!(summary.duplicates, 1);
        let written = fs::read_to_string(&config.output).unwrap();
        assert!(written.contains("{One}"));
        assert!(!written.contains("One again"));
        assert!(written.contains("doe2021"));
    }

    #[test]
    fn test_sync_without_dedupe_keeps_duplicates() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir, &["A", "B"]);
        config.dedupe = false;
        let source = FakeSource::new(&[("A", COLL_A), ("B", COLL_B)]);

        let summary = sync_bibliography(&config, &source).unwrap();

        assert_eq!(summary.entries, 4);
        assert_eq!(summary.duplicates, 0);
        let written = fs::read_to_string(&config.output).unwrap();
        assert_eq!(written.matches("@article{smith2020").count(), 2);
    }

    #[test]
    fn test_failed_collection_is_skipped() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, &["missing", "A"]);
        let source = FakeSource::new(&[("A", COLL_A)]);

        let summary = sync_bibliography(&config, &source).unwrap();

        assert_eq!(summary.failed, vec!["missing"]);
        assert_eq!(summary.fetched, vec!["A"]);
        assert_eq!(summary.entries, 2);
    }

    #[test]
    fn test_empty_collection_is_reported() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, &["A", "E"]);
        let source = FakeSource::new(&[("A", COLL_A), ("E", "\n")]);

        let summary = sync_bibliography(&config, &source).unwrap();

        assert_eq!(summary.fetched, vec!["A"]);
        assert_eq!(summary.empty, vec!["E"]);
        assert!(summary.failed.is_empty());
    }

    #[test]
    fn test_nothing_fetched_is_fatal() {
        // Given: no collection can be fetched and an existing output
        let dir = TempDir::new().unwrap();
        let config = config(&dir, &["x", "empty"]);
        fs::write(&config.output, "@misc{keep, note={x}}\n").unwrap();
        let source = FakeSource::new(&[("empty", "  \n")]);

        // When: we sync
        let err = sync_bibliography(&config, &source).unwrap_err();

        // Then: the sync fails and the existing file is untouched
        assert!(matches!(err, SyncError::NothingFetched));
        assert_eq!(
            fs::read_to_string(&config.output).unwrap(),
            "@misc{keep, note={x}}\n"
        );
    }

    #[test]
    fn test_local_entries_appended_and_shadowed() {
        let dir = TempDir::new().unwrap();
        let local = dir.path().join("local.bib");
        fs::write(
            &local,
            "@misc{handmade, note = {local}}\n@book{jones2019, title = {Local copy}}\n",
        )
        .unwrap();
        let mut config = config(&dir, &["A"]);
        config.local_entries = Some(local);
        let source = FakeSource::new(&[("A", COLL_A)]);

        let summary = sync_bibliography(&config, &source).unwrap();

        assert!(summary.local_included);
        assert_eq!(summary.entries, 3);
        let written = fs::read_to_string(&config.output).unwrap();
        assert!(written.contains("handmade"));
        assert!(!written.contains("Local copy"));
        assert!(written.find("smith2020").unwrap() < written.find("handmade").unwrap());
    }

    #[test]
    fn test_missing_local_entries_is_skipped() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir, &["A"]);
        config.local_entries = Some(dir.path().join("nope.bib"));
        let summary = sync_bibliography(&config, &FakeSource::new(&[("A", COLL_A)])).unwrap();
        assert!(!summary.local_included);
    }

    #[test]
    fn test_fetched_text_is_sanitized() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, &["A"]);
        let source = FakeSource::new(&[("A", "@misc{lrm\u{200E}, note={x}}\n")]);

        sync_bibliography(&config, &source).unwrap();

        let written = fs::read_to_string(&config.output).unwrap();
        assert_eq!(written, "@misc{lrm, note={x}}\n");
    }

    #[test]
    fn test_validate_rejects_bad_credentials() {
        let dir = TempDir::new().unwrap();

        let mut c = config(&dir, &["A"]);
        c.api_key = String::new();
        assert!(matches!(c.validate(), Err(SyncError::MissingCredentials(_))));

        let mut c = config(&dir, &["A"]);
        c.api_key = "abc 123".to_string();
        assert!(matches!(c.validate(), Err(SyncError::InvalidApiKey(_))));

        let mut c = config(&dir, &["A"]);
        c.api_key = "Bearerabc".to_string();
        assert!(matches!(c.validate(), Err(SyncError::InvalidApiKey(_))));

        let c = config(&dir, &[]);
        assert!(matches!(c.validate(), Err(SyncError::NoCollections)));
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let dir = TempDir::new().unwrap();
        let c = config(&dir, &["A"]);
        let debug = format!("{:?}", c);
        assert!(!debug.contains("abc123"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_collection_url() {
        let dir = TempDir::new().unwrap();
        let mut c = config(&dir, &["6ABWTZEP"]);
        c.library_type = LibraryType::Group;
        c.api_base = "https://api.zotero.org/".to_string();
        let client = ZoteroClient::new(&c);
        assert_eq!(
            client.collection_url("6ABWTZEP"),
            "https://api.zotero.org/groups/42/collections/6ABWTZEP/items"
        );
    }

    #[test]
    fn test_split_blocks_keeps_preamble_text_and_strings() {
        let text = "% exported\n@string{n = {N}}\n@article{a, journal = n}\n";
        let blocks = split_blocks(text);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].key, None);
        assert_eq!(blocks[2].key.as_deref(), Some("a"));
    }

    #[test]
    fn test_split_blocks_ignores_at_inside_values() {
        // Given: an abstract with a line that starts with `@`
        let text = "@article{a,\n  abstract = {First line\n@mention in the text},\n}\n@book{b, title = {x}}\n";

        // When: we split
        let blocks = split_blocks(text);

        // Then: the abstract stays in its entry, unchanged
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].key.as_deref(), Some("a"));
        assert!(blocks[0].text.contains("First line\n@mention in the text}"));
        assert_eq!(blocks[1].key.as_deref(), Some("b"));
    }

    #[test]
    fn test_sync_preserves_entry_with_at_line() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, &["A"]);
        let body = "@article{a,\n  note = {see\n@handle on social media}\n}\n";
        let source = FakeSource::new(&[("A", body)]);

        let summary = sync_bibliography(&config, &source).unwrap();

        assert_eq!(summary.entries, 1);
        assert_eq!(fs::read_to_string(&config.output).unwrap(), body);
    }
}

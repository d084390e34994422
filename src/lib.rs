//! thesis-tools: CLI for keeping a LaTeX thesis and its bibliography consistent.
//!
//! This library provides functionality to:
//! - Extract citation keys from LaTeX sources
//! - Read entry keys from BibTeX files, degrading to a pattern scan when the
//!   structured parser rejects the file
//! - Report citations missing from the bibliography, and entries never cited
//! - Sync Zotero collections into a local bibliography

pub mod bibtex;
pub mod check;
pub mod config;
pub mod keys;
pub mod latex;
pub mod output;
pub mod sanitize;
pub mod sync;

pub use bibtex::{parse_bibliography, Bibliography, Entry};
pub use check::{check_consistency, find_unused, CitationStats, ConsistencyReport, UnusedReport};
pub use config::{load_config, ProjectConfig};
pub use keys::{extract_defined_keys, load_defined_keys, DefinedKeys, Strategy};
pub use latex::{
    discover_tex_files, extract_citations, extract_cited_keys, scan_documents, Citation, CitedKeys,
};
pub use output::{render, OutputFormat};
pub use sanitize::{sanitize_file, sanitize_text};
pub use sync::{sync_bibliography, CollectionSource, SyncConfig, SyncSummary, ZoteroClient};

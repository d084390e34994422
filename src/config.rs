//! Project configuration.
//!
//! Loaded from `thesis-tools.toml` at the project root. Every section is
//! optional; command-line flags override whatever the file sets.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "thesis-tools.toml";

/// Errors that can occur when loading the configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration in '{path}': {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectConfig {
    pub documents: DocumentsConfig,
    pub bibliography: BibliographyConfig,
    pub sync: SyncSection,
}

/// Where the LaTeX sources live.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DocumentsConfig {
    /// Files or directories scanned for `.tex` sources
    pub roots: Vec<PathBuf>,
    /// File-name substrings to skip (e.g. generated bibliography sections)
    pub exclude: Vec<String>,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            roots: vec![PathBuf::from("content")],
            exclude: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BibliographyConfig {
    pub path: PathBuf,
}

impl Default for BibliographyConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("content/resources/bibliography.bib"),
        }
    }
}

/// Library type of a Zotero library.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LibraryType {
    #[default]
    User,
    Group,
}

impl LibraryType {
    /// URL path segment for this library type.
    pub fn path_segment(self) -> &'static str {
        match self {
            LibraryType::User => "users",
            LibraryType::Group => "groups",
        }
    }
}

/// Non-secret sync settings. Credentials never live in the file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSection {
    pub library_type: LibraryType,
    pub collections: Vec<String>,
    /// Bibliography file to overwrite; defaults to `bibliography.path`
    pub output: Option<PathBuf>,
    /// Manually maintained entries appended after the fetched ones
    pub local_entries: Option<PathBuf>,
    pub dedupe: bool,
    /// Items requested per collection
    pub limit: u32,
    pub api_base: String,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            library_type: LibraryType::User,
            collections: Vec::new(),
            output: None,
            local_entries: None,
            dedupe: true,
            limit: 100,
            api_base: "https://api.zotero.org".to_string(),
        }
    }
}

/// Parses configuration text.
pub fn parse_config(text: &str, path: &Path) -> Result<ProjectConfig, ConfigError> {
    toml::from_str(text).map_err(|source| ConfigError::Toml {
        path: path.to_path_buf(),
        source,
    })
}

/// Loads the configuration file.
///
/// With `explicit` set, a missing file is an error. Otherwise a missing
/// file yields the defaults.
pub fn load_config(path: &Path, explicit: bool) -> Result<ProjectConfig, ConfigError> {
    match fs::read_to_string(path) {
        Ok(text) => {
            debug!(path = %path.display(), "loaded configuration");
            parse_config(&text, path)
        }
        Err(e) if e.kind() == ErrorKind::NotFound && !explicit => {
            debug!(path = %path.display(), "no configuration file, using defaults");
            Ok(ProjectConfig::default())
        }
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

//! Shared test helpers for integration tests.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// Bibliography defining `smith2020`, `jones2019` and `doe2021`.
pub const BIBLIOGRAPHY: &str = r#"@article{smith2020,
  author = {Smith, Anna},
  title = {Trust in Automated Systems},
  year = {2020},
}

@book{jones2019,
  author = {Jones, Bo},
  title = {Survey Methods},
  year = {2019},
}

@inproceedings{doe2021,
  author = {Doe, Cy},
  title = {Adoption Studies},
  year = {2021},
}
"#;

/// A throwaway thesis project laid out like the real one:
/// `content/prestudy/main.tex`, `content/prestudy/sections/*.tex` and
/// `content/resources/bibliography.bib`.
pub struct Project {
    pub dir: TempDir,
}

impl Project {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("content/prestudy/sections")).unwrap();
        fs::create_dir_all(dir.path().join("content/resources")).unwrap();
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Writes a file relative to the project root and returns its path.
    pub fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(relative);
        fs::write(&path, content).unwrap();
        path
    }

    pub fn write_section(&self, name: &str, content: &str) -> PathBuf {
        self.write(&format!("content/prestudy/sections/{}", name), content)
    }

    pub fn write_bibliography(&self, content: &str) -> PathBuf {
        self.write("content/resources/bibliography.bib", content)
    }
}

//! Document directory management.
//!
//! Provides consistent directory structure for rendered documents,
//! ensuring the same paths are used by the CLI and the engines.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Directory structure for a Vesta document.
///
/// All Vesta-related files are stored under a `.vesta` directory
/// next to the document:
///
/// ```text
/// report.qmd
/// .vesta/
/// └── freeze/   # Stored execution results
/// ```
#[derive(Debug, Clone)]
pub struct DocumentDirs {
    /// The `.vesta` directory itself.
    pub vesta_dir: PathBuf,

    /// Directory of frozen execution results.
    pub freeze_dir: PathBuf,
}

impl DocumentDirs {
    /// Create directory structure from a document path.
    ///
    /// Creates all necessary directories if they don't exist.
    ///
    /// # Errors
    /// Returns an error if directory creation fails.
    pub fn from_document_path(document_path: &Path) -> Result<Self> {
        let document_dir = document_path.parent().unwrap_or(Path::new("."));
        Self::from_document_dir(document_dir)
    }

    /// Create directory structure from the document's parent directory.
    ///
    /// # Errors
    /// Returns an error if directory creation fails.
    pub fn from_document_dir(document_dir: &Path) -> Result<Self> {
        let vesta_dir = document_dir.join(".vesta");
        let freeze_dir = vesta_dir.join("freeze");

        fs::create_dir_all(&freeze_dir)?;

        Ok(Self {
            vesta_dir,
            freeze_dir,
        })
    }

    /// Remove stored results and recreate the empty structure.
    pub fn clean(&self) -> Result<()> {
        if self.vesta_dir.exists() {
            fs::remove_dir_all(&self.vesta_dir)?;
        }

        fs::create_dir_all(&self.freeze_dir)?;

        Ok(())
    }
}

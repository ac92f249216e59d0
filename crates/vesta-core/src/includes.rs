//! Content fragments injected into the final document.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Injection points understood by the converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncludePoint {
    InHeader,
    BeforeBody,
    AfterBody,
}

impl IncludePoint {
    /// Converter flag for this injection point.
    pub fn pandoc_flag(&self) -> &'static str {
        match self {
            IncludePoint::InHeader => "--include-in-header",
            IncludePoint::BeforeBody => "--include-before-body",
            IncludePoint::AfterBody => "--include-after-body",
        }
    }

    fn file_suffix(&self) -> &'static str {
        match self {
            IncludePoint::InHeader => "in-header",
            IncludePoint::BeforeBody => "before-body",
            IncludePoint::AfterBody => "after-body",
        }
    }
}

/// Fragments keyed by where they are injected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IncludeSet {
    #[serde(default)]
    pub in_header: Vec<String>,
    #[serde(default)]
    pub before_body: Vec<String>,
    #[serde(default)]
    pub after_body: Vec<String>,
}

impl IncludeSet {
    pub fn is_empty(&self) -> bool {
        self.in_header.is_empty() && self.before_body.is_empty() && self.after_body.is_empty()
    }

    pub fn get(&self, point: IncludePoint) -> &[String] {
        match point {
            IncludePoint::InHeader => &self.in_header,
            IncludePoint::BeforeBody => &self.before_body,
            IncludePoint::AfterBody => &self.after_body,
        }
    }

    /// Append all fragments of `other`.
    pub fn extend(&mut self, other: IncludeSet) {
        self.in_header.extend(other.in_header);
        self.before_body.extend(other.before_body);
        self.after_body.extend(other.after_body);
    }

    /// Write one file per non-empty injection point into `dir`.
    ///
    /// Returns the written files with their injection point.
    pub fn write_files(&self, dir: &Path, stem: &str) -> Result<Vec<(IncludePoint, PathBuf)>> {
        let mut written = Vec::new();
        for point in [
            IncludePoint::InHeader,
            IncludePoint::BeforeBody,
            IncludePoint::AfterBody,
        ] {
            let fragments = self.get(point);
            if fragments.is_empty() {
                continue;
            }
            let path = dir.join(format!("{}-{}.html", stem, point.file_suffix()));
            std::fs::write(&path, fragments.join("\n"))?;
            written.push((point, path));
        }
        Ok(written)
    }
}

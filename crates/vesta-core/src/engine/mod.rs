//! Execution engine contract.
//!
//! An engine turns a source document into markdown, executing whatever code
//! it contains. The registry picks the engine for a file; the driver then
//! resolves the target, executes, and post-processes through this trait.

pub mod markdown;
mod registry;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::format::FormatSpec;
use crate::frontmatter::Metadata;
use crate::includes::IncludeSet;

pub use markdown::MarkdownEngine;
pub use registry::{EngineRegistry, code_languages};

/// Opaque dependency record handed back to callers that understand it.
pub type DependencyRecord = serde_json::Value;

/// What actually gets executed for a source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionTarget {
    /// The document the user asked for.
    pub source: PathBuf,
    /// The artifact the kernel runs (may equal `source`).
    pub input: PathBuf,
    /// `input` was created by resolution and is owned by the framework.
    pub transient: bool,
}

impl ExecutionTarget {
    /// A target that executes the source file itself.
    pub fn in_place(path: &Path) -> Self {
        Self {
            source: path.to_path_buf(),
            input: path.to_path_buf(),
            transient: false,
        }
    }
}

/// Input of one `execute` call.
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    pub target: ExecutionTarget,
    pub format: FormatSpec,
    /// The caller wants raw dependency records instead of an include set.
    pub wants_dependency_records: bool,
}

/// Side-channel dependencies produced by execution.
///
/// Callers that can interpret raw records get them unchanged; everyone else
/// gets them pre-rendered into include fragments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum EngineDependencies {
    Includes(IncludeSet),
    Records(Vec<DependencyRecord>),
}

impl EngineDependencies {
    /// No dependencies, in the shape the caller asked for.
    pub fn empty(wants_records: bool) -> Self {
        if wants_records {
            EngineDependencies::Records(Vec::new())
        } else {
            EngineDependencies::Includes(IncludeSet::default())
        }
    }
}

/// Output of one `execute` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub markdown: String,
    /// Files produced alongside the markdown (figure directories).
    pub supporting: Vec<PathBuf>,
    pub dependencies: EngineDependencies,
    /// Placeholder token to deferred content.
    pub preserve: HashMap<String, String>,
    /// Post-processing is required after conversion.
    pub post_process: bool,
}

impl ExecuteResult {
    pub fn new(
        markdown: String,
        supporting: Vec<PathBuf>,
        dependencies: EngineDependencies,
        preserve: HashMap<String, String>,
    ) -> Self {
        let post_process = !preserve.is_empty();
        Self {
            markdown,
            supporting,
            dependencies,
            preserve,
            post_process,
        }
    }

    pub fn includes(&self) -> Option<&IncludeSet> {
        match &self.dependencies {
            EngineDependencies::Includes(includes) => Some(includes),
            EngineDependencies::Records(_) => None,
        }
    }

    pub fn dependency_records(&self) -> Option<&[DependencyRecord]> {
        match &self.dependencies {
            EngineDependencies::Records(records) => Some(records),
            EngineDependencies::Includes(_) => None,
        }
    }
}

/// Input of a `dependencies` call: render earlier records into includes.
#[derive(Debug, Clone)]
pub struct DependenciesOptions {
    pub target: ExecutionTarget,
    pub format: FormatSpec,
    pub dependencies: Vec<DependencyRecord>,
}

/// Input of a `postprocess` call, made after the converter has run.
#[derive(Debug, Clone)]
pub struct PostProcessOptions {
    pub target: ExecutionTarget,
    pub format: FormatSpec,
    /// The converter's output file.
    pub output: PathBuf,
    pub preserve: HashMap<String, String>,
}

/// A pluggable execution engine.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Unique engine name (`jupyter`, `markdown`).
    fn name(&self) -> &str;

    /// Extension of new documents for this engine.
    fn default_ext(&self) -> &str;

    /// Every extension this engine can render, claimed or not.
    fn valid_extensions(&self) -> &[&'static str];

    /// Whether the engine takes files with this extension outright.
    fn claims_extension(&self, ext: &str) -> bool;

    /// Whether the engine executes code chunks in `language`.
    fn claims_language(&self, _language: &str) -> bool {
        false
    }

    /// Resolve the execution target, or `None` if `file` is not renderable.
    async fn target(&self, file: &Path) -> Result<Option<ExecutionTarget>>;

    /// Read document metadata without executing anything.
    async fn metadata(&self, file: &Path) -> Result<Metadata>;

    /// Execute the target and produce markdown.
    async fn execute(&self, options: ExecuteOptions) -> Result<ExecuteResult>;

    /// Called instead of `execute` when a stored result is reused.
    async fn execute_target_skipped(&self, _target: &ExecutionTarget, _format: &FormatSpec) {}

    /// Render dependency records into include fragments.
    async fn dependencies(&self, _options: DependenciesOptions) -> Result<IncludeSet> {
        Ok(IncludeSet::default())
    }

    /// Restore deferred content in the converter's output.
    async fn postprocess(&self, options: PostProcessOptions) -> Result<()> {
        crate::preserve::postprocess_output(&options.output, &options.preserve).await
    }

    /// Whether results may be stored and reused.
    fn can_freeze(&self) -> bool {
        false
    }

    /// Files next to `file` that cleaners must not delete.
    fn keep_files(&self, _file: &Path) -> Option<Vec<PathBuf>> {
        None
    }
}

/// Lowercased extension of `path` with its leading dot (`.qmd`).
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
}

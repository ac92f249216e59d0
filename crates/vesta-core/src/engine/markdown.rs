//! Engine for plain markdown documents: nothing to execute.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;

use super::{EngineDependencies, ExecuteOptions, ExecuteResult, ExecutionEngine, ExecutionTarget};
use crate::error::Result;
use crate::frontmatter::{Metadata, read_yaml_from_markdown};

const EXTENSIONS: &[&str] = &[".md", ".markdown", ".qmd"];

/// Passes markdown through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownEngine;

#[async_trait]
impl ExecutionEngine for MarkdownEngine {
    fn name(&self) -> &str {
        "markdown"
    }

    fn default_ext(&self) -> &str {
        ".md"
    }

    fn valid_extensions(&self) -> &[&'static str] {
        EXTENSIONS
    }

    fn claims_extension(&self, ext: &str) -> bool {
        ext == ".md" || ext == ".markdown"
    }

    async fn target(&self, file: &Path) -> Result<Option<ExecutionTarget>> {
        Ok(Some(ExecutionTarget::in_place(file)))
    }

    async fn metadata(&self, file: &Path) -> Result<Metadata> {
        let text = tokio::fs::read_to_string(file).await?;
        read_yaml_from_markdown(&text)
    }

    async fn execute(&self, options: ExecuteOptions) -> Result<ExecuteResult> {
        let markdown = tokio::fs::read_to_string(&options.target.input).await?;
        Ok(ExecuteResult::new(
            markdown,
            Vec::new(),
            EngineDependencies::empty(options.wants_dependency_records),
            HashMap::new(),
        ))
    }
}

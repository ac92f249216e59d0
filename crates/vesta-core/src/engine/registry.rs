//! Engine selection.

use std::path::Path;
use std::sync::Arc;

use super::{ExecutionEngine, extension_of};
use crate::error::{Error, Result};
use crate::frontmatter::read_yaml_from_markdown;

/// Fixed, ordered list of engines.
pub struct EngineRegistry {
    engines: Vec<Arc<dyn ExecutionEngine>>,
    fallback: Option<String>,
}

impl EngineRegistry {
    pub fn new(engines: Vec<Arc<dyn ExecutionEngine>>) -> Self {
        Self {
            engines,
            fallback: None,
        }
    }

    /// Engine used for renderable documents that contain no claimed code.
    pub fn with_fallback(mut self, name: impl Into<String>) -> Self {
        self.fallback = Some(name.into());
        self
    }

    pub fn engines(&self) -> &[Arc<dyn ExecutionEngine>] {
        &self.engines
    }

    pub fn engine_by_name(&self, name: &str) -> Option<Arc<dyn ExecutionEngine>> {
        self.engines.iter().find(|e| e.name() == name).cloned()
    }

    /// Pick the engine for `file`.
    ///
    /// Extension claims win, then an explicit `engine:` in the front matter,
    /// then claims on the document's code chunk languages, then the fallback
    /// for any extension some engine can render.
    pub async fn select(&self, file: &Path) -> Result<Arc<dyn ExecutionEngine>> {
        let ext = extension_of(file).unwrap_or_default();

        let by_extension: Vec<_> = self
            .engines
            .iter()
            .filter(|e| e.claims_extension(&ext))
            .cloned()
            .collect();
        if let Some(engine) = Self::single(file, by_extension)? {
            return Ok(engine);
        }

        let renderable = self
            .engines
            .iter()
            .any(|e| e.valid_extensions().contains(&ext.as_str()));
        if !renderable {
            return Err(Error::NoEngine(file.to_path_buf()));
        }

        let text = tokio::fs::read_to_string(file).await?;

        let metadata = read_yaml_from_markdown(&text)?;
        if let Some(name) = metadata.get("engine").and_then(|v| v.as_str()) {
            return self
                .engine_by_name(name)
                .ok_or_else(|| Error::Config(format!("unknown engine '{}'", name)));
        }

        let languages = code_languages(&text);
        let by_language: Vec<_> = self
            .engines
            .iter()
            .filter(|e| languages.iter().any(|lang| e.claims_language(lang)))
            .cloned()
            .collect();
        if let Some(engine) = Self::single(file, by_language)? {
            return Ok(engine);
        }

        self.fallback
            .as_deref()
            .and_then(|name| self.engine_by_name(name))
            .ok_or_else(|| Error::NoEngine(file.to_path_buf()))
    }

    fn single(
        file: &Path,
        mut candidates: Vec<Arc<dyn ExecutionEngine>>,
    ) -> Result<Option<Arc<dyn ExecutionEngine>>> {
        match candidates.len() {
            0 => Ok(None),
            1 => Ok(candidates.pop()),
            _ => Err(Error::AmbiguousEngine {
                path: file.to_path_buf(),
                engines: candidates.iter().map(|e| e.name().to_string()).collect(),
            }),
        }
    }
}

/// Languages of executable code chunks (```` ```{python} ````), in order of
/// first appearance.
pub fn code_languages(text: &str) -> Vec<String> {
    let mut languages: Vec<String> = Vec::new();
    for line in text.lines() {
        let Some(fence) = line.trim_start().strip_prefix("```") else {
            continue;
        };
        let fence = fence.trim_start_matches('`').trim_start();
        let Some(attrs) = fence.strip_prefix('{') else {
            continue;
        };
        let lang: String = attrs
            .chars()
            .take_while(|c| !c.is_whitespace() && *c != ',' && *c != '}')
            .collect();
        // `{=html}` is raw content, `{.python}` a plain class.
        if lang.is_empty() || lang.starts_with('=') || lang.starts_with('.') {
            continue;
        }
        let lang = lang.to_lowercase();
        if !languages.contains(&lang) {
            languages.push(lang);
        }
    }
    languages
}

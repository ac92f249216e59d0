//! Conversion between text documents (`.qmd`) and notebooks.
//!
//! A document is front matter, prose, and fenced code chunks:
//!
//! ````text
//! ---
//! title: Report
//! jupyter: python3
//! ---
//!
//! Some prose.
//!
//! ```{python}
//! #| echo: false
//! print(1 + 1)
//! ```
//! ````
//!
//! Chunks in the kernel's language become code cells, the front matter a raw
//! cell, and everything else markdown cells.

use std::path::Path;

use serde_json::Value;
use vesta_core::frontmatter::{parse_yaml_mapping, split_front_matter};

use crate::cell_options::option_marker;
use crate::error::{NotebookError, NotebookResult};
use crate::notebook::{
    Cell, CodeCell, KernelSpec, Notebook, TextCell, VestaMetadata, kernelspec_for_language,
    kernelspec_for_name,
};

/// An executable chunk fence: ```` ```{python echo=false} ````.
#[derive(Debug, Clone, PartialEq)]
struct ChunkFence {
    ticks: usize,
    language: String,
    /// `key=value` attributes, rewritten as option lines.
    options: Vec<(String, String)>,
}

fn fence_ticks(line: &str) -> usize {
    line.trim_start().chars().take_while(|c| *c == '`').count()
}

fn parse_chunk_fence(line: &str) -> Option<ChunkFence> {
    let ticks = fence_ticks(line);
    if ticks < 3 {
        return None;
    }
    let rest = line.trim_start()[ticks..].trim();
    let inner = rest.strip_prefix('{')?.strip_suffix('}')?;

    let mut parts = inner
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|p| !p.is_empty());
    let language = parts.next()?.to_lowercase();
    if language.starts_with('=') || language.starts_with('.') {
        return None;
    }

    let options = parts
        .filter_map(|part| {
            let (key, value) = part.split_once('=')?;
            let value = match value {
                "TRUE" | "T" => "true".to_string(),
                "FALSE" | "F" => "false".to_string(),
                other => other.trim_matches('"').to_string(),
            };
            Some((key.replace('.', "-"), value))
        })
        .collect();

    Some(ChunkFence {
        ticks,
        language,
        options,
    })
}

fn is_closing_fence(line: &str, ticks: usize) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && trimmed.chars().all(|c| c == '`') && trimmed.len() >= ticks
}

fn push_markdown(cells: &mut Vec<Cell>, text: &mut String) {
    let trimmed = text.trim_matches('\n');
    if !trimmed.trim().is_empty() {
        cells.push(Cell::Markdown(TextCell {
            source: trimmed.to_string(),
            ..Default::default()
        }));
    }
    text.clear();
}

/// Kernel named by the front matter (`jupyter: python3` or a kernelspec map).
fn kernel_from_front_matter(yaml: &str) -> NotebookResult<Option<KernelSpec>> {
    let metadata =
        parse_yaml_mapping(yaml).map_err(|e| NotebookError::ParseError(e.to_string()))?;

    Ok(match metadata.get("jupyter") {
        Some(Value::String(name)) => Some(kernelspec_for_name(name)),
        Some(Value::Object(map)) => match map.get("kernelspec") {
            Some(spec) => Some(serde_json::from_value(spec.clone())?),
            None => map
                .get("kernel")
                .and_then(Value::as_str)
                .map(kernelspec_for_name),
        },
        _ => None,
    })
}

/// Convert a text document into a notebook.
///
/// `source_file` is recorded in the notebook metadata so generated notebooks
/// can be told apart from user notebooks.
pub fn qmd_to_notebook(text: &str, source_file: Option<&str>) -> NotebookResult<Notebook> {
    let (front_matter, body) = match split_front_matter(text) {
        Some((yaml, body)) => (Some(yaml), body),
        None => (None, text),
    };

    let kernelspec = match front_matter.map(kernel_from_front_matter).transpose()?.flatten() {
        Some(spec) => spec,
        None => {
            let first = body.lines().find_map(parse_chunk_fence);
            kernelspec_for_language(first.map(|f| f.language).as_deref().unwrap_or("python"))
        }
    };
    let kernel_language = kernelspec.language.clone();

    let mut notebook = Notebook::new(kernelspec);
    notebook.metadata.vesta = Some(VestaMetadata {
        source_file: source_file.map(str::to_string),
        version: env!("CARGO_PKG_VERSION").to_string(),
    });

    if let Some(yaml) = front_matter {
        notebook.cells.push(Cell::Raw(TextCell {
            source: format!("---\n{}---", yaml),
            ..Default::default()
        }));
    }

    let mut markdown = String::new();
    let mut lines = body.split_inclusive('\n');
    while let Some(line) = lines.next() {
        let fence = parse_chunk_fence(line).filter(|f| f.language == kernel_language);
        let Some(fence) = fence else {
            markdown.push_str(line);
            // Skip over plain fenced blocks so their content is never read as chunks.
            let ticks = fence_ticks(line);
            if ticks >= 3 {
                for inner in lines.by_ref() {
                    markdown.push_str(inner);
                    if is_closing_fence(inner, ticks) {
                        break;
                    }
                }
            }
            continue;
        };

        push_markdown(&mut notebook.cells, &mut markdown);

        let marker = option_marker(&fence.language);
        let mut source: String = fence
            .options
            .iter()
            .map(|(key, value)| format!("{} {}: {}\n", marker, key, value))
            .collect();
        for inner in lines.by_ref() {
            if is_closing_fence(inner, fence.ticks) {
                break;
            }
            source.push_str(inner);
        }

        notebook.cells.push(Cell::Code(CodeCell {
            source: source.trim_end_matches('\n').to_string(),
            ..Default::default()
        }));
    }
    push_markdown(&mut notebook.cells, &mut markdown);

    Ok(notebook)
}

/// Read a text document from disk and convert it.
pub fn qmd_file_to_notebook(path: &Path) -> NotebookResult<Notebook> {
    let text = std::fs::read_to_string(path).map_err(|e| NotebookError::ReadError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
    qmd_to_notebook(&text, name.as_deref())
}

/// Convert a notebook back into a text document, dropping outputs.
pub fn notebook_to_qmd(notebook: &Notebook) -> String {
    let language = notebook.language();
    let mut parts: Vec<String> = Vec::new();

    let has_front_matter = matches!(
        notebook.cells.first(),
        Some(Cell::Raw(raw)) if raw.source.starts_with("---")
    );
    if !has_front_matter {
        let kernel = notebook
            .metadata
            .kernelspec
            .as_ref()
            .map(|k| k.name.clone())
            .unwrap_or_else(|| "python3".to_string());
        parts.push(format!("---\njupyter: {}\n---", kernel));
    }

    for cell in &notebook.cells {
        match cell {
            Cell::Markdown(text) | Cell::Raw(text) => parts.push(text.source.trim_end().to_string()),
            Cell::Code(code) => parts.push(format!(
                "```{{{}}}\n{}\n```",
                language,
                code.source.trim_end_matches('\n')
            )),
        }
    }

    let mut qmd = parts.join("\n\n");
    qmd.push('\n');
    qmd
}

/// Prose of a notebook: markdown and raw cells, in order.
pub fn markdown_from_notebook(notebook: &Notebook) -> String {
    notebook
        .cells
        .iter()
        .filter_map(|cell| match cell {
            Cell::Markdown(text) | Cell::Raw(text) => Some(text.source.as_str()),
            Cell::Code(_) => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

//! `#|` cell option comments.
//!
//! Options are YAML lines at the top of a code cell, prefixed with the
//! language's comment marker and a pipe:
//!
//! ```text
//! #| echo: false
//! #| label: fig-scatter
//! plot(x, y)
//! ```

use serde_json::Value;
use vesta_core::Metadata;
use vesta_core::frontmatter::parse_yaml_mapping;

use crate::error::{NotebookError, NotebookResult};

/// Option marker for a language (`#|`, `//|`, `--|`).
pub fn option_marker(language: &str) -> &'static str {
    match language {
        "javascript" | "js" | "ojs" | "typescript" | "c" | "cpp" | "rust" | "java" | "go" => "//|",
        "sql" | "haskell" | "lua" => "--|",
        "matlab" | "octave" => "%|",
        _ => "#|",
    }
}

/// Options parsed off the top of a cell.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CellOptions {
    pub options: Metadata,
    /// Source with the option lines removed.
    pub source: String,
}

impl CellOptions {
    pub fn bool(&self, key: &str) -> Option<bool> {
        self.options.get(key).and_then(Value::as_bool)
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(Value::as_str)
    }
}

/// Split leading option lines off `source` and parse them.
pub fn parse_cell_options(source: &str, language: &str) -> NotebookResult<CellOptions> {
    let marker = option_marker(language);
    let mut yaml = String::new();
    let mut consumed = 0;

    for line in source.split_inclusive('\n') {
        let Some(option) = line.trim_start().strip_prefix(marker) else {
            break;
        };
        yaml.push_str(option.strip_prefix(' ').unwrap_or(option));
        if !option.ends_with('\n') {
            yaml.push('\n');
        }
        consumed += line.len();
    }

    let options = parse_yaml_mapping(&yaml)
        .map_err(|e| NotebookError::ParseError(format!("invalid cell options: {}", e)))?;

    Ok(CellOptions {
        options,
        source: source[consumed..].to_string(),
    })
}

//! Jupyter notebook (.ipynb) model.
//!
//! Reading is tolerant: multiline strings may be a single string or a list of
//! lines, and unknown metadata is carried through untouched.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{NotebookError, NotebookResult};

/// MIME type of Jupyter widget views.
pub const WIDGET_VIEW_MIME: &str = "application/vnd.jupyter.widget-view+json";

/// MIME type of Jupyter widget state.
pub const WIDGET_STATE_MIME: &str = "application/vnd.jupyter.widget-state+json";

/// Output data keyed by MIME type.
pub type MimeBundle = Map<String, Value>;

/// A Jupyter notebook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notebook {
    /// Notebook metadata
    #[serde(default)]
    pub metadata: NotebookMetadata,

    /// Format version (always 4)
    pub nbformat: u32,

    /// Minor format version
    pub nbformat_minor: u32,

    /// Notebook cells
    pub cells: Vec<Cell>,
}

/// Notebook metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotebookMetadata {
    /// Kernel specification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernelspec: Option<KernelSpec>,

    /// Language info
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_info: Option<LanguageInfo>,

    /// Marks a notebook generated from a text document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vesta: Option<VestaMetadata>,

    /// Saved widget state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widgets: Option<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Kernel specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelSpec {
    /// Display name
    pub display_name: String,

    /// Language
    #[serde(default)]
    pub language: String,

    /// Kernel name
    pub name: String,
}

/// Language information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageInfo {
    /// Language name
    pub name: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Metadata recorded in generated notebooks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VestaMetadata {
    /// File name of the document this notebook was generated from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,

    /// Vesta version
    pub version: String,
}

/// A notebook cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cell_type", rename_all = "lowercase")]
pub enum Cell {
    Markdown(TextCell),
    Raw(TextCell),
    Code(CodeCell),
}

/// Markdown or raw cell.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextCell {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default)]
    pub metadata: CellMetadata,

    #[serde(with = "multiline")]
    pub source: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Value>,
}

/// Code cell.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodeCell {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default)]
    pub metadata: CellMetadata,

    #[serde(with = "multiline")]
    pub source: String,

    #[serde(default)]
    pub execution_count: Option<u32>,

    #[serde(default)]
    pub outputs: Vec<Output>,
}

/// Cell metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CellMetadata {
    /// Tags (`remove-cell`, `remove-input`, `remove-output`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,

    /// Target format of a raw cell
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    /// Legacy target MIME type of a raw cell
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_mimetype: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CellMetadata {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags
            .as_ref()
            .is_some_and(|tags| tags.iter().any(|t| t == tag))
    }
}

/// Cell output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "output_type", rename_all = "snake_case")]
pub enum Output {
    /// Standard output/error
    Stream {
        name: String,
        #[serde(with = "multiline")]
        text: String,
    },

    /// Rich result of the last expression
    ExecuteResult {
        execution_count: Option<u32>,
        data: MimeBundle,
        #[serde(default)]
        metadata: Map<String, Value>,
    },

    /// Display data
    DisplayData {
        data: MimeBundle,
        #[serde(default)]
        metadata: Map<String, Value>,
    },

    /// Error output
    Error {
        ename: String,
        evalue: String,
        #[serde(default)]
        traceback: Vec<String>,
    },
}

impl Output {
    /// Plain stream output.
    pub fn stream(name: &str, text: impl Into<String>) -> Self {
        Output::Stream {
            name: name.to_string(),
            text: text.into(),
        }
    }
}

/// Text of a MIME bundle entry (joining line lists).
pub fn mime_text(bundle: &MimeBundle, mime: &str) -> Option<String> {
    match bundle.get(mime)? {
        Value::String(text) => Some(text.clone()),
        Value::Array(lines) => Some(
            lines
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .concat(),
        ),
        other => Some(other.to_string()),
    }
}

impl Notebook {
    /// Create an empty notebook for `kernelspec`.
    pub fn new(kernelspec: KernelSpec) -> Self {
        Self {
            metadata: NotebookMetadata {
                language_info: Some(LanguageInfo {
                    name: kernelspec.language.clone(),
                    extra: Map::new(),
                }),
                kernelspec: Some(kernelspec),
                ..Default::default()
            },
            nbformat: 4,
            nbformat_minor: 5,
            cells: Vec::new(),
        }
    }

    /// Language of the notebook's kernel.
    pub fn language(&self) -> String {
        self.metadata
            .kernelspec
            .as_ref()
            .map(|k| k.language.clone())
            .filter(|l| !l.is_empty())
            .or_else(|| self.metadata.language_info.as_ref().map(|l| l.name.clone()))
            .unwrap_or_else(|| "python".to_string())
    }

    /// Source file recorded by the generator, if any.
    pub fn source_file(&self) -> Option<&str> {
        self.metadata.vesta.as_ref()?.source_file.as_deref()
    }

    pub fn from_json(text: &str) -> NotebookResult<Self> {
        let notebook: Self = serde_json::from_str(text)?;
        if notebook.nbformat < 4 {
            return Err(NotebookError::InvalidNotebook(format!(
                "unsupported nbformat {}",
                notebook.nbformat
            )));
        }
        Ok(notebook)
    }

    /// Write the notebook to a file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> NotebookResult<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|e| NotebookError::WriteError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    /// Read a notebook from a file.
    pub fn read_from_file(path: impl AsRef<Path>) -> NotebookResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| NotebookError::ReadError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_json(&content)
    }
}

/// Known kernels by chunk language.
pub fn kernelspec_for_language(language: &str) -> KernelSpec {
    let (name, display_name, language) = match language.to_lowercase().as_str() {
        "python" | "python3" => ("python3", "Python 3", "python"),
        "julia" => ("julia-1", "Julia", "julia"),
        "r" => ("ir", "R", "r"),
        "bash" | "sh" => ("bash", "Bash", "bash"),
        other => return KernelSpec {
            display_name: other.to_string(),
            language: other.to_string(),
            name: other.to_string(),
        },
    };
    KernelSpec {
        display_name: display_name.to_string(),
        language: language.to_string(),
        name: name.to_string(),
    }
}

/// Kernel by kernel name (`jupyter: python3` in front matter).
pub fn kernelspec_for_name(name: &str) -> KernelSpec {
    match name {
        "python3" | "python" => kernelspec_for_language("python"),
        "ir" => kernelspec_for_language("r"),
        name if name.starts_with("julia") => kernelspec_for_language("julia"),
        other => kernelspec_for_language(other),
    }
}

/// Serde adapter for Jupyter multiline strings.
///
/// Accepts a string or a list of lines; writes a list of lines.
mod multiline {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Lines(Vec<String>),
    }

    pub fn serialize<S: Serializer>(text: &str, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(text.split_inclusive('\n'))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
        Ok(match Repr::deserialize(deserializer)? {
            Repr::Text(text) => text,
            Repr::Lines(lines) => lines.concat(),
        })
    }
}

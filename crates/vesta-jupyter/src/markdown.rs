//! Notebook to markdown conversion.
//!
//! The notebook is consumed: outputs are moved into the markdown (or onto
//! disk, for figures) rather than copied, since executed notebooks can be
//! large.
//!
//! ```text
//! code cell ──► ::: {.cell}
//!               ```{.python .cell-code}     (echo)
//!               ...
//!               ```
//!               ::: {.cell-output-stdout}   (one div per output)
//!               ...
//!               :::
//!               :::
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine;
use serde_json::Value;
use vesta_core::preserve::preserve_placeholder;
use vesta_core::{ExecuteSettings, FigureFormat, FormatSpec};

use crate::cell_options::{CellOptions, parse_cell_options};
use crate::error::{NotebookError, NotebookResult};
use crate::notebook::{
    Cell, CellMetadata, CodeCell, MimeBundle, Notebook, Output, TextCell, WIDGET_VIEW_MIME,
    mime_text,
};
use crate::widgets::{WidgetDependencies, extract_widget_dependencies};

/// Where figures of a document are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotebookAssets {
    /// Directory of the document.
    pub base_dir: PathBuf,
    /// `<stem>_files`, relative to `base_dir`.
    pub supporting_dir: String,
    /// `<stem>_files/figure-<to>`, relative to `base_dir`.
    pub figures_dir: String,
}

impl NotebookAssets {
    pub fn for_document(source: &Path, to: &str) -> Self {
        let base_dir = source.parent().map(Path::to_path_buf).unwrap_or_default();
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let supporting_dir = format!("{}_files", stem);
        let figures_dir = format!("{}/figure-{}", supporting_dir, to);
        Self {
            base_dir,
            supporting_dir,
            figures_dir,
        }
    }

    pub fn supporting_path(&self) -> PathBuf {
        self.base_dir.join(&self.supporting_dir)
    }

    pub fn figures_path(&self) -> PathBuf {
        self.base_dir.join(&self.figures_dir)
    }
}

/// How to render a notebook.
#[derive(Debug, Clone)]
pub struct MarkdownOptions {
    /// Language of the code cells.
    pub language: String,
    pub assets: NotebookAssets,
    /// Document-level defaults for cell options.
    pub execute: ExecuteSettings,
    /// Keep hidden content with a `.hidden` class.
    pub keep_hidden: bool,
    pub to_html: bool,
    pub to_latex: bool,
    pub to_markdown: bool,
    pub fig_format: Option<FigureFormat>,
    pub fig_dpi: Option<u32>,
}

impl MarkdownOptions {
    pub fn new(language: String, assets: NotebookAssets, format: &FormatSpec) -> Self {
        Self {
            language,
            assets,
            execute: format.execute.clone(),
            keep_hidden: format.keep_hidden(),
            to_html: format.is_html_compatible(),
            to_latex: format.is_latex_output(),
            to_markdown: format.is_markdown_output(),
            fig_format: format.execute.fig_format,
            fig_dpi: format.execute.fig_dpi,
        }
    }
}

/// Result of converting a notebook.
#[derive(Debug, Clone, Default)]
pub struct MarkdownConversion {
    pub markdown: String,
    /// Widget dependencies (HTML targets only).
    pub dependencies: Option<WidgetDependencies>,
    /// Placeholder token to the HTML it stands for.
    pub preserve: HashMap<String, String>,
    /// Figure files written.
    pub figures: Vec<PathBuf>,
}

/// Visibility of part of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Show {
    Visible,
    Hidden,
    Removed,
}

impl Show {
    fn from_flag(visible: bool, keep_hidden: bool) -> Self {
        match (visible, keep_hidden) {
            (true, _) => Show::Visible,
            (false, true) => Show::Hidden,
            (false, false) => Show::Removed,
        }
    }

    fn class(&self) -> &'static str {
        if *self == Show::Hidden { " .hidden" } else { "" }
    }
}

/// Strip ANSI escape sequences (colored tracebacks).
pub fn strip_ansi(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\u{1b}' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'[') {
            chars.next();
            for code in chars.by_ref() {
                if ('@'..='~').contains(&code) {
                    break;
                }
            }
        } else {
            chars.next();
        }
    }
    out
}

fn figure_mime(format: FigureFormat) -> &'static str {
    match format {
        FigureFormat::Png => "image/png",
        FigureFormat::Jpeg => "image/jpeg",
        FigureFormat::Svg => "image/svg+xml",
        FigureFormat::Pdf => "application/pdf",
    }
}

fn is_image_mime(mime: &str) -> bool {
    mime.starts_with("image/") || mime == "application/pdf"
}

fn image_extension(mime: &str) -> &'static str {
    match mime {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/svg+xml" => "svg",
        "image/gif" => "gif",
        "application/pdf" => "pdf",
        _ => "bin",
    }
}

fn raw_format(metadata: &CellMetadata) -> Option<String> {
    let format = metadata
        .format
        .as_deref()
        .or(metadata.raw_mimetype.as_deref())?;
    Some(
        match format {
            "text/html" => "html",
            "text/latex" => "latex",
            "text/restructuredtext" => "rst",
            "text/asciidoc" => "asciidoc",
            other => other.strip_prefix("text/").unwrap_or(other),
        }
        .to_string(),
    )
}

fn needs_preserve(html: &str) -> bool {
    html.contains("<script") || html.contains("<style") || html.contains(WIDGET_VIEW_MIME)
}

fn fenced(text: &str, attrs: &str) -> String {
    format!("```{}\n{}\n```", attrs, text.trim_end_matches('\n'))
}

fn output_div(class: &str, hidden: Show, body: String) -> String {
    format!("::: {{.{}{}}}\n{}\n:::", class, hidden.class(), body)
}

struct Converter<'a> {
    options: &'a MarkdownOptions,
    preserve: HashMap<String, String>,
    figures: Vec<PathBuf>,
    code_cells: usize,
}

impl Converter<'_> {
    fn mime_preference(&self) -> Vec<&'static str> {
        let mut mimes: Vec<&'static str> = if self.options.to_html {
            vec![
                WIDGET_VIEW_MIME,
                "text/html",
                "image/svg+xml",
                "image/png",
                "image/jpeg",
                "text/markdown",
                "text/plain",
            ]
        } else if self.options.to_latex {
            vec![
                "application/pdf",
                "image/png",
                "image/jpeg",
                "text/latex",
                "text/plain",
            ]
        } else if self.options.to_markdown {
            vec!["text/markdown", "image/png", "image/jpeg", "text/plain"]
        } else {
            vec!["image/png", "image/jpeg", "text/plain"]
        };

        // A requested figure format goes ahead of the other images.
        if let Some(format) = self.options.fig_format {
            let preferred = figure_mime(format);
            if let Some(pos) = mimes.iter().position(|m| *m == preferred) {
                mimes.remove(pos);
                let first_image = mimes.iter().position(|m| is_image_mime(m)).unwrap_or(mimes.len());
                mimes.insert(first_image, preferred);
            }
        }
        mimes
    }

    fn preserved_html(&mut self, html: String) -> String {
        let token = preserve_placeholder();
        let block = fenced(&token, "{=html}");
        self.preserve.insert(token, html);
        block
    }

    fn write_figure(&mut self, mime: &str, value: &Value, output_index: usize) -> NotebookResult<String> {
        let bytes = match (mime, value) {
            ("image/svg+xml", _) => {
                let bundle: MimeBundle = [(mime.to_string(), value.clone())].into_iter().collect();
                mime_text(&bundle, mime).unwrap_or_default().into_bytes()
            }
            (_, Value::String(encoded)) => {
                let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
                base64::engine::general_purpose::STANDARD
                    .decode(compact)
                    .map_err(|e| NotebookError::InvalidNotebook(format!("bad {} data: {}", mime, e)))?
            }
            _ => {
                return Err(NotebookError::InvalidNotebook(format!(
                    "unexpected {} payload",
                    mime
                )));
            }
        };

        let name = format!(
            "cell-{}-output-{}.{}",
            self.code_cells,
            output_index,
            image_extension(mime)
        );
        let dir = self.options.assets.figures_path();
        fs::create_dir_all(&dir)?;
        let path = dir.join(&name);
        fs::write(&path, bytes).map_err(|e| NotebookError::WriteError {
            path: path.clone(),
            message: e.to_string(),
        })?;
        self.figures.push(path);

        let mut reference = format!("![]({}/{})", self.options.assets.figures_dir, name);
        if let Some(dpi) = self.options.fig_dpi {
            reference.push_str(&format!("{{fig-dpi={}}}", dpi));
        }
        Ok(reference)
    }

    fn display(&mut self, data: MimeBundle, output_index: usize) -> NotebookResult<Option<String>> {
        let Some(mime) = self
            .mime_preference()
            .into_iter()
            .find(|mime| data.contains_key(*mime))
        else {
            return Ok(None);
        };

        let rendered = match mime {
            WIDGET_VIEW_MIME => {
                let view = data.get(mime).map(Value::to_string).unwrap_or_default();
                let script = format!("<script type=\"{}\">\n{}\n</script>", WIDGET_VIEW_MIME, view);
                self.preserved_html(script)
            }
            "text/html" => {
                let html = mime_text(&data, mime).unwrap_or_default();
                if needs_preserve(&html) {
                    self.preserved_html(html)
                } else {
                    fenced(&html, "{=html}")
                }
            }
            "text/latex" => fenced(&mime_text(&data, mime).unwrap_or_default(), "{=latex}"),
            "text/markdown" => mime_text(&data, mime).unwrap_or_default().trim_end().to_string(),
            "text/plain" => fenced(&mime_text(&data, mime).unwrap_or_default(), ""),
            image => match data.get(image) {
                Some(value) => self.write_figure(image, value, output_index)?,
                None => return Ok(None),
            },
        };
        Ok(Some(rendered))
    }

    fn text_cell(&self, cell: TextCell, raw: bool) -> String {
        let source = cell.source.trim_end().to_string();
        if !raw {
            return source;
        }
        match raw_format(&cell.metadata) {
            Some(format) if format != "markdown" => fenced(&source, &format!("{{={}}}", format)),
            _ => source,
        }
    }

    fn code_cell(&mut self, cell: CodeCell) -> NotebookResult<Option<String>> {
        self.code_cells += 1;
        let options = self.options;
        let execute = &options.execute;

        let CellOptions {
            options: cell_options,
            source,
        } = parse_cell_options(&cell.source, &options.language)?;
        let flag = |key: &str, default: Option<bool>| {
            cell_options
                .get(key)
                .and_then(Value::as_bool)
                .or(default)
                .unwrap_or(true)
        };

        let include = Show::from_flag(
            flag("include", execute.include) && !cell.metadata.has_tag("remove-cell"),
            options.keep_hidden,
        );
        if include == Show::Removed {
            return Ok(None);
        }
        let echo = Show::from_flag(
            flag("echo", execute.echo) && !cell.metadata.has_tag("remove-input"),
            options.keep_hidden,
        );
        let output = Show::from_flag(
            flag("output", execute.output) && !cell.metadata.has_tag("remove-output"),
            options.keep_hidden,
        );
        let warning = Show::from_flag(flag("warning", execute.warning), options.keep_hidden);
        let error = Show::from_flag(flag("error", Some(true)), options.keep_hidden);

        let mut blocks: Vec<String> = Vec::new();

        let source = source.trim_end_matches('\n');
        if echo != Show::Removed && !source.trim().is_empty() {
            blocks.push(fenced(
                source,
                &format!("{{.{} .cell-code{}}}", options.language, echo.class()),
            ));
        }

        if output != Show::Removed {
            for (index, out) in cell.outputs.into_iter().enumerate() {
                let output_index = index + 1;
                let block = match out {
                    Output::Stream { name, text } => {
                        let (class, shown) = if name == "stderr" {
                            ("cell-output-stderr", worst(output, warning))
                        } else {
                            ("cell-output-stdout", output)
                        };
                        (shown != Show::Removed).then(|| output_div(class, shown, fenced(&text, "")))
                    }
                    Output::Error {
                        ename,
                        evalue,
                        traceback,
                    } => {
                        let shown = worst(output, error);
                        (shown != Show::Removed).then(|| {
                            let text = if traceback.is_empty() {
                                format!("{}: {}", ename, evalue)
                            } else {
                                strip_ansi(&traceback.join("\n"))
                            };
                            output_div("cell-output-error", shown, fenced(&text, ""))
                        })
                    }
                    Output::ExecuteResult { data, .. } | Output::DisplayData { data, .. } => self
                        .display(data, output_index)?
                        .map(|body| output_div("cell-output-display", output, body)),
                };
                blocks.extend(block);
            }
        }

        if blocks.is_empty() {
            return Ok(None);
        }

        let label = cell_options
            .get("label")
            .and_then(Value::as_str)
            .map(|label| format!("#{} ", label))
            .unwrap_or_default();
        Ok(Some(format!(
            "::: {{{}.cell{}}}\n{}\n:::",
            label,
            include.class(),
            blocks.join("\n\n")
        )))
    }
}

/// The less visible of two settings.
fn worst(a: Show, b: Show) -> Show {
    match (a, b) {
        (Show::Removed, _) | (_, Show::Removed) => Show::Removed,
        (Show::Hidden, _) | (_, Show::Hidden) => Show::Hidden,
        _ => Show::Visible,
    }
}

/// Convert an executed notebook into markdown.
pub fn notebook_to_markdown(
    notebook: Notebook,
    options: &MarkdownOptions,
) -> NotebookResult<MarkdownConversion> {
    let dependencies = if options.to_html {
        extract_widget_dependencies(&notebook)
    } else {
        None
    };

    let mut converter = Converter {
        options,
        preserve: HashMap::new(),
        figures: Vec::new(),
        code_cells: 0,
    };

    let mut blocks: Vec<String> = Vec::new();
    for cell in notebook.cells {
        let block = match cell {
            Cell::Markdown(text) => Some(converter.text_cell(text, false)),
            Cell::Raw(text) => Some(converter.text_cell(text, true)),
            Cell::Code(code) => converter.code_cell(code)?,
        };
        blocks.extend(block.filter(|b| !b.is_empty()));
    }

    let mut markdown = blocks.join("\n\n");
    markdown.push('\n');

    tracing::info!(
        "Converted notebook to markdown ({} figures, {} preserved blocks)",
        converter.figures.len(),
        converter.preserve.len()
    );

    Ok(MarkdownConversion {
        markdown,
        dependencies,
        preserve: converter.preserve,
        figures: converter.figures,
    })
}

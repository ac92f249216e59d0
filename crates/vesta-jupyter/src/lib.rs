//! Jupyter execution engine for Vesta.
//!
//! Executes `.ipynb` notebooks in place and `.qmd` documents through a
//! transient notebook, then converts the executed notebook into markdown.
//!
//! # Architecture
//!
//! ```text
//! report.qmd ──► qmd_to_notebook ──► report.ipynb (transient)
//!                                         │
//!                                         ▼
//!                               KernelDispatcher ──► vesta-kernel
//!                                         │
//!                                         ▼
//!                            notebook_to_markdown ──► markdown + figures
//!                                         │            + preserved HTML
//!                                         ▼
//!                                  WidgetDependencies ──► includes | records
//! ```

pub mod cell_options;
mod engine;
mod error;
pub mod kernel;
pub mod markdown;
pub mod notebook;
mod parser;
pub mod widgets;

pub use engine::{JupyterEngine, transient_notebook_path};
pub use error::{NotebookError, NotebookResult};
pub use kernel::{ProcessKernelLauncher, find_kernel_binary};
pub use markdown::{MarkdownConversion, MarkdownOptions, NotebookAssets, notebook_to_markdown};
pub use notebook::{Cell, CodeCell, KernelSpec, Notebook, Output, TextCell};
pub use parser::{markdown_from_notebook, notebook_to_qmd, qmd_file_to_notebook, qmd_to_notebook};
pub use widgets::{WidgetDependencies, extract_widget_dependencies, includes_for_widget_dependencies};

use std::path::{Path, PathBuf};

/// Convert a `.qmd` document into a `.ipynb` notebook.
pub fn convert_qmd_to_ipynb(
    qmd_path: impl AsRef<Path>,
    ipynb_path: impl AsRef<Path>,
) -> NotebookResult<()> {
    let qmd_path = qmd_path.as_ref();
    let ipynb_path = ipynb_path.as_ref();

    let notebook = qmd_file_to_notebook(qmd_path)?;
    notebook.write_to_file(ipynb_path)?;

    tracing::info!(
        "Converted {} → {} ({} cells)",
        qmd_path.display(),
        ipynb_path.display(),
        notebook.cells.len()
    );

    Ok(())
}

/// Convert a `.ipynb` notebook into a `.qmd` document (outputs are dropped).
pub fn convert_ipynb_to_qmd(
    ipynb_path: impl AsRef<Path>,
    qmd_path: impl AsRef<Path>,
) -> NotebookResult<()> {
    let ipynb_path = ipynb_path.as_ref();
    let qmd_path = qmd_path.as_ref();

    let notebook = Notebook::read_from_file(ipynb_path)?;
    std::fs::write(qmd_path, notebook_to_qmd(&notebook)).map_err(|e| NotebookError::WriteError {
        path: qmd_path.to_path_buf(),
        message: e.to_string(),
    })?;

    tracing::info!("Converted {} → {}", ipynb_path.display(), qmd_path.display());

    Ok(())
}

/// Get the default converted path: `.qmd` ↔ `.ipynb`.
pub fn default_converted_path(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    match path.extension().and_then(|e| e.to_str()) {
        Some("ipynb") => path.with_extension("qmd"),
        _ => path.with_extension("ipynb"),
    }
}

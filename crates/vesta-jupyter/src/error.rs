//! Error types for the Jupyter engine.

use std::path::PathBuf;

/// Result type for notebook operations.
pub type NotebookResult<T> = Result<T, NotebookError>;

/// Errors that can occur while reading, converting or executing notebooks.
#[derive(Debug, thiserror::Error)]
pub enum NotebookError {
    /// Failed to read source file.
    #[error("Failed to read file {path}: {message}")]
    ReadError { path: PathBuf, message: String },

    /// Failed to write output file.
    #[error("Failed to write file {path}: {message}")]
    WriteError { path: PathBuf, message: String },

    /// Failed to parse a document or cell options.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Failed to serialize/deserialize JSON.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Invalid notebook structure.
    #[error("Invalid notebook: {0}")]
    InvalidNotebook(String),

    /// Kernel process communication failed.
    #[error("IPC error: {0}")]
    Ipc(String),

    /// Failed to encode an IPC message.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A cell failed while the kernel executed the notebook.
    #[error("{0}")]
    Execution(String),
}

impl From<NotebookError> for vesta_core::Error {
    fn from(err: NotebookError) -> Self {
        match err {
            NotebookError::IoError(e) => vesta_core::Error::Io(e),
            NotebookError::Ipc(message) | NotebookError::Serialization(message) => {
                vesta_core::Error::Kernel(message)
            }
            NotebookError::Execution(message) => vesta_core::Error::Execution(message),
            other => vesta_core::Error::Notebook(other.to_string()),
        }
    }
}

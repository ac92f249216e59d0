//! Error types for vesta-core.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for vesta-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while resolving, executing or post-processing a document.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration (bad front matter, unknown option values).
    #[error("configuration error: {0}")]
    Config(String),

    /// No registered engine claims the input.
    #[error("no execution engine claims {}", .0.display())]
    NoEngine(PathBuf),

    /// More than one registered engine claims the input.
    #[error("multiple execution engines claim {}: {}", path.display(), engines.join(", "))]
    AmbiguousEngine { path: PathBuf, engines: Vec<String> },

    /// A `language` file named in the metadata does not exist.
    #[error("specified 'language' file does not exist: {}", .0.display())]
    MissingLanguageFile(PathBuf),

    /// Kernel execution failed.
    #[error("execution error: {0}")]
    Execution(String),

    /// Kernel could not be started or stopped.
    #[error("kernel error: {0}")]
    Kernel(String),

    /// The execution artifact is malformed or could not be converted.
    #[error("notebook error: {0}")]
    Notebook(String),

    /// The request queue dispatcher is gone.
    #[error("request queue closed")]
    QueueClosed,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parse error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Coarse error class used to decide how a failure propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Fatal before any execution is attempted.
    Configuration,
    /// Reported to the caller of one render; other renders continue.
    Execution,
    /// File system failure.
    Io,
}

impl Error {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_)
            | Error::NoEngine(_)
            | Error::AmbiguousEngine { .. }
            | Error::MissingLanguageFile(_)
            | Error::Yaml(_) => ErrorKind::Configuration,
            Error::Execution(_)
            | Error::Kernel(_)
            | Error::Notebook(_)
            | Error::QueueClosed
            | Error::Json(_) => ErrorKind::Execution,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    /// Whether this is a configuration error.
    pub fn is_config(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }

    /// Format the error together with a recovery hint, when one applies.
    pub fn with_hint(&self) -> String {
        let hint = match self {
            Error::NoEngine(_) => {
                Some("use a .qmd, .ipynb or .md input, or register an engine for this extension")
            }
            Error::AmbiguousEngine { .. } => {
                Some("set `engine:` in the front matter or remove the conflicting code chunks")
            }
            Error::MissingLanguageFile(_) => {
                Some("the `language` path is resolved relative to the document directory")
            }
            Error::Kernel(_) => {
                Some("set VESTA_KERNEL_PATH or ensure vesta-kernel is on PATH")
            }
            Error::Execution(_) => {
                Some("pass --execute-daemon-restart to start from a fresh kernel")
            }
            _ => None,
        };

        match hint {
            Some(hint) => format!("{self}\n  hint: {hint}"),
            None => self.to_string(),
        }
    }
}

//! Core of the Vesta document renderer.
//!
//! This crate provides:
//! - The execution engine contract and engine registry
//! - Execution target resolution and transient artifact cleanup
//! - Kernel dispatch (one-shot or kept-alive sessions behind a request queue)
//! - Format settings, front matter and language translations
//! - Frozen results and post-processing of deferred content

pub mod dispatch;
pub mod engine;
pub mod error;
pub mod format;
pub mod freeze;
pub mod frontmatter;
pub mod includes;
pub mod kernel;
pub mod language;
pub mod lifecycle;
pub mod paths;
pub mod platform;
pub mod preserve;
pub mod queue;
pub mod session;

pub use dispatch::KernelDispatcher;
pub use engine::{
    DependenciesOptions, DependencyRecord, EngineDependencies, EngineRegistry, ExecuteOptions,
    ExecuteResult, ExecutionEngine, ExecutionTarget, MarkdownEngine, PostProcessOptions,
};
pub use error::{Error, ErrorKind, Result};
pub use format::{
    DaemonSetting, ExecuteSettings, FigureFormat, FormatSpec, FreezeSetting, PandocSettings,
    RenderSettings,
};
pub use freeze::FreezeStore;
pub use frontmatter::{Metadata, read_yaml_from_markdown};
pub use includes::{IncludePoint, IncludeSet};
pub use kernel::{Kernel, KernelLauncher, KernelRequest};
pub use lifecycle::{cleanup_target, remove_if_exists};
pub use paths::DocumentDirs;
pub use platform::{DaemonPolicy, EnvironmentSignals, ExecutionMode, InteractivePosixPolicy};
pub use preserve::{postprocess_output, preserve_placeholder, restore_preserved};
pub use queue::{RequestQueue, Submission};
pub use session::{KernelSession, SessionKey, SessionRegistry};

//! Kernel abstraction.
//!
//! A kernel executes an artifact in place (for notebooks: fills in the
//! outputs). How it is started and spoken to is up to the launcher.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::Result;

/// One execution request against a kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelRequest {
    /// Canonical path of the artifact to execute.
    pub input: PathBuf,
    /// Working directory for the executed code.
    pub cwd: PathBuf,
    /// Keep going after a failing cell.
    pub allow_errors: bool,
    /// Emit kernel diagnostics.
    pub debug: bool,
}

/// A running kernel.
#[async_trait]
pub trait Kernel: Send {
    /// Execute the artifact named by `request`.
    async fn execute(&mut self, request: &KernelRequest) -> Result<()>;

    /// Stop the kernel.
    async fn shutdown(self: Box<Self>) -> Result<()>;
}

/// Starts kernels.
#[async_trait]
pub trait KernelLauncher: Send + Sync {
    async fn launch(&self, request: &KernelRequest) -> Result<Box<dyn Kernel>>;
}

//! Kernel processes.
//!
//! Each kernel is a `vesta-kernel` child process spoken to over its
//! stdin/stdout. The pipes are blocking, so the async [`Kernel`] impl moves
//! the handle onto the blocking pool for every round trip.

use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use vesta_core::{Kernel, KernelLauncher, KernelRequest};

use super::protocol::{KernelCommand, KernelResponse, read_message, write_message};
use crate::error::{NotebookError, NotebookResult};

const KERNEL_BINARY: &str = if cfg!(windows) {
    "vesta-kernel.exe"
} else {
    "vesta-kernel"
};

/// Find the vesta-kernel binary.
///
/// Looks in the following order:
/// 1. `VESTA_KERNEL_PATH` environment variable
/// 2. Same directory as the current executable
/// 3. System PATH
/// 4. The cargo target directory (development builds)
pub fn find_kernel_binary() -> NotebookResult<PathBuf> {
    if let Ok(path) = std::env::var("VESTA_KERNEL_PATH") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Ok(path);
        }
    }

    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        let path = exe_dir.join(KERNEL_BINARY);
        if path.exists() {
            return Ok(path);
        }
    }

    if let Ok(path) = which::which(KERNEL_BINARY) {
        return Ok(path);
    }

    if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
        for profile in ["debug", "release"] {
            let path = PathBuf::from(&manifest_dir)
                .join("..")
                .join("..")
                .join("target")
                .join(profile)
                .join(KERNEL_BINARY);
            if path.exists() {
                return Ok(path.canonicalize().unwrap_or(path));
            }
        }
    }

    Err(NotebookError::Ipc(
        "Could not find vesta-kernel binary. Set VESTA_KERNEL_PATH or ensure it's in PATH."
            .to_string(),
    ))
}

/// Handle to a kernel process.
pub struct KernelProcess {
    child: Child,
    stdin: BufWriter<std::process::ChildStdin>,
    stdout: BufReader<std::process::ChildStdout>,
    killed: bool,
}

impl KernelProcess {
    /// Spawn a kernel process and check that it answers.
    pub fn spawn(binary: &Path, debug: bool) -> NotebookResult<Self> {
        let mut command = Command::new(binary);
        if debug {
            command.arg("--debug");
        }
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                NotebookError::Ipc(format!(
                    "Failed to spawn kernel process '{}': {}",
                    binary.display(),
                    e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| NotebookError::Ipc("Failed to get kernel stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| NotebookError::Ipc("Failed to get kernel stdout".to_string()))?;

        let mut process = Self {
            child,
            stdin: BufWriter::new(stdin),
            stdout: BufReader::new(stdout),
            killed: false,
        };

        process.send_command(&KernelCommand::Ping)?;
        match process.recv_response()? {
            KernelResponse::Pong => {
                tracing::debug!("Kernel process {} started", process.pid());
                Ok(process)
            }
            other => Err(NotebookError::Ipc(format!(
                "Unexpected response from kernel: {:?}",
                other
            ))),
        }
    }

    fn send_command(&mut self, cmd: &KernelCommand) -> NotebookResult<()> {
        if self.killed {
            return Err(NotebookError::Ipc("Kernel has been killed".to_string()));
        }
        write_message(&mut self.stdin, cmd)
    }

    fn recv_response(&mut self) -> NotebookResult<KernelResponse> {
        if self.killed {
            return Err(NotebookError::Ipc("Kernel has been killed".to_string()));
        }
        read_message(&mut self.stdout)
    }

    /// Execute a notebook in place; returns the number of cells run.
    pub fn execute(&mut self, notebook: &Path, cwd: &Path, allow_errors: bool) -> NotebookResult<u32> {
        self.send_command(&KernelCommand::Execute {
            notebook_path: notebook.to_string_lossy().into_owned(),
            cwd: cwd.to_string_lossy().into_owned(),
            allow_errors,
        })?;

        match self.recv_response()? {
            KernelResponse::Executed { cells } => Ok(cells),
            KernelResponse::Error { message } => Err(NotebookError::Execution(message)),
            other => Err(NotebookError::Ipc(format!(
                "Unexpected response when executing: {:?}",
                other
            ))),
        }
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Kill the kernel process immediately.
    pub fn kill(&mut self) {
        if self.killed {
            return;
        }
        let _ = self.send_command(&KernelCommand::Shutdown);
        self.killed = true;

        // Give it a moment to shutdown gracefully
        std::thread::sleep(Duration::from_millis(10));

        if let Err(e) = self.child.kill() {
            if e.kind() != std::io::ErrorKind::InvalidInput {
                tracing::warn!("Failed to kill kernel: {}", e);
            }
        }
        let _ = self.child.wait();
    }

    /// Ask the kernel to exit and wait for it.
    pub fn shutdown(mut self) -> NotebookResult<()> {
        if self.killed {
            return Ok(());
        }

        self.send_command(&KernelCommand::Shutdown)?;
        match self.recv_response() {
            Ok(KernelResponse::ShuttingDown) => {}
            Ok(other) => tracing::warn!("Unexpected response to shutdown: {:?}", other),
            Err(e) => tracing::warn!("Kernel did not acknowledge shutdown: {}", e),
        }

        self.killed = true;
        match self.child.wait() {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(NotebookError::Ipc(format!(
                "Kernel exited with status: {}",
                status
            ))),
            Err(e) => Err(NotebookError::Ipc(format!("Failed to wait for kernel: {}", e))),
        }
    }
}

impl Drop for KernelProcess {
    fn drop(&mut self) {
        self.kill();
    }
}

fn join_error(e: tokio::task::JoinError) -> vesta_core::Error {
    vesta_core::Error::Kernel(format!("kernel task failed: {}", e))
}

/// [`Kernel`] backed by a [`KernelProcess`].
pub struct ProcessKernel {
    /// Taken while a blocking round trip is in progress.
    process: Option<KernelProcess>,
}

#[async_trait]
impl Kernel for ProcessKernel {
    async fn execute(&mut self, request: &KernelRequest) -> vesta_core::Result<()> {
        let mut process = self
            .process
            .take()
            .ok_or_else(|| vesta_core::Error::Kernel("kernel process is gone".to_string()))?;
        let request = request.clone();

        let (process, result) = tokio::task::spawn_blocking(move || {
            let result = process.execute(&request.input, &request.cwd, request.allow_errors);
            (process, result)
        })
        .await
        .map_err(join_error)?;
        self.process = Some(process);

        let cells = result?;
        tracing::debug!("Kernel executed {} cells", cells);
        Ok(())
    }

    async fn shutdown(mut self: Box<Self>) -> vesta_core::Result<()> {
        let Some(process) = self.process.take() else {
            return Ok(());
        };
        tokio::task::spawn_blocking(move || process.shutdown())
            .await
            .map_err(join_error)?
            .map_err(Into::into)
    }
}

/// Starts `vesta-kernel` processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessKernelLauncher {
    binary: Option<PathBuf>,
}

impl ProcessKernelLauncher {
    /// Launcher that searches for the kernel binary on each launch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Launcher for a specific kernel binary.
    pub fn with_binary(binary: PathBuf) -> Self {
        Self {
            binary: Some(binary),
        }
    }
}

#[async_trait]
impl KernelLauncher for ProcessKernelLauncher {
    async fn launch(&self, request: &KernelRequest) -> vesta_core::Result<Box<dyn Kernel>> {
        let binary = match &self.binary {
            Some(binary) => binary.clone(),
            None => find_kernel_binary()?,
        };
        let debug = request.debug;

        let process = tokio::task::spawn_blocking(move || KernelProcess::spawn(&binary, debug))
            .await
            .map_err(join_error)??;
        Ok(Box::new(ProcessKernel {
            process: Some(process),
        }))
    }
}

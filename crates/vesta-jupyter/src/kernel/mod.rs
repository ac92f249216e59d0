//! Out-of-process notebook kernels.
//!
//! This module provides the protocol and the process handles for talking
//! to `vesta-kernel` worker processes.

pub mod protocol;
mod process;

pub use process::{KernelProcess, ProcessKernel, ProcessKernelLauncher, find_kernel_binary};
pub use protocol::{KernelCommand, KernelResponse, read_message, write_message};

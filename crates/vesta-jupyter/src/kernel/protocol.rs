//! IPC protocol messages for vesta-kernel processes.
//!
//! Uses length-prefixed rkyv messages over stdin/stdout.
//! Format: 4-byte length (u32 LE) + rkyv-encoded message.

use std::io::{Read, Write};

use rkyv::{Archive, Deserialize, Serialize};

use crate::error::{NotebookError, NotebookResult};

/// Largest message accepted from the other end (100MB).
const MAX_MESSAGE_LEN: usize = 100 * 1024 * 1024;

/// Command sent from the renderer to the kernel process.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub enum KernelCommand {
    /// Ping to check if the kernel is alive.
    Ping,

    /// Execute a notebook in place.
    Execute {
        /// Absolute path of the notebook.
        notebook_path: String,
        /// Working directory for the executed code.
        cwd: String,
        /// Keep going after a failing cell.
        allow_errors: bool,
    },

    /// Shutdown the kernel process gracefully.
    Shutdown,
}

/// Response sent from the kernel process to the renderer.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub enum KernelResponse {
    /// Response to Ping command.
    Pong,

    /// The notebook was executed and written back.
    Executed {
        /// Number of code cells run.
        cells: u32,
    },

    /// Execution failed.
    Error {
        /// Error message.
        message: String,
    },

    /// Acknowledgement of shutdown request.
    ShuttingDown,
}

/// Write a message to a writer using length-prefixed rkyv encoding.
pub fn write_message<W: Write>(
    writer: &mut W,
    message: &impl for<'a> Serialize<
        rkyv::rancor::Strategy<
            rkyv::ser::Serializer<
                rkyv::util::AlignedVec,
                rkyv::ser::allocator::ArenaHandle<'a>,
                rkyv::ser::sharing::Share,
            >,
            rkyv::rancor::Error,
        >,
    >,
) -> NotebookResult<()> {
    let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(message)
        .map_err(|e| NotebookError::Serialization(format!("Failed to encode IPC message: {}", e)))?;

    let len = bytes.len() as u32;
    writer
        .write_all(&len.to_le_bytes())
        .map_err(|e| NotebookError::Ipc(format!("Failed to write IPC message length: {}", e)))?;
    writer
        .write_all(&bytes)
        .map_err(|e| NotebookError::Ipc(format!("Failed to write IPC message body: {}", e)))?;
    writer
        .flush()
        .map_err(|e| NotebookError::Ipc(format!("Failed to flush IPC stream: {}", e)))?;

    Ok(())
}

/// Read a message from a reader using length-prefixed rkyv encoding.
///
/// # Safety
///
/// Uses unchecked deserialization. Only safe when reading from our own
/// kernel processes (or the renderer that spawned us).
pub fn read_message<R: Read, T>(reader: &mut R) -> NotebookResult<T>
where
    T: Archive,
    T::Archived: Deserialize<T, rkyv::rancor::Strategy<rkyv::de::Pool, rkyv::rancor::Error>>,
{
    let mut len_bytes = [0u8; 4];
    reader
        .read_exact(&mut len_bytes)
        .map_err(|e| NotebookError::Ipc(format!("Failed to read IPC message length: {}", e)))?;
    let len = u32::from_le_bytes(len_bytes) as usize;

    if len > MAX_MESSAGE_LEN {
        return Err(NotebookError::Ipc(format!(
            "IPC message too large: {} bytes",
            len
        )));
    }

    let mut bytes = vec![0u8; len];
    reader
        .read_exact(&mut bytes)
        .map_err(|e| NotebookError::Ipc(format!("Failed to read IPC message body: {}", e)))?;

    // SAFETY: both ends of the pipe are Vesta processes.
    let message = unsafe { rkyv::from_bytes_unchecked::<T, rkyv::rancor::Error>(&bytes) }
        .map_err(|e| NotebookError::Serialization(format!("Failed to decode IPC message: {}", e)))?;

    Ok(message)
}

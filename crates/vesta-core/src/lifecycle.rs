//! Transient artifact cleanup.

use std::io;
use std::path::Path;

use crate::engine::ExecutionTarget;

/// Remove `path`, treating a missing file as success.
pub async fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Delete the transient artifact of `target` unless it is to be kept.
///
/// Never fails: problems are logged and the render carries on.
pub async fn cleanup_target(target: &ExecutionTarget, keep: bool) {
    if !target.transient || keep {
        return;
    }

    match remove_if_exists(&target.input).await {
        Ok(true) => tracing::debug!("Removed transient {}", target.input.display()),
        Ok(false) => {}
        Err(e) => tracing::warn!(
            "Failed to remove transient {}: {}",
            target.input.display(),
            e
        ),
    }
}

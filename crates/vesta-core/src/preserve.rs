//! Deferred content: placeholders that survive the converter.
//!
//! Raw HTML that the converter would mangle is swapped for a token before
//! conversion and put back into the output file afterwards.

use std::collections::HashMap;
use std::path::Path;

use crate::error::Result;

/// Fresh placeholder token.
pub fn preserve_placeholder() -> String {
    format!("preserve{}", uuid::Uuid::new_v4().simple())
}

/// Substitute every placeholder in `text` with its content.
pub fn restore_preserved(text: &str, preserve: &HashMap<String, String>) -> String {
    let mut restored = text.to_string();
    for (token, content) in preserve {
        if restored.contains(token.as_str()) {
            restored = restored.replace(token.as_str(), content);
        }
    }
    restored
}

/// Restore placeholders in the converter's output file, in place.
///
/// The file is only rewritten if something changed, so running this twice
/// leaves it byte-identical.
pub async fn postprocess_output(path: &Path, preserve: &HashMap<String, String>) -> Result<()> {
    if preserve.is_empty() {
        return Ok(());
    }

    let text = tokio::fs::read_to_string(path).await?;
    let restored = restore_preserved(&text, preserve);
    if restored != text {
        tokio::fs::write(path, restored).await?;
        tracing::debug!("Restored preserved content in {}", path.display());
    }
    Ok(())
}

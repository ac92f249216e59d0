//! Frozen execution results.
//!
//! A frozen result is the `ExecuteResult` of an earlier render, stored as
//! JSON under `.vesta/freeze/` together with a hash of the source it came
//! from. Reusing it skips execution entirely.

use std::hash::Hasher;
use std::path::{Path, PathBuf};

use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};

use crate::engine::ExecuteResult;
use crate::error::Result;
use crate::format::FreezeSetting;
use crate::paths::DocumentDirs;

#[derive(Debug, Serialize, Deserialize)]
struct FrozenResult {
    hash: String,
    result: ExecuteResult,
}

/// Store of frozen results for the documents of one directory.
#[derive(Debug, Clone)]
pub struct FreezeStore {
    dir: PathBuf,
}

/// Deterministic hash of a document's source text.
///
/// FxHash is stable across runs, which the default hasher is not.
pub fn source_hash(text: &str) -> String {
    let mut hasher = FxHasher::default();
    hasher.write(text.as_bytes());
    format!("{:016x}", hasher.finish())
}

impl FreezeStore {
    /// Store living in the `.vesta` directory next to `source`.
    pub fn for_document(source: &Path) -> Result<Self> {
        let dirs = DocumentDirs::from_document_path(source)?;
        Ok(Self::new(dirs.freeze_dir))
    }

    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn entry_path(&self, source: &Path) -> PathBuf {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        self.dir.join(format!("{}.json", name))
    }

    /// Load a reusable result for `source`, if `setting` allows one.
    ///
    /// A corrupt entry is ignored (and logged) rather than failing the render.
    pub async fn load(&self, source: &Path, setting: FreezeSetting) -> Result<Option<ExecuteResult>> {
        if setting == FreezeSetting::Never {
            return Ok(None);
        }

        let path = self.entry_path(source);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let frozen: FrozenResult = match serde_json::from_str(&text) {
            Ok(frozen) => frozen,
            Err(e) => {
                tracing::warn!("Ignoring corrupt frozen result {}: {}", path.display(), e);
                return Ok(None);
            }
        };

        if setting == FreezeSetting::Auto {
            let current = source_hash(&tokio::fs::read_to_string(source).await?);
            if current != frozen.hash {
                tracing::debug!("Source of {} changed, not reusing frozen result", source.display());
                return Ok(None);
            }
        }

        Ok(Some(frozen.result))
    }

    /// Store `result` for `source`.
    pub async fn store(&self, source: &Path, result: &ExecuteResult) -> Result<()> {
        let text = tokio::fs::read_to_string(source).await?;
        let frozen = FrozenResult {
            hash: source_hash(&text),
            result: result.clone(),
        };

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.entry_path(source);
        tokio::fs::write(&path, serde_json::to_string_pretty(&frozen)?).await?;
        tracing::debug!("Froze execution result at {}", path.display());
        Ok(())
    }
}

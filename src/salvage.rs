use crate::fsutil::write_json_atomic;
use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{error, warn};
use uuid::Uuid;

/// Side storage for generated content that could not become an artifact.
#[derive(Debug, Clone)]
pub struct SalvageStore {
    dir: PathBuf,
}

#[derive(Debug, Serialize)]
struct SalvageEntry<'a> {
    label: &'a str,
    item_ids: &'a [String],
    reason: &'a str,
    saved_at: String,
    content: &'a Value,
}

impl SalvageStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write one salvage file named `{timestamp}_{uuid}_{label}.json`.
    pub fn save(&self, label: &str, item_ids: &[String], reason: &str, content: &Value) -> Result<PathBuf> {
        let now = Utc::now();
        let name = format!(
            "{}_{}_{}.json",
            now.format("%Y%m%d_%H%M%S"),
            Uuid::new_v4().simple(),
            crate::artifact::sanitize(label)
        );
        let path = self.dir.join(name);
        let entry = SalvageEntry {
            label,
            item_ids,
            reason,
            saved_at: now.to_rfc3339(),
            content,
        };
        write_json_atomic(&path, &entry)?;
        warn!(path = %path.display(), ?item_ids, reason, "salvaged unrecoverable content");
        Ok(path)
    }

    /// Like [`save`](Self::save) but never fails the caller; a write error is
    /// only logged.
    pub fn keep(&self, label: &str, item_ids: &[String], reason: &str, content: &Value) -> Option<PathBuf> {
        match self.save(label, item_ids, reason, content) {
            Ok(p) => Some(p),
            Err(err) => {
                error!(?err, label, ?item_ids, "failed to write salvage file");
                None
            }
        }
    }
}

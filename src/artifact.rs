//! One JSON file per summarized item, named `{id}_{channel}.json` so an
//! artifact can be located from the item id alone.

use crate::fsutil::write_json_atomic;
use crate::summary::StructuredSummary;
use crate::validate::describe;
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub id: String,
    pub path: PathBuf,
    pub summary: StructuredSummary,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

/// Replace everything outside `[A-Za-z0-9]` with `_`.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

pub fn file_name(id: &str, channel: &str) -> String {
    format!("{}_{}.json", id, sanitize(channel))
}

/// Older artifacts carry no id. Ids may contain `_`, so the id comes from
/// the `v=` link parameter, then from the file name minus the sanitized
/// channel, and only then from everything before the last `_`.
fn legacy_id(summary: &StructuredSummary, path: &Path) -> Option<String> {
    let from_url = summary.video_url.as_deref().and_then(|url| {
        url.split(|c: char| c == '?' || c == '&')
            .find_map(|param| param.strip_prefix("v="))
            .filter(|id| !id.is_empty())
    });
    if let Some(id) = from_url {
        return Some(id.to_string());
    }
    let stem = path.file_stem()?.to_str()?;
    let channel_suffix = format!("_{}", sanitize(&summary.podcaster));
    let id = match stem.strip_suffix(&channel_suffix) {
        Some(id) if !id.is_empty() => id,
        _ => stem.rsplit_once('_').map_or(stem, |(id, _)| id),
    };
    Some(id.to_string())
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn save(&self, id: &str, channel: &str, summary: &StructuredSummary) -> Result<PathBuf> {
        let path = self.dir.join(file_name(id, channel));
        write_json_atomic(&path, summary)?;
        Ok(path)
    }

    pub fn load(&self, path: &Path) -> Result<StructuredSummary> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read artifact {}", path.display()))?;
        let value: serde_json::Value = serde_json::from_str(&content)
            .with_context(|| format!("artifact {} is not valid JSON", path.display()))?;
        StructuredSummary::from_value(value)
            .map_err(|v| anyhow!("artifact {} is invalid: {}", path.display(), describe(&v)))
    }

    /// Locate the artifact for `id`.
    pub fn find(&self, id: &str) -> Result<Option<StoredArtifact>> {
        let prefix = format!("{}_", id);
        for path in self.json_files()? {
            let matches_prefix = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&prefix));
            if !matches_prefix {
                continue;
            }
            if let Some(artifact) = self.read_artifact(&path) {
                if artifact.id == id {
                    return Ok(Some(artifact));
                }
            }
        }
        Ok(None)
    }

    /// Every readable artifact, in file-name order. Unreadable files are
    /// logged and skipped.
    pub fn list(&self) -> Result<Vec<StoredArtifact>> {
        Ok(self
            .json_files()?
            .iter()
            .filter_map(|p| self.read_artifact(p))
            .collect())
    }

    fn read_artifact(&self, path: &Path) -> Option<StoredArtifact> {
        let summary = match self.load(path) {
            Ok(s) => s,
            Err(err) => {
                warn!(?err, "skipping unreadable artifact");
                return None;
            }
        };
        let id = match summary.video_id.clone() {
            Some(id) => id,
            None => legacy_id(&summary, path)?,
        };
        Some(StoredArtifact {
            id,
            path: path.to_path_buf(),
            summary,
        })
    }

    fn json_files(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)
            .with_context(|| format!("failed to list {}", self.dir.display()))?
        {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

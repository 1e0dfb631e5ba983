//! Small helpers shared by the JSON-file stores.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::error;

/// Outcome of reading a JSON document from disk.
pub(crate) enum JsonRead {
    Missing,
    Parsed(Value),
    /// Unreadable content; the original file has been moved aside.
    Corrupt,
}

pub(crate) fn read_json(path: &Path) -> JsonRead {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(err) if err.kind() == ErrorKind::NotFound => return JsonRead::Missing,
        Err(err) => {
            error!(?err, path = %path.display(), "failed to read state file");
            return JsonRead::Corrupt;
        }
    };
    match serde_json::from_str::<Value>(&content) {
        Ok(v) => JsonRead::Parsed(v),
        Err(err) => {
            error!(?err, path = %path.display(), "state file is not valid JSON");
            quarantine(path);
            JsonRead::Corrupt
        }
    }
}

/// Move an unreadable file out of the way so the next write cannot destroy it.
pub(crate) fn quarantine(path: &Path) -> Option<PathBuf> {
    let mut name = path.file_name()?.to_os_string();
    name.push(format!(".corrupt-{}", Utc::now().format("%Y%m%d%H%M%S")));
    let target = path.with_file_name(name);
    match fs::rename(path, &target) {
        Ok(()) => {
            error!(from = %path.display(), to = %target.display(), "quarantined corrupt state file");
            Some(target)
        }
        Err(err) => {
            error!(?err, path = %path.display(), "failed to quarantine corrupt state file");
            None
        }
    }
}

/// Write `value` as pretty JSON through a temporary sibling and a rename.
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    let body = serde_json::to_string_pretty(value).context("failed to serialize state")?;
    let mut tmp_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    fs::write(&tmp, body).with_context(|| format!("failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

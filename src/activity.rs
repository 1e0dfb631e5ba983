//! Per-day activity log. Observability only; the ledger decides what is done.

use crate::fsutil::{read_json, write_json_atomic, JsonRead};
use crate::model::Destination;
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyLog {
    pub date: NaiveDate,
    #[serde(default)]
    pub summarized: BTreeSet<String>,
    #[serde(default)]
    pub posted: BTreeMap<String, BTreeSet<String>>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub pending: Vec<String>,
}

impl DailyLog {
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            summarized: BTreeSet::new(),
            posted: BTreeMap::new(),
            errors: Vec::new(),
            pending: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReportStats {
    pub summarized: usize,
    pub posted: BTreeMap<String, usize>,
    pub total_posted: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DailyReport {
    pub date: NaiveDate,
    pub stats: ReportStats,
    pub details: DailyLog,
}

#[derive(Debug, Clone)]
pub struct ActivityLog {
    path: PathBuf,
}

impl ActivityLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Today's log. A log from another day, or an unreadable one, yields an
    /// empty log for today.
    pub fn current(&self) -> DailyLog {
        self.current_on(today())
    }

    fn current_on(&self, date: NaiveDate) -> DailyLog {
        match read_json(&self.path) {
            JsonRead::Parsed(v) => match serde_json::from_value::<DailyLog>(v) {
                Ok(log) if log.date == date => log,
                Ok(log) => {
                    info!(previous = %log.date, today = %date, "rolling daily log over");
                    DailyLog::empty(date)
                }
                Err(err) => {
                    error!(?err, path = %self.path.display(), "daily log has unexpected shape; starting fresh");
                    DailyLog::empty(date)
                }
            },
            JsonRead::Missing | JsonRead::Corrupt => DailyLog::empty(date),
        }
    }

    fn update(&self, section: &str, apply: impl FnOnce(&mut DailyLog)) {
        let mut log = self.current();
        apply(&mut log);
        match write_json_atomic(&self.path, &log) {
            Ok(()) => debug!(section, "daily log updated"),
            Err(err) => error!(?err, section, "failed to update daily log"),
        }
    }

    pub fn record_summarized(&self, ids: &[String]) {
        if ids.is_empty() {
            return;
        }
        self.update("summarized", |log| log.summarized.extend(ids.iter().cloned()));
    }

    pub fn record_posted(&self, destination: Destination, ids: &[String]) {
        if ids.is_empty() {
            return;
        }
        self.update("posted", |log| {
            log.posted
                .entry(destination.as_str().to_string())
                .or_default()
                .extend(ids.iter().cloned());
        });
    }

    /// Append `"{YYYY-mm-dd HH:MM:SS} - {message}"`; identical entries are kept once.
    pub fn record_error(&self, message: &str) {
        let entry = format!("{} - {}", Local::now().format("%Y-%m-%d %H:%M:%S"), message);
        self.update("errors", |log| {
            if !log.errors.contains(&entry) {
                log.errors.push(entry);
            }
        });
    }

    /// Replace the snapshot of ids still waiting on the pending list.
    pub fn set_pending(&self, ids: Vec<String>) {
        self.update("pending", |log| log.pending = ids);
    }

    pub fn report(&self) -> DailyReport {
        let details = self.current();
        let posted: BTreeMap<String, usize> = details
            .posted
            .iter()
            .map(|(dest, ids)| (dest.clone(), ids.len()))
            .collect();
        DailyReport {
            date: details.date,
            stats: ReportStats {
                summarized: details.summarized.len(),
                total_posted: posted.values().sum(),
                posted,
                errors: details.errors.len(),
            },
            details,
        }
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

//! File-backed queue manager.
//!
//! Every operation re-reads the file it mutates and writes the full structure
//! back. There is no locking: only one process may run against a data
//! directory at a time.

use crate::config::Config;
use crate::fsutil::{read_json, write_json_atomic, JsonRead};
use crate::ledger::model::{
    normalize_done, normalize_pending, Batch, LedgerFile, QueueCounts, QueueFile,
};
use crate::model::{Destination, Item, ItemStatus, LedgerRecord};
use anyhow::Result;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{error, info, instrument, warn};

/// Bounds on the size of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub min: usize,
    pub max: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self { min: 2, max: 5 }
    }
}

#[derive(Debug, Clone)]
pub struct QueueManager {
    queue_path: PathBuf,
    ledger_path: PathBuf,
    limits: BatchLimits,
}

impl QueueManager {
    /// Open (and if needed create) the queue and ledger files.
    pub fn open(
        queue_path: impl Into<PathBuf>,
        ledger_path: impl Into<PathBuf>,
        limits: BatchLimits,
    ) -> Result<Self> {
        let qm = Self {
            queue_path: queue_path.into(),
            ledger_path: ledger_path.into(),
            limits,
        };
        if !qm.queue_path.exists() {
            info!(path = %qm.queue_path.display(), "creating queue file");
            qm.save_pending(&[])?;
        }
        if !qm.ledger_path.exists() {
            info!(path = %qm.ledger_path.display(), "creating ledger file");
            qm.save_done(&BTreeMap::new())?;
        }
        Ok(qm)
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::open(cfg.queue_path(), cfg.ledger_path(), cfg.batch_limits())
    }

    pub fn limits(&self) -> BatchLimits {
        self.limits
    }

    pub fn queue_path(&self) -> &Path {
        &self.queue_path
    }

    pub fn ledger_path(&self) -> &Path {
        &self.ledger_path
    }

    /// Current pending list, oldest first. Unreadable files yield an empty list.
    pub fn pending(&self) -> Vec<Item> {
        match read_json(&self.queue_path) {
            JsonRead::Missing | JsonRead::Corrupt => Vec::new(),
            JsonRead::Parsed(v) => normalize_pending(v).unwrap_or_else(|| {
                error!(path = %self.queue_path.display(), "queue file has an unexpected structure; starting empty");
                Vec::new()
            }),
        }
    }

    /// All ledger records keyed by item id. Unreadable files yield an empty map.
    pub fn records(&self) -> BTreeMap<String, LedgerRecord> {
        match read_json(&self.ledger_path) {
            JsonRead::Missing | JsonRead::Corrupt => BTreeMap::new(),
            JsonRead::Parsed(v) => normalize_done(v).unwrap_or_else(|| {
                error!(path = %self.ledger_path.display(), "ledger file has an unexpected structure; starting empty");
                BTreeMap::new()
            }),
        }
    }

    pub fn record(&self, id: &str) -> Option<LedgerRecord> {
        self.records().remove(id)
    }

    pub fn status_of(&self, id: &str) -> Option<ItemStatus> {
        if let Some(record) = self.record(id) {
            return Some(record.status);
        }
        self.pending()
            .iter()
            .any(|i| i.id == id)
            .then_some(ItemStatus::Pending)
    }

    /// Add `item` to the pending list unless its id is already known.
    #[instrument(skip_all, fields(id = %item.id))]
    pub fn enqueue(&self, item: Item) -> Result<bool> {
        if item.id.trim().is_empty() {
            warn!("refusing to enqueue an item without an id");
            return Ok(false);
        }
        if self.records().contains_key(&item.id) {
            info!("item already processed; not enqueuing");
            return Ok(false);
        }
        let mut pending = self.pending();
        if pending.iter().any(|p| p.id == item.id) {
            info!("item already pending");
            return Ok(false);
        }
        pending.push(item);
        self.save_pending(&pending)?;
        info!(pending = pending.len(), "item enqueued");
        Ok(true)
    }

    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }

    pub fn ready_for_batch(&self) -> bool {
        self.pending_count() >= self.limits.min
    }

    /// Take up to `max` oldest pending items and mark them batched.
    ///
    /// Records still `batched` from an interrupted run go back to the front
    /// of the pending list first, oldest first, so they are drawn again.
    /// Must not be called while a drawn batch is still being processed.
    ///
    /// Returns an empty batch without touching either file when fewer than
    /// `min` items are pending and nothing had to be recovered.
    #[instrument(skip_all)]
    pub fn next_batch(&self) -> Result<Batch> {
        let mut pending = self.pending();
        let mut done = self.records();
        let before = pending.len();
        let requeued = requeue_interrupted(&mut pending, &mut done);
        // A pending id with a settled ledger record is stale.
        pending.retain(|item| match done.get(&item.id) {
            Some(record) => {
                warn!(id = %item.id, status = record.status.as_str(), "dropping stale pending entry");
                false
            }
            None => true,
        });
        if requeued > 0 {
            warn!(requeued, "interrupted batch returned to the pending list");
            // Pending first: after a crash between the two writes the
            // records are still `batched` and get requeued again.
            self.save_pending(&pending)?;
            self.save_done(&done)?;
        }
        if pending.len() < self.limits.min {
            info!(
                pending = pending.len(),
                min = self.limits.min,
                "not enough pending items for a batch"
            );
            if requeued == 0 && pending.len() != before {
                self.save_pending(&pending)?;
            }
            return Ok(Batch::default());
        }
        let take = pending.len().min(self.limits.max);
        let items: Vec<Item> = pending.drain(..take).collect();

        for item in &items {
            done.insert(item.id.clone(), LedgerRecord::batched(item));
        }
        // Ledger first: after a crash between the two writes the items are
        // both pending and `batched`, and the next draw keeps one copy.
        self.save_done(&done)?;
        self.save_pending(&pending)?;
        info!(size = items.len(), remaining = pending.len(), "batch drawn");
        Ok(Batch { items })
    }

    pub fn mark_completed(&self, ids: &[String]) -> Result<usize> {
        self.transition(ids, ItemStatus::Completed)
    }

    pub fn mark_failed(&self, ids: &[String]) -> Result<usize> {
        self.transition(ids, ItemStatus::Failed)
    }

    /// Move `batched` records to `target`. Records already in `target` are
    /// left alone; the return value counts records actually changed.
    #[instrument(skip_all, fields(target = target.as_str()))]
    fn transition(&self, ids: &[String], target: ItemStatus) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut done = self.records();
        let now = Utc::now();
        let mut changed = 0;
        for id in ids {
            let Some(record) = done.get_mut(id) else {
                warn!(%id, "no ledger record to transition");
                continue;
            };
            match record.status {
                s if s == target => {}
                ItemStatus::Batched => {
                    record.status = target;
                    record.processed_at = Some(now);
                    record.drawn = None;
                    changed += 1;
                }
                other => {
                    warn!(%id, from = other.as_str(), "ignoring transition from non-batched state");
                }
            }
        }
        if changed > 0 {
            self.save_done(&done)?;
        }
        info!(requested = ids.len(), changed, "ledger transition");
        Ok(changed)
    }

    /// Add `destination` to `posted_to` for each id.
    #[instrument(skip_all, fields(%destination))]
    pub fn mark_posted(&self, ids: &[String], destination: Destination) -> Result<usize> {
        let mut done = self.records();
        let mut changed = 0;
        for id in ids {
            let Some(record) = done.get_mut(id) else {
                warn!(%id, "cannot mark unknown item as posted");
                continue;
            };
            let inserted = record.posted_to.insert(destination);
            let cleared = record.failed_deliveries.remove(&destination).is_some();
            if inserted || cleared {
                changed += 1;
            }
        }
        if changed > 0 {
            self.save_done(&done)?;
        }
        Ok(changed)
    }

    /// Stamp `posted_at` on items that satisfied the completion policy.
    pub fn mark_delivered(&self, ids: &[String]) -> Result<usize> {
        let mut done = self.records();
        let now = Utc::now();
        let mut changed = 0;
        for id in ids {
            if let Some(record) = done.get_mut(id) {
                if record.posted_at.is_none() {
                    record.posted_at = Some(now);
                    changed += 1;
                }
            }
        }
        if changed > 0 {
            self.save_done(&done)?;
        }
        Ok(changed)
    }

    /// Count one more unsuccessful delivery cycle for `destination`.
    pub fn record_delivery_failure(&self, id: &str, destination: Destination) -> Result<u32> {
        let mut done = self.records();
        let Some(record) = done.get_mut(id) else {
            return Ok(0);
        };
        let count = record.failed_deliveries.entry(destination).or_insert(0);
        *count += 1;
        let count = *count;
        self.save_done(&done)?;
        Ok(count)
    }

    pub fn set_tags(&self, id: &str, tags: &[String]) -> Result<()> {
        let mut done = self.records();
        if let Some(record) = done.get_mut(id) {
            if record.tags != tags {
                record.tags = tags.to_vec();
                self.save_done(&done)?;
            }
        }
        Ok(())
    }

    /// Every id ever seen: pending, batched, and done.
    pub fn all_known_ids(&self) -> BTreeSet<String> {
        let mut ids: BTreeSet<String> = self.pending().into_iter().map(|i| i.id).collect();
        ids.extend(self.records().into_keys());
        ids
    }

    pub fn queue_counts(&self) -> QueueCounts {
        let pending = self.pending_count();
        let done = self.records().len();
        QueueCounts {
            pending,
            done,
            total: pending + done,
        }
    }

    fn save_pending(&self, pending: &[Item]) -> Result<()> {
        write_json_atomic(&self.queue_path, &QueueFile { pending })
    }

    fn save_done(&self, done: &BTreeMap<String, LedgerRecord>) -> Result<()> {
        write_json_atomic(&self.ledger_path, &LedgerFile { done })
    }
}

/// Move every `batched` record out of the ledger and back onto the front
/// of `pending`. Returns how many records were moved.
fn requeue_interrupted(pending: &mut Vec<Item>, done: &mut BTreeMap<String, LedgerRecord>) -> usize {
    let stranded: Vec<String> = done
        .iter()
        .filter(|(_, record)| record.status == ItemStatus::Batched)
        .map(|(id, _)| id.clone())
        .collect();
    let mut back = Vec::new();
    for id in &stranded {
        let Some(record) = done.remove(id) else {
            continue;
        };
        if pending.iter().any(|p| &p.id == id) {
            continue;
        }
        back.push(record.requeue_item(id));
    }
    back.sort_by(|a, b| a.discovered_at.cmp(&b.discovered_at));
    pending.splice(0..0, back);
    stranded.len()
}

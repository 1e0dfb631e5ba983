//! Persisted shapes of the queue and ledger files.
//!
//! Older deployments wrote bare id strings into the pending list, a flat array
//! instead of `{"pending": [...]}`, and a list instead of a map for `done`.
//! Everything is normalized here, once, when a file is loaded; the rest of the
//! crate only ever sees [`Item`] and [`LedgerRecord`].

use crate::model::{Item, LedgerRecord};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

#[derive(Serialize)]
pub(crate) struct QueueFile<'a> {
    pub pending: &'a [Item],
}

#[derive(Serialize)]
pub(crate) struct LedgerFile<'a> {
    pub done: &'a BTreeMap<String, LedgerRecord>,
}

/// Ordered group of items drawn from the pending list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub items: Vec<Item>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.items.iter().map(|i| i.id.clone()).collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Item> {
        self.items.iter()
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct QueueCounts {
    pub pending: usize,
    pub done: usize,
    pub total: usize,
}

/// Normalize the queue document. `None` means the structure is unusable.
pub(crate) fn normalize_pending(value: Value) -> Option<Vec<Item>> {
    let entries = match value {
        Value::Object(mut map) => match map.remove("pending") {
            Some(Value::Array(entries)) => entries,
            None => Vec::new(),
            Some(_) => return None,
        },
        Value::Array(entries) => entries,
        _ => return None,
    };

    let mut seen = HashSet::new();
    let mut items = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some(item) = normalize_entry(entry) else {
            continue;
        };
        if seen.insert(item.id.clone()) {
            items.push(item);
        } else {
            warn!(id = %item.id, "dropping duplicate pending entry");
        }
    }
    Some(items)
}

fn normalize_entry(entry: Value) -> Option<Item> {
    match entry {
        Value::String(id) if !id.trim().is_empty() => Some(Item::minimal(id.trim())),
        Value::Object(ref map) => {
            let id = map.get("id").and_then(Value::as_str)?.to_string();
            let title = map.get("title").and_then(Value::as_str).map(str::to_string);
            match serde_json::from_value::<Item>(entry) {
                Ok(item) => Some(item),
                Err(err) => {
                    warn!(?err, %id, "pending entry has unexpected fields; keeping id only");
                    let mut item = Item::minimal(&id);
                    if let Some(title) = title {
                        item.title = title;
                    }
                    Some(item)
                }
            }
        }
        other => {
            warn!(entry = %other, "skipping unrecognized pending entry");
            None
        }
    }
}

/// Normalize the ledger document. `None` means the structure is unusable.
pub(crate) fn normalize_done(value: Value) -> Option<BTreeMap<String, LedgerRecord>> {
    let Value::Object(mut root) = value else {
        return None;
    };
    let mut done = BTreeMap::new();
    match root.remove("done") {
        None => {}
        Some(Value::Object(entries)) => {
            for (id, raw) in entries {
                let record = serde_json::from_value::<LedgerRecord>(raw).unwrap_or_else(|err| {
                    warn!(?err, %id, "ledger record unreadable; keeping id as processed");
                    LedgerRecord::legacy(&id)
                });
                done.insert(id, record);
            }
        }
        Some(Value::Array(ids)) => {
            for id in ids.iter().filter_map(Value::as_str) {
                done.insert(id.to_string(), LedgerRecord::legacy(id));
            }
        }
        Some(_) => return None,
    }
    Some(done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ItemStatus;
    use serde_json::json;

    #[test]
    fn bare_ids_become_minimal_items() {
        let items = normalize_pending(json!({"pending": ["a", {"id": "b", "title": "B"}]})).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "a");
        assert_eq!(items[0].title, "Video a");
        assert_eq!(items[0].channel, "Unknown");
        assert_eq!(items[1].title, "B");
    }

    #[test]
    fn flat_array_layout_is_accepted() {
        let items = normalize_pending(json!(["x", "y", "x"])).unwrap();
        assert_eq!(items.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(), ["x", "y"]);
    }

    #[test]
    fn pending_with_wrong_type_is_unusable() {
        assert!(normalize_pending(json!({"pending": 3})).is_none());
        assert!(normalize_pending(json!("nope")).is_none());
    }

    #[test]
    fn done_list_becomes_records() {
        let done = normalize_done(json!({"done": ["v1", "v2"]})).unwrap();
        assert_eq!(done.len(), 2);
        assert_eq!(done["v1"].status, ItemStatus::Completed);
    }

    #[test]
    fn unreadable_record_keeps_its_id() {
        let done = normalize_done(json!({"done": {"v1": {"status": 42}}})).unwrap();
        assert_eq!(done["v1"].title, "Video v1");
    }
}

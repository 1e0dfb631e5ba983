use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Number of tags attached to every summary.
pub const TAG_COUNT: usize = 5;

const UNKNOWN_CHANNEL: &str = "Unknown";

/// Outbound delivery channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    Telegram,
    Twitter,
    Facebook,
}

impl Destination {
    pub const ALL: [Destination; 3] = [
        Destination::Telegram,
        Destination::Twitter,
        Destination::Facebook,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Destination::Telegram => "telegram",
            Destination::Twitter => "twitter",
            Destination::Facebook => "facebook",
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Destination {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "telegram" => Ok(Destination::Telegram),
            "twitter" | "x" => Ok(Destination::Twitter),
            "facebook" => Ok(Destination::Facebook),
            other => Err(anyhow::anyhow!("unknown destination '{}'", other)),
        }
    }
}

/// Lifecycle status of an item.
///
/// `Pending` is never stored in the ledger file; it is reported for ids that
/// are still on the pending list.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Batched,
    #[serde(alias = "posted")]
    Completed,
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Batched => "batched",
            ItemStatus::Completed => "completed",
            ItemStatus::Failed => "failed",
        }
    }
}

/// One unit of ingestible work (a video and its transcript).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(
        default = "unknown_channel",
        alias = "source_channel",
        alias = "podcaster"
    )]
    pub channel: String,
    #[serde(
        default = "Utc::now",
        alias = "found_at",
        deserialize_with = "timestamp_or_now"
    )]
    pub discovered_at: DateTime<Utc>,
    #[serde(default, alias = "text", skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl Item {
    pub fn new(id: impl Into<String>, title: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            channel: channel.into(),
            discovered_at: Utc::now(),
            transcript: None,
            metadata: Map::new(),
        }
    }

    /// Record built from a bare identifier found in a legacy queue file.
    pub fn minimal(id: &str) -> Self {
        Self::new(id, format!("Video {}", id), UNKNOWN_CHANNEL)
    }

    pub fn with_transcript(mut self, transcript: impl Into<String>) -> Self {
        self.transcript = Some(transcript.into());
        self
    }

    pub fn canonical_url(&self) -> String {
        canonical_url(&self.id)
    }
}

pub fn canonical_url(id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", id)
}

/// Durable lifecycle record for one item id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerRecord {
    #[serde(default)]
    pub title: String,
    #[serde(default = "unknown_channel")]
    pub channel: String,
    #[serde(
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub processed_at: Option<DateTime<Utc>>,
    pub status: ItemStatus,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub posted_to: BTreeSet<Destination>,
    #[serde(
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub posted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Delivery cycles in which a destination was attempted without success.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub failed_deliveries: BTreeMap<Destination, u32>,
    /// The item as drawn, kept only while the record is `batched`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drawn: Option<Item>,
}

impl LedgerRecord {
    pub fn batched(item: &Item) -> Self {
        Self {
            title: item.title.clone(),
            channel: item.channel.clone(),
            processed_at: None,
            status: ItemStatus::Batched,
            posted_to: BTreeSet::new(),
            posted_at: None,
            tags: Vec::new(),
            failed_deliveries: BTreeMap::new(),
            drawn: Some(item.clone()),
        }
    }

    /// Placeholder for ids whose stored record could not be read.
    pub fn legacy(id: &str) -> Self {
        Self {
            title: format!("Video {}", id),
            channel: UNKNOWN_CHANNEL.to_string(),
            processed_at: None,
            status: ItemStatus::Completed,
            posted_to: BTreeSet::new(),
            posted_at: None,
            tags: Vec::new(),
            failed_deliveries: BTreeMap::new(),
            drawn: None,
        }
    }

    /// The item to put back on the pending list when this record was left
    /// `batched` by an interrupted run.
    pub fn requeue_item(self, id: &str) -> Item {
        match self.drawn {
            Some(item) => item,
            None => Item::new(id, self.title, self.channel),
        }
    }

    pub fn is_delivered(&self) -> bool {
        self.posted_at.is_some()
    }
}

fn unknown_channel() -> String {
    UNKNOWN_CHANNEL.to_string()
}

/// Parse RFC 3339 or the naive ISO form (`2024-05-01T10:00:00.123456`) older
/// files were written with.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::String(s)) => parse_timestamp(&s),
        _ => None,
    })
}

fn timestamp_or_now<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_timestamp(deserializer)?.unwrap_or_else(Utc::now))
}

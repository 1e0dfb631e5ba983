#![allow(dead_code)]

use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use summary_relay::activity::ActivityLog;
use summary_relay::artifact::ArtifactStore;
use summary_relay::delivery::{DeliveryChannel, DeliveryError, DeliveryOptions, Receipt};
use summary_relay::extract::SENTINEL;
use summary_relay::generation::Generator;
use summary_relay::ledger::{BatchLimits, QueueManager};
use summary_relay::model::{Destination, Item};
use summary_relay::retry::RetryPolicy;
use summary_relay::salvage::SalvageStore;
use summary_relay::summary::StructuredSummary;
use tempfile::TempDir;
use tokio::sync::Mutex;

/// File-backed stores rooted in a throwaway directory.
pub struct Stores {
    pub dir: TempDir,
    pub queue: QueueManager,
    pub artifacts: ArtifactStore,
    pub salvage: SalvageStore,
    pub activity: ActivityLog,
}

impl Stores {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let queue = QueueManager::open(
            dir.path().join("queue.json"),
            dir.path().join("ledger.json"),
            BatchLimits { min: 2, max: 5 },
        )
        .unwrap();
        let artifacts = ArtifactStore::new(dir.path().join("summaries"));
        let salvage = SalvageStore::new(dir.path().join("salvage"));
        let activity = ActivityLog::new(dir.path().join("logs").join("daily_log.json"));
        Self {
            dir,
            queue,
            artifacts,
            salvage,
            activity,
        }
    }

    /// Enqueue, batch and complete `ids`, storing an artifact for each.
    pub fn seed_completed(&self, ids: &[&str]) {
        for id in ids {
            assert!(self.queue.enqueue(Item::new(*id, format!("Episode {}", id), "Show")).unwrap());
        }
        let batch = self.queue.next_batch().unwrap();
        assert_eq!(batch.len(), ids.len());
        for item in batch.iter() {
            let mut summary = StructuredSummary::from_value(summary_json(&item.title)).unwrap();
            summary.attach(&item.id, &[]);
            self.artifacts.save(&item.id, &item.channel, &summary).unwrap();
        }
        self.queue.mark_completed(&batch.ids()).unwrap();
    }
}

pub fn summary_json(title: &str) -> Value {
    json!({
        "title": title,
        "podcaster": "Show",
        "summary": {
            "essence": "A conversation about sleep and focus.",
            "top_takeaways": ["Sleep matters"],
            "game_changing_ideas": ["Fixed bedtime"],
            "things_you_can_do": ["No screens after nine"],
            "why_this_matters": "Attention is the bottleneck."
        }
    })
}

/// Generator output for `records`, each followed by the sentinel.
pub fn delimited(records: &[Value]) -> String {
    records
        .iter()
        .map(|r| format!("{}\n{}\n", r, SENTINEL))
        .collect()
}

pub fn quick_options(destinations: Vec<Destination>) -> DeliveryOptions {
    DeliveryOptions {
        destinations,
        dry_run: false,
        force: false,
        retry: RetryPolicy::new(2, Duration::ZERO),
        destination_pause: Duration::ZERO,
        posting_window: Duration::ZERO,
        abandon_after: 10,
    }
}

#[derive(Clone, Default)]
pub struct ScriptedGenerator {
    responses: Arc<Mutex<VecDeque<Result<String>>>>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedGenerator {
    pub fn with_responses(responses: Vec<Result<String>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            ..Default::default()
        }
    }

    pub async fn prompts(&self) -> Vec<String> {
        self.prompts.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().await.push(prompt.to_string());
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(anyhow!("no scripted response left")))
    }
}

/// Delivery channel that records every send and replays scripted results.
#[derive(Clone)]
pub struct RecordingChannel {
    destination: Destination,
    prepare: Arc<Mutex<Option<DeliveryError>>>,
    responses: Arc<Mutex<VecDeque<Result<Receipt, DeliveryError>>>>,
    sent: Arc<Mutex<Vec<String>>>,
    finished: Arc<Mutex<u32>>,
}

impl RecordingChannel {
    pub fn new(destination: Destination) -> Self {
        Self {
            destination,
            prepare: Arc::new(Mutex::new(None)),
            responses: Arc::new(Mutex::new(VecDeque::new())),
            sent: Arc::new(Mutex::new(Vec::new())),
            finished: Arc::new(Mutex::new(0)),
        }
    }

    /// `prepare` fails with `err` for as long as the channel lives.
    pub fn unreachable(destination: Destination, err: DeliveryError) -> Self {
        let channel = Self::new(destination);
        *channel.prepare.try_lock().unwrap() = Some(err);
        channel
    }

    pub fn with_responses(self, responses: Vec<Result<Receipt, DeliveryError>>) -> Self {
        *self.responses.try_lock().unwrap() = VecDeque::from(responses);
        self
    }

    pub async fn sent(&self) -> Vec<String> {
        self.sent.lock().await.clone()
    }

    pub async fn finished(&self) -> u32 {
        *self.finished.lock().await
    }

    pub fn shared(&self) -> Arc<dyn DeliveryChannel> {
        Arc::new(self.clone())
    }
}

#[async_trait::async_trait]
impl DeliveryChannel for RecordingChannel {
    fn destination(&self) -> Destination {
        self.destination
    }

    async fn prepare(&self) -> Result<(), DeliveryError> {
        match self.prepare.lock().await.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn targets(&self) -> Result<Vec<String>, DeliveryError> {
        Ok(vec!["target-1".into()])
    }

    async fn send(&self, _targets: &[String], content: &str) -> Result<Receipt, DeliveryError> {
        let mut sent = self.sent.lock().await;
        sent.push(content.to_string());
        let n = sent.len();
        drop(sent);
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(Receipt::new(format!("{}-{}", self.destination, n))))
    }

    async fn finish(&self) {
        *self.finished.lock().await += 1;
    }
}

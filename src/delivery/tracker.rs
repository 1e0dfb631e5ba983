//! Per-destination, idempotent delivery of stored artifacts.
//!
//! A destination already in an item's `posted_to` is never sent again unless
//! forced. Success is written to the ledger right after each send, so a crash
//! mid-cycle cannot cause a duplicate post on the next run. A destination that
//! fails readiness, or rejects our credentials, is skipped for every remaining
//! item in the cycle while the other destinations carry on.

use crate::activity::ActivityLog;
use crate::artifact::{ArtifactStore, StoredArtifact};
use crate::delivery::format;
use crate::delivery::{DeliveryChannel, DeliveryError};
use crate::ledger::QueueManager;
use crate::model::{Destination, ItemStatus, LedgerRecord};
use crate::retry::RetryPolicy;
use anyhow::Result;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct DeliveryOptions {
    /// Active destinations, in delivery order.
    pub destinations: Vec<Destination>,
    pub dry_run: bool,
    /// Resend to every destination regardless of `posted_to`.
    pub force: bool,
    pub retry: RetryPolicy,
    pub destination_pause: Duration,
    /// Spread across the items delivered in one phase.
    pub posting_window: Duration,
    /// Give up on a destination for an item after this many failed cycles.
    /// `0` never gives up.
    pub abandon_after: u32,
}

impl Default for DeliveryOptions {
    fn default() -> Self {
        Self {
            destinations: Destination::ALL.to_vec(),
            dry_run: false,
            force: false,
            retry: RetryPolicy::default(),
            destination_pause: Duration::from_secs(2),
            posting_window: Duration::from_secs(20 * 60),
            abandon_after: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered { confirmation: String },
    Failed { reason: String },
    /// The destination was unavailable for the whole cycle.
    Skipped { reason: String },
}

impl DeliveryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemDelivery {
    pub id: String,
    pub title: String,
    pub outcomes: Vec<(Destination, DeliveryOutcome)>,
    /// Completion policy satisfied after this cycle.
    pub fully_delivered: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub items: Vec<ItemDelivery>,
}

impl DeliveryReport {
    pub fn delivered(&self) -> usize {
        self.items
            .iter()
            .flat_map(|i| &i.outcomes)
            .filter(|(_, o)| o.is_success())
            .count()
    }

    pub fn failures(&self) -> usize {
        self.items
            .iter()
            .flat_map(|i| &i.outcomes)
            .filter(|(_, o)| !o.is_success())
            .count()
    }
}

#[derive(Debug, Clone)]
enum Readiness {
    Ready(Vec<String>),
    Unavailable(String),
}

pub struct DeliveryTracker<'a> {
    queue: &'a QueueManager,
    artifacts: &'a ArtifactStore,
    activity: &'a ActivityLog,
    channels: BTreeMap<Destination, Arc<dyn DeliveryChannel>>,
    options: DeliveryOptions,
    readiness: HashMap<Destination, Readiness>,
}

impl<'a> DeliveryTracker<'a> {
    pub fn new(
        queue: &'a QueueManager,
        artifacts: &'a ArtifactStore,
        activity: &'a ActivityLog,
        channels: Vec<Arc<dyn DeliveryChannel>>,
        options: DeliveryOptions,
    ) -> Self {
        let channels = channels.into_iter().map(|c| (c.destination(), c)).collect();
        Self {
            queue,
            artifacts,
            activity,
            channels,
            options,
            readiness: HashMap::new(),
        }
    }

    pub fn options(&self) -> &DeliveryOptions {
        &self.options
    }

    fn abandoned(&self, record: &LedgerRecord, destination: Destination) -> bool {
        let limit = self.options.abandon_after;
        limit > 0 && record.failed_deliveries.get(&destination).copied().unwrap_or(0) >= limit
    }

    /// Destinations `record` still needs, in configured order.
    pub fn needed(&self, record: &LedgerRecord) -> Vec<Destination> {
        self.options
            .destinations
            .iter()
            .copied()
            .filter(|d| self.options.force || (!record.posted_to.contains(d) && !self.abandoned(record, *d)))
            .collect()
    }

    /// Completed items with an artifact and at least one destination to go.
    pub fn pending_deliveries(&self) -> Result<Vec<(StoredArtifact, LedgerRecord)>> {
        let records = self.queue.records();
        let mut out = Vec::new();
        for artifact in self.artifacts.list()? {
            let Some(record) = records.get(&artifact.id) else {
                warn!(id = %artifact.id, path = %artifact.path.display(), "artifact has no ledger record; skipping");
                continue;
            };
            if record.status != ItemStatus::Completed {
                debug!(id = %artifact.id, status = record.status.as_str(), "artifact not eligible for delivery");
                continue;
            }
            if self.needed(record).is_empty() {
                continue;
            }
            out.push((artifact, record.clone()));
        }
        Ok(out)
    }

    /// Deliver every pending artifact, then apply the completion policy.
    #[instrument(skip_all, fields(dry_run = self.options.dry_run, force = self.options.force))]
    pub async fn run(&mut self) -> Result<DeliveryReport> {
        let pending = self.pending_deliveries()?;
        if pending.is_empty() {
            info!("nothing to deliver");
            return Ok(DeliveryReport::default());
        }
        info!(items = pending.len(), "delivering summaries");

        let gap = if self.options.dry_run {
            Duration::ZERO
        } else {
            self.options.posting_window / pending.len() as u32
        };
        let mut report = DeliveryReport::default();
        for (i, (artifact, record)) in pending.iter().enumerate() {
            if i > 0 && !gap.is_zero() {
                debug!(?gap, "pausing between items");
                tokio::time::sleep(gap).await;
            }
            let needed = self.needed(record);
            let outcomes = self.deliver(artifact, &needed).await;
            report.items.push(ItemDelivery {
                id: artifact.id.clone(),
                title: artifact.summary.title.clone(),
                outcomes,
                fully_delivered: false,
            });
        }

        self.settle(&mut report)?;
        self.finish().await;
        info!(
            delivered = report.delivered(),
            failures = report.failures(),
            "delivery phase finished"
        );
        Ok(report)
    }

    /// Send one artifact to each of `destinations`, recording every success
    /// in the ledger as soon as it happens.
    pub async fn deliver(
        &mut self,
        artifact: &StoredArtifact,
        destinations: &[Destination],
    ) -> Vec<(Destination, DeliveryOutcome)> {
        let mut outcomes = Vec::with_capacity(destinations.len());
        let mut sent_before = false;
        for &destination in destinations {
            let outcome = match self.ready(destination).await {
                Err(reason) => DeliveryOutcome::Skipped { reason },
                Ok(targets) => {
                    let content = format::for_destination(destination, &artifact.summary);
                    if self.options.dry_run {
                        info!(id = %artifact.id, %destination, chars = content.chars().count(), "dry run: not sending");
                        DeliveryOutcome::Delivered {
                            confirmation: format!("dry-run-{}", Uuid::new_v4()),
                        }
                    } else {
                        // Pause only between two real sends.
                        if sent_before && !self.options.destination_pause.is_zero() {
                            tokio::time::sleep(self.options.destination_pause).await;
                        }
                        sent_before = true;
                        self.send(destination, &targets, &content).await
                    }
                }
            };
            self.record(&artifact.id, destination, &outcome);
            outcomes.push((destination, outcome));
        }
        outcomes
    }

    fn record(&self, id: &str, destination: Destination, outcome: &DeliveryOutcome) {
        let ids = [id.to_string()];
        match outcome {
            DeliveryOutcome::Delivered { confirmation } => {
                info!(%id, %destination, %confirmation, "delivered");
                if let Err(err) = self.queue.mark_posted(&ids, destination) {
                    error!(?err, %id, %destination, "delivered but failed to record it in the ledger");
                    self.activity
                        .record_error(&format!("ledger write after posting {} to {}: {}", id, destination, err));
                }
                self.activity.record_posted(destination, &ids);
            }
            DeliveryOutcome::Failed { reason } => {
                warn!(%id, %destination, %reason, "delivery failed");
                self.activity
                    .record_error(&format!("failed to post {} to {}: {}", id, destination, reason));
            }
            DeliveryOutcome::Skipped { reason } => {
                debug!(%id, %destination, %reason, "destination unavailable; skipped");
            }
        }
    }

    /// Readiness and targets, resolved once per destination per cycle.
    async fn ready(&mut self, destination: Destination) -> Result<Vec<String>, String> {
        if let Some(state) = self.readiness.get(&destination) {
            return match state {
                Readiness::Ready(targets) => Ok(targets.clone()),
                Readiness::Unavailable(reason) => Err(reason.clone()),
            };
        }
        let state = if self.options.dry_run {
            Readiness::Ready(Vec::new())
        } else {
            match self.channels.get(&destination).cloned() {
                None => Readiness::Unavailable(format!("no channel configured for {}", destination)),
                Some(channel) => match channel.prepare().await {
                    Err(err) => Readiness::Unavailable(err.to_string()),
                    Ok(()) => match channel.targets().await {
                        Ok(targets) => Readiness::Ready(targets),
                        Err(err) => Readiness::Unavailable(err.to_string()),
                    },
                },
            }
        };
        if let Readiness::Unavailable(reason) = &state {
            error!(%destination, %reason, "destination unavailable for this cycle");
            self.activity
                .record_error(&format!("{} unavailable: {}", destination, reason));
        }
        self.readiness.insert(destination, state.clone());
        match state {
            Readiness::Ready(targets) => Ok(targets),
            Readiness::Unavailable(reason) => Err(reason),
        }
    }

    async fn send(&mut self, destination: Destination, targets: &[String], content: &str) -> DeliveryOutcome {
        let Some(channel) = self.channels.get(&destination).cloned() else {
            return DeliveryOutcome::Skipped {
                reason: format!("no channel configured for {}", destination),
            };
        };
        let result = self
            .options
            .retry
            .run_if(
                destination.as_str(),
                |_| channel.send(targets, content),
                DeliveryError::is_retryable,
            )
            .await;
        match result {
            Ok(receipt) => DeliveryOutcome::Delivered {
                confirmation: receipt.confirmation,
            },
            Err(err) => {
                if err.disables_destination() {
                    self.readiness
                        .insert(destination, Readiness::Unavailable(err.to_string()));
                    self.activity
                        .record_error(&format!("{} disabled for this cycle: {}", destination, err));
                }
                DeliveryOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }

    /// Apply the completion policy: every active destination attempted (or
    /// already done) and at least one success stamps `posted_at`. Failed
    /// destinations get their failure counter bumped.
    fn settle(&self, report: &mut DeliveryReport) -> Result<()> {
        let records = self.queue.records();
        let mut delivered = Vec::new();
        for item in &mut report.items {
            let Some(record) = records.get(&item.id) else {
                continue;
            };
            let mut covered: BTreeSet<Destination> = record.posted_to.clone();
            covered.extend(item.outcomes.iter().map(|(d, _)| *d));
            covered.extend(
                self.options
                    .destinations
                    .iter()
                    .copied()
                    .filter(|d| self.abandoned(record, *d)),
            );
            let attempted_all = self.options.destinations.iter().all(|d| covered.contains(d));
            let any_success = !record.posted_to.is_empty();

            for (destination, outcome) in &item.outcomes {
                if outcome.is_success() {
                    continue;
                }
                let failures = self.queue.record_delivery_failure(&item.id, *destination)?;
                if self.options.abandon_after > 0 && failures == self.options.abandon_after {
                    warn!(id = %item.id, %destination, failures, "giving up on destination for this item");
                    self.activity.record_error(&format!(
                        "gave up posting {} to {} after {} failed cycles",
                        item.id, destination, failures
                    ));
                }
            }

            if attempted_all && any_success {
                item.fully_delivered = true;
                if !record.is_delivered() {
                    delivered.push(item.id.clone());
                }
            } else if !any_success {
                info!(id = %item.id, "no destination accepted the item; it stays pending for the next cycle");
            }
        }
        if !delivered.is_empty() {
            self.queue.mark_delivered(&delivered)?;
        }
        Ok(())
    }

    async fn finish(&self) {
        if self.options.dry_run {
            return;
        }
        for destination in self.readiness.keys() {
            if let Some(channel) = self.channels.get(destination) {
                channel.finish().await;
            }
        }
    }
}

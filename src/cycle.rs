//! One unit of work: batch, summarize, persist, deliver, log.
//!
//! A cycle never loops across invocations and never aborts on item-level
//! problems. Failed items stay visible in the ledger, unrecoverable content
//! goes to the salvage store, and the outcome is returned as a [`CycleReport`].

use crate::activity::ActivityLog;
use crate::artifact::ArtifactStore;
use crate::config::Config;
use crate::delivery::{DeliveryChannel, DeliveryOptions, DeliveryReport, DeliveryTracker};
use crate::extract::{Extractor, RepairStats};
use crate::generation::prompt::batch_prompt;
use crate::generation::{styles, Generator};
use crate::ledger::{Batch, QueueManager};
use crate::model::{Destination, Item};
use crate::retry::RetryPolicy;
use crate::salvage::SalvageStore;
use crate::summary::StructuredSummary;
use crate::tags::Tagger;
use crate::validate::describe;
use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct CycleOptions {
    pub process: bool,
    pub deliver: bool,
    pub max_batches: usize,
    pub batch_pause: Duration,
    pub style: Option<String>,
    pub delivery: DeliveryOptions,
}

impl CycleOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            process: true,
            deliver: true,
            max_batches: cfg.app.max_batches_per_cycle.max(1),
            batch_pause: Duration::from_secs(cfg.app.batch_pause_seconds),
            style: cfg.generation.style.clone(),
            delivery: DeliveryOptions {
                destinations: cfg.destinations.clone(),
                dry_run: false,
                force: false,
                retry: cfg.retry_policy(),
                destination_pause: Duration::from_secs(cfg.app.destination_pause_seconds),
                posting_window: Duration::from_secs(cfg.app.posting_window_seconds),
                abandon_after: cfg.app.abandon_after_failures,
            },
        }
    }

    /// Keep only `wanted`, preserving configured order.
    pub fn restrict_destinations(&mut self, wanted: &[Destination]) {
        self.delivery.destinations.retain(|d| wanted.contains(d));
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub batches: usize,
    pub summarized: Vec<String>,
    pub failed: Vec<String>,
    pub salvaged: usize,
    pub repair: RepairStats,
    pub delivery: DeliveryReport,
    /// Phase-level problems (ledger or artifact I/O).
    pub errors: Vec<String>,
    pub pending_after: usize,
}

impl CycleReport {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty() || self.delivery.failures() > 0 || !self.errors.is_empty()
    }
}

pub struct Cycle<'a> {
    pub queue: &'a QueueManager,
    pub artifacts: &'a ArtifactStore,
    pub salvage: &'a SalvageStore,
    pub activity: &'a ActivityLog,
    pub generator: &'a dyn Generator,
    pub tagger: &'a dyn Tagger,
    pub channels: Vec<Arc<dyn DeliveryChannel>>,
    pub retry: RetryPolicy,
}

struct BatchOutcome {
    completed: Vec<String>,
    failed: Vec<String>,
    salvaged: usize,
}

impl<'a> Cycle<'a> {
    #[instrument(skip_all)]
    pub async fn run(&self, options: &CycleOptions) -> CycleReport {
        let mut report = CycleReport::default();
        let extractor = Extractor::new(self.generator, self.retry);

        if options.process {
            self.process(options, &extractor, &mut report).await;
        }
        report.repair = extractor.stats();

        if options.deliver {
            let mut tracker = DeliveryTracker::new(
                self.queue,
                self.artifacts,
                self.activity,
                self.channels.clone(),
                options.delivery.clone(),
            );
            match tracker.run().await {
                Ok(delivery) => report.delivery = delivery,
                Err(err) => self.phase_error(&mut report, "delivery phase failed", &err),
            }
        }

        let pending: Vec<String> = self.queue.pending().into_iter().map(|i| i.id).collect();
        report.pending_after = pending.len();
        self.activity.set_pending(pending);
        info!(
            batches = report.batches,
            summarized = report.summarized.len(),
            failed = report.failed.len(),
            delivered = report.delivery.delivered(),
            pending = report.pending_after,
            "cycle finished"
        );
        report
    }

    fn phase_error(&self, report: &mut CycleReport, what: &str, err: &anyhow::Error) {
        error!(?err, "{}", what);
        let msg = format!("{}: {:#}", what, err);
        self.activity.record_error(&msg);
        report.errors.push(msg);
    }

    async fn process(&self, options: &CycleOptions, extractor: &Extractor<'_>, report: &mut CycleReport) {
        for n in 0..options.max_batches {
            let batch = match self.queue.next_batch() {
                Ok(b) => b,
                Err(err) => {
                    self.phase_error(report, "failed to draw a batch", &err);
                    return;
                }
            };
            if batch.is_empty() {
                if n == 0 {
                    info!(
                        pending = self.queue.pending_count(),
                        min = self.queue.limits().min,
                        "not enough pending items for a batch; skipping to delivery"
                    );
                }
                return;
            }
            if n > 0 && !options.batch_pause.is_zero() {
                info!(pause = ?options.batch_pause, "pausing between batches");
                tokio::time::sleep(options.batch_pause).await;
            }
            report.batches += 1;
            let ids = batch.ids();
            match self.process_batch(&batch, options.style.as_deref(), extractor).await {
                Ok(outcome) => {
                    report.summarized.extend(outcome.completed);
                    report.failed.extend(outcome.failed);
                    report.salvaged += outcome.salvaged;
                }
                Err(err) => {
                    // Items not yet marked stay `batched`; the next draw puts
                    // them back on the pending list.
                    self.phase_error(report, &format!("batch {:?} failed", ids), &err);
                    return;
                }
            }
        }
    }

    /// Generate, extract, validate, repair and persist one batch.
    #[instrument(skip_all, fields(size = batch.len()))]
    async fn process_batch(
        &self,
        batch: &Batch,
        style: Option<&str>,
        extractor: &Extractor<'_>,
    ) -> Result<BatchOutcome> {
        let ids = batch.ids();
        let prompt = batch_prompt(&batch.items, styles::resolve(style))?;
        let raw = match self
            .retry
            .run("generate batch", |_| self.generator.generate(&prompt))
            .await
        {
            Ok(raw) => raw,
            Err(err) => {
                error!(?err, ?ids, "generation failed; marking batch failed");
                self.activity
                    .record_error(&format!("generation failed for {:?}: {:#}", ids, err));
                self.queue.mark_failed(&ids)?;
                return Ok(BatchOutcome {
                    completed: Vec::new(),
                    failed: ids,
                    salvaged: 0,
                });
            }
        };

        let extraction = extractor.extract(&raw, batch.len()).await;
        info!(
            found = extraction.candidates.len(),
            expected = batch.len(),
            strategy = ?extraction.strategy,
            "extraction finished"
        );
        let mut outcome = BatchOutcome {
            completed: Vec::new(),
            failed: Vec::new(),
            salvaged: 0,
        };
        if extraction.candidates.len() < batch.len() {
            let missing: Vec<String> = ids[extraction.candidates.len()..].to_vec();
            let reason = format!(
                "expected {} records, recovered {}",
                batch.len(),
                extraction.candidates.len()
            );
            self.activity
                .record_error(&format!("{} for batch {:?}", reason, ids));
            if self
                .salvage
                .keep("raw_response", &missing, &reason, &Value::String(raw.clone()))
                .is_some()
            {
                outcome.salvaged += 1;
            }
        }

        for (i, item) in batch.iter().enumerate() {
            let Some(candidate) = extraction.candidates.get(i) else {
                warn!(id = %item.id, "no record recovered for item");
                outcome.failed.push(item.id.clone());
                continue;
            };
            match self.accept(item, candidate, extractor).await {
                Ok(true) => outcome.completed.push(item.id.clone()),
                Ok(false) => {
                    outcome.salvaged += 1;
                    outcome.failed.push(item.id.clone());
                }
                Err(err) => {
                    error!(?err, id = %item.id, "failed to persist summary");
                    self.activity
                        .record_error(&format!("failed to persist summary for {}: {:#}", item.id, err));
                    outcome.failed.push(item.id.clone());
                }
            }
        }

        self.queue.mark_completed(&outcome.completed)?;
        self.queue.mark_failed(&outcome.failed)?;
        self.activity.record_summarized(&outcome.completed);
        Ok(outcome)
    }

    /// Validate (repairing once if needed) and store one record. `Ok(false)`
    /// means the record was salvaged instead.
    async fn accept(&self, item: &Item, candidate: &Value, extractor: &Extractor<'_>) -> Result<bool> {
        let mut summary = match StructuredSummary::from_value(candidate.clone()) {
            Ok(s) => s,
            Err(violations) => {
                warn!(id = %item.id, violations = %describe(&violations), "record invalid; attempting repair");
                let repaired = match extractor.repair_record(candidate).await {
                    Some(fixed) => StructuredSummary::from_value(fixed).ok(),
                    None => None,
                };
                match repaired {
                    Some(s) => s,
                    None => {
                        let reason = describe(&violations);
                        self.activity
                            .record_error(&format!("invalid summary for {}: {}", item.id, reason));
                        self.salvage
                            .keep("invalid_record", &[item.id.clone()], &reason, candidate);
                        return Ok(false);
                    }
                }
            }
        };

        let tags = self.tagger.tags(item, &summary);
        summary.attach(&item.id, &tags);
        let path = self.artifacts.save(&item.id, &item.channel, &summary)?;
        self.queue.set_tags(&item.id, &summary.tags)?;
        info!(id = %item.id, path = %path.display(), "summary stored");
        Ok(true)
    }
}

//! Transcript summarization relay.
//!
//! Items (videos with transcripts) are queued, summarized in batches by an
//! external text generator, coerced into validated [`summary::StructuredSummary`]
//! artifacts, and delivered to each configured destination at most once per
//! destination. All durable state lives in JSON files owned by
//! [`ledger::QueueManager`]; a single worker process is assumed.

pub mod activity;
pub mod artifact;
pub mod config;
pub mod cycle;
pub mod delivery;
pub mod extract;
pub mod generation;
pub mod ledger;
pub mod model;
pub mod retry;
pub mod salvage;
pub mod summary;
pub mod tags;
pub mod validate;

mod fsutil;

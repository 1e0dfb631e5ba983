//! Outbound delivery: per-destination channels and the tracker that drives
//! them against the ledger.

use crate::model::Destination;
use async_trait::async_trait;
use thiserror::Error;

pub mod format;
pub mod socialbu;
pub mod telegram;
pub mod tracker;

pub use tracker::{DeliveryOptions, DeliveryOutcome, DeliveryReport, DeliveryTracker, ItemDelivery};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("authentication failed: {0}")]
    Unauthorized(String),
    #[error("no delivery targets available")]
    NoTargets,
    #[error("rejected by destination: {0}")]
    Rejected(String),
    #[error("transport error: {0}")]
    Transport(String),
}

impl DeliveryError {
    /// Only transport failures are worth another attempt within a cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryError::Transport(_))
    }

    /// Errors that make the destination unusable for the rest of the cycle.
    pub fn disables_destination(&self) -> bool {
        matches!(self, DeliveryError::Unauthorized(_) | DeliveryError::NoTargets)
    }
}

/// Opaque confirmation returned by a destination; logged, never interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub confirmation: String,
}

impl Receipt {
    pub fn new(confirmation: impl Into<String>) -> Self {
        Self {
            confirmation: confirmation.into(),
        }
    }
}

/// One outbound destination.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    fn destination(&self) -> Destination;

    /// Authenticate or otherwise check the destination is usable.
    async fn prepare(&self) -> Result<(), DeliveryError>;

    /// Destination-specific targets (chat ids, account ids).
    async fn targets(&self) -> Result<Vec<String>, DeliveryError>;

    async fn send(&self, targets: &[String], content: &str) -> Result<Receipt, DeliveryError>;

    /// Release sessions at the end of the delivery phase.
    async fn finish(&self) {}
}

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use txtrack_core::transaction::TransactionRecord;

use crate::{eoa::error::PendingTrackerError, metrics::record_tracker_event};

/// Outcome reported by the pending tracker. The tracker never mutates a record; the
/// owner of the record applies these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum TrackerEvent {
    Confirmed {
        transaction_id: String,
    },
    Failed {
        transaction_id: String,
        error: PendingTrackerError,
    },
    Warning {
        transaction: TransactionRecord,
        error: PendingTrackerError,
    },
    /// The transaction was rebroadcast; its owner increments `retry_count`
    Retry {
        transaction: TransactionRecord,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackerStage {
    Confirmed,
    Failed,
    Warning,
    Retry,
}

impl Display for TrackerStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackerStage::Confirmed => write!(f, "tx:confirmed"),
            TrackerStage::Failed => write!(f, "tx:failed"),
            TrackerStage::Warning => write!(f, "tx:warning"),
            TrackerStage::Retry => write!(f, "tx:retry"),
        }
    }
}

impl TrackerEvent {
    pub fn stage(&self) -> TrackerStage {
        match self {
            TrackerEvent::Confirmed { .. } => TrackerStage::Confirmed,
            TrackerEvent::Failed { .. } => TrackerStage::Failed,
            TrackerEvent::Warning { .. } => TrackerStage::Warning,
            TrackerEvent::Retry { .. } => TrackerStage::Retry,
        }
    }

    pub fn transaction_id(&self) -> &str {
        match self {
            TrackerEvent::Confirmed { transaction_id }
            | TrackerEvent::Failed { transaction_id, .. } => transaction_id,
            TrackerEvent::Warning { transaction, .. } | TrackerEvent::Retry { transaction } => {
                &transaction.id
            }
        }
    }
}

/// Sending half of the tracker's event channel
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<TrackerEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<TrackerEvent>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TrackerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Delivers `event`. A dropped receiver is logged and otherwise ignored.
    pub fn emit(&self, event: TrackerEvent) {
        let stage = event.stage();
        record_tracker_event(stage);

        if let Err(e) = self.tx.send(event) {
            tracing::warn!(
                stage = %stage,
                transaction_id = e.0.transaction_id(),
                "Tracker event receiver dropped, event discarded"
            );
        }
    }
}

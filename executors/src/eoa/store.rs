use std::{
    collections::HashMap,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use txtrack_core::{
    ledger::TransactionLedger,
    transaction::{NetworkId, TransactionRecord, TransactionStatus},
};

use crate::eoa::events::TrackerEvent;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, thiserror::Error)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "errorCode")]
pub enum TransactionStoreError {
    #[error("Transaction not found: {transaction_id}")]
    TransactionNotFound { transaction_id: String },

    #[error("Transaction already exists: {transaction_id}")]
    DuplicateTransaction { transaction_id: String },

    #[error("Transaction {transaction_id} is already {status}")]
    AlreadyFinalized {
        transaction_id: String,
        status: TransactionStatus,
    },
}

/// Process-local owner of transaction records.
///
/// Implements [`TransactionLedger`] for the nonce manager and pending tracker, and applies
/// the tracker's events as the durable record mutations.
#[derive(Debug, Default)]
pub struct InMemoryTransactionStore {
    network_id: NetworkId,
    transactions: RwLock<HashMap<String, TransactionRecord>>,
}

impl InMemoryTransactionStore {
    pub fn new(network_id: impl Into<NetworkId>) -> Self {
        Self {
            network_id: network_id.into(),
            transactions: RwLock::new(HashMap::new()),
        }
    }

    // Poisoning only means another thread panicked mid-write of a whole record.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, TransactionRecord>> {
        self.transactions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, TransactionRecord>> {
        self.transactions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert(&self, record: TransactionRecord) -> Result<(), TransactionStoreError> {
        let mut transactions = self.write();
        if transactions.contains_key(&record.id) {
            return Err(TransactionStoreError::DuplicateTransaction {
                transaction_id: record.id,
            });
        }
        transactions.insert(record.id.clone(), record);
        Ok(())
    }

    pub fn get(&self, transaction_id: &str) -> Option<TransactionRecord> {
        self.read().get(transaction_id).cloned()
    }

    fn modify(
        &self,
        transaction_id: &str,
        f: impl FnOnce(&mut TransactionRecord),
    ) -> Result<(), TransactionStoreError> {
        let mut transactions = self.write();
        let record = transactions.get_mut(transaction_id).ok_or_else(|| {
            TransactionStoreError::TransactionNotFound {
                transaction_id: transaction_id.to_string(),
            }
        })?;

        if record.status.is_terminal() {
            return Err(TransactionStoreError::AlreadyFinalized {
                transaction_id: transaction_id.to_string(),
                status: record.status,
            });
        }

        f(record);
        Ok(())
    }

    /// Applies one tracker outcome to the record it names.
    pub fn apply_event(&self, event: &TrackerEvent) -> Result<(), TransactionStoreError> {
        match event {
            TrackerEvent::Confirmed { transaction_id } => self.modify(transaction_id, |record| {
                record.status = TransactionStatus::Confirmed;
            }),
            TrackerEvent::Failed {
                transaction_id,
                error,
            } => self.modify(transaction_id, |record| {
                record.status = TransactionStatus::Failed;
                record.error = Some(error.to_string());
            }),
            TrackerEvent::Warning { transaction, error } => {
                self.modify(&transaction.id, |record| {
                    record.warning = Some(error.to_string());
                })
            }
            TrackerEvent::Retry { transaction } => self.modify(&transaction.id, |record| {
                record.retry_count = record.retry_count.saturating_add(1);
            }),
        }
    }

    /// Drains `events` into this store until every sender is dropped.
    pub async fn apply_events(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<TrackerEvent>) {
        while let Some(event) = events.recv().await {
            if let Err(e) = self.apply_event(&event) {
                tracing::warn!(
                    stage = %event.stage(),
                    error = %e,
                    "Failed to apply tracker event"
                );
            }
        }
    }

    fn filtered(
        &self,
        sender: Option<Address>,
        keep: impl Fn(&TransactionRecord) -> bool,
    ) -> Vec<TransactionRecord> {
        let mut records: Vec<TransactionRecord> = self
            .read()
            .values()
            .filter(|record| sender.is_none_or(|sender| record.sender == sender))
            .filter(|record| keep(record))
            .cloned()
            .collect();
        records.sort_by(|a, b| (a.sender, a.nonce, &a.id).cmp(&(b.sender, b.nonce, &b.id)));
        records
    }
}

impl TransactionLedger for InMemoryTransactionStore {
    fn pending_transactions(&self, sender: Option<Address>) -> Vec<TransactionRecord> {
        self.filtered(sender, |record| record.status.is_pending())
    }

    fn confirmed_transactions(&self, sender: Address) -> Vec<TransactionRecord> {
        self.filtered(Some(sender), |record| {
            record.status == TransactionStatus::Confirmed
        })
    }

    fn current_network_id(&self) -> NetworkId {
        self.network_id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eoa::error::PendingTrackerError;
    use alloy::primitives::{B256, Bytes, address};

    const ALICE: Address = address!("1678a085c290ebd122dc42cba69373b5953b831d");
    const BOB: Address = address!("c04bf211972cea9a10f30bc81b0257aa51f024c6");

    fn submitted(id: &str, sender: Address, nonce: u64) -> TransactionRecord {
        TransactionRecord::new(id, sender, nonce, "1").submitted(
            B256::with_last_byte(nonce as u8),
            Bytes::from_static(&[0xf8]),
        )
    }

    #[test]
    fn pending_is_filtered_by_sender_and_sorted_by_nonce() {
        let store = InMemoryTransactionStore::new("1");
        store.insert(submitted("b", ALICE, 2)).unwrap();
        store.insert(submitted("a", ALICE, 1)).unwrap();
        store.insert(submitted("c", BOB, 0)).unwrap();
        store
            .insert(
                TransactionRecord::new("d", ALICE, 3, "1")
                    .with_status(TransactionStatus::Unapproved),
            )
            .unwrap();

        let nonces: Vec<u64> = store
            .pending_transactions(Some(ALICE))
            .iter()
            .map(|tx| tx.nonce)
            .collect();
        assert_eq!(nonces, vec![1, 2]);
        assert_eq!(store.pending_transactions(None).len(), 3);
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let store = InMemoryTransactionStore::new("1");
        store.insert(submitted("a", ALICE, 1)).unwrap();
        assert!(matches!(
            store.insert(submitted("a", ALICE, 2)),
            Err(TransactionStoreError::DuplicateTransaction { .. })
        ));
    }

    #[test]
    fn events_update_records() {
        let store = InMemoryTransactionStore::new("1");
        store.insert(submitted("a", ALICE, 1)).unwrap();
        store.insert(submitted("b", ALICE, 2)).unwrap();

        let record = store.get("b").unwrap();
        store
            .apply_event(&TrackerEvent::Retry {
                transaction: record,
            })
            .unwrap();
        assert_eq!(store.get("b").unwrap().retry_count, 1);

        store
            .apply_event(&TrackerEvent::Confirmed {
                transaction_id: "a".to_string(),
            })
            .unwrap();
        assert_eq!(store.confirmed_transactions(ALICE).len(), 1);
        assert_eq!(store.pending_transactions(Some(ALICE)).len(), 1);

        store
            .apply_event(&TrackerEvent::Failed {
                transaction_id: "b".to_string(),
                error: PendingTrackerError::NoHash,
            })
            .unwrap();
        let failed = store.get("b").unwrap();
        assert_eq!(failed.status, TransactionStatus::Failed);
        assert!(failed.error.is_some());
    }

    #[test]
    fn finalized_records_ignore_later_events() {
        let store = InMemoryTransactionStore::new("1");
        store.insert(submitted("a", ALICE, 1)).unwrap();
        store
            .apply_event(&TrackerEvent::Confirmed {
                transaction_id: "a".to_string(),
            })
            .unwrap();

        let result = store.apply_event(&TrackerEvent::Failed {
            transaction_id: "a".to_string(),
            error: PendingTrackerError::NoHash,
        });
        assert!(matches!(
            result,
            Err(TransactionStoreError::AlreadyFinalized { .. })
        ));
        assert_eq!(store.get("a").unwrap().status, TransactionStatus::Confirmed);
    }

    #[test]
    fn unknown_transaction_event_errors() {
        let store = InMemoryTransactionStore::new("1");
        assert!(matches!(
            store.apply_event(&TrackerEvent::Confirmed {
                transaction_id: "missing".to_string(),
            }),
            Err(TransactionStoreError::TransactionNotFound { .. })
        ));
    }
}

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
};

use txtrack_core::{
    chain::{ChainQuery, ObservedBlock},
    ledger::TransactionLedger,
    transaction::{TransactionRecord, TransactionStatus},
};

use crate::eoa::{
    balance::compute_available,
    error::PendingTrackerError,
    error_classifier::{BroadcastErrorClassification, classify_broadcast_error},
    events::{EventSink, TrackerEvent},
    nonce_manager::NonceManager,
};

/// Watches submitted transactions until they are mined, and rebroadcasts the ones that
/// are still waiting.
///
/// ## State transitions reported
/// `submitted -> confirmed` when the hash is seen in a block or the chain reports it mined,
/// `submitted -> failed` for a missing hash, an exhausted retry budget, a balance that can
/// no longer cover the transaction, or an unrecognised rebroadcast error.
///
/// Every transition is an [`TrackerEvent`] on the sink; records are never written here.
///
/// Events reach the record owner asynchronously, so the ledger can still list a transaction
/// as pending after it was reported confirmed or failed. The tracker remembers those ids and
/// ignores them until the ledger stops listing them.
///
/// ## Rebroadcast backoff
/// A transaction is rebroadcast only once at least `2^retry_count` blocks have passed since
/// the block at which the tracker first considered it for rebroadcast.
pub struct PendingTransactionTracker<C, L> {
    chain: Arc<C>,
    ledger: Arc<L>,
    nonce_manager: Arc<NonceManager<C, L>>,
    events: EventSink,
    retry_limit: u32,
    state: Mutex<TrackerState>,
}

#[derive(Debug, Default)]
struct TrackerState {
    /// Ids already reported confirmed or failed
    resolved: HashSet<String>,
    retries: HashMap<String, RetryState>,
}

#[derive(Debug, Clone, Copy)]
struct RetryState {
    /// Block at which the transaction was first considered for rebroadcast
    first_block: u64,
    /// Rebroadcasts emitted by this tracker, which can run ahead of the record's count
    broadcasts: u32,
}

impl<C, L> PendingTransactionTracker<C, L>
where
    C: ChainQuery,
    L: TransactionLedger,
{
    pub fn new(
        chain: Arc<C>,
        ledger: Arc<L>,
        nonce_manager: Arc<NonceManager<C, L>>,
        events: EventSink,
        retry_limit: u32,
    ) -> Self {
        Self {
            chain,
            ledger,
            nonce_manager,
            events,
            retry_limit,
            state: Mutex::new(TrackerState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, TrackerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Pending transactions from the ledger minus the ones already reported terminal.
    /// Bookkeeping for ids the ledger no longer lists is dropped.
    fn unresolved_pending(&self) -> Vec<TransactionRecord> {
        let pending = self.ledger.pending_transactions(None);

        let mut state = self.state();
        let listed: HashSet<&str> = pending.iter().map(|tx| tx.id.as_str()).collect();
        state.resolved.retain(|id| listed.contains(id.as_str()));
        state.retries.retain(|id, _| listed.contains(id.as_str()));

        pending
            .into_iter()
            .filter(|tx| !state.resolved.contains(&tx.id))
            .collect()
    }

    /// Marks `id` terminal. Returns false if it already was.
    fn resolve(&self, id: &str) -> bool {
        self.state().resolved.insert(id.to_string())
    }

    /// Records `block_number` as the first rebroadcast block of `tx` if none is known yet, and
    /// returns whether enough blocks have passed since then for another rebroadcast.
    fn backoff_elapsed(&self, tx: &TransactionRecord, block_number: u64) -> bool {
        let mut state = self.state();
        let retry = state
            .retries
            .entry(tx.id.clone())
            .or_insert(RetryState {
                first_block: block_number,
                broadcasts: 0,
            });

        let retry_count = tx.retry_count.max(retry.broadcasts);
        let distance = block_number.saturating_sub(retry.first_block);
        distance >= 2u64.saturating_pow(retry_count)
    }

    fn record_broadcast(&self, tx: &TransactionRecord) {
        if let Some(retry) = self.state().retries.get_mut(&tx.id) {
            retry.broadcasts = tx.retry_count.max(retry.broadcasts).saturating_add(1);
        }
    }

    fn confirm(&self, tx: &TransactionRecord) {
        if self.resolve(&tx.id) {
            self.events.emit(TrackerEvent::Confirmed {
                transaction_id: tx.id.clone(),
            });
        }
    }

    // ========== CONFIRM FLOW ==========

    /// Confirms every submitted transaction whose hash is in `block`, without any chain call.
    #[tracing::instrument(skip_all, fields(block_number = block.number))]
    pub fn on_new_block(&self, block: &ObservedBlock) {
        for tx in self.unresolved_pending() {
            if tx.status != TransactionStatus::Submitted {
                continue;
            }

            match &tx.hash {
                None => self.fail_without_hash(&tx),
                Some(hash) if block.contains(hash) => {
                    tracing::info!(
                        transaction_id = tx.id,
                        nonce = tx.nonce,
                        hash = %hash,
                        "Transaction confirmed"
                    );
                    self.confirm(&tx);
                }
                Some(_) => {}
            }
        }
    }

    /// Runs a full reconciliation when more than one block passed between observations,
    /// since confirmations in the skipped blocks would otherwise be missed.
    ///
    /// Returns whether a reconciliation ran.
    pub async fn on_block_range(
        &self,
        old_block: Option<u64>,
        new_block: u64,
    ) -> Result<bool, PendingTrackerError> {
        let skipped = match old_block {
            Some(old_block) => new_block.saturating_sub(old_block) > 1,
            None => false,
        };

        if !skipped {
            return Ok(false);
        }

        tracing::info!(
            old_block = ?old_block,
            new_block,
            "Blocks skipped since last observation, reconciling pending transactions"
        );
        self.update_pending_transactions().await?;
        Ok(true)
    }

    /// Asks the chain about every pending transaction while holding the global nonce lock.
    ///
    /// All transactions are checked even if some checks fail; the first failure is
    /// returned after the lock is released.
    #[tracing::instrument(skip_all)]
    pub async fn update_pending_transactions(&self) -> Result<(), PendingTrackerError> {
        let global_lock = self.nonce_manager.get_global_lock().await;

        let pending = self.unresolved_pending();
        tracing::debug!(count = pending.len(), "Checking pending transactions");

        let results =
            futures::future::join_all(pending.iter().map(|tx| self.check_pending_transaction(tx)))
                .await;

        global_lock.release();

        results.into_iter().collect()
    }

    async fn check_pending_transaction(
        &self,
        tx: &TransactionRecord,
    ) -> Result<(), PendingTrackerError> {
        if tx.status != TransactionStatus::Submitted {
            return Ok(());
        }

        let Some(hash) = tx.hash else {
            self.fail_without_hash(tx);
            return Ok(());
        };

        match self.chain.get_transaction_by_hash(hash).await {
            Ok(Some(mined)) if mined.is_mined() => {
                tracing::info!(
                    transaction_id = tx.id,
                    nonce = tx.nonce,
                    hash = %hash,
                    block_number = ?mined.block_number,
                    "Transaction confirmed"
                );
                self.confirm(tx);
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(inner_error) => {
                let error = PendingTrackerError::QueryInconclusive {
                    transaction_hash: hash,
                    inner_error,
                };
                tracing::warn!(
                    transaction_id = tx.id,
                    error = %error,
                    "Failed to check pending transaction"
                );
                self.events.emit(TrackerEvent::Warning {
                    transaction: tx.clone(),
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    fn fail_without_hash(&self, tx: &TransactionRecord) {
        tracing::warn!(
            transaction_id = tx.id,
            nonce = tx.nonce,
            "Submitted transaction has no hash"
        );
        self.fail(tx, PendingTrackerError::NoHash);
    }

    // ========== RESUBMIT FLOW ==========

    /// Rebroadcasts every pending transaction that has a signed payload and whose backoff
    /// has elapsed at `block_number`.
    #[tracing::instrument(skip_all, fields(block_number = block_number))]
    pub async fn resubmit_pending_transactions(&self, block_number: u64) {
        let pending = self.unresolved_pending();
        if pending.is_empty() {
            tracing::debug!("No pending transactions to resubmit");
            return;
        }

        for tx in &pending {
            // Resolved by a confirm pass since the list was read.
            if self.state().resolved.contains(&tx.id) {
                continue;
            }
            self.resubmit_transaction(tx, &pending, block_number).await;
        }
    }

    async fn resubmit_transaction(
        &self,
        tx: &TransactionRecord,
        pending: &[TransactionRecord],
        block_number: u64,
    ) {
        let Some(raw) = &tx.raw_signed_transaction else {
            tracing::debug!(transaction_id = tx.id, "No signed payload, skipping resubmit");
            return;
        };

        let chain_balance = self
            .chain
            .get_balance(tx.sender)
            .await
            .inspect_err(|e| {
                tracing::warn!(
                    transaction_id = tx.id,
                    error = %e,
                    "Balance unavailable, skipping resubmit this block"
                );
            })
            .ok();

        // Only earlier nonces of the same sender execute before this one.
        let ahead: Vec<TransactionRecord> = pending
            .iter()
            .filter(|other| other.sender == tx.sender && other.nonce < tx.nonce)
            .cloned()
            .collect();

        let Some(available) = compute_available(chain_balance, &ahead) else {
            return;
        };

        if tx.retry_count > self.retry_limit {
            self.fail(
                tx,
                PendingTrackerError::RetryLimitExceeded {
                    retry_count: tx.retry_count,
                    retry_limit: self.retry_limit,
                },
            );
            return;
        }

        let required = tx.total_cost();
        if available < required {
            self.fail(
                tx,
                PendingTrackerError::InsufficientBalance {
                    available,
                    required,
                },
            );
            return;
        }

        if !self.backoff_elapsed(tx, block_number) {
            tracing::debug!(
                transaction_id = tx.id,
                retry_count = tx.retry_count,
                "Rebroadcast backoff not elapsed"
            );
            return;
        }

        match self.chain.broadcast_raw_transaction(raw).await {
            Ok(hash) => {
                tracing::info!(
                    transaction_id = tx.id,
                    nonce = tx.nonce,
                    hash = %hash,
                    retry_count = tx.retry_count,
                    "Transaction rebroadcast"
                );
                self.record_broadcast(tx);
                self.events.emit(TrackerEvent::Retry {
                    transaction: tx.clone(),
                });
            }
            Err(inner_error) => {
                let message = inner_error.message();
                match classify_broadcast_error(&message, tx.retry_count) {
                    BroadcastErrorClassification::KnownTransient => {
                        tracing::debug!(
                            transaction_id = tx.id,
                            error = message,
                            "Ignoring known transaction error"
                        );
                    }
                    BroadcastErrorClassification::Fatal => {
                        self.fail(
                            tx,
                            PendingTrackerError::BroadcastFailed {
                                message,
                                inner_error,
                            },
                        );
                    }
                }
            }
        }
    }

    fn fail(&self, tx: &TransactionRecord, error: PendingTrackerError) {
        if !self.resolve(&tx.id) {
            return;
        }
        tracing::warn!(
            transaction_id = tx.id,
            nonce = tx.nonce,
            error = %error,
            "Transaction failed"
        );
        self.events.emit(TrackerEvent::Failed {
            transaction_id: tx.id.clone(),
            error,
        });
    }

    /// Per-block tick: reconcile, then rebroadcast. A failed reconciliation does not stop
    /// the rebroadcast.
    #[tracing::instrument(skip_all, fields(block_number = block_number))]
    pub async fn on_latest_block(&self, block_number: u64) {
        if let Err(e) = self.update_pending_transactions().await {
            tracing::error!(error = %e, "Error updating pending transactions");
        }
        self.resubmit_pending_transactions(block_number).await;
    }
}

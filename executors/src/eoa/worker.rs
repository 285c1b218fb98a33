use std::{sync::Arc, time::Duration};

use alloy::eips::BlockNumberOrTag;
use tokio::{sync::oneshot, task::JoinHandle, time::MissedTickBehavior};
use txtrack_core::{chain::ChainQuery, error::ChainError, ledger::TransactionLedger};

use crate::eoa::{error::PendingTrackerError, pending_tracker::PendingTransactionTracker};

#[derive(Debug, thiserror::Error)]
pub enum BlockTrackerWorkerError {
    #[error("Chain error while tracking blocks: {0}")]
    Chain(#[from] ChainError),

    #[error("Reconciliation failed: {0}")]
    Reconciliation(#[from] PendingTrackerError),

    #[error("Runtime error: {message}")]
    Runtime { message: String },
}

/// Drives the pending tracker from the chain head.
///
/// ## Per tick:
/// 1. **Poll head** - read the latest block number, do nothing if it has not advanced
/// 2. **Confirm** - first observation or skipped blocks run a full reconciliation, a single
///    new block is checked against its transaction list
/// 3. **Resubmit** - rebroadcast whatever is still pending and past its backoff
pub struct BlockTrackerWorker<C, L> {
    chain: Arc<C>,
    tracker: Arc<PendingTransactionTracker<C, L>>,
    poll_interval: Duration,
    last_block: Option<u64>,
}

impl<C, L> BlockTrackerWorker<C, L>
where
    C: ChainQuery + 'static,
    L: TransactionLedger + 'static,
{
    pub fn new(
        chain: Arc<C>,
        tracker: Arc<PendingTransactionTracker<C, L>>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            chain,
            tracker,
            poll_interval,
            last_block: None,
        }
    }

    pub fn last_block(&self) -> Option<u64> {
        self.last_block
    }

    /// Processes the chain head once. Returns the block number handled, or `None` when the
    /// head has not moved.
    ///
    /// A failed reconciliation still lets resubmission run, but the block is not marked
    /// observed, so the next tick reconciles again.
    #[tracing::instrument(skip_all, fields(last_block = ?self.last_block))]
    pub async fn tick(&mut self) -> Result<Option<u64>, BlockTrackerWorkerError> {
        let latest = self.chain.get_block_number().await?;

        if self.last_block.is_some_and(|last| latest <= last) {
            return Ok(None);
        }

        let confirm_result = self.confirm(latest).await;

        // Transactions the confirm step resolved are skipped by the tracker.
        self.tracker.resubmit_pending_transactions(latest).await;

        confirm_result?;
        self.last_block = Some(latest);
        Ok(Some(latest))
    }

    async fn confirm(&self, latest: u64) -> Result<(), BlockTrackerWorkerError> {
        let Some(last_block) = self.last_block else {
            tracing::info!(block_number = latest, "First block observed, reconciling");
            self.tracker.update_pending_transactions().await?;
            return Ok(());
        };

        if self
            .tracker
            .on_block_range(Some(last_block), latest)
            .await?
        {
            return Ok(());
        }

        match self
            .chain
            .get_block_by_number(BlockNumberOrTag::Number(latest))
            .await?
        {
            Some(block) => self.tracker.on_new_block(&block),
            None => {
                tracing::warn!(
                    block_number = latest,
                    "Block not available yet, reconciling instead"
                );
                self.tracker.update_pending_transactions().await?;
            }
        }

        Ok(())
    }

    /// Runs [`Self::tick`] every poll interval on a spawned task until shut down
    pub fn spawn(mut self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let join_handle = tokio::spawn(async move {
            // tokio rejects a zero period.
            let mut interval =
                tokio::time::interval(self.poll_interval.max(Duration::from_millis(1)));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(
                poll_interval_ms = self.poll_interval.as_millis() as u64,
                "Block tracker worker started"
            );

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        tracing::info!(last_block = ?self.last_block, "Block tracker worker stopping");
                        break;
                    }
                    _ = interval.tick() => {
                        match self.tick().await {
                            Ok(Some(block_number)) => {
                                tracing::debug!(block_number, "Processed block");
                            }
                            Ok(None) => {}
                            Err(e) => {
                                tracing::error!(error = %e, "Error processing block");
                            }
                        }
                    }
                }
            }
        });

        WorkerHandle {
            join_handle,
            shutdown_tx,
        }
    }
}

/// Handle for a running block tracker that can be shut down gracefully
pub struct WorkerHandle {
    pub join_handle: JoinHandle<()>,
    pub shutdown_tx: oneshot::Sender<()>,
}

impl WorkerHandle {
    pub async fn shutdown(self) -> Result<(), BlockTrackerWorkerError> {
        if self.shutdown_tx.send(()).is_err() {
            tracing::warn!("Block tracker worker was already shutting down");
        }

        self.join_handle.await.map_err(|e| {
            tracing::error!("Block tracker worker panicked during shutdown: {:?}", e);
            BlockTrackerWorkerError::Runtime {
                message: format!("Worker panic: {e}"),
            }
        })
    }
}

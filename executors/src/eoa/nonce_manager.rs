use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Instant,
};

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{
    Mutex as AsyncMutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock,
};
use txtrack_core::{
    chain::ChainQuery,
    error::ChainError,
    ledger::TransactionLedger,
    transaction::{NetworkId, TransactionRecord},
};

use crate::metrics::record_nonce_allocation_time;

#[derive(Debug, Error, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "errorCode")]
pub enum NonceManagerError {
    #[error("Failed to query chain nonce for {address}: {inner_error}")]
    ChainQuery {
        address: Address,
        inner_error: ChainError,
    },
}

/// How a nonce was derived, kept for diagnostics alongside the transaction
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NonceDetails {
    pub params: NonceParams,
    pub local: LocalNonce,
    pub network: NetworkNonce,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NonceParams {
    pub highest_locally_confirmed: u64,
    pub highest_suggested: u64,
    pub next_network_nonce: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LocalNonce {
    pub nonce: u64,
    pub start_point: u64,
    pub highest: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkNonce {
    pub nonce: u64,
    pub block_number: u64,
    pub base_count: u64,
}

/// Exclusive hold on nonce allocation for one sender.
///
/// The next allocation for the same sender cannot start until this guard is dropped or
/// [`NonceLock::release`] is called. Callers must keep it alive until the transaction
/// using `next_nonce` is recorded as pending, or discarded.
#[must_use = "dropping the lock immediately lets another caller allocate the same nonce"]
pub struct NonceLock {
    pub next_nonce: u64,
    pub details: NonceDetails,
    _address_guard: OwnedMutexGuard<()>,
    _global_guard: OwnedRwLockReadGuard<()>,
}

impl NonceLock {
    pub fn release(self) {}
}

impl std::fmt::Debug for NonceLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonceLock")
            .field("next_nonce", &self.next_nonce)
            .field("details", &self.details)
            .finish()
    }
}

/// Pauses every nonce allocation while held
#[must_use = "dropping the lock immediately releases it"]
pub struct GlobalNonceLock {
    _guard: OwnedRwLockWriteGuard<()>,
}

impl GlobalNonceLock {
    pub fn release(self) {}
}

/// Hands out nonces per sender, reconciling the chain's transaction count with the
/// transactions this process is still tracking.
///
/// Sender locks hold the read side of a global lock for their whole lifetime, so the
/// global (write) lock is only granted once no sender lock is outstanding, and no sender
/// lock is granted while it is held. tokio locks are fair, so waiters are served in
/// arrival order.
pub struct NonceManager<C, L> {
    chain: Arc<C>,
    ledger: Arc<L>,
    global_lock: Arc<RwLock<()>>,
    address_locks: Mutex<HashMap<Address, Arc<AsyncMutex<()>>>>,
}

impl<C, L> NonceManager<C, L>
where
    C: ChainQuery,
    L: TransactionLedger,
{
    pub fn new(chain: Arc<C>, ledger: Arc<L>) -> Self {
        Self {
            chain,
            ledger,
            global_lock: Arc::new(RwLock::new(())),
            address_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Waits until no sender lock or global lock is outstanding
    pub async fn get_global_lock(&self) -> GlobalNonceLock {
        GlobalNonceLock {
            _guard: self.global_lock.clone().write_owned().await,
        }
    }

    fn address_lock(&self, address: Address) -> Arc<AsyncMutex<()>> {
        // A poisoned map still holds valid entries.
        let mut locks = self
            .address_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(address).or_default().clone()
    }

    /// Computes the next nonce for `address` and returns it together with the lock that
    /// keeps other callers from computing a nonce for the same sender.
    ///
    /// On error the lock is released before returning.
    #[tracing::instrument(skip_all, fields(address = %address))]
    pub async fn get_nonce_lock(&self, address: Address) -> Result<NonceLock, NonceManagerError> {
        let global_guard = self.global_lock.clone().read_owned().await;
        let address_guard = self.address_lock(address).lock_owned().await;

        let started_at = Instant::now();
        let network_id = self.ledger.current_network_id();

        let snapshot = self
            .chain
            .get_chain_snapshot(address)
            .await
            .map_err(|inner_error| {
                tracing::warn!(error = %inner_error, "Failed to fetch chain snapshot");
                NonceManagerError::ChainQuery {
                    address,
                    inner_error,
                }
            })?;
        let network = NetworkNonce {
            nonce: snapshot.transaction_count_at_block,
            block_number: snapshot.block_number,
            base_count: snapshot.transaction_count_at_block,
        };

        let confirmed = self.ledger.confirmed_transactions(address);
        let highest_locally_confirmed = highest_locally_confirmed(&confirmed, &network_id);
        let highest_suggested = network.nonce.max(highest_locally_confirmed);

        let pending = self.ledger.pending_transactions(Some(address));
        let local = highest_continuous_from(&pending, highest_suggested);

        let next_nonce = network.nonce.max(local.nonce);

        let details = NonceDetails {
            params: NonceParams {
                highest_locally_confirmed,
                highest_suggested,
                next_network_nonce: network.nonce,
            },
            local,
            network,
        };

        tracing::debug!(
            next_nonce,
            network_nonce = details.network.nonce,
            block_number = details.network.block_number,
            highest_locally_confirmed,
            local_nonce = details.local.nonce,
            "Nonce allocated"
        );

        record_nonce_allocation_time(&network_id, started_at.elapsed().as_secs_f64());

        Ok(NonceLock {
            next_nonce,
            details,
            _address_guard: address_guard,
            _global_guard: global_guard,
        })
    }
}

/// One past the highest nonce among `confirmed` transactions on `network_id`, or zero.
/// Transactions confirmed on other networks do not count.
pub fn highest_locally_confirmed(confirmed: &[TransactionRecord], network_id: &NetworkId) -> u64 {
    confirmed
        .iter()
        .filter(|tx| &tx.network_id == network_id)
        .map(|tx| tx.nonce.saturating_add(1))
        .max()
        .unwrap_or(0)
}

/// Walks up from `start` while a pending transaction already occupies the nonce.
pub fn highest_continuous_from(pending: &[TransactionRecord], start: u64) -> LocalNonce {
    let taken: HashSet<u64> = pending.iter().map(|tx| tx.nonce).collect();

    let mut highest = start;
    while taken.contains(&highest) {
        highest += 1;
    }

    LocalNonce {
        nonce: highest,
        start_point: start,
        highest,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(nonce: u64, network: &str) -> TransactionRecord {
        TransactionRecord::new(nonce.to_string(), Address::ZERO, nonce, network)
    }

    #[test]
    fn continuous_run_stops_at_gap() {
        let pending = vec![tx(5, "1"), tx(6, "1"), tx(8, "1")];
        let local = highest_continuous_from(&pending, 5);
        assert_eq!(local.nonce, 7);
        assert_eq!(local.start_point, 5);
    }

    #[test]
    fn continuous_run_without_pending_is_start() {
        assert_eq!(highest_continuous_from(&[], 5).nonce, 5);
    }

    #[test]
    fn continuous_run_ignores_nonces_below_start() {
        let pending = vec![tx(2, "1"), tx(3, "1")];
        assert_eq!(highest_continuous_from(&pending, 5).nonce, 5);
    }

    #[test]
    fn confirmed_on_other_networks_are_ignored() {
        let confirmed = vec![tx(3, "1"), tx(9, "5")];
        assert_eq!(highest_locally_confirmed(&confirmed, &NetworkId::new("1")), 4);
        assert_eq!(highest_locally_confirmed(&confirmed, &NetworkId::new("7")), 0);
    }
}

use alloy::primitives::Address;

use crate::transaction::{NetworkId, TransactionRecord};

/// Local view over the transactions this process owns.
///
/// Implementations return snapshots; callers never mutate records through this trait.
pub trait TransactionLedger: Send + Sync {
    /// Signed or submitted transactions not yet observed mined, optionally for one sender
    fn pending_transactions(&self, sender: Option<Address>) -> Vec<TransactionRecord>;

    /// Transactions of `sender` that have been observed mined, across every network
    fn confirmed_transactions(&self, sender: Address) -> Vec<TransactionRecord>;

    fn current_network_id(&self) -> NetworkId;
}

use alloy::primitives::U256;
use txtrack_core::transaction::TransactionRecord;

/// Balance left once every pending transaction's maximum spend is reserved.
///
/// `None` in means the chain balance is unknown, and `None` comes back out: an unknown
/// balance is never treated as zero. Pending spend larger than the balance saturates at
/// zero.
pub fn compute_available(
    chain_balance: Option<U256>,
    pending_transactions: &[TransactionRecord],
) -> Option<U256> {
    let chain_balance = chain_balance?;

    let pending_spend = pending_transactions
        .iter()
        .fold(U256::ZERO, |total, tx| total.saturating_add(tx.total_cost()));

    Some(chain_balance.saturating_sub(pending_spend))
}

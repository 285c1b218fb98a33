use alloy::primitives::{B256, U256};
use serde::{Deserialize, Serialize};
use txtrack_core::error::ChainError;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, thiserror::Error)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "errorCode")]
pub enum PendingTrackerError {
    /// The record reached submitted bookkeeping without a broadcast hash
    #[error("We had an error while submitting this transaction, please try again.")]
    NoHash,

    #[error("Retry limit exceeded: {retry_count} retries, limit is {retry_limit}")]
    RetryLimitExceeded { retry_count: u32, retry_limit: u32 },

    #[error("Insufficient balance: {available} available, {required} wei required")]
    InsufficientBalance { available: U256, required: U256 },

    #[error("Error encountered when rebroadcasting transaction: {message}")]
    BroadcastFailed {
        message: String,
        inner_error: ChainError,
    },

    /// A confirmation check could not be completed. Says nothing about the transaction.
    #[error("Could not check transaction {transaction_hash}: {inner_error}")]
    QueryInconclusive {
        transaction_hash: B256,
        inner_error: ChainError,
    },
}

/// Provider error fragments that mean a rebroadcast was redundant or temporarily
/// rejected, not that the transaction is lost. Matched case-insensitively as substrings.
pub const KNOWN_TRANSACTION_ERRORS: &[&str] = &[
    "replacement transaction underpriced",
    "known transaction",
    "gas price too low to replace",
    "transaction with the same hash was already imported",
    "gateway timeout",
    "nonce too low",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastErrorClassification {
    /// Leave the transaction pending; the next block retries it
    KnownTransient,
    /// Fail the transaction
    Fatal,
}

/// Classifies an error returned while rebroadcasting an already-pending transaction.
///
/// Once a transaction has been rebroadcast more than once, every error counts as
/// transient regardless of its text.
pub fn classify_broadcast_error(message: &str, retry_count: u32) -> BroadcastErrorClassification {
    if retry_count > 1 || is_known_transaction_error(message) {
        BroadcastErrorClassification::KnownTransient
    } else {
        BroadcastErrorClassification::Fatal
    }
}

pub fn is_known_transaction_error(message: &str) -> bool {
    let message = message.to_lowercase();
    KNOWN_TRANSACTION_ERRORS
        .iter()
        .any(|known| message.contains(known))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonce_too_low_is_transient() {
        assert_eq!(
            classify_broadcast_error("nonce too low", 0),
            BroadcastErrorClassification::KnownTransient
        );
    }

    #[test]
    fn test_matching_ignores_case_and_context() {
        assert_eq!(
            classify_broadcast_error(
                "server returned an error response: error code -32000: Known Transaction: 0xabc",
                0
            ),
            BroadcastErrorClassification::KnownTransient
        );
        assert!(is_known_transaction_error("504 Gateway Timeout"));
    }

    #[test]
    fn test_unknown_error_is_fatal() {
        assert_eq!(
            classify_broadcast_error("who dis", 0),
            BroadcastErrorClassification::Fatal
        );
        assert_eq!(
            classify_broadcast_error("insufficient funds for gas * price + value", 1),
            BroadcastErrorClassification::Fatal
        );
    }

    #[test]
    fn test_any_error_after_second_retry_is_transient() {
        assert_eq!(
            classify_broadcast_error("who dis", 2),
            BroadcastErrorClassification::KnownTransient
        );
    }
}

pub mod balance;
pub mod error;
pub mod error_classifier;
pub mod events;
pub mod nonce_manager;
pub mod pending_tracker;
pub mod store;
pub mod worker;

pub use balance::compute_available;
pub use error::PendingTrackerError;
pub use error_classifier::{
    BroadcastErrorClassification, KNOWN_TRANSACTION_ERRORS, classify_broadcast_error,
};
pub use events::{EventSink, TrackerEvent, TrackerStage};
pub use nonce_manager::{GlobalNonceLock, NonceDetails, NonceLock, NonceManager, NonceManagerError};
pub use pending_tracker::PendingTransactionTracker;
pub use store::{InMemoryTransactionStore, TransactionStoreError};
pub use worker::{BlockTrackerWorker, BlockTrackerWorkerError, WorkerHandle};

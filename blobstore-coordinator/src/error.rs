//! Error types for coordinator operations.

use thiserror::Error;

/// The single definitive failure reason of a coordinator operation.
///
/// Transient per-replica faults never surface here; they are recovered internally by trying
/// another replica. An operation fails with one of these only once its quorum policy or its
/// deadline says so.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    /// Every replica of the partition reported that the blob does not exist.
    #[error("blob does not exist")]
    BlobDoesNotExist,

    /// A replica reported a delete tombstone for the blob.
    #[error("blob has been deleted")]
    BlobDeleted,

    /// Enough replicas reported the blob's time-to-live as elapsed.
    #[error("blob has expired")]
    BlobExpired,

    /// All replicas were exhausted with transient failures.
    #[error("no replica could serve the operation")]
    StoreUnavailable,

    /// The operation deadline elapsed before a definitive outcome was reached.
    #[error("operation timed out")]
    OperationTimedOut,

    /// A protocol violation or an unknown server error code.
    #[error("unexpected internal error: {0}")]
    UnexpectedInternalError(String),
}

impl CoordinatorError {
    /// A stable label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            CoordinatorError::BlobDoesNotExist => "blob_does_not_exist",
            CoordinatorError::BlobDeleted => "blob_deleted",
            CoordinatorError::BlobExpired => "blob_expired",
            CoordinatorError::StoreUnavailable => "store_unavailable",
            CoordinatorError::OperationTimedOut => "operation_timed_out",
            CoordinatorError::UnexpectedInternalError(_) => "unexpected_internal_error",
        }
    }
}

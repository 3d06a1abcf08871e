//! The get specialization of the operation skeleton.
//!
//! This module owns the per-error counters and quorum thresholds that turn individual
//! replica verdicts into a definitive outcome, and the body deserialization for the three
//! read flavors.

use blobstore_types::ReplicaId;
use bytes::Bytes;

use crate::error::CoordinatorError;
use crate::operation::{ErrorDisposition, ResponseDecider};
use crate::wire::{self, BlobProperties, GetFlags, ServerErrorCode, WireError};

/// Minimum number of deleted verdicts before the blob is reported deleted.
///
/// A single tombstone report wins: delete markers replicate, so a stale replica answering
/// "not found" cannot override a fresher one that has seen the delete.
const BLOB_DELETED_THRESHOLD: usize = 1;

/// Minimum number of expired verdicts before the blob is reported expired.
///
/// Expiry is computed per replica from stored metadata; one anomalous clock or metadata
/// read must not condemn the blob.
const BLOB_EXPIRED_THRESHOLD: usize = 2;

/// The read flavors offered by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetFlavor {
    /// Fetch the blob data.
    Blob,
    /// Fetch the blob properties record.
    BlobProperties,
    /// Fetch the user metadata record.
    UserMetadata,
}

impl GetFlavor {
    pub(crate) fn flags(self) -> GetFlags {
        match self {
            GetFlavor::Blob => GetFlags::Blob,
            GetFlavor::BlobProperties => GetFlags::BlobProperties,
            GetFlavor::UserMetadata => GetFlags::BlobUserMetadata,
        }
    }

    /// A stable label for metrics and logs.
    pub fn kind(self) -> &'static str {
        match self {
            GetFlavor::Blob => "blob",
            GetFlavor::BlobProperties => "blob_properties",
            GetFlavor::UserMetadata => "user_metadata",
        }
    }

    /// Consumes exactly one message body of this flavor from a response payload.
    pub(crate) fn deserialize_body(self, mut body: Bytes) -> Result<GetPayload, WireError> {
        let payload = match self {
            GetFlavor::Blob => GetPayload::Blob(wire::decode_blob_data(&mut body)?),
            GetFlavor::BlobProperties => {
                GetPayload::Properties(BlobProperties::decode(&mut body)?)
            }
            GetFlavor::UserMetadata => {
                GetPayload::UserMetadata(wire::decode_user_metadata(&mut body)?)
            }
        };
        Ok(payload)
    }
}

/// The materialized payload of a successful get operation.
#[derive(Debug, Clone, PartialEq)]
pub enum GetPayload {
    /// The blob data.
    Blob(Bytes),
    /// The blob properties record.
    Properties(BlobProperties),
    /// The user metadata bytes.
    UserMetadata(Bytes),
}

/// Counts per-error replica verdicts and decides when a threshold is met.
///
/// Counters only ever grow for the lifetime of the operation.
#[derive(Debug)]
pub(crate) struct GetDecider {
    replica_count: usize,
    not_found: usize,
    deleted: usize,
    expired: usize,
}

impl GetDecider {
    pub(crate) fn new(replica_count: usize) -> Self {
        Self {
            replica_count,
            not_found: 0,
            deleted: 0,
            expired: 0,
        }
    }
}

impl ResponseDecider for GetDecider {
    fn on_server_error(
        &mut self,
        replica: &ReplicaId,
        code: ServerErrorCode,
    ) -> Result<ErrorDisposition, CoordinatorError> {
        match code {
            ServerErrorCode::NoError => Ok(ErrorDisposition::Accept),
            ServerErrorCode::IoError | ServerErrorCode::DataCorrupt => {
                Ok(ErrorDisposition::Retry)
            }
            ServerErrorCode::BlobNotFound => {
                self.not_found += 1;
                // Not-found needs unanimity: any single replica might simply not have
                // replicated a recent put yet.
                if self.not_found == self.replica_count {
                    tracing::trace!(
                        not_found = self.not_found,
                        replicas = self.replica_count,
                        "all replicas report blob not found"
                    );
                    return Err(CoordinatorError::BlobDoesNotExist);
                }
                Ok(ErrorDisposition::Retry)
            }
            ServerErrorCode::BlobDeleted => {
                self.deleted += 1;
                if self.deleted >= BLOB_DELETED_THRESHOLD.min(self.replica_count) {
                    tracing::trace!(
                        deleted = self.deleted,
                        replicas = self.replica_count,
                        "blob deleted threshold reached"
                    );
                    return Err(CoordinatorError::BlobDeleted);
                }
                Ok(ErrorDisposition::Retry)
            }
            ServerErrorCode::BlobExpired => {
                self.expired += 1;
                if self.expired >= BLOB_EXPIRED_THRESHOLD.min(self.replica_count) {
                    tracing::trace!(
                        expired = self.expired,
                        replicas = self.replica_count,
                        "blob expired threshold reached"
                    );
                    return Err(CoordinatorError::BlobExpired);
                }
                Ok(ErrorDisposition::Retry)
            }
            other => {
                tracing::error!(
                    replica = %replica,
                    code = %other,
                    "replica returned unexpected error code"
                );
                Err(CoordinatorError::UnexpectedInternalError(format!(
                    "replica {replica} returned unexpected error code {other}"
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use blobstore_types::{DataNodeId, PartitionId};

    use super::*;

    fn replica() -> ReplicaId {
        ReplicaId {
            node: DataNodeId {
                host: "localhost".into(),
                port: 6001,
                datacenter: "dc1".into(),
            },
            partition: PartitionId::new(1),
        }
    }

    fn disposition(
        decider: &mut GetDecider,
        code: ServerErrorCode,
    ) -> Result<ErrorDisposition, CoordinatorError> {
        decider.on_server_error(&replica(), code)
    }

    #[test]
    fn not_found_requires_unanimity() {
        let mut decider = GetDecider::new(3);
        for _ in 0..2 {
            assert!(matches!(
                disposition(&mut decider, ServerErrorCode::BlobNotFound),
                Ok(ErrorDisposition::Retry)
            ));
        }

        assert_eq!(
            disposition(&mut decider, ServerErrorCode::BlobNotFound),
            Err(CoordinatorError::BlobDoesNotExist)
        );
    }

    #[test]
    fn single_tombstone_is_terminal() {
        let mut decider = GetDecider::new(3);
        assert_eq!(
            disposition(&mut decider, ServerErrorCode::BlobDeleted),
            Err(CoordinatorError::BlobDeleted)
        );
    }

    #[test]
    fn expired_needs_two_reports() {
        let mut decider = GetDecider::new(3);
        assert!(matches!(
            disposition(&mut decider, ServerErrorCode::BlobExpired),
            Ok(ErrorDisposition::Retry)
        ));
        assert_eq!(
            disposition(&mut decider, ServerErrorCode::BlobExpired),
            Err(CoordinatorError::BlobExpired)
        );
    }

    #[test]
    fn expired_threshold_shrinks_on_single_replica_partitions() {
        let mut decider = GetDecider::new(1);
        assert_eq!(
            disposition(&mut decider, ServerErrorCode::BlobExpired),
            Err(CoordinatorError::BlobExpired)
        );
    }

    #[test]
    fn single_not_found_is_terminal_on_single_replica_partitions() {
        let mut decider = GetDecider::new(1);
        assert_eq!(
            disposition(&mut decider, ServerErrorCode::BlobNotFound),
            Err(CoordinatorError::BlobDoesNotExist)
        );
    }

    #[test]
    fn transient_codes_ask_for_a_retry() {
        let mut decider = GetDecider::new(3);
        for code in [ServerErrorCode::IoError, ServerErrorCode::DataCorrupt] {
            assert!(matches!(
                disposition(&mut decider, code),
                Ok(ErrorDisposition::Retry)
            ));
        }
    }

    #[test]
    fn unknown_codes_fail_immediately() {
        let mut decider = GetDecider::new(3);
        assert!(matches!(
            disposition(&mut decider, ServerErrorCode::Unknown(99)),
            Err(CoordinatorError::UnexpectedInternalError(_))
        ));
    }

    #[test]
    fn counters_are_independent() {
        // Mixed verdicts must not bleed into each other's thresholds.
        let mut decider = GetDecider::new(3);
        disposition(&mut decider, ServerErrorCode::BlobNotFound).unwrap();
        disposition(&mut decider, ServerErrorCode::BlobExpired).unwrap();
        assert!(matches!(
            disposition(&mut decider, ServerErrorCode::BlobNotFound),
            Ok(ErrorDisposition::Retry)
        ));
    }

    #[test]
    fn body_deserialization_matches_flavor() {
        let mut buf = bytes::BytesMut::new();
        wire::encode_blob_data(b"payload", &mut buf);
        let payload = GetFlavor::Blob.deserialize_body(buf.freeze()).unwrap();
        assert_eq!(payload, GetPayload::Blob(Bytes::from_static(b"payload")));

        // Handing a blob record to the properties flavor is a decode failure.
        let mut buf = bytes::BytesMut::new();
        wire::encode_blob_data(b"payload", &mut buf);
        assert!(GetFlavor::BlobProperties.deserialize_body(buf.freeze()).is_err());
    }
}

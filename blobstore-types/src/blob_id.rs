//! Blob identifier definitions and validation.

use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::PartitionId;

/// The current blob id layout version.
const BLOB_ID_VERSION: u8 = 1;

/// The binary length of a blob id: version byte, partition id, and uuid.
const BLOB_ID_LENGTH: usize = 1 + 8 + 16;

/// A globally unique blob identifier.
///
/// A blob id also names the [`PartitionId`] the blob lives on, which is how the coordinator
/// resolves the replica set without any additional lookups. Ids are totally ordered by
/// partition first, then by uuid, and their wire encoding is stable across retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobId {
    partition: PartitionId,
    uuid: Uuid,
}

/// An error indicating that a blob id could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlobIdError {
    /// The id does not have the expected length.
    #[error("blob id must be {BLOB_ID_LENGTH} bytes, got {0}")]
    InvalidLength(usize),
    /// The id carries an unknown layout version.
    #[error("unsupported blob id version {0}")]
    UnsupportedVersion(u8),
    /// The id is not valid hexadecimal.
    #[error("blob id is not valid hexadecimal")]
    InvalidEncoding,
}

impl BlobId {
    /// Creates a new random blob id on the given partition.
    pub fn new(partition: PartitionId) -> Self {
        Self {
            partition,
            uuid: Uuid::new_v4(),
        }
    }

    /// Creates a blob id from its constituent parts.
    pub fn from_parts(partition: PartitionId, uuid: Uuid) -> Self {
        Self { partition, uuid }
    }

    /// The partition this blob lives on.
    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    /// The unique portion of this blob id.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Returns the stable binary encoding of this id.
    pub fn to_bytes(&self) -> [u8; BLOB_ID_LENGTH] {
        let mut bytes = [0u8; BLOB_ID_LENGTH];
        bytes[0] = BLOB_ID_VERSION;
        bytes[1..9].copy_from_slice(&self.partition.as_u64().to_be_bytes());
        bytes[9..].copy_from_slice(self.uuid.as_bytes());
        bytes
    }

    /// Decodes a blob id from its binary encoding.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BlobIdError> {
        if bytes.len() != BLOB_ID_LENGTH {
            return Err(BlobIdError::InvalidLength(bytes.len()));
        }
        if bytes[0] != BLOB_ID_VERSION {
            return Err(BlobIdError::UnsupportedVersion(bytes[0]));
        }

        let mut partition = [0u8; 8];
        partition.copy_from_slice(&bytes[1..9]);
        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&bytes[9..]);

        Ok(Self {
            partition: PartitionId::new(u64::from_be_bytes(partition)),
            uuid: Uuid::from_bytes(uuid),
        })
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{BLOB_ID_VERSION:02x}{:016x}{}",
            self.partition.as_u64(),
            self.uuid.simple()
        )
    }
}

impl FromStr for BlobId {
    type Err = BlobIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != BLOB_ID_LENGTH * 2 {
            return Err(BlobIdError::InvalidLength(s.len() / 2));
        }

        let version =
            u8::from_str_radix(&s[..2], 16).map_err(|_| BlobIdError::InvalidEncoding)?;
        if version != BLOB_ID_VERSION {
            return Err(BlobIdError::UnsupportedVersion(version));
        }

        let partition =
            u64::from_str_radix(&s[2..18], 16).map_err(|_| BlobIdError::InvalidEncoding)?;
        let uuid = Uuid::try_parse(&s[18..]).map_err(|_| BlobIdError::InvalidEncoding)?;

        Ok(Self {
            partition: PartitionId::new(partition),
            uuid,
        })
    }
}

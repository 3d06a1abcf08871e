use blobstore_types::{BlobId, PartitionId};
use bytes::{BufMut, Bytes, BytesMut};

use super::{
    MESSAGE_TYPE_GET_REQUEST, PROTOCOL_VERSION, WireError, expect_header, put_string, take_bytes,
    take_string, take_u8, take_u16, take_u32, take_u64,
};

/// Which portion of the stored blob message a get request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetFlags {
    /// Only the blob properties record.
    BlobProperties,
    /// Only the user metadata record.
    BlobUserMetadata,
    /// Only the blob data record.
    Blob,
    /// The whole stored message.
    All,
}

impl GetFlags {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            GetFlags::BlobProperties => 0,
            GetFlags::BlobUserMetadata => 1,
            GetFlags::Blob => 2,
            GetFlags::All => 3,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Result<Self, WireError> {
        match value {
            0 => Ok(GetFlags::BlobProperties),
            1 => Ok(GetFlags::BlobUserMetadata),
            2 => Ok(GetFlags::Blob),
            3 => Ok(GetFlags::All),
            other => Err(WireError::UnknownFlags(other)),
        }
    }
}

/// A get request against one partition.
///
/// The request carries its blob id in a list for protocol uniformity; the coordinator
/// always sends a batch of one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetRequest {
    /// Correlates this request with its response in logs on both ends.
    pub correlation_id: u32,
    /// Identifies the sending client process.
    pub client_id: String,
    /// The portion of the stored message to return.
    pub flags: GetFlags,
    /// The partition all requested blobs live on.
    pub partition: PartitionId,
    /// The requested blob ids.
    pub blob_ids: Vec<BlobId>,
}

impl GetRequest {
    /// Encodes this request into a frame payload.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u16(MESSAGE_TYPE_GET_REQUEST);
        buf.put_u16(PROTOCOL_VERSION);
        buf.put_u32(self.correlation_id);
        put_string(&mut buf, &self.client_id);
        buf.put_u8(self.flags.as_u8());
        buf.put_u64(self.partition.as_u64());
        buf.put_u32(self.blob_ids.len() as u32);
        for blob_id in &self.blob_ids {
            let bytes = blob_id.to_bytes();
            buf.put_u16(bytes.len() as u16);
            buf.put_slice(&bytes);
        }
        buf.freeze()
    }

    /// Decodes a request from a frame payload.
    pub fn decode(mut buf: Bytes) -> Result<Self, WireError> {
        expect_header(&mut buf, MESSAGE_TYPE_GET_REQUEST)?;

        let correlation_id = take_u32(&mut buf, "correlation id")?;
        let client_id = take_string(&mut buf, "client id")?;
        let flags = GetFlags::from_u8(take_u8(&mut buf, "get flags")?)?;
        let partition = PartitionId::new(take_u64(&mut buf, "partition id")?);

        let count = take_u32(&mut buf, "blob id count")? as usize;
        let mut blob_ids = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let len = take_u16(&mut buf, "blob id length")? as usize;
            let bytes = take_bytes(&mut buf, len, "blob id")?;
            blob_ids.push(BlobId::from_bytes(&bytes)?);
        }

        Ok(Self {
            correlation_id,
            client_id,
            flags,
            partition,
            blob_ids,
        })
    }
}

use std::fmt;

use blobstore_types::BlobId;
use bytes::{BufMut, Bytes, BytesMut};

use super::{
    MESSAGE_TYPE_GET_RESPONSE, PROTOCOL_VERSION, WireError, expect_header, take_bytes, take_u8,
    take_u16, take_u32, take_u64,
};

/// The error code a storage server attaches to its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerErrorCode {
    /// The request succeeded.
    NoError,
    /// The server hit a local I/O fault; another replica may do better.
    IoError,
    /// The server found its stored copy corrupt; another replica may do better.
    DataCorrupt,
    /// The server has no record of the blob.
    BlobNotFound,
    /// The server holds a delete tombstone for the blob.
    BlobDeleted,
    /// The server computed the blob's time-to-live as elapsed.
    BlobExpired,
    /// A code this coordinator does not understand.
    Unknown(u16),
}

impl ServerErrorCode {
    pub(crate) fn as_u16(self) -> u16 {
        match self {
            ServerErrorCode::NoError => 0,
            ServerErrorCode::IoError => 1,
            ServerErrorCode::DataCorrupt => 2,
            ServerErrorCode::BlobNotFound => 3,
            ServerErrorCode::BlobDeleted => 4,
            ServerErrorCode::BlobExpired => 5,
            ServerErrorCode::Unknown(code) => code,
        }
    }

    pub(crate) fn from_u16(value: u16) -> Self {
        match value {
            0 => ServerErrorCode::NoError,
            1 => ServerErrorCode::IoError,
            2 => ServerErrorCode::DataCorrupt,
            3 => ServerErrorCode::BlobNotFound,
            4 => ServerErrorCode::BlobDeleted,
            5 => ServerErrorCode::BlobExpired,
            other => ServerErrorCode::Unknown(other),
        }
    }
}

impl fmt::Display for ServerErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Metadata about one stored message returned by a get response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageInfo {
    /// The blob the message belongs to.
    pub blob_id: BlobId,
    /// The total size of the stored message in bytes.
    pub size: u64,
    /// Whether a delete tombstone exists for the blob.
    pub deleted: bool,
    /// The absolute expiration time in milliseconds, if the blob has a time-to-live.
    pub expiration_ms: Option<u64>,
}

const MESSAGE_INFO_DELETED: u8 = 1 << 0;
const MESSAGE_INFO_HAS_EXPIRATION: u8 = 1 << 1;

impl MessageInfo {
    fn encode(&self, buf: &mut BytesMut) {
        let bytes = self.blob_id.to_bytes();
        buf.put_u16(bytes.len() as u16);
        buf.put_slice(&bytes);
        buf.put_u64(self.size);

        let mut flags = 0u8;
        if self.deleted {
            flags |= MESSAGE_INFO_DELETED;
        }
        if self.expiration_ms.is_some() {
            flags |= MESSAGE_INFO_HAS_EXPIRATION;
        }
        buf.put_u8(flags);
        if let Some(expiration) = self.expiration_ms {
            buf.put_u64(expiration);
        }
    }

    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        let len = take_u16(buf, "message info blob id length")? as usize;
        let bytes = take_bytes(buf, len, "message info blob id")?;
        let blob_id = BlobId::from_bytes(&bytes)?;

        let size = take_u64(buf, "message info size")?;
        let flags = take_u8(buf, "message info flags")?;
        let expiration_ms = if flags & MESSAGE_INFO_HAS_EXPIRATION != 0 {
            Some(take_u64(buf, "message info expiration")?)
        } else {
            None
        };

        Ok(Self {
            blob_id,
            size,
            deleted: flags & MESSAGE_INFO_DELETED != 0,
            expiration_ms,
        })
    }
}

/// A storage server's answer to a [`GetRequest`](super::GetRequest).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetResponse {
    /// Echoes the correlation id of the request.
    pub correlation_id: u32,
    /// The server's verdict for the request.
    pub error: ServerErrorCode,
    /// One entry per returned message; empty unless the verdict is [`ServerErrorCode::NoError`].
    pub message_info: Vec<MessageInfo>,
    /// The serialized message bodies, in `message_info` order.
    pub body: Bytes,
}

impl GetResponse {
    /// Creates an error response without a payload.
    pub fn error(correlation_id: u32, error: ServerErrorCode) -> Self {
        Self {
            correlation_id,
            error,
            message_info: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// Encodes this response into a frame payload.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u16(MESSAGE_TYPE_GET_RESPONSE);
        buf.put_u16(PROTOCOL_VERSION);
        buf.put_u32(self.correlation_id);
        buf.put_u16(self.error.as_u16());
        buf.put_u32(self.message_info.len() as u32);
        for info in &self.message_info {
            info.encode(&mut buf);
        }
        buf.put_slice(&self.body);
        buf.freeze()
    }

    /// Decodes a response from a frame payload.
    pub fn decode(mut buf: Bytes) -> Result<Self, WireError> {
        expect_header(&mut buf, MESSAGE_TYPE_GET_RESPONSE)?;

        let correlation_id = take_u32(&mut buf, "correlation id")?;
        let error = ServerErrorCode::from_u16(take_u16(&mut buf, "server error code")?);

        let count = take_u32(&mut buf, "message info count")? as usize;
        let mut message_info = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            message_info.push(MessageInfo::decode(&mut buf)?);
        }

        Ok(Self {
            correlation_id,
            error,
            message_info,
            body: buf,
        })
    }

    /// Returns the single message's info and body.
    ///
    /// A successful get response is required to carry exactly one message; anything else is
    /// a data corruption on the wire.
    pub fn single_message_body(&self) -> Result<(&MessageInfo, Bytes), WireError> {
        match self.message_info.as_slice() {
            [info] => Ok((info, self.body.clone())),
            _ => Err(WireError::Malformed(
                "get response must carry exactly one message",
            )),
        }
    }
}

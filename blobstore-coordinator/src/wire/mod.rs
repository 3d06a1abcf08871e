//! Wire codec for replica requests and responses.
//!
//! Every message travels as a length-prefixed frame over the pooled connection. The frame
//! payload starts with a message type tag and a protocol version, followed by the message
//! fields. Blob bodies additionally carry crc32c checksums so data corruption is detected
//! before a payload is handed to a caller.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

mod message;
mod request;
mod response;

pub use message::*;
pub use request::*;
pub use response::*;

/// The protocol version spoken by this coordinator.
pub const PROTOCOL_VERSION: u16 = 1;

/// Message type tag of a get request frame.
pub const MESSAGE_TYPE_GET_REQUEST: u16 = 1;
/// Message type tag of a get response frame.
pub const MESSAGE_TYPE_GET_RESPONSE: u16 = 2;

/// The largest frame read or written over a replica connection.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Errors produced while encoding or decoding wire messages.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// An I/O error on the underlying transport.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame length prefix exceeding [`MAX_FRAME_LEN`].
    #[error("frame too large: max {max} got {got}")]
    FrameTooLarge {
        /// The configured frame limit.
        max: usize,
        /// The advertised frame length.
        got: usize,
    },

    /// A message ended before the named field could be read.
    #[error("message truncated while reading {0}")]
    Truncated(&'static str),

    /// A frame carrying an unexpected message type tag.
    #[error("unexpected message type {0}")]
    UnexpectedMessageType(u16),

    /// A frame carrying an unsupported protocol version.
    #[error("unsupported message version {0}")]
    UnsupportedVersion(u16),

    /// An unknown value in the get flags field.
    #[error("unknown get flags {0}")]
    UnknownFlags(u8),

    /// A blob body whose checksum does not match its contents.
    #[error("checksum mismatch: expected {expected:#010x} got {got:#010x}")]
    ChecksumMismatch {
        /// The checksum carried on the wire.
        expected: u32,
        /// The checksum computed over the received body.
        got: u32,
    },

    /// A malformed blob id field.
    #[error("malformed blob id: {0}")]
    BlobId(#[from] blobstore_types::BlobIdError),

    /// Any other structural violation.
    #[error("malformed message: {0}")]
    Malformed(&'static str),
}

/// Writes one length-prefixed frame and flushes the transport.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if payload.len() > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge {
            max: MAX_FRAME_LEN,
            got: payload.len(),
        });
    }

    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one length-prefixed frame, bounded by [`MAX_FRAME_LEN`].
pub async fn read_frame<R>(reader: &mut R) -> Result<Bytes, WireError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; 4];
    reader.read_exact(&mut header).await?;

    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge {
            max: MAX_FRAME_LEN,
            got: len,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload.into())
}

pub(crate) fn take_u8(buf: &mut Bytes, what: &'static str) -> Result<u8, WireError> {
    if buf.remaining() < 1 {
        return Err(WireError::Truncated(what));
    }
    Ok(buf.get_u8())
}

pub(crate) fn take_u16(buf: &mut Bytes, what: &'static str) -> Result<u16, WireError> {
    if buf.remaining() < 2 {
        return Err(WireError::Truncated(what));
    }
    Ok(buf.get_u16())
}

pub(crate) fn take_u32(buf: &mut Bytes, what: &'static str) -> Result<u32, WireError> {
    if buf.remaining() < 4 {
        return Err(WireError::Truncated(what));
    }
    Ok(buf.get_u32())
}

pub(crate) fn take_u64(buf: &mut Bytes, what: &'static str) -> Result<u64, WireError> {
    if buf.remaining() < 8 {
        return Err(WireError::Truncated(what));
    }
    Ok(buf.get_u64())
}

pub(crate) fn take_bytes(
    buf: &mut Bytes,
    len: usize,
    what: &'static str,
) -> Result<Bytes, WireError> {
    if buf.remaining() < len {
        return Err(WireError::Truncated(what));
    }
    Ok(buf.split_to(len))
}

pub(crate) fn take_string(buf: &mut Bytes, what: &'static str) -> Result<String, WireError> {
    let len = take_u16(buf, what)? as usize;
    let bytes = take_bytes(buf, len, what)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| WireError::Malformed(what))
}

pub(crate) fn put_string(buf: &mut BytesMut, value: &str) {
    debug_assert!(value.len() <= u16::MAX as usize);
    buf.put_u16(value.len() as u16);
    buf.put_slice(value.as_bytes());
}

/// Checks the leading type tag and version of a frame payload.
pub(crate) fn expect_header(buf: &mut Bytes, message_type: u16) -> Result<(), WireError> {
    let got = take_u16(buf, "message type")?;
    if got != message_type {
        return Err(WireError::UnexpectedMessageType(got));
    }

    let version = take_u16(buf, "message version")?;
    if version != PROTOCOL_VERSION {
        return Err(WireError::UnsupportedVersion(version));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[tokio::test]
    async fn frame_roundtrip() {
        let mut transport = Vec::new();
        write_frame(&mut transport, b"hello").await.unwrap();

        let mut reader = Cursor::new(transport);
        let frame = read_frame(&mut reader).await.unwrap();
        assert_eq!(frame.as_ref(), b"hello");
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let mut transport = Vec::new();
        transport.extend_from_slice(&(MAX_FRAME_LEN as u32 + 1).to_be_bytes());

        let mut reader = Cursor::new(transport);
        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(err, WireError::FrameTooLarge { .. }));
    }

    #[tokio::test]
    async fn truncated_frame_is_an_io_error() {
        let mut transport = Vec::new();
        transport.extend_from_slice(&8u32.to_be_bytes());
        transport.extend_from_slice(b"hal");

        let mut reader = Cursor::new(transport);
        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(err, WireError::Io(_)));
    }
}

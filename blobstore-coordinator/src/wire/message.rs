//! Stored message body records.
//!
//! A stored blob message consists of a properties record, a user metadata record, and a blob
//! data record. A get response body carries the records the request's flags asked for, in
//! that order. Variable-size records are checksummed with crc32c.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

use super::{
    WireError, put_string, take_bytes, take_string, take_u8, take_u16, take_u32, take_u64,
};

const PROPERTIES_RECORD_VERSION: u16 = 1;
const USER_METADATA_RECORD_VERSION: u16 = 1;
const BLOB_DATA_RECORD_VERSION: u16 = 1;

/// The immutable properties stored alongside a blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlobProperties {
    /// The size of the blob data in bytes.
    pub blob_size: u64,
    /// The service that created the blob.
    pub service_id: String,
    /// The content type declared at creation, if any.
    pub content_type: Option<String>,
    /// The creation time in milliseconds since the epoch.
    pub creation_time_ms: u64,
    /// The time-to-live in seconds; `None` means the blob never expires.
    pub ttl_secs: Option<u64>,
}

impl BlobProperties {
    /// Encodes this record into the given buffer.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(PROPERTIES_RECORD_VERSION);
        buf.put_u64(self.blob_size);
        put_string(buf, &self.service_id);
        match &self.content_type {
            Some(content_type) => {
                buf.put_u8(1);
                put_string(buf, content_type);
            }
            None => buf.put_u8(0),
        }
        buf.put_u64(self.creation_time_ms);
        match self.ttl_secs {
            Some(ttl) => {
                buf.put_u8(1);
                buf.put_u64(ttl);
            }
            None => buf.put_u8(0),
        }
    }

    /// Decodes one record from the front of the buffer.
    pub fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        let version = take_u16(buf, "properties record version")?;
        if version != PROPERTIES_RECORD_VERSION {
            return Err(WireError::UnsupportedVersion(version));
        }

        let blob_size = take_u64(buf, "blob size")?;
        let service_id = take_string(buf, "service id")?;
        let content_type = match take_u8(buf, "content type marker")? {
            0 => None,
            _ => Some(take_string(buf, "content type")?),
        };
        let creation_time_ms = take_u64(buf, "creation time")?;
        let ttl_secs = match take_u8(buf, "ttl marker")? {
            0 => None,
            _ => Some(take_u64(buf, "ttl")?),
        };

        Ok(Self {
            blob_size,
            service_id,
            content_type,
            creation_time_ms,
            ttl_secs,
        })
    }
}

/// Encodes a user metadata record.
pub fn encode_user_metadata(metadata: &[u8], buf: &mut BytesMut) {
    buf.put_u16(USER_METADATA_RECORD_VERSION);
    buf.put_u32(metadata.len() as u32);
    buf.put_slice(metadata);
    buf.put_u32(crc32c::crc32c(metadata));
}

/// Decodes one user metadata record from the front of the buffer, verifying its checksum.
pub fn decode_user_metadata(buf: &mut Bytes) -> Result<Bytes, WireError> {
    let version = take_u16(buf, "user metadata record version")?;
    if version != USER_METADATA_RECORD_VERSION {
        return Err(WireError::UnsupportedVersion(version));
    }

    let len = take_u32(buf, "user metadata length")? as usize;
    let metadata = take_bytes(buf, len, "user metadata")?;
    verify_crc(&metadata, take_u32(buf, "user metadata checksum")?)?;
    Ok(metadata)
}

/// Encodes a blob data record.
pub fn encode_blob_data(data: &[u8], buf: &mut BytesMut) {
    buf.put_u16(BLOB_DATA_RECORD_VERSION);
    buf.put_u64(data.len() as u64);
    buf.put_slice(data);
    buf.put_u32(crc32c::crc32c(data));
}

/// Decodes one blob data record from the front of the buffer, verifying its checksum.
pub fn decode_blob_data(buf: &mut Bytes) -> Result<Bytes, WireError> {
    let version = take_u16(buf, "blob data record version")?;
    if version != BLOB_DATA_RECORD_VERSION {
        return Err(WireError::UnsupportedVersion(version));
    }

    let len = take_u64(buf, "blob data length")? as usize;
    let data = take_bytes(buf, len, "blob data")?;
    verify_crc(&data, take_u32(buf, "blob data checksum")?)?;
    Ok(data)
}

fn verify_crc(data: &[u8], expected: u32) -> Result<(), WireError> {
    let got = crc32c::crc32c(data);
    if got != expected {
        return Err(WireError::ChecksumMismatch { expected, got });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties() -> BlobProperties {
        BlobProperties {
            blob_size: 11,
            service_id: "upload-service".into(),
            content_type: Some("text/plain".into()),
            creation_time_ms: 1_700_000_000_000,
            ttl_secs: None,
        }
    }

    #[test]
    fn properties_roundtrip() {
        let record = properties();
        let mut buf = BytesMut::new();
        record.encode(&mut buf);

        let mut encoded = buf.freeze();
        let decoded = BlobProperties::decode(&mut encoded).unwrap();
        assert_eq!(decoded, record);
        assert!(encoded.is_empty());
    }

    #[test]
    fn blob_data_roundtrip() {
        let mut buf = BytesMut::new();
        encode_blob_data(b"hello world", &mut buf);

        let mut encoded = buf.freeze();
        let decoded = decode_blob_data(&mut encoded).unwrap();
        assert_eq!(decoded.as_ref(), b"hello world");
    }

    #[test]
    fn corrupted_blob_data_fails_checksum() {
        let mut buf = BytesMut::new();
        encode_blob_data(b"hello world", &mut buf);
        // Flip a payload byte behind the length prefix.
        buf[12] ^= 0xff;

        let err = decode_blob_data(&mut buf.freeze()).unwrap_err();
        assert!(matches!(err, WireError::ChecksumMismatch { .. }));
    }

    #[test]
    fn user_metadata_roundtrip() {
        let mut buf = BytesMut::new();
        encode_user_metadata(b"{\"origin\":\"test\"}", &mut buf);

        let mut encoded = buf.freeze();
        let decoded = decode_user_metadata(&mut encoded).unwrap();
        assert_eq!(decoded.as_ref(), b"{\"origin\":\"test\"}");
    }

    #[test]
    fn consecutive_records_decode_in_order() {
        let mut buf = BytesMut::new();
        properties().encode(&mut buf);
        encode_user_metadata(b"meta", &mut buf);
        encode_blob_data(b"data", &mut buf);

        let mut encoded = buf.freeze();
        BlobProperties::decode(&mut encoded).unwrap();
        assert_eq!(decode_user_metadata(&mut encoded).unwrap().as_ref(), b"meta");
        assert_eq!(decode_blob_data(&mut encoded).unwrap().as_ref(), b"data");
        assert!(encoded.is_empty());
    }
}

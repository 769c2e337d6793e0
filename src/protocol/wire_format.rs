//! Wire format encoding and decoding.
//!
//! Implements the 12-byte frame header:
//! ```text
//! ┌─────────────┬────────┬──────────┬───────────┐
//! │ header_size │ type   │ reserved │ data_size │
//! │ 2 bytes     │ 1 byte │ 1 byte   │ 8 bytes   │
//! │ u16 LE      │        │          │ u64 LE    │
//! └─────────────┴────────┴──────────┴───────────┘
//! ```
//!
//! All multi-byte integers are Little Endian. `header_size` is authoritative:
//! a peer running a newer protocol may append header fields, and the reader
//! skips anything past the 12 bytes it knows about. `data_size` is the exact
//! payload length following the header.

use bytes::{Buf, BufMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{PubwireError, Result};

/// Known header size in bytes (fixed, exactly 12).
pub const HEADER_SIZE: usize = 12;

/// Maximum accepted payload size (256 MiB).
///
/// A header announcing more than this terminates the session; the limit
/// exists so a malformed or hostile peer cannot make the reader allocate
/// unbounded memory.
pub const MAX_DATA_SIZE: u64 = 256 * 1024 * 1024;

/// Message content types carried in the header's `type` field.
pub mod message_type {
    /// Framed user payload, emitted after handshake completion.
    pub const REGULAR_PAYLOAD: u8 = 1;
    /// Protocol version exchange, the first frame in each direction.
    pub const PROTOCOL_HANDSHAKE: u8 = 2;
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpHeader {
    /// Wire size of the header itself. Authoritative for skipping.
    pub header_size: u16,
    /// Message content type (see [`message_type`]). Unknown values are
    /// preserved so newer frame types pass through intact.
    pub message_type: u8,
    /// Always 0 on send, ignored on receive.
    pub reserved: u8,
    /// Exact payload length in bytes.
    pub data_size: u64,
}

impl TcpHeader {
    /// Create a header for a payload of the given type and size.
    pub fn for_payload(message_type: u8, data_size: u64) -> Self {
        Self {
            header_size: HEADER_SIZE as u16,
            message_type,
            reserved: 0,
            data_size,
        }
    }

    /// Encode the header to a stack-allocated array (Little Endian).
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        let mut slice = &mut buf[..];
        self.encode_into(&mut slice);
        buf
    }

    /// Encode the header into any [`BufMut`] (Little Endian).
    pub fn encode_into<B: BufMut>(&self, buf: &mut B) {
        buf.put_u16_le(self.header_size);
        buf.put_u8(self.message_type);
        buf.put_u8(self.reserved);
        buf.put_u64_le(self.data_size);
    }

    /// Decode a header from bytes (Little Endian).
    ///
    /// Returns `None` if the buffer is too short.
    pub fn decode(mut buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            header_size: buf.get_u16_le(),
            message_type: buf.get_u8(),
            reserved: buf.get_u8(),
            data_size: buf.get_u64_le(),
        })
    }

    /// Validate the decoded header.
    ///
    /// Checks that `header_size` covers at least the known fields and that
    /// `data_size` stays under the given ceiling.
    pub fn validate(&self, max_data_size: u64) -> Result<()> {
        if (self.header_size as usize) < HEADER_SIZE {
            return Err(PubwireError::Protocol(format!(
                "header size {} is below the known layout of {} bytes",
                self.header_size, HEADER_SIZE
            )));
        }
        if self.data_size > max_data_size {
            return Err(PubwireError::FrameTooLarge {
                size: self.data_size,
                max: max_data_size,
            });
        }
        Ok(())
    }
}

/// Read and validate one header from the stream.
///
/// Honors `header_size`: excess bytes announced by a newer peer are read and
/// discarded so the payload starts where the sender says it does.
pub async fn read_header<S>(stream: &mut S) -> Result<TcpHeader>
where
    S: AsyncRead + Unpin,
{
    let mut fixed = [0u8; HEADER_SIZE];
    stream.read_exact(&mut fixed).await?;
    let header = TcpHeader::decode(&fixed).expect("buffer holds a full header");
    header.validate(MAX_DATA_SIZE)?;

    let excess = header.header_size as usize - HEADER_SIZE;
    if excess > 0 {
        let mut skip = vec![0u8; excess];
        stream.read_exact(&mut skip).await?;
    }

    Ok(header)
}

/// Read one complete frame (header + payload) from the stream.
pub async fn read_frame<S>(stream: &mut S) -> Result<(TcpHeader, Vec<u8>)>
where
    S: AsyncRead + Unpin,
{
    let header = read_header(stream).await?;
    let mut payload = vec![0u8; header.data_size as usize];
    stream.read_exact(&mut payload).await?;
    Ok((header, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_decode_roundtrip() {
        let original = TcpHeader::for_payload(message_type::REGULAR_PAYLOAD, 1234);
        let encoded = original.encode();
        let decoded = TcpHeader::decode(&encoded).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_header_little_endian_byte_order() {
        let header = TcpHeader {
            header_size: 0x0102,
            message_type: 0x03,
            reserved: 0x04,
            data_size: 0x05060708090A0B0C,
        };
        let bytes = header.encode();

        // header_size: 0x0102 in LE
        assert_eq!(bytes[0], 0x02);
        assert_eq!(bytes[1], 0x01);

        assert_eq!(bytes[2], 0x03);
        assert_eq!(bytes[3], 0x04);

        // data_size: LE, least significant byte first
        assert_eq!(bytes[4], 0x0C);
        assert_eq!(bytes[5], 0x0B);
        assert_eq!(bytes[11], 0x05);
    }

    #[test]
    fn test_header_size_is_exactly_12() {
        assert_eq!(HEADER_SIZE, 12);
        let header = TcpHeader::for_payload(message_type::REGULAR_PAYLOAD, 0);
        assert_eq!(header.encode().len(), 12);
        assert_eq!(header.header_size, 12);
    }

    #[test]
    fn test_decode_too_short_buffer() {
        let buf = [0u8; HEADER_SIZE - 1];
        assert!(TcpHeader::decode(&buf).is_none());
    }

    #[test]
    fn test_validate_header_size_below_minimum() {
        let mut header = TcpHeader::for_payload(message_type::REGULAR_PAYLOAD, 0);
        header.header_size = 11;
        let result = header.validate(MAX_DATA_SIZE);
        assert!(matches!(result, Err(PubwireError::Protocol(_))));
    }

    #[test]
    fn test_validate_payload_too_large() {
        let header = TcpHeader::for_payload(message_type::REGULAR_PAYLOAD, 101);
        let result = header.validate(100);
        assert!(matches!(
            result,
            Err(PubwireError::FrameTooLarge { size: 101, max: 100 })
        ));
    }

    #[tokio::test]
    async fn test_read_frame_roundtrip() {
        for payload in [&b""[..], &b"x"[..], &[0xAB; 4096][..]] {
            let header =
                TcpHeader::for_payload(message_type::REGULAR_PAYLOAD, payload.len() as u64);
            let mut wire = Vec::new();
            header.encode_into(&mut wire);
            wire.extend_from_slice(payload);

            let mut cursor = std::io::Cursor::new(wire);
            let (parsed, data) = read_frame(&mut cursor).await.unwrap();
            assert_eq!(parsed, header);
            assert_eq!(data, payload);
        }
    }

    #[tokio::test]
    async fn test_read_header_skips_excess_bytes() {
        // A header announcing 16 bytes: the 4 extra bytes belong to the
        // header, not the payload.
        let mut header = TcpHeader::for_payload(message_type::REGULAR_PAYLOAD, 2);
        header.header_size = 16;
        let mut wire = Vec::new();
        header.encode_into(&mut wire);
        wire.extend_from_slice(&[0xEE; 4]); // unknown trailing header bytes
        wire.extend_from_slice(b"ok");

        let mut cursor = std::io::Cursor::new(wire);
        let (parsed, data) = read_frame(&mut cursor).await.unwrap();
        assert_eq!(parsed.header_size, 16);
        assert_eq!(data, b"ok");
    }

    #[tokio::test]
    async fn test_read_header_rejects_oversized_frame() {
        let header = TcpHeader::for_payload(message_type::REGULAR_PAYLOAD, MAX_DATA_SIZE + 1);
        let mut cursor = std::io::Cursor::new(header.encode().to_vec());
        let result = read_header(&mut cursor).await;
        assert!(matches!(result, Err(PubwireError::FrameTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_read_header_truncated_stream() {
        let mut cursor = std::io::Cursor::new(vec![0u8; HEADER_SIZE - 3]);
        let result = read_header(&mut cursor).await;
        assert!(matches!(result, Err(PubwireError::Io(_))));
    }
}

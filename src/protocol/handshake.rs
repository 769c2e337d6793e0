//! Connection handshake.
//!
//! The first frame in each direction is a `ProtocolHandshake` frame whose
//! payload is a single byte: the sender's protocol version. The subscriber
//! sends its hello immediately after connecting; the publisher answers with
//! `min(PROTOCOL_VERSION, theirs)`, and both sides speak the negotiated
//! version from then on. Everything after the publisher's answer is
//! `RegularPayload` frames flowing publisher → subscriber.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::wire_format::{self, message_type, TcpHeader, HEADER_SIZE};
use crate::error::{PubwireError, Result};

/// Protocol version spoken by this implementation.
pub const PROTOCOL_VERSION: u8 = 0;

/// Upper bound on handshake payloads. Handshakes are tiny; anything bigger
/// is a confused peer and terminates the session before it can do harm.
pub const MAX_HANDSHAKE_PAYLOAD: u64 = 1024;

/// Build a complete handshake frame carrying the given version.
pub fn handshake_frame(version: u8) -> Vec<u8> {
    let header = TcpHeader::for_payload(message_type::PROTOCOL_HANDSHAKE, 1);
    let mut frame = Vec::with_capacity(HEADER_SIZE + 1);
    header.encode_into(&mut frame);
    frame.push(version);
    frame
}

/// Version both sides will speak, given the peer's advertised version.
pub fn negotiate(theirs: u8) -> u8 {
    PROTOCOL_VERSION.min(theirs)
}

/// Read the peer's handshake frame and return its advertised version.
///
/// The payload may be longer than one byte (a future version may append
/// fields); only the leading version byte is interpreted.
pub async fn read_hello<S>(stream: &mut S) -> Result<u8>
where
    S: AsyncRead + Unpin,
{
    let header = wire_format::read_header(stream).await?;
    if header.message_type != message_type::PROTOCOL_HANDSHAKE {
        return Err(PubwireError::HandshakeFailure(format!(
            "expected a handshake frame, got message type {}",
            header.message_type
        )));
    }
    if header.data_size == 0 || header.data_size > MAX_HANDSHAKE_PAYLOAD {
        return Err(PubwireError::HandshakeFailure(format!(
            "handshake payload of {} bytes",
            header.data_size
        )));
    }

    let mut payload = BytesMut::zeroed(header.data_size as usize);
    stream.read_exact(&mut payload).await?;
    Ok(payload[0])
}

/// Subscriber side: send our hello and return the publisher's negotiated
/// version. Used by the test subscribers; a full subscriber implementation
/// starts from here.
pub async fn initiate<S>(stream: &mut S) -> Result<u8>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&handshake_frame(PROTOCOL_VERSION)).await?;
    read_hello(stream).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_hello_roundtrip() {
        let (mut a, mut b) = duplex(256);

        a.write_all(&handshake_frame(PROTOCOL_VERSION)).await.unwrap();
        let version = read_hello(&mut b).await.unwrap();
        assert_eq!(version, PROTOCOL_VERSION);
    }

    #[tokio::test]
    async fn test_initiate_negotiates_with_publisher() {
        let (mut subscriber, mut publisher) = duplex(256);

        let publisher_side = tokio::spawn(async move {
            let theirs = read_hello(&mut publisher).await.unwrap();
            let negotiated = negotiate(theirs);
            publisher
                .write_all(&handshake_frame(negotiated))
                .await
                .unwrap();
            negotiated
        });

        let negotiated = initiate(&mut subscriber).await.unwrap();
        assert_eq!(negotiated, publisher_side.await.unwrap());
        assert_eq!(negotiated, PROTOCOL_VERSION);
    }

    #[tokio::test]
    async fn test_negotiate_picks_minimum() {
        assert_eq!(negotiate(PROTOCOL_VERSION), PROTOCOL_VERSION);
        assert_eq!(negotiate(200), PROTOCOL_VERSION);
    }

    #[tokio::test]
    async fn test_hello_rejects_wrong_frame_type() {
        let (mut a, mut b) = duplex(256);

        let header = TcpHeader::for_payload(message_type::REGULAR_PAYLOAD, 1);
        let mut frame = Vec::new();
        header.encode_into(&mut frame);
        frame.push(0);
        a.write_all(&frame).await.unwrap();

        let result = read_hello(&mut b).await;
        assert!(matches!(result, Err(PubwireError::HandshakeFailure(_))));
    }

    #[tokio::test]
    async fn test_hello_rejects_empty_payload() {
        let (mut a, mut b) = duplex(256);

        let header = TcpHeader::for_payload(message_type::PROTOCOL_HANDSHAKE, 0);
        a.write_all(&header.encode()).await.unwrap();

        let result = read_hello(&mut b).await;
        assert!(matches!(result, Err(PubwireError::HandshakeFailure(_))));
    }

    #[tokio::test]
    async fn test_hello_rejects_oversized_payload() {
        let (mut a, mut b) = duplex(256);

        let header =
            TcpHeader::for_payload(message_type::PROTOCOL_HANDSHAKE, MAX_HANDSHAKE_PAYLOAD + 1);
        a.write_all(&header.encode()).await.unwrap();

        let result = read_hello(&mut b).await;
        assert!(matches!(result, Err(PubwireError::HandshakeFailure(_))));
    }

    #[tokio::test]
    async fn test_hello_tolerates_longer_payload() {
        let (mut a, mut b) = duplex(256);

        // A newer peer may append handshake fields after the version byte.
        let header = TcpHeader::for_payload(message_type::PROTOCOL_HANDSHAKE, 3);
        let mut frame = Vec::new();
        header.encode_into(&mut frame);
        frame.extend_from_slice(&[7, 0xAA, 0xBB]);
        a.write_all(&frame).await.unwrap();

        let version = read_hello(&mut b).await.unwrap();
        assert_eq!(version, 7);
    }

    #[tokio::test]
    async fn test_hello_on_closed_stream() {
        let (a, mut b) = duplex(256);
        drop(a);

        let result = read_hello(&mut b).await;
        assert!(matches!(result, Err(PubwireError::Io(_))));
    }
}

//! Wire protocol: frame header layout and the connection handshake.

pub mod handshake;
pub mod wire_format;

pub use handshake::PROTOCOL_VERSION;
pub use wire_format::{message_type, TcpHeader, HEADER_SIZE, MAX_DATA_SIZE};

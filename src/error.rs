//! Error types for pubwire.

use thiserror::Error;

/// Main error type for all pubwire operations.
///
/// Startup errors (`AddressParse` through `AcceptorListen`) abort publisher
/// creation and leave the instance non-running. Session errors (`Io`,
/// `HandshakeFailure`, `FrameTooLarge`, `ConnectionClosed`) terminate the
/// affected session only and never escape past its close handler.
#[derive(Debug, Error)]
pub enum PubwireError {
    /// The listen address could not be parsed.
    #[error("invalid address: {0}")]
    AddressParse(#[from] std::net::AddrParseError),

    /// Creating the acceptor socket failed.
    #[error("error opening acceptor: {0}")]
    AcceptorOpen(#[source] std::io::Error),

    /// Setting a socket option on the acceptor failed.
    #[error("error setting acceptor option: {0}")]
    AcceptorSetOption(#[source] std::io::Error),

    /// Binding the acceptor to the endpoint failed.
    #[error("error binding acceptor: {0}")]
    AcceptorBind(#[source] std::io::Error),

    /// Listening on the bound acceptor failed.
    #[error("error listening on acceptor: {0}")]
    AcceptorListen(#[source] std::io::Error),

    /// A publisher was created on an executor that has no running reactor.
    #[error("executor is not started")]
    ExecutorNotStarted,

    /// `send` was called on a publisher that is not running.
    #[error("publisher is not running")]
    NotRunning,

    /// I/O error on a session socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol error (malformed header, wrong frame type, etc.).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The peer's handshake was missing, malformed or incompatible.
    #[error("handshake failure: {0}")]
    HandshakeFailure(String),

    /// A frame header announced a payload above the configured ceiling.
    #[error("frame payload of {size} bytes exceeds maximum of {max}")]
    FrameTooLarge { size: u64, max: u64 },

    /// The subscriber closed the connection.
    #[error("connection closed")]
    ConnectionClosed,
}

/// Result type alias using PubwireError.
pub type Result<T> = std::result::Result<T, PubwireError>;

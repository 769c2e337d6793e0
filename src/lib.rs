//! # pubwire
//!
//! Lightweight publish/subscribe over TCP with framed binary payloads.
//!
//! A [`Publisher`] binds a TCP endpoint, accepts any number of subscribers,
//! and broadcasts each published payload to every connected subscriber with
//! at-most-once semantics: a subscriber that cannot keep up misses messages
//! instead of stalling the publisher. With transient-local durability a
//! bounded ring of the most recent messages is replayed to every newly
//! connected subscriber, so late joiners still observe recent history.
//!
//! ## Architecture
//!
//! ```text
//!                ┌────────────────────── Executor ─────────────────────┐
//!                │  tokio runtime: reactor + N worker threads          │
//! Publisher ─────┤                                                     │
//!   acceptor ────┼─► accept loop ─► PublisherSession (one per peer)    │
//!   send ────────┼─► frame once ─► every session's queued slot ─► TCP  │
//!   ring ────────┼─► concatenated replay on each new connection        │
//!                └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use pubwire::{Executor, Publisher, TransientLocalSetting};
//!
//! let executor = Arc::new(Executor::default());
//! executor.start(4);
//!
//! // Keep the last 16 messages for late joiners; port 0 = OS-assigned.
//! let publisher = Publisher::with_default_address(
//!     Arc::clone(&executor),
//!     TransientLocalSetting::keep_last(16),
//!     0,
//! );
//! assert!(publisher.is_running());
//! println!("publishing on port {}", publisher.port());
//!
//! publisher.send_one(b"hello subscribers");
//! ```

pub mod buffer_pool;
pub mod error;
pub mod executor;
pub mod logger;
pub mod protocol;

mod publisher;
mod session;
mod transient_local;

pub use buffer_pool::BufferPool;
pub use error::{PubwireError, Result};
pub use executor::Executor;
pub use logger::{LogFunction, LogLevel};
pub use publisher::{Publisher, DEFAULT_ADDRESS};
pub use transient_local::TransientLocalSetting;

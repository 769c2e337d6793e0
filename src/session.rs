//! Per-subscriber session: handshake, transient-local replay, and the send
//! pipeline with freshest-wins backpressure.
//!
//! Each accepted connection is driven by one task on the executor. The task
//! runs the handshake, writes the transient-local replay, then settles into
//! the send loop: take the queued buffer, write it, repeat. The publisher
//! hands buffers over through [`PublisherSession::send_data_buffer`], which
//! never blocks and never queues more than one buffer: a session that cannot
//! keep up overwrites its queued slot and the subscriber simply misses the
//! stale message. Together with the buffer currently being written, a session
//! references at most two buffers at any time.
//!
//! ```text
//! Handshaking --(ok)--> Running --(cancel | io error)--> Cancelled
//! Handshaking --(io error | cancel)--> Cancelled
//! ```
//!
//! The close handler runs exactly once, on the first terminal transition.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;

use crate::buffer_pool::PooledBuffer;
use crate::error::{PubwireError, Result};
use crate::logger::{LogFunction, LogLevel};
use crate::protocol::handshake;

/// Runs when a session reaches its terminal state; removes it from the
/// publisher's session set.
pub(crate) type SessionClosedHandler = Box<dyn Fn(&Arc<PublisherSession>) + Send + Sync>;

/// Runs once when the handshake completes; gives the publisher the chance to
/// stage the transient-local replay via
/// [`PublisherSession::push_transient_buffer`].
pub(crate) type TransientPushHandler = Box<dyn Fn(&Arc<PublisherSession>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Handshaking,
    Running,
    Cancelled,
}

/// Send slots and lifecycle state, guarded by one short-lived mutex.
struct SendSlot {
    state: SessionState,
    /// The single queued buffer. Overwritten by newer sends (freshest wins);
    /// the buffer currently being written is held by the session task and is
    /// never preempted.
    queued: Option<Arc<PooledBuffer>>,
    /// Transient-local replay, staged during the handshake and written
    /// before any live frame.
    transient: Option<Arc<PooledBuffer>>,
}

/// One connected subscriber, as seen by the publisher.
pub(crate) struct PublisherSession {
    peer: SocketAddr,
    log: LogFunction,
    slot: Mutex<SendSlot>,
    work_notify: Notify,
    cancel_notify: Notify,
    on_closed: SessionClosedHandler,
    on_handshake_complete: TransientPushHandler,
    closed: AtomicBool,
}

impl PublisherSession {
    pub(crate) fn new(
        peer: SocketAddr,
        log: LogFunction,
        on_closed: SessionClosedHandler,
        on_handshake_complete: TransientPushHandler,
    ) -> Arc<Self> {
        Arc::new(Self {
            peer,
            log,
            slot: Mutex::new(SendSlot {
                state: SessionState::Handshaking,
                queued: None,
                transient: None,
            }),
            work_notify: Notify::new(),
            cancel_notify: Notify::new(),
            on_closed,
            on_handshake_complete,
            closed: AtomicBool::new(false),
        })
    }

    /// Remote endpoint of the subscriber.
    pub(crate) fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Drive the session until a terminal transition, then run the close
    /// handler. This is the session's task body.
    pub(crate) async fn run<S>(self: Arc<Self>, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let result = tokio::select! {
            result = self.drive(stream) => result,
            _ = self.cancel_notify.notified() => Ok(()),
        };

        match result {
            Ok(()) => self.report(LogLevel::Debug, "cancelled, closing connection"),
            Err(PubwireError::ConnectionClosed) => {
                self.report(LogLevel::Debug, "subscriber disconnected")
            }
            Err(e) => self.report(LogLevel::Warning, &format!("closing connection: {}", e)),
        }

        self.finish();
    }

    async fn drive<S>(self: &Arc<Self>, mut stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let theirs = handshake::read_hello(&mut stream).await?;
        let version = handshake::negotiate(theirs);

        // Stage the replay while live sends are still dropped, and flip to
        // Running before the reply goes out: a subscriber that has seen the
        // reply talks to a live session, and the replay still precedes every
        // live frame.
        (self.on_handshake_complete)(self);
        let replay = self.begin_running();

        stream
            .write_all(&handshake::handshake_frame(version))
            .await?;
        self.report(
            LogLevel::Debug,
            &format!("handshake complete (protocol v{})", version),
        );

        if let Some(buffer) = replay {
            self.report(
                LogLevel::Debug,
                &format!(
                    "replaying {} bytes of transient-local history",
                    buffer.len()
                ),
            );
            stream.write_all(buffer.as_slice()).await?;
        }

        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut drain = [0u8; 256];

        loop {
            let next = { self.slot.lock().unwrap().queued.take() };
            match next {
                Some(buffer) => {
                    // In flight from here until write_all returns.
                    writer.write_all(buffer.as_slice()).await?;
                }
                None => {
                    tokio::select! {
                        _ = self.work_notify.notified() => {}
                        read = reader.read(&mut drain) => match read {
                            Ok(0) => return Err(PubwireError::ConnectionClosed),
                            Ok(_) => {} // stray post-handshake bytes, ignored
                            Err(e) => return Err(e.into()),
                        },
                    }
                }
            }
        }
    }

    /// Enqueue a buffer for transmission.
    ///
    /// Never blocks. Dropped silently while handshaking and after
    /// cancellation; in `Running`, replaces whatever was queued.
    pub(crate) fn send_data_buffer(&self, buffer: Arc<PooledBuffer>) {
        let dropped;
        {
            let mut slot = self.slot.lock().unwrap();
            if slot.state != SessionState::Running {
                return;
            }
            dropped = slot.queued.replace(buffer).is_some();
        }
        if dropped {
            self.report(
                LogLevel::DebugVerbose,
                "socket is busy, dropping the previously queued buffer",
            );
        }
        self.work_notify.notify_one();
    }

    /// Stage the transient-local replay. Only effective during the
    /// handshake; the session writes it ahead of any live frame.
    pub(crate) fn push_transient_buffer(&self, buffer: Arc<PooledBuffer>) {
        let mut slot = self.slot.lock().unwrap();
        if slot.state == SessionState::Handshaking {
            slot.transient = Some(buffer);
        }
    }

    /// Tear the session down. The subscriber observes EOF; the close handler
    /// runs once. Safe to call repeatedly and concurrently with natural
    /// termination.
    pub(crate) fn cancel(&self) {
        {
            let mut slot = self.slot.lock().unwrap();
            slot.state = SessionState::Cancelled;
            slot.queued = None;
            slot.transient = None;
        }
        self.cancel_notify.notify_one();
    }

    fn begin_running(&self) -> Option<Arc<PooledBuffer>> {
        let mut slot = self.slot.lock().unwrap();
        if slot.state == SessionState::Cancelled {
            return None;
        }
        slot.state = SessionState::Running;
        slot.transient.take()
    }

    fn finish(self: &Arc<Self>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut slot = self.slot.lock().unwrap();
            slot.state = SessionState::Cancelled;
            slot.queued = None;
            slot.transient = None;
        }
        (self.on_closed)(self);
    }

    fn report(&self, level: LogLevel, message: &str) {
        (self.log)(
            level,
            &format!("Publisher session {}: {}", self.peer, message),
        );
    }
}

//! Publisher: acceptor loop, multi-session fan-out, and the transient-local
//! ring.
//!
//! A publisher binds a TCP endpoint on its executor, accepts any number of
//! subscribers, and broadcasts every published payload to all of them by
//! sharing one framed buffer across the sessions. With transient-local
//! durability enabled it additionally retains the most recent frames and
//! replays them, concatenated into a single push, to each newly connected
//! subscriber.
//!
//! ```text
//! user ─► send ─► frame one buffer ─┬─► session 1 queued slot ─► socket
//!                                   ├─► session 2 queued slot ─► socket
//!                                   └─► transient-local ring (replayed
//!                                       to late joiners)
//! ```

use std::collections::VecDeque;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::task::JoinHandle;

use crate::buffer_pool::BufferPool;
use crate::error::{PubwireError, Result};
use crate::executor::Executor;
use crate::logger::{LogFunction, LogLevel};
use crate::protocol::wire_format::{message_type, TcpHeader, HEADER_SIZE};
use crate::session::{PublisherSession, SessionClosedHandler, TransientPushHandler};
use crate::transient_local::{purge_expired, TransientLocalElement, TransientLocalSetting};

/// Address used by [`Publisher::with_default_address`].
pub const DEFAULT_ADDRESS: &str = "0.0.0.0";

/// Backlog for the listening socket.
const LISTEN_BACKLOG: u32 = 1024;

/// A running publisher.
///
/// Construction starts the publisher; check [`is_running`](Self::is_running)
/// for the outcome (failures are reported through the executor's log sink).
/// Dropping the publisher cancels it.
pub struct Publisher {
    core: Arc<PublisherCore>,
}

impl Publisher {
    /// Create a publisher listening on `address:port`. Port 0 asks the OS
    /// for a free port; see [`port`](Self::port).
    pub fn new(
        executor: Arc<Executor>,
        setting: TransientLocalSetting,
        address: &str,
        port: u16,
    ) -> Self {
        let log = executor.log().clone();
        let core = Arc::new(PublisherCore {
            executor,
            log,
            setting,
            pool: BufferPool::new(),
            sessions: Mutex::new(Vec::new()),
            transient_local: Mutex::new(VecDeque::new()),
            is_running: AtomicBool::new(false),
            local_endpoint: OnceLock::new(),
            acceptor: Mutex::new(None),
        });
        // Failure reasons were already logged step by step; the instance is
        // left non-running.
        let _ = core.start(address, port);
        Self { core }
    }

    /// Create a publisher listening on all interfaces (`0.0.0.0:port`).
    pub fn with_default_address(
        executor: Arc<Executor>,
        setting: TransientLocalSetting,
        port: u16,
    ) -> Self {
        Self::new(executor, setting, DEFAULT_ADDRESS, port)
    }

    /// Frame the concatenation of `payloads` as one message and hand it to
    /// every connected subscriber. Empty chunks are skipped.
    ///
    /// Returns `false` if the publisher is not running; the reason is
    /// logged. Never blocks on I/O: a subscriber that cannot keep up drops
    /// messages instead of stalling this call.
    pub fn send(&self, payloads: &[&[u8]]) -> bool {
        self.core.send(payloads)
    }

    /// Send a single-chunk message.
    pub fn send_one(&self, payload: &[u8]) -> bool {
        self.core.send(&[payload])
    }

    /// Stop accepting subscribers and disconnect the connected ones. Their
    /// sockets observe EOF. Idempotent.
    pub fn cancel(&self) {
        self.core.cancel();
    }

    /// The local port the acceptor is bound to, or 0 when not running.
    /// Useful with port 0 to learn the OS-assigned port.
    pub fn port(&self) -> u16 {
        if !self.is_running() {
            return 0;
        }
        self.core
            .local_endpoint
            .get()
            .map(|endpoint| endpoint.port())
            .unwrap_or(0)
    }

    /// The local endpoint the acceptor is bound to, if running.
    pub fn local_endpoint(&self) -> Option<SocketAddr> {
        self.core.local_endpoint.get().copied()
    }

    /// Number of connected subscribers (including those still handshaking).
    pub fn subscriber_count(&self) -> usize {
        self.core.sessions.lock().unwrap().len()
    }

    /// Whether the publisher accepted its endpoint and has not been
    /// cancelled.
    pub fn is_running(&self) -> bool {
        self.core.is_running.load(Ordering::Relaxed)
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        if self.is_running() {
            self.core.cancel();
        }
    }
}

/// Shared state behind the facade, referenced by the acceptor task and (via
/// `Weak`) by session callbacks. Sessions must never own the publisher:
/// publisher → session is the owning edge, the reverse is weak.
struct PublisherCore {
    executor: Arc<Executor>,
    log: LogFunction,
    setting: TransientLocalSetting,
    pool: Arc<BufferPool>,
    sessions: Mutex<Vec<Arc<PublisherSession>>>,
    transient_local: Mutex<VecDeque<TransientLocalElement>>,
    is_running: AtomicBool,
    local_endpoint: OnceLock<SocketAddr>,
    acceptor: Mutex<Option<JoinHandle<()>>>,
}

impl PublisherCore {
    fn start(self: &Arc<Self>, address: &str, port: u16) -> Result<()> {
        let Some(handle) = self.executor.handle() else {
            (self.log)(
                LogLevel::Error,
                &format!(
                    "Publisher: cannot start {}:{} on an executor without a running reactor.",
                    address, port
                ),
            );
            return Err(PubwireError::ExecutorNotStarted);
        };

        (self.log)(
            LogLevel::DebugVerbose,
            &format!("Publisher: parsing address {}:{}.", address, port),
        );
        let ip: IpAddr = match address.trim().parse() {
            Ok(ip) => ip,
            Err(e) => {
                (self.log)(
                    LogLevel::Error,
                    &format!(
                        "Publisher: error parsing address \"{}:{}\": {}",
                        address, port, e
                    ),
                );
                return Err(e.into());
            }
        };
        let endpoint = SocketAddr::new(ip, port);

        // Socket setup keeps the explicit open / set_option / bind / listen
        // sequence so every failure reports its own cause.
        let _guard = handle.enter();

        (self.log)(
            LogLevel::DebugVerbose,
            &format!("Publisher {}: opening acceptor.", endpoint),
        );
        let socket = if endpoint.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        };
        let socket = match socket {
            Ok(socket) => socket,
            Err(e) => {
                (self.log)(
                    LogLevel::Error,
                    &format!("Publisher {}: error opening acceptor: {}", endpoint, e),
                );
                return Err(PubwireError::AcceptorOpen(e));
            }
        };

        (self.log)(
            LogLevel::DebugVerbose,
            &format!("Publisher {}: setting \"reuse_address\" option.", endpoint),
        );
        if let Err(e) = socket.set_reuseaddr(true) {
            (self.log)(
                LogLevel::Error,
                &format!(
                    "Publisher {}: error setting reuse_address option: {}",
                    endpoint, e
                ),
            );
            return Err(PubwireError::AcceptorSetOption(e));
        }

        (self.log)(
            LogLevel::DebugVerbose,
            &format!("Publisher {}: binding acceptor to the endpoint.", endpoint),
        );
        if let Err(e) = socket.bind(endpoint) {
            (self.log)(
                LogLevel::Error,
                &format!("Publisher {}: error binding acceptor: {}", endpoint, e),
            );
            return Err(PubwireError::AcceptorBind(e));
        }

        (self.log)(
            LogLevel::DebugVerbose,
            &format!("Publisher {}: listening on acceptor.", endpoint),
        );
        let listener = match socket.listen(LISTEN_BACKLOG) {
            Ok(listener) => listener,
            Err(e) => {
                (self.log)(
                    LogLevel::Error,
                    &format!("Publisher {}: error listening on acceptor: {}", endpoint, e),
                );
                return Err(PubwireError::AcceptorListen(e));
            }
        };

        let local = match listener.local_addr() {
            Ok(local) => local,
            Err(e) => {
                (self.log)(
                    LogLevel::Error,
                    &format!(
                        "Publisher {}: error reading the local endpoint: {}",
                        endpoint, e
                    ),
                );
                return Err(PubwireError::AcceptorListen(e));
            }
        };
        let _ = self.local_endpoint.set(local);

        (self.log)(
            LogLevel::Info,
            &format!(
                "Publisher {}: created publisher and waiting for subscribers.",
                local
            ),
        );
        self.is_running.store(true, Ordering::Relaxed);

        let acceptor = handle.spawn(Arc::clone(self).accept_loop(listener));
        *self.acceptor.lock().unwrap() = Some(acceptor);

        Ok(())
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            self.report(LogLevel::Debug, "waiting for new subscriber...");
            match listener.accept().await {
                Ok((stream, peer)) => self.handle_accept(stream, peer),
                Err(e) => {
                    // Cancellation aborts this task outright; an error here
                    // is a real acceptor failure and ends the loop.
                    self.report(
                        LogLevel::Error,
                        &format!("error while waiting for subscriber: {}", e),
                    );
                    return;
                }
            }
        }
    }

    fn handle_accept(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        self.report(
            LogLevel::Info,
            &format!("subscriber {} has connected.", peer),
        );

        if let Err(e) = stream.set_nodelay(true) {
            self.report(
                LogLevel::Warning,
                &format!("failed to set nodelay for {}: {}", peer, e),
            );
        }

        let weak = Arc::downgrade(self);
        let on_closed: SessionClosedHandler = Box::new(move |session| {
            if let Some(core) = weak.upgrade() {
                core.remove_session(session);
            }
        });

        let weak = Arc::downgrade(self);
        let on_handshake_complete: TransientPushHandler = Box::new(move |session| {
            if let Some(core) = weak.upgrade() {
                core.push_transient_history(session);
            }
        });

        let session = PublisherSession::new(peer, self.log.clone(), on_closed, on_handshake_complete);

        let count = {
            let mut sessions = self.sessions.lock().unwrap();
            sessions.push(Arc::clone(&session));
            sessions.len()
        };
        self.report(
            LogLevel::Debug,
            &format!("current subscriber count: {}.", count),
        );

        tokio::spawn(session.run(stream));
    }

    /// Close handler bound into every session.
    fn remove_session(&self, session: &Arc<PublisherSession>) {
        let removed = {
            let mut sessions = self.sessions.lock().unwrap();
            match sessions.iter().position(|s| Arc::ptr_eq(s, session)) {
                Some(index) => {
                    sessions.remove(index);
                    Some(sessions.len())
                }
                None => None,
            }
        };
        match removed {
            Some(remaining) => self.report(
                LogLevel::Debug,
                &format!(
                    "removed session to subscriber {}. Current subscriber count: {}.",
                    session.peer(),
                    remaining
                ),
            ),
            None => self.report(
                LogLevel::Error,
                "trying to remove a non-existing publisher session.",
            ),
        }
    }

    /// Transient-local push handler bound into every session. Runs on the
    /// session task after its handshake, before any live frame.
    fn push_transient_history(&self, session: &Arc<PublisherSession>) {
        if !self.setting.is_enabled() {
            return;
        }

        let (snapshot, total_size) = {
            let mut ring = self.transient_local.lock().unwrap();
            purge_expired(&mut ring, &self.setting, Instant::now());
            let snapshot: Vec<_> = ring.iter().map(|e| Arc::clone(&e.buffer)).collect();
            let total_size = snapshot.iter().map(|b| b.len()).sum::<usize>();
            (snapshot, total_size)
        };
        if snapshot.is_empty() {
            return;
        }

        // A session drops whatever sits behind an in-flight write, so the
        // history must leave as one buffer rather than one push per frame.
        let mut replay = self.pool.allocate();
        replay.reserve(total_size);
        for buffer in &snapshot {
            replay.extend_from_slice(buffer.as_slice());
        }

        self.report(
            LogLevel::Debug,
            &format!(
                "replaying {} transient-local frames ({} bytes) to subscriber {}.",
                snapshot.len(),
                total_size,
                session.peer()
            ),
        );
        session.push_transient_buffer(Arc::new(replay));
    }

    fn send(&self, payloads: &[&[u8]]) -> bool {
        match self.try_send(payloads) {
            Ok(()) => true,
            Err(e) => {
                self.report(LogLevel::Error, &format!("send failed: {}.", e));
                false
            }
        }
    }

    fn try_send(&self, payloads: &[&[u8]]) -> Result<()> {
        if !self.is_running.load(Ordering::Relaxed) {
            return Err(PubwireError::NotRunning);
        }

        // Without transient-local there is nothing to retain, so an empty
        // session set means nothing to do at all.
        if !self.setting.is_enabled() {
            let sessions = self.sessions.lock().unwrap();
            if sessions.is_empty() {
                return Ok(());
            }
        }

        let payload_size: u64 = payloads.iter().map(|p| p.len() as u64).sum();
        let complete_size = HEADER_SIZE + payload_size as usize;

        let mut buffer = self.pool.allocate();
        if buffer.capacity() < complete_size {
            // Headroom for the next, slightly larger message.
            buffer.reserve(complete_size + complete_size / 10);
        }
        let header = TcpHeader::for_payload(message_type::REGULAR_PAYLOAD, payload_size);
        header.encode_into(&mut *buffer);
        for payload in payloads {
            if !payload.is_empty() {
                buffer.extend_from_slice(payload);
            }
        }
        let buffer = Arc::new(buffer);

        // Every session transmits the same buffer.
        {
            let sessions = self.sessions.lock().unwrap();
            for session in sessions.iter() {
                session.send_data_buffer(Arc::clone(&buffer));
            }
        }

        if self.setting.is_enabled() {
            let now = Instant::now();
            let mut ring = self.transient_local.lock().unwrap();
            ring.push_back(TransientLocalElement {
                buffer,
                enqueued_at: now,
            });
            purge_expired(&mut ring, &self.setting, now);
        }

        Ok(())
    }

    fn cancel(&self) {
        self.report(LogLevel::Debug, "shutting down.");

        if let Some(acceptor) = self.acceptor.lock().unwrap().take() {
            acceptor.abort();
        }
        self.is_running.store(false, Ordering::Relaxed);

        // Copy the set out so session close handlers can take the sessions
        // mutex themselves.
        let sessions: Vec<_> = self.sessions.lock().unwrap().clone();
        for session in sessions {
            session.cancel();
        }
    }

    fn endpoint_label(&self) -> String {
        match self.local_endpoint.get() {
            Some(endpoint) => endpoint.to_string(),
            None => "?".to_string(),
        }
    }

    fn report(&self, level: LogLevel, message: &str) {
        (self.log)(
            level,
            &format!("Publisher {}: {}", self.endpoint_label(), message),
        );
    }
}

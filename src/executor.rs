//! Executor: the shared I/O reactor and the worker threads that drive it.
//!
//! One [`Executor`] wraps one tokio multi-thread runtime. The runtime's
//! driver is the reactor; `start(n)` spawns exactly `n` worker threads that
//! pump it until `stop()`. Publishers bind their acceptors and spawn their
//! session tasks through [`Executor::handle`], and hold the executor through
//! an `Arc` so the reactor outlives every callback scheduled onto it.
//!
//! The runtime held inside the executor doubles as the keep-alive sentinel:
//! workers keep running while no work is queued, until `stop()` drops the
//! runtime into a background shutdown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::runtime::{Builder, Handle, Runtime};

use crate::logger::{LogFunction, LogLevel};

enum ExecutorState {
    Idle,
    Running(Runtime),
    Stopped,
}

/// Owns the reactor and its worker thread pool.
pub struct Executor {
    log: LogFunction,
    state: Mutex<ExecutorState>,
}

impl Executor {
    /// Create an executor that reports through the given log sink.
    /// No threads run until [`start`](Self::start).
    pub fn new(log: LogFunction) -> Self {
        (log)(LogLevel::Debug, "Executor: creating executor.");
        Self {
            log,
            state: Mutex::new(ExecutorState::Idle),
        }
    }

    /// Spawn `thread_count` worker threads (at least one) and start pumping
    /// the reactor.
    ///
    /// Each worker names itself `pubwire-io-{i}` for OS-level debuggability.
    /// Calling `start` on an executor that is already running or was stopped
    /// logs a warning and does nothing; lifecycle discipline is the caller's.
    pub fn start(&self, thread_count: usize) {
        let mut state = self.state.lock().unwrap();
        if !matches!(*state, ExecutorState::Idle) {
            (self.log)(
                LogLevel::Warning,
                "Executor: start() called on an executor that was already started.",
            );
            return;
        }

        let thread_count = thread_count.max(1);
        let worker_index = Arc::new(AtomicUsize::new(0));
        let runtime = Builder::new_multi_thread()
            .worker_threads(thread_count)
            .thread_name_fn(move || {
                let i = worker_index.fetch_add(1, Ordering::Relaxed);
                format!("pubwire-io-{}", i)
            })
            .enable_all()
            .build();

        match runtime {
            Ok(runtime) => {
                (self.log)(
                    LogLevel::Debug,
                    &format!("Executor: started with {} threads.", thread_count),
                );
                *state = ExecutorState::Running(runtime);
            }
            Err(e) => {
                (self.log)(
                    LogLevel::Fatal,
                    &format!("Executor: failed to start the reactor: {}", e),
                );
            }
        }
    }

    /// Stop the reactor. Never blocks: worker threads wind down in the
    /// background, and outstanding handlers observe cancellation through
    /// their normal error paths. Idempotent.
    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        if let ExecutorState::Running(runtime) = std::mem::replace(&mut *state, ExecutorState::Stopped)
        {
            (self.log)(LogLevel::Debug, "Executor: stopping.");
            runtime.shutdown_background();
        }
    }

    /// Handle to the reactor, for binding acceptors and spawning tasks.
    /// `None` before `start` and after `stop`.
    pub fn handle(&self) -> Option<Handle> {
        match &*self.state.lock().unwrap() {
            ExecutorState::Running(runtime) => Some(runtime.handle().clone()),
            _ => None,
        }
    }

    /// Whether the reactor is currently running.
    pub fn is_running(&self) -> bool {
        matches!(*self.state.lock().unwrap(), ExecutorState::Running(_))
    }

    /// The log sink components created on this executor inherit.
    pub fn log(&self) -> &LogFunction {
        &self.log
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(crate::logger::tracing_sink())
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        // Keeps drop non-blocking even with sessions still winding down.
        self.stop();
    }
}

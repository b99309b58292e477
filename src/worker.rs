//! Dedicated worker threads with a shared start/stop/wake lifecycle.
//!
//! A [`WorkerThread`] owns one OS thread and runs caller-supplied logic in
//! one of two strategies:
//!
//! - **Continuous**: the body is a single long-lived loop. It receives a
//!   [`StopToken`] to poll between iterations, and the owner may register an
//!   interrupt hook that knocks the body out of a blocking call on stop.
//! - **On-demand**: the thread sleeps on a condition variable until
//!   [`WorkerThread::wake`] is called, runs the body to completion, then
//!   sleeps again. Wakes that arrive while the body is running collapse into
//!   a single extra run.
//!
//! ```text
//!            wake()                 wake() x N while running
//!   idle ──────────────► running ───────────────────────────┐
//!    ▲                      │                               │
//!    └──── body returns ────┘◄──── one extra run ───────────┘
//! ```
//!
//! Dropping a worker stops and joins it.

// Rust guideline compliant 2025-01

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{bail, Context, Result};

/// Which execution strategy a worker uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerMode {
    /// One blocking loop for the worker's whole lifetime.
    Continuous,
    /// Idle until woken, run once, idle again.
    OnDemand,
}

type ContinuousBody = Box<dyn FnOnce(StopToken) + Send>;
type OnDemandBody = Box<dyn FnMut() + Send>;
type InterruptHook = Box<dyn Fn() + Send + Sync>;

enum Strategy {
    Continuous(ContinuousBody),
    OnDemand(OnDemandBody),
}

impl Strategy {
    fn mode(&self) -> WorkerMode {
        match self {
            Self::Continuous(_) => WorkerMode::Continuous,
            Self::OnDemand(_) => WorkerMode::OnDemand,
        }
    }

    fn run(self, signal: Arc<Signal>) {
        match self {
            Self::Continuous(body) => body(StopToken { signal }),
            Self::OnDemand(mut body) => loop {
                let (run, stopping) = signal.wait_for_wake();
                // A wake raised before stop() is still honoured.
                if run {
                    body();
                }
                if stopping {
                    break;
                }
            },
        }
    }
}

/// Wake and stop state shared between a worker and its owner.
#[derive(Debug, Default)]
struct Signal {
    stopping: AtomicBool,
    pending: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    fn raise(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        *pending = true;
        self.cond.notify_one();
    }

    fn request_stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        let _guard = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        self.cond.notify_all();
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Block until woken or stopped; returns `(run_body, stopping)`.
    fn wait_for_wake(&self) -> (bool, bool) {
        let guard = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let mut pending = self
            .cond
            .wait_while(guard, |pending| !*pending && !self.is_stopping())
            .unwrap_or_else(PoisonError::into_inner);
        let run = std::mem::take(&mut *pending);
        (run, self.is_stopping())
    }

    /// Sleep for `timeout` unless stop is requested first; returns `true` if stopped.
    fn sleep_unless_stopped(&self, timeout: Duration) -> bool {
        let guard = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let _guard = self
            .cond
            .wait_timeout_while(guard, timeout, |_| !self.is_stopping())
            .unwrap_or_else(PoisonError::into_inner);
        self.is_stopping()
    }
}

/// Cooperative stop flag handed to continuous bodies.
#[derive(Debug, Clone)]
pub struct StopToken {
    signal: Arc<Signal>,
}

impl StopToken {
    /// Whether the owner has asked the worker to stop.
    pub fn is_stopped(&self) -> bool {
        self.signal.is_stopping()
    }

    /// Sleep for `timeout`, returning early (with `true`) once stop is requested.
    pub fn sleep(&self, timeout: Duration) -> bool {
        self.signal.sleep_unless_stopped(timeout)
    }
}

/// Cloneable handle that wakes an on-demand worker from any thread.
#[derive(Debug, Clone)]
pub struct Waker {
    signal: Arc<Signal>,
}

impl Waker {
    /// Release the worker to run its body once.
    pub fn wake(&self) {
        self.signal.raise();
    }
}

/// A named OS thread running one [`WorkerMode`] strategy.
pub struct WorkerThread {
    name: String,
    mode: WorkerMode,
    signal: Arc<Signal>,
    /// Taken by `start()`; behind a mutex so the worker is `Sync`.
    strategy: Mutex<Option<Strategy>>,
    interrupt: Option<InterruptHook>,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for WorkerThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerThread")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl WorkerThread {
    /// Worker that runs `body` once, as a loop, until it observes the stop token.
    pub fn continuous(name: impl Into<String>, body: impl FnOnce(StopToken) + Send + 'static) -> Self {
        Self::with_strategy(name.into(), Strategy::Continuous(Box::new(body)))
    }

    /// Worker that runs `body` once per (coalesced) wake.
    pub fn on_demand(name: impl Into<String>, body: impl FnMut() + Send + 'static) -> Self {
        Self::with_strategy(name.into(), Strategy::OnDemand(Box::new(body)))
    }

    fn with_strategy(name: String, strategy: Strategy) -> Self {
        Self {
            name,
            mode: strategy.mode(),
            signal: Arc::new(Signal::default()),
            strategy: Mutex::new(Some(strategy)),
            interrupt: None,
            handle: None,
        }
    }

    /// Register a hook that [`stop`](Self::stop) calls after raising the stop flag.
    ///
    /// Continuous bodies blocked in I/O use this to get unblocked.
    pub fn with_interrupt(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.interrupt = Some(Box::new(hook));
        self
    }

    /// Spawn the thread.
    ///
    /// # Errors
    ///
    /// Fails if the worker was already started or the OS refuses the thread.
    pub fn start(&mut self) -> Result<()> {
        let Some(strategy) = self
            .strategy
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            bail!("worker '{}' already started", self.name);
        };
        let signal = Arc::clone(&self.signal);
        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || strategy.run(signal))
            .with_context(|| format!("spawn worker thread '{}'", self.name))?;
        self.handle = Some(handle);
        log::debug!("[worker] {} started ({:?})", self.name, self.mode);
        Ok(())
    }

    /// Wake an on-demand worker. No-op for continuous workers.
    pub fn wake(&self) {
        match self.mode {
            WorkerMode::OnDemand => self.signal.raise(),
            WorkerMode::Continuous => {
                log::debug!("[worker] ignoring wake on continuous worker {}", self.name);
            }
        }
    }

    /// Handle that wakes this worker without borrowing it.
    pub fn waker(&self) -> Waker {
        Waker {
            signal: Arc::clone(&self.signal),
        }
    }

    /// Request termination and block until the thread has exited.
    ///
    /// Idempotent; a worker that was never started just returns.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.signal.request_stop();
        if let Some(interrupt) = &self.interrupt {
            interrupt();
        }
        if handle.join().is_err() {
            log::error!("[worker] {} body panicked", self.name);
        } else {
            log::debug!("[worker] {} stopped", self.name);
        }
    }

    /// Whether the thread has been started and not yet stopped.
    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Execution strategy of this worker.
    pub fn mode(&self) -> WorkerMode {
        self.mode
    }

    /// Thread name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for WorkerThread {
    fn drop(&mut self) {
        self.stop();
    }
}

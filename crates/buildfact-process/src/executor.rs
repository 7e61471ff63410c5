// crates/buildfact-process/src/executor.rs
// ============================================================================
// Module: Process Loop
// Description: Bounded-concurrency child-process executor.
// Purpose: Spawn, track, and reap children on behalf of suspended rules.
// Dependencies: buildfact-core, libc (unix), serde, thiserror
// ============================================================================

//! ## Overview
//! The process loop owns the set of outstanding child processes. Below the
//! concurrency limit, `exec` spawns immediately on the calling thread;
//! above it, entries queue FIFO and spawn as exits free slots. Each spawned
//! child is awaited by a dedicated waiter thread that sends its exit into
//! the loop channel; the loop thread removes the entry, invokes its exit
//! callback, and refills from the queue. The loop machine has three
//! observable states (`NotRunning`, `Polling`, `Busy`) plus a requested
//! stop flag, guarded by the loop mutex and broadcast on a condvar so
//! shutdown can wait for quiescence. A stop cancels queued entries but
//! already spawned children still deliver their exits before the loop
//! parks.
//! Invariants:
//! - A running entry leaves the table only after its child was reaped and
//!   its callback invoked.
//! - Queue order is FIFO; with `concurrent_limit = 1` the exit of child k
//!   precedes the spawn of child k+1.
//! - Exactly one of `on_exit` / `on_error` fires per accepted entry.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::process::Child;
use std::process::Command;
use std::process::ExitStatus;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use buildfact_core::BuildTelemetry;
use buildfact_core::ErrorCallback;
use buildfact_core::ExitCallback;
use buildfact_core::ExitOutcome;
use buildfact_core::NoopTelemetry;
use buildfact_core::ProcessError;
use buildfact_core::ProcessRunner;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default bound on concurrently running children.
const DEFAULT_CONCURRENT_LIMIT: usize = 8;

/// Upper bound on waiting for a started loop thread to report in.
const LOOP_START_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// SECTION: Config
// ============================================================================

/// Configuration for the process loop.
///
/// # Invariants
/// - `concurrent_limit` must be greater than zero.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ProcessLoopConfig {
    /// Maximum number of concurrently running children.
    #[serde(default = "default_concurrent_limit")]
    pub concurrent_limit: usize,
}

impl Default for ProcessLoopConfig {
    fn default() -> Self {
        Self {
            concurrent_limit: default_concurrent_limit(),
        }
    }
}

/// Returns the default concurrency limit.
const fn default_concurrent_limit() -> usize {
    DEFAULT_CONCURRENT_LIMIT
}

/// Validates the process loop configuration.
fn validate_config(config: &ProcessLoopConfig) -> Result<(), ProcessLoopError> {
    if config.concurrent_limit == 0 {
        return Err(ProcessLoopError::Invalid(
            "concurrent_limit must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Process loop lifecycle errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum ProcessLoopError {
    /// Invalid configuration.
    #[error("process loop config invalid: {0}")]
    Invalid(String),
    /// The loop is already running on another thread.
    #[error("process loop already running")]
    AlreadyRunning,
    /// The loop thread could not be started.
    #[error("process loop thread error: {0}")]
    Thread(String),
}

// ============================================================================
// SECTION: Loop Machine
// ============================================================================

/// Observable state of the loop machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopPhase {
    /// No thread is inside the loop.
    NotRunning,
    /// The loop is blocked on its event channel.
    Polling,
    /// The loop is delivering a callback or refilling.
    Busy,
}

/// Requested state of the loop machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopRequest {
    /// Keep consuming events.
    Continue,
    /// Exit at the next quiescence point.
    Stop,
}

/// Event consumed by the loop thread.
enum LoopEvent {
    /// A child was reaped by its waiter thread.
    Exited {
        /// Process-table token of the child.
        token: u64,
        /// Raw exit status.
        status: ExitStatus,
    },
    /// Waiting on a child failed after a successful spawn.
    WaitFailed {
        /// Process-table token of the child.
        token: u64,
        /// Failure description.
        message: String,
    },
    /// Wake the loop so it observes a request change.
    Wake,
}

/// Entry awaiting a free slot. Owns a copied argv.
struct QueuedEntry {
    /// Command line, program first.
    argv: Vec<String>,
    /// Exit delivery.
    on_exit: ExitCallback,
    /// Error delivery.
    on_error: ErrorCallback,
}

/// Entry for a spawned child.
struct RunningEntry {
    /// Child pid for force-kill, when representable.
    pid: Option<i32>,
    /// Exit delivery.
    on_exit: ExitCallback,
    /// Error delivery for wait failures.
    on_error: ErrorCallback,
}

/// Interior loop state.
struct LoopState {
    /// Observable loop phase.
    phase: LoopPhase,
    /// Requested loop state.
    request: LoopRequest,
    /// Count of loop entries, to observe startup across races.
    runs_started: u64,
    /// Next process-table token.
    next_token: u64,
    /// Spawned children by token.
    running: BTreeMap<u64, RunningEntry>,
    /// FIFO of entries awaiting a slot.
    queued: VecDeque<QueuedEntry>,
}

/// What `exec`/refill must do once the lock is released.
enum SpawnAction {
    /// Start the waiter for a spawned child.
    Launch(Waiter),
    /// Report a spawn failure.
    Report(ErrorCallback, ProcessError),
}

/// Owns a spawned child until its waiter thread takes over.
struct Waiter {
    /// Process-table token of the child.
    token: u64,
    /// The spawned child.
    child: Child,
    /// Channel back into the loop.
    events: mpsc::Sender<LoopEvent>,
}

impl Waiter {
    /// Starts the waiter thread: wait for the child, send its exit.
    fn launch(self) {
        let Self {
            token,
            mut child,
            events,
        } = self;
        let fallback = events.clone();
        let spawned = thread::Builder::new().name("buildfact-child-wait".to_string()).spawn(
            move || {
                let event = match child.wait() {
                    Ok(status) => LoopEvent::Exited {
                        token,
                        status,
                    },
                    Err(err) => LoopEvent::WaitFailed {
                        token,
                        message: err.to_string(),
                    },
                };
                let _ = events.send(event);
            },
        );
        if let Err(err) = spawned {
            let _ = fallback.send(LoopEvent::WaitFailed {
                token,
                message: format!("waiter thread failed to start: {err}"),
            });
        }
    }
}

// ============================================================================
// SECTION: Process Loop
// ============================================================================

/// Bounded-concurrency child-process executor.
pub struct ProcessLoop {
    /// Concurrency bound from the configuration.
    limit: usize,
    /// Loop state behind the loop mutex.
    state: Mutex<LoopState>,
    /// Broadcasts phase and table changes.
    condvar: Condvar,
    /// Producer half of the event channel.
    events_tx: mpsc::Sender<LoopEvent>,
    /// Consumer half of the event channel; held by the running loop.
    events_rx: Mutex<mpsc::Receiver<LoopEvent>>,
    /// Telemetry sink.
    telemetry: Arc<dyn BuildTelemetry>,
}

impl ProcessLoop {
    /// Creates a loop with no telemetry.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessLoopError::Invalid`] for a bad configuration.
    pub fn new(config: &ProcessLoopConfig) -> Result<Self, ProcessLoopError> {
        Self::with_telemetry(config, Arc::new(NoopTelemetry))
    }

    /// Creates a loop reporting through `telemetry`.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessLoopError::Invalid`] for a bad configuration.
    pub fn with_telemetry(
        config: &ProcessLoopConfig,
        telemetry: Arc<dyn BuildTelemetry>,
    ) -> Result<Self, ProcessLoopError> {
        validate_config(config)?;
        let (events_tx, events_rx) = mpsc::channel();
        Ok(Self {
            limit: config.concurrent_limit,
            state: Mutex::new(LoopState {
                phase: LoopPhase::NotRunning,
                request: LoopRequest::Continue,
                runs_started: 0,
                next_token: 1,
                running: BTreeMap::new(),
                queued: VecDeque::new(),
            }),
            condvar: Condvar::new(),
            events_tx,
            events_rx: Mutex::new(events_rx),
            telemetry,
        })
    }

    /// Submits `argv` for execution. Below the limit the child spawns
    /// immediately on this thread; otherwise the entry queues FIFO. Spawn
    /// failures are reported through `on_error` before returning.
    ///
    /// # Errors
    ///
    /// Infallible today; the signature leaves room for submission-level
    /// refusals behind the [`ProcessRunner`] contract.
    pub fn exec(
        &self,
        argv: Vec<String>,
        on_exit: ExitCallback,
        on_error: ErrorCallback,
    ) -> Result<(), ProcessError> {
        if argv.is_empty() {
            on_error(ProcessError::Spawn("argv is empty".to_string()));
            return Ok(());
        }
        let entry = QueuedEntry {
            argv,
            on_exit,
            on_error,
        };
        let action = {
            let mut state = self.lock();
            if state.request == LoopRequest::Stop {
                SpawnAction::Report(entry.on_error, ProcessError::Cancelled)
            } else if state.running.len() < self.limit {
                match self.spawn_locked(&mut state, entry) {
                    Ok(waiter) => SpawnAction::Launch(waiter),
                    Err((on_error, error)) => SpawnAction::Report(on_error, error),
                }
            } else {
                state.queued.push_back(entry);
                return Ok(());
            }
        };
        self.apply(action);
        Ok(())
    }

    /// Enters the event loop on the calling thread, consuming exit events
    /// until a stop request is observed and every spawned child's exit has
    /// been delivered.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessLoopError::AlreadyRunning`] when another thread is
    /// inside the loop.
    pub fn run_sync(&self) -> Result<(), ProcessLoopError> {
        let receiver = self.events_rx.try_lock().map_err(|_| ProcessLoopError::AlreadyRunning)?;
        self.enter_loop();
        loop {
            if self.stop_requested() {
                self.cancel_queued();
                // Quiescence: already spawned children still deliver their
                // exits before the loop parks.
                while !self.lock().running.is_empty() {
                    let Ok(event) = receiver.recv() else {
                        break;
                    };
                    self.set_phase(LoopPhase::Busy);
                    self.handle_event(event);
                    self.set_phase(LoopPhase::Polling);
                }
                break;
            }
            let Ok(event) = receiver.recv() else {
                break;
            };
            self.set_phase(LoopPhase::Busy);
            self.handle_event(event);
            self.set_phase(LoopPhase::Polling);
        }
        drop(receiver);
        self.set_phase(LoopPhase::NotRunning);
        Ok(())
    }

    /// Starts the event loop on an internal thread and returns once the
    /// thread has entered it.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessLoopError::AlreadyRunning`] when the loop is active
    /// and [`ProcessLoopError::Thread`] when the thread cannot start.
    pub fn run_async(self: &Arc<Self>) -> Result<(), ProcessLoopError> {
        let started_before = {
            let state = self.lock();
            if state.phase != LoopPhase::NotRunning {
                return Err(ProcessLoopError::AlreadyRunning);
            }
            state.runs_started
        };
        let loop_ref = Arc::clone(self);
        // The loop thread detaches; quiescence is observed via the condvar.
        let _ = thread::Builder::new()
            .name("buildfact-process-loop".to_string())
            .spawn(move || {
                let _ = loop_ref.run_sync();
            })
            .map_err(|err| ProcessLoopError::Thread(err.to_string()))?;
        let state = self.lock();
        let (_state, timeout) = self
            .condvar
            .wait_timeout_while(state, LOOP_START_TIMEOUT, |state| {
                state.runs_started == started_before
            })
            .unwrap_or_else(PoisonError::into_inner);
        if timeout.timed_out() {
            return Err(ProcessLoopError::Thread("process loop failed to start".to_string()));
        }
        Ok(())
    }

    /// Requests loop termination at the next quiescence point. Already
    /// spawned children keep running and their exits are still delivered
    /// before the loop parks; queued entries are cancelled through their
    /// error callbacks.
    pub fn stop(&self) {
        {
            let mut state = self.lock();
            state.request = LoopRequest::Stop;
        }
        let _ = self.events_tx.send(LoopEvent::Wake);
        self.condvar.notify_all();
    }

    /// Stops the loop and waits for it to park. Exits of already spawned
    /// children are always delivered before returning; with a grace period
    /// the children receive SIGTERM, then SIGKILL once the period elapses,
    /// instead of being waited out.
    pub fn shutdown(&self, force_kill: Option<Duration>) {
        self.stop();
        if let Some(grace) = force_kill {
            self.signal_running(TERM_SIGNAL);
            if !self.await_drained(Instant::now() + grace) {
                self.signal_running(KILL_SIGNAL);
            }
        }
        self.await_not_running();
        // Covers the case where no thread ever entered the loop.
        self.cancel_queued();
        self.pump_exits();
    }

    /// Returns the number of children currently in the process table.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.lock().running.len()
    }

    /// Returns the number of entries awaiting a slot.
    #[must_use]
    pub fn queued_count(&self) -> usize {
        self.lock().queued.len()
    }

    /// Locks the loop state, recovering from poisoning.
    fn lock(&self) -> std::sync::MutexGuard<'_, LoopState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns true once a stop was requested.
    fn stop_requested(&self) -> bool {
        self.lock().request == LoopRequest::Stop
    }

    /// Publishes `phase` and notifies observers.
    fn set_phase(&self, phase: LoopPhase) {
        {
            let mut state = self.lock();
            state.phase = phase;
        }
        self.condvar.notify_all();
    }

    /// Marks the loop entered: phase polling, run counter bumped.
    fn enter_loop(&self) {
        {
            let mut state = self.lock();
            state.phase = LoopPhase::Polling;
            state.runs_started += 1;
        }
        self.condvar.notify_all();
    }

    /// Blocks until no thread is inside the loop.
    fn await_not_running(&self) {
        let state = self.lock();
        let _state = self
            .condvar
            .wait_while(state, |state| state.phase != LoopPhase::NotRunning)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Spawns `entry` while holding the loop lock, keeping the concurrency
    /// check and the table insert atomic. The returned waiter must be
    /// launched after the lock is released.
    fn spawn_locked(
        &self,
        state: &mut LoopState,
        entry: QueuedEntry,
    ) -> Result<Waiter, (ErrorCallback, ProcessError)> {
        let mut command = Command::new(&entry.argv[0]);
        command.args(&entry.argv[1 ..]);
        match command.spawn() {
            Ok(child) => {
                let token = state.next_token;
                state.next_token += 1;
                let pid = i32::try_from(child.id()).ok();
                state.running.insert(token, RunningEntry {
                    pid,
                    on_exit: entry.on_exit,
                    on_error: entry.on_error,
                });
                Ok(Waiter {
                    token,
                    child,
                    events: self.events_tx.clone(),
                })
            }
            Err(err) => Err((entry.on_error, ProcessError::Spawn(err.to_string()))),
        }
    }

    /// Applies a spawn action outside the lock.
    fn apply(&self, action: SpawnAction) {
        match action {
            SpawnAction::Launch(waiter) => {
                waiter.launch();
                self.telemetry.process_spawned();
            }
            SpawnAction::Report(on_error, error) => on_error(error),
        }
    }

    /// Consumes one loop event: reap, deliver, refill.
    fn handle_event(&self, event: LoopEvent) {
        match event {
            LoopEvent::Exited {
                token,
                status,
            } => {
                let entry = self.lock().running.remove(&token);
                self.condvar.notify_all();
                if let Some(entry) = entry {
                    let outcome = outcome_of(status);
                    self.telemetry.process_exited(outcome);
                    (entry.on_exit)(outcome);
                }
                self.refill();
            }
            LoopEvent::WaitFailed {
                token,
                message,
            } => {
                let entry = self.lock().running.remove(&token);
                self.condvar.notify_all();
                if let Some(entry) = entry {
                    (entry.on_error)(ProcessError::Wait(message));
                }
                self.refill();
            }
            LoopEvent::Wake => {}
        }
    }

    /// Spawns queued entries until the cap saturates or the queue drains.
    fn refill(&self) {
        loop {
            let action = {
                let mut state = self.lock();
                if state.request == LoopRequest::Stop {
                    return;
                }
                if state.running.len() >= self.limit {
                    return;
                }
                let Some(entry) = state.queued.pop_front() else {
                    return;
                };
                match self.spawn_locked(&mut state, entry) {
                    Ok(waiter) => SpawnAction::Launch(waiter),
                    Err((on_error, error)) => SpawnAction::Report(on_error, error),
                }
            };
            self.apply(action);
        }
    }

    /// Cancels every queued entry through its error callback.
    fn cancel_queued(&self) {
        let entries: Vec<QueuedEntry> = {
            let mut state = self.lock();
            state.queued.drain(..).collect()
        };
        for entry in entries {
            (entry.on_error)(ProcessError::Cancelled);
        }
    }

    /// Waits until the process table empties or `deadline` passes. Exits
    /// are consumed by the loop thread while it runs and pumped from the
    /// channel directly otherwise. Returns true once the table is empty.
    fn await_drained(&self, deadline: Instant) -> bool {
        if let Ok(receiver) = self.events_rx.try_lock() {
            loop {
                if self.lock().running.is_empty() {
                    return true;
                }
                let now = Instant::now();
                if now >= deadline {
                    return false;
                }
                match receiver.recv_timeout(deadline - now) {
                    Ok(event) => self.handle_event(event),
                    Err(_) => return self.lock().running.is_empty(),
                }
            }
        }
        let state = self.lock();
        let remaining = deadline.saturating_duration_since(Instant::now());
        let (state, _timeout) = self
            .condvar
            .wait_timeout_while(state, remaining, |state| !state.running.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        state.running.is_empty()
    }

    /// Delivers stranded exits directly once no thread is inside the loop,
    /// covering children spawned while the loop was never run. Every
    /// running entry's waiter sends exactly one event, so this terminates
    /// once the children have died.
    fn pump_exits(&self) {
        let Ok(receiver) = self.events_rx.try_lock() else {
            return;
        };
        while !self.lock().running.is_empty() {
            let Ok(event) = receiver.recv() else {
                break;
            };
            self.handle_event(event);
        }
    }

    /// Sends `signal` to every child in the process table.
    #[cfg(unix)]
    fn signal_running(&self, signal: libc::c_int) {
        let pids: Vec<i32> = self.lock().running.values().filter_map(|entry| entry.pid).collect();
        for pid in pids {
            send_signal(pid, signal);
        }
    }

    /// Signal delivery is unavailable off Unix; force-kill degrades to
    /// waiting out the drain timeout.
    #[cfg(not(unix))]
    fn signal_running(&self, _signal: i32) {}
}

impl Drop for ProcessLoop {
    fn drop(&mut self) {
        // Children already spawned are left alone; see shutdown for the
        // force-kill path.
        self.stop();
    }
}

impl ProcessRunner for ProcessLoop {
    fn submit(
        &self,
        argv: Vec<String>,
        on_exit: ExitCallback,
        on_error: ErrorCallback,
    ) -> Result<(), ProcessError> {
        self.exec(argv, on_exit, on_error)
    }
}

// ============================================================================
// SECTION: Platform Helpers
// ============================================================================

/// Graceful termination signal.
#[cfg(unix)]
const TERM_SIGNAL: libc::c_int = libc::SIGTERM;
/// Forced termination signal.
#[cfg(unix)]
const KILL_SIGNAL: libc::c_int = libc::SIGKILL;

/// Graceful termination placeholder off Unix.
#[cfg(not(unix))]
const TERM_SIGNAL: i32 = 15;
/// Forced termination placeholder off Unix.
#[cfg(not(unix))]
const KILL_SIGNAL: i32 = 9;

/// Sends `signal` to `pid`, ignoring failures for already-reaped children.
#[cfg(unix)]
#[allow(unsafe_code, reason = "libc::kill has no safe std equivalent")]
fn send_signal(pid: i32, signal: libc::c_int) {
    // SAFETY: kill is async-signal-safe; a stale pid yields ESRCH, which is
    // intentionally ignored.
    let _ = unsafe { libc::kill(pid, signal) };
}

/// Translates a raw exit status, preserving the exit-versus-signal
/// distinction where the platform exposes it.
fn outcome_of(status: ExitStatus) -> ExitOutcome {
    if let Some(code) = status.code() {
        return ExitOutcome::Exited(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExitOutcome::Signaled(signal);
        }
    }
    ExitOutcome::Exited(-1)
}

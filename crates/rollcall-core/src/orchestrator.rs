//! Scheduled attendance on a single background worker thread.
//!
//! Lifecycle: `Idle -> Running` on [`AutoOrchestrator::start`],
//! `Running -> Stopping` on [`AutoOrchestrator::stop`] (signal only), and
//! the worker moves itself back to `Idle` once it observes the signal.
//! At most one worker is alive at a time. Cancellation is polled between
//! waits of at most one tick; an in-flight check is never interrupted.

use crate::attendance::Verdict;
use crate::check::{AttendanceChecker, CheckRequest};
use crate::schedule::SlotResolver;
use crate::settings::Settings;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_TICK: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Already running")]
    AlreadyRunning,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OrchestratorState {
    Idle,
    Running,
    Stopping,
}

/// Worker cadence.
#[derive(Debug, Clone)]
pub struct AutoTiming {
    /// Detection budget for each scheduled check.
    pub detection_time: Duration,
    pub threshold: f32,
    /// Wait after a check.
    pub cooldown: Duration,
    /// Wait when no slot is active.
    pub idle: Duration,
    /// Granularity of cancellable waits.
    pub tick: Duration,
}

impl AutoTiming {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            detection_time: settings.auto_detection_time(),
            threshold: settings.threshold,
            cooldown: Duration::from_secs(settings.auto_cooldown_secs),
            idle: Duration::from_secs(settings.auto_idle_secs),
            tick: DEFAULT_TICK,
        }
    }
}

impl Default for AutoTiming {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Point-in-time view of the orchestrator.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub state: OrchestratorState,
    pub checks_run: u64,
    pub last_verdict: Option<Verdict>,
    pub last_target: Option<String>,
    pub last_check_at: Option<DateTime<Local>>,
}

#[derive(Debug)]
struct StatusInner {
    state: OrchestratorState,
    checks_run: u64,
    last_verdict: Option<Verdict>,
    last_target: Option<String>,
    last_check_at: Option<DateTime<Local>>,
}

struct Shared {
    cancel: AtomicBool,
    status: Mutex<StatusInner>,
}

impl Shared {
    fn status(&self) -> MutexGuard<'_, StatusInner> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: OrchestratorState) {
        let mut status = self.status();
        tracing::debug!(from = ?status.state, to = ?state, "orchestrator state change");
        status.state = state;
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

/// Marks the orchestrator `Idle` when the worker exits, however it exits.
struct IdleOnExit(Arc<Shared>);

impl Drop for IdleOnExit {
    fn drop(&mut self) {
        self.0.set_state(OrchestratorState::Idle);
    }
}

pub struct AutoOrchestrator {
    checker: Arc<dyn AttendanceChecker>,
    resolver: Arc<dyn SlotResolver>,
    timing: AutoTiming,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AutoOrchestrator {
    pub fn new(
        checker: Arc<dyn AttendanceChecker>,
        resolver: Arc<dyn SlotResolver>,
        timing: AutoTiming,
    ) -> Self {
        Self {
            checker,
            resolver,
            timing,
            shared: Arc::new(Shared {
                cancel: AtomicBool::new(false),
                status: Mutex::new(StatusInner {
                    state: OrchestratorState::Idle,
                    checks_run: 0,
                    last_verdict: None,
                    last_target: None,
                    last_check_at: None,
                }),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the worker. Fails with [`OrchestratorError::AlreadyRunning`]
    /// while a previous worker is still alive, leaving it untouched.
    pub fn start(&self) -> Result<(), OrchestratorError> {
        let mut worker = self.worker();

        if worker.as_ref().is_some_and(|h| !h.is_finished()) {
            tracing::warn!("auto attendance start refused: already running");
            return Err(OrchestratorError::AlreadyRunning);
        }
        if let Some(finished) = worker.take() {
            let _ = finished.join();
        }

        self.shared.cancel.store(false, Ordering::SeqCst);
        self.shared.set_state(OrchestratorState::Running);

        let checker = Arc::clone(&self.checker);
        let resolver = Arc::clone(&self.resolver);
        let timing = self.timing.clone();
        let shared = Arc::clone(&self.shared);

        let spawned = std::thread::Builder::new()
            .name("rollcall-auto".into())
            .spawn(move || run_worker(checker.as_ref(), resolver.as_ref(), &timing, shared));

        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                tracing::info!("auto attendance started");
                Ok(())
            }
            Err(e) => {
                self.shared.set_state(OrchestratorState::Idle);
                Err(OrchestratorError::Spawn(e))
            }
        }
    }

    /// Signal the worker to stop. Returns `false` (a no-op) when idle.
    pub fn stop(&self) -> bool {
        let worker = self.worker();
        if !worker.as_ref().is_some_and(|h| !h.is_finished()) {
            return false;
        }

        self.shared.cancel.store(true, Ordering::SeqCst);
        let mut status = self.shared.status();
        if status.state == OrchestratorState::Running {
            status.state = OrchestratorState::Stopping;
        }
        tracing::info!("auto attendance stopping");
        true
    }

    /// Block until the current worker, if any, has exited.
    pub fn join(&self) {
        let handle = self.worker().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("auto attendance worker panicked");
            }
        }
    }

    pub fn state(&self) -> OrchestratorState {
        self.shared.status().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == OrchestratorState::Running
    }

    pub fn status(&self) -> OrchestratorStatus {
        let status = self.shared.status();
        OrchestratorStatus {
            state: status.state,
            checks_run: status.checks_run,
            last_verdict: status.last_verdict,
            last_target: status.last_target.clone(),
            last_check_at: status.last_check_at,
        }
    }

    fn worker(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for AutoOrchestrator {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}

fn run_worker(
    checker: &dyn AttendanceChecker,
    resolver: &dyn SlotResolver,
    timing: &AutoTiming,
    shared: Arc<Shared>,
) {
    let _idle = IdleOnExit(Arc::clone(&shared));
    tracing::info!("auto attendance worker started");

    while !shared.cancelled() {
        let slot = match catch_unwind(AssertUnwindSafe(|| resolver.active_slot())) {
            Ok(slot) => slot,
            Err(_) => {
                tracing::error!("period resolution panicked; treating as no active slot");
                None
            }
        };

        let wait = match slot {
            Some(slot) => {
                tracing::info!(period = slot.period, faculty = %slot.faculty, "scheduled check");
                let target = slot.faculty.clone();
                let request = CheckRequest::scheduled(slot, timing.detection_time, timing.threshold);

                let verdict = match catch_unwind(AssertUnwindSafe(|| checker.run_check(&request))) {
                    Ok(outcome) => Some(outcome.verdict),
                    Err(_) => {
                        tracing::error!(faculty = %target, "attendance check panicked; continuing");
                        None
                    }
                };

                let mut status = shared.status();
                status.checks_run += 1;
                status.last_verdict = verdict;
                status.last_target = Some(target);
                status.last_check_at = Some(Local::now());
                drop(status);

                timing.cooldown
            }
            None => {
                tracing::debug!("no active period");
                timing.idle
            }
        };

        wait_cancellable(wait, timing.tick, &shared.cancel);
    }

    tracing::info!("auto attendance worker stopped");
}

/// Sleep for `total` in steps of at most `tick`, returning early (with
/// `false`) once `cancel` is set.
fn wait_cancellable(total: Duration, tick: Duration, cancel: &AtomicBool) -> bool {
    let tick = tick.max(Duration::from_millis(1));
    let mut remaining = total;
    while !remaining.is_zero() {
        if cancel.load(Ordering::SeqCst) {
            return false;
        }
        let step = tick.min(remaining);
        std::thread::sleep(step);
        remaining -= step;
    }
    !cancel.load(Ordering::SeqCst)
}

//! Scheduler - fires the analysis cycle on a fixed cadence, never overlapping
//!
//! Fire times are aligned to cycle starts: the next fire is the previous
//! cycle's nominal start plus the interval. A fire time that passes while a
//! cycle is still running is skipped, not queued, so at most one cycle runs
//! at any moment. Cycle failures are logged (and optionally forwarded) and
//! never stop the timer.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

/// The unit of work the scheduler fires
pub type CycleFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Scheduler is still stopping; wait for stop() to finish before starting again")]
    Stopping,
}

/// Lifecycle state of the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Idle,
    Running,
    Stopping,
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerState::Idle => write!(f, "idle"),
            SchedulerState::Running => write!(f, "running"),
            SchedulerState::Stopping => write!(f, "stopping"),
        }
    }
}

/// A cycle that returned an error or panicked
#[derive(Debug, Clone)]
pub struct CycleFailure {
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    pub error: String,
}

#[derive(Debug, Default)]
struct Counters {
    cycles_started: AtomicU64,
    skipped_fires: AtomicU64,
}

struct RunHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Periodic, non-overlapping cycle runner
pub struct Scheduler {
    cycle: CycleFn,
    failures: Option<mpsc::UnboundedSender<CycleFailure>>,
    state: watch::Sender<SchedulerState>,
    handle: Mutex<Option<RunHandle>>,
    counters: Arc<Counters>,
}

impl Scheduler {
    pub fn new<F, Fut>(cycle: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let cycle: CycleFn =
            Arc::new(move || -> BoxFuture<'static, anyhow::Result<()>> { Box::pin(cycle()) });
        let (state, _) = watch::channel(SchedulerState::Idle);

        Self {
            cycle,
            failures: None,
            state,
            handle: Mutex::new(None),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Forward every failed cycle to `tx` in addition to logging it
    pub fn with_failure_channel(mut self, tx: mpsc::UnboundedSender<CycleFailure>) -> Self {
        self.failures = Some(tx);
        self
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == SchedulerState::Running
    }

    pub fn cycles_started(&self) -> u64 {
        self.counters.cycles_started.load(Ordering::SeqCst)
    }

    pub fn skipped_fires(&self) -> u64 {
        self.counters.skipped_fires.load(Ordering::SeqCst)
    }

    /// Start firing every `interval_ms`, beginning immediately.
    ///
    /// Calling this on a scheduler that is already running does nothing.
    /// While a `stop()` is still waiting for its in-flight cycle the call is
    /// rejected with [`SchedulerError::Stopping`].
    pub fn start(&self, interval_ms: u64) -> Result<(), SchedulerError> {
        if interval_ms == 0 {
            return Err(SchedulerError::InvalidConfiguration(
                "interval_ms must be a positive integer".to_string(),
            ));
        }

        let mut handle = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        if handle.is_some() {
            debug!("Scheduler already started, ignoring start request");
            return Ok(());
        }
        if self.state() == SchedulerState::Stopping {
            return Err(SchedulerError::Stopping);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_loop(
            Arc::clone(&self.cycle),
            Duration::from_millis(interval_ms),
            shutdown_rx,
            Arc::clone(&self.counters),
            self.failures.clone(),
        ));

        *handle = Some(RunHandle {
            shutdown: shutdown_tx,
            task,
        });
        self.state.send_replace(SchedulerState::Running);
        info!("Scheduler started with interval {}ms", interval_ms);
        Ok(())
    }

    /// Stop firing. Resolves once an in-flight cycle has finished.
    ///
    /// Safe to call when never started or already stopped.
    pub async fn stop(&self) {
        let handle = {
            let mut guard = self.handle.lock().unwrap_or_else(|e| e.into_inner());
            let handle = guard.take();
            // Flip state under the lock so start() never sees no handle while still running
            if handle.is_some() {
                self.state.send_replace(SchedulerState::Stopping);
            }
            handle
        };

        let Some(RunHandle { shutdown, task }) = handle else {
            // Another caller may be stopping; wait for it to finish
            let mut rx = self.state.subscribe();
            loop {
                if *rx.borrow_and_update() == SchedulerState::Idle {
                    return;
                }
                if rx.changed().await.is_err() {
                    return;
                }
            }
        };

        info!("Scheduler stopping");
        let _ = shutdown.send(true);

        if let Err(e) = task.await {
            error!("Scheduler loop terminated abnormally: {}", e);
        }

        self.state.send_replace(SchedulerState::Idle);
        info!("Scheduler stopped after {} cycles", self.cycles_started());
    }
}

async fn run_loop(
    cycle: CycleFn,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    counters: Arc<Counters>,
    failures: Option<mpsc::UnboundedSender<CycleFailure>>,
) {
    let mut next_fire = Instant::now();

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = sleep_until(next_fire) => {}
        }

        let nominal_start = next_fire;
        let started_at = Utc::now();
        let number = counters.cycles_started.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Cycle {} starting", number);

        // Run in its own task so a panic is contained
        let outcome = tokio::spawn((cycle)()).await;
        let error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("{:#}", e)),
            Err(e) if e.is_panic() => Some(format!("cycle panicked: {}", e)),
            Err(e) => Some(format!("cycle cancelled: {}", e)),
        };

        match error {
            None => debug!("Cycle {} finished in {}ms", number, nominal_start.elapsed().as_millis()),
            Some(error) => {
                error!("Cycle {} failed: {}", number, error);
                if let Some(tx) = &failures {
                    let _ = tx.send(CycleFailure {
                        cycle: number,
                        started_at,
                        error,
                    });
                }
            }
        }

        next_fire = nominal_start + interval;
        let now = Instant::now();
        while next_fire < now {
            counters.skipped_fires.fetch_add(1, Ordering::SeqCst);
            warn!("Cycle {} still running at its next fire time, skipping that fire", number);
            next_fire += interval;
        }
    }
}

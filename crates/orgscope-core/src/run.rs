//! Population run harness with operator controls.
//!
//! A [`Run`] drives a [`PopulationEngine`] on a dedicated thread and
//! publishes what it produces through an [`EventSink`]:
//!
//! - an initial [`MapEvent`] before the first update,
//! - one [`UpdateEvent`] per update,
//! - a [`MapEvent`] every `map_interval` updates.
//!
//! The run ends when `max_updates` is reached, the population dies out, an
//! operator stops it, or the listener stops accepting events. The sink is
//! closed when the thread exits, so the listener always reaches retirement.
//! Stopping also closes the sink right away, which releases a producer
//! blocked on listener backpressure.
//!
//! [`MapEvent`]: orgscope_types::MapEvent

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use orgscope_types::{MapEvent, MapMode, RunEvent, RunId, UpdateEvent};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::RunConfig;
use crate::listener::{EmitOutcome, EventSink};

/// The evolving population a run drives.
pub trait PopulationEngine: Send {
    /// Perform one update and report its statistics.
    fn advance(&mut self) -> UpdateEvent;

    /// Sample the population grid.
    fn map(&self, mode: MapMode) -> MapEvent;
}

/// Reason why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunEndReason {
    /// Reached the configured `max_updates` limit.
    MaxUpdatesReached,
    /// No organisms are left.
    Extinction,
    /// An operator issued a stop command.
    OperatorStop,
    /// The listener stopped accepting events.
    ListenerClosed,
}

/// Result of a finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// The run's identifier.
    pub run_id: RunId,
    /// Why the run ended.
    pub end_reason: RunEndReason,
    /// Number of updates performed.
    pub total_updates: u64,
    /// Wall-clock start.
    pub started_at: DateTime<Utc>,
    /// Wall-clock end.
    pub ended_at: DateTime<Utc>,
}

/// Errors that can occur when managing a run.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The run thread could not be started.
    #[error("failed to spawn run thread: {source}")]
    Spawn {
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The run thread panicked.
    #[error("run thread panicked")]
    Panicked,
}

/// Control state shared between a [`Run`] and its thread.
#[derive(Debug, Default)]
struct RunControl {
    paused: AtomicBool,
    stop_requested: AtomicBool,
    updates: AtomicU64,
    /// Guards pause and sleep waits so wakeups are not lost.
    gate: Mutex<()>,
    wake: Condvar,
}

impl RunControl {
    fn gate(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    fn resume(&self) {
        let _gate = self.gate();
        self.paused.store(false, Ordering::Release);
        self.wake.notify_all();
    }

    fn request_stop(&self) {
        let _gate = self.gate();
        self.stop_requested.store(true, Ordering::Release);
        self.wake.notify_all();
    }

    /// Block while paused. A stop request ends the wait.
    fn wait_if_paused(&self) {
        let gate = self.gate();
        let _gate = self
            .wake
            .wait_while(gate, |()| self.is_paused() && !self.is_stop_requested())
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Sleep for `duration` unless a stop request arrives first.
    fn sleep(&self, duration: Duration) {
        let gate = self.gate();
        let _gate = self
            .wake
            .wait_timeout_while(gate, duration, |()| !self.is_stop_requested())
            .unwrap_or_else(PoisonError::into_inner);
    }
}

/// Stops a [`Run`] from elsewhere, e.g. while another thread waits on it.
#[derive(Debug, Clone)]
pub struct RunStopper {
    id: RunId,
    control: Arc<RunControl>,
    sink: Arc<EventSink>,
}

impl RunStopper {
    /// Request a stop and release the run from pause or backpressure.
    /// Returns without waiting for the run thread.
    pub fn stop(&self) {
        self.control.request_stop();
        self.sink.close();
        debug!(run_id = %self.id, "Run stop requested");
    }
}

/// A population run on its own thread.
#[derive(Debug)]
pub struct Run {
    id: RunId,
    control: Arc<RunControl>,
    sink: Arc<EventSink>,
    thread: Option<JoinHandle<RunSummary>>,
    summary: Option<RunSummary>,
}

impl Run {
    /// Start driving `engine`, publishing through `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Spawn`] if the run thread cannot be started.
    pub fn start<E>(engine: E, sink: EventSink, config: &RunConfig) -> Result<Self, RunError>
    where
        E: PopulationEngine + 'static,
    {
        let id = RunId::new();
        let control = Arc::new(RunControl::default());
        let sink = Arc::new(sink);
        let thread = {
            let control = Arc::clone(&control);
            let sink = Arc::clone(&sink);
            let config = config.clone();
            std::thread::Builder::new()
                .name(format!("orgscope-run-{id}"))
                .spawn(move || {
                    let summary = drive(id, engine, &sink, &control, &config);
                    sink.close();
                    summary
                })
                .map_err(|source| RunError::Spawn { source })?
        };

        Ok(Self {
            id,
            control,
            sink,
            thread: Some(thread),
            summary: None,
        })
    }

    /// The run's identifier.
    pub const fn id(&self) -> RunId {
        self.id
    }

    /// Updates performed so far.
    pub fn updates(&self) -> u64 {
        self.control.updates.load(Ordering::Acquire)
    }

    /// Pause after the current update.
    pub fn pause(&self) {
        self.control.pause();
        debug!(run_id = %self.id, "Run pause requested");
    }

    /// Resume a paused run.
    pub fn resume(&self) {
        self.control.resume();
        debug!(run_id = %self.id, "Run resume requested");
    }

    /// Whether the run is paused.
    pub fn is_paused(&self) -> bool {
        self.control.is_paused()
    }

    /// A handle that can stop this run without owning it.
    pub fn stopper(&self) -> RunStopper {
        RunStopper {
            id: self.id,
            control: Arc::clone(&self.control),
            sink: Arc::clone(&self.sink),
        }
    }

    /// Whether the run thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Stop the run, wake it if paused, and wait for its thread.
    ///
    /// Idempotent: later calls return the same summary.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Panicked`] if the run thread panicked.
    pub fn stop(&mut self) -> Result<RunSummary, RunError> {
        self.stopper().stop();
        self.wait()
    }

    /// Wait for the run to end on its own.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Panicked`] if the run thread panicked.
    pub fn wait(&mut self) -> Result<RunSummary, RunError> {
        if let Some(thread) = self.thread.take() {
            let summary = thread.join().map_err(|_| RunError::Panicked)?;
            self.summary = Some(summary);
        }
        self.summary.clone().ok_or(RunError::Panicked)
    }
}

impl Drop for Run {
    fn drop(&mut self) {
        if self.thread.is_some() && self.stop().is_err() {
            warn!(run_id = %self.id, "Run thread panicked");
        }
    }
}

/// The run thread body.
fn drive<E: PopulationEngine>(
    id: RunId,
    mut engine: E,
    sink: &EventSink,
    control: &RunControl,
    config: &RunConfig,
) -> RunSummary {
    let started_at = Utc::now();
    info!(
        run_id = %id,
        max_updates = config.max_updates,
        map_interval = config.map_interval,
        map_mode = ?config.map_mode,
        "Run starting"
    );

    let publish = |event: RunEvent| sink.emit(event) != EmitOutcome::Closed;
    // A closed sink during an operator stop is the stop, not a listener failure.
    let closed = || {
        if control.is_stop_requested() {
            RunEndReason::OperatorStop
        } else {
            RunEndReason::ListenerClosed
        }
    };
    let map_interval = config.map_interval.max(1);
    let mut updates: u64 = 0;

    let end_reason = if publish(engine.map(config.map_mode).into()) {
        loop {
            if control.is_paused() {
                debug!(run_id = %id, updates, "Run paused");
                control.wait_if_paused();
                debug!(run_id = %id, "Run resumed");
            }

            if control.is_stop_requested() {
                break RunEndReason::OperatorStop;
            }

            if config.max_updates > 0 && updates >= config.max_updates {
                break RunEndReason::MaxUpdatesReached;
            }

            let update = engine.advance();
            updates = updates.saturating_add(1);
            control.updates.store(updates, Ordering::Release);
            let extinct = update.organisms == 0;

            if !publish(update.into()) {
                break closed();
            }
            if updates.checked_rem(map_interval) == Some(0)
                && !publish(engine.map(config.map_mode).into())
            {
                break closed();
            }
            if extinct {
                break RunEndReason::Extinction;
            }

            if !config.update_interval().is_zero() {
                control.sleep(config.update_interval());
            }
        }
    } else {
        closed()
    };

    info!(run_id = %id, end_reason = ?end_reason, total_updates = updates, "Run ended");
    RunSummary {
        run_id: id,
        end_reason,
        total_updates: updates,
        started_at,
        ended_at: Utc::now(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::AtomicU64;

    use super::*;
    use crate::config::ListenerConfig;
    use crate::listener::{RunListener, RunObserver};

    const WAIT: Duration = Duration::from_secs(5);

    /// Population of `organisms` that shrinks by `decay` per update.
    struct Shrinking {
        update: u64,
        organisms: u32,
        decay: u32,
        advanced: Arc<AtomicU64>,
    }

    impl Shrinking {
        fn new(organisms: u32, decay: u32) -> Self {
            Self {
                update: 0,
                organisms,
                decay,
                advanced: Arc::new(AtomicU64::new(0)),
            }
        }
    }

    impl PopulationEngine for Shrinking {
        fn advance(&mut self) -> UpdateEvent {
            self.update += 1;
            self.organisms = self.organisms.saturating_sub(self.decay);
            self.advanced.fetch_add(1, Ordering::SeqCst);
            UpdateEvent {
                update: self.update,
                organisms: self.organisms,
                average_fitness: 1.0,
                average_gestation: 10.0,
                average_generation: 0.5,
            }
        }

        fn map(&self, mode: MapMode) -> MapEvent {
            MapEvent {
                update: self.update,
                width: 1,
                height: 1,
                mode,
                cells: vec![Some(0)],
            }
        }
    }

    #[derive(Clone, Default)]
    struct Log(Arc<Mutex<Vec<RunEvent>>>);

    impl RunObserver for Log {
        fn on_map(&mut self, event: &MapEvent) {
            self.0.lock().unwrap().push(event.clone().into());
        }

        fn on_update(&mut self, event: &UpdateEvent) {
            self.0.lock().unwrap().push(event.clone().into());
        }
    }

    fn run_config(max_updates: u64, map_interval: u64, update_interval_ms: u64) -> RunConfig {
        RunConfig {
            map_interval,
            max_updates,
            update_interval_ms,
            map_mode: MapMode::Fitness,
        }
    }

    #[test]
    fn bounded_run_publishes_maps_and_updates() {
        let (listener, sink) = RunListener::new(&ListenerConfig::default()).unwrap();
        let log = Log::default();
        listener.attach(log.clone()).unwrap();

        let engine = Shrinking::new(100, 1);
        let advanced = Arc::clone(&engine.advanced);
        let mut run = Run::start(engine, sink, &run_config(5, 2, 0)).unwrap();
        let summary = run.wait().unwrap();

        assert_eq!(summary.end_reason, RunEndReason::MaxUpdatesReached);
        assert_eq!(summary.total_updates, 5);
        assert_eq!(advanced.load(Ordering::SeqCst), 5);
        assert!(listener.wait_retired(WAIT));

        let events = log.0.lock().unwrap().clone();
        let maps: Vec<u64> = events
            .iter()
            .filter(|e| e.is_map())
            .map(RunEvent::update)
            .collect();
        assert_eq!(maps, vec![0, 2, 4]);
        assert_eq!(events.last().map(RunEvent::update), Some(5));
        assert!(!events.last().unwrap().is_map());
    }

    #[test]
    fn extinction_ends_run() {
        let (listener, sink) = RunListener::new(&ListenerConfig::default()).unwrap();
        let mut run = Run::start(Shrinking::new(3, 1), sink, &run_config(0, 10, 0)).unwrap();
        let summary = run.wait().unwrap();
        assert_eq!(summary.end_reason, RunEndReason::Extinction);
        assert_eq!(summary.total_updates, 3);
        assert!(listener.wait_retired(WAIT));
    }

    #[test]
    fn closed_listener_ends_run() {
        let (listener, sink) = RunListener::new(&ListenerConfig::default()).unwrap();
        listener.close();
        let mut run = Run::start(Shrinking::new(10, 0), sink, &run_config(0, 1, 0)).unwrap();
        let summary = run.wait().unwrap();
        assert_eq!(summary.end_reason, RunEndReason::ListenerClosed);
        assert_eq!(summary.total_updates, 0);
    }

    #[test]
    fn pause_resume_and_stop() {
        let (listener, sink) = RunListener::new(&ListenerConfig::default()).unwrap();
        let mut run = Run::start(Shrinking::new(10, 0), sink, &run_config(0, 1, 1)).unwrap();

        while run.updates() < 3 {
            std::thread::sleep(Duration::from_millis(1));
        }
        run.pause();
        assert!(run.is_paused());
        // Let an update already in progress finish.
        std::thread::sleep(Duration::from_millis(20));
        let frozen = run.updates();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(run.updates(), frozen);

        run.resume();
        while run.updates() <= frozen {
            std::thread::sleep(Duration::from_millis(1));
        }

        let summary = run.stop().unwrap();
        assert_eq!(summary.end_reason, RunEndReason::OperatorStop);
        assert!(summary.total_updates > frozen);
        assert!(run.is_finished());
        assert_eq!(run.stop().unwrap(), summary);
        assert!(listener.wait_retired(WAIT));
    }

    #[test]
    fn stopper_ends_run_waited_on_elsewhere() {
        let (listener, sink) = RunListener::new(&ListenerConfig::default()).unwrap();
        let mut run = Run::start(Shrinking::new(10, 0), sink, &run_config(0, 1, 1)).unwrap();
        let stopper = run.stopper();
        let waiter = std::thread::spawn(move || run.wait());

        std::thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());
        stopper.stop();
        let summary = waiter.join().unwrap().unwrap();
        assert_eq!(summary.end_reason, RunEndReason::OperatorStop);
        assert!(listener.wait_retired(WAIT));
    }

    #[test]
    fn stop_wakes_paused_run() {
        let (_listener, sink) = RunListener::new(&ListenerConfig::default()).unwrap();
        let mut run = Run::start(Shrinking::new(10, 0), sink, &run_config(0, 1, 1)).unwrap();
        run.pause();
        let summary = run.stop().unwrap();
        assert_eq!(summary.end_reason, RunEndReason::OperatorStop);
    }
}

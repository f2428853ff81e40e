//! Run listener: the bridge between a population run and one observer.
//!
//! A run produces events on its own thread through an [`EventSink`]. The
//! listener queues them and a dedicated dispatcher thread delivers them,
//! one at a time and in emission order, to the attached [`RunObserver`].
//!
//! # Queue policy
//!
//! - An [`UpdateEvent`] replaces an update still pending at the queue tail,
//!   so a slow observer only sees the latest statistics.
//! - At most `map_capacity` maps are pending. When the bound is hit while
//!   an observer is attached, the producer waits up to
//!   `backpressure_timeout` for the dispatcher to make room. After that, or
//!   immediately when nobody is attached, the oldest pending map is dropped.
//!   The observer learns the running drop total through
//!   [`RunObserver::on_events_dropped`] before its next delivery.
//! - Events queue while no observer is attached and flow once one is.
//!
//! # Teardown
//!
//! Closing (explicitly, or by dropping the sink or the listener) rejects all
//! further events and wakes a producer blocked on backpressure. Queued
//! events are drained to an attached observer; with nobody attached they are
//! discarded. Either way the listener then becomes retired and its
//! dispatcher thread exits.
//!
//! # Locking
//!
//! The observer slot and the queue have separate mutexes, always taken in
//! that order. Neither is held while an observer callback runs: the
//! dispatcher lends the observer out of the slot for the delivery, so a
//! callback may call [`RunListener::detach`] or [`RunListener::attach`]
//! itself. A detach from any other thread waits for the in-flight callback
//! to return.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use orgscope_types::{MapEvent, RunEvent, UpdateEvent};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::ListenerConfig;

/// Receives run events on the listener's dispatcher thread.
pub trait RunObserver: Send {
    /// A new population map.
    fn on_map(&mut self, event: &MapEvent);

    /// New population statistics.
    fn on_update(&mut self, event: &UpdateEvent);

    /// Maps have been dropped; `total` is the running count.
    fn on_events_dropped(&mut self, _total: u64) {}
}

/// Errors that can occur when managing a listener.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// An observer is already attached.
    #[error("an observer is already attached")]
    AlreadyAttached,

    /// The listener has been closed and drained.
    #[error("listener is retired")]
    Retired,

    /// The dispatcher thread could not be started.
    #[error("failed to spawn dispatcher thread: {source}")]
    Spawn {
        /// The underlying I/O error.
        source: std::io::Error,
    },
}

/// What happened to an emitted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitOutcome {
    /// Appended to the queue.
    Queued,
    /// Replaced the pending update at the queue tail.
    Coalesced,
    /// Appended after dropping the oldest pending map.
    DroppedOldest,
    /// Rejected because the listener is closed.
    Closed,
}

/// Listener counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ListenerStats {
    /// Events accepted from the producer.
    pub emitted: u64,
    /// Events handed to an observer.
    pub delivered: u64,
    /// Updates replaced by a newer update before delivery.
    pub coalesced_updates: u64,
    /// Maps dropped by the capacity bound.
    pub dropped_maps: u64,
}

#[derive(Debug, Default)]
struct Queue {
    events: VecDeque<RunEvent>,
    pending_maps: usize,
    attached: bool,
    closed: bool,
    retired: bool,
    stats: ListenerStats,
    reported_drops: u64,
}

impl Queue {
    /// Drop the oldest pending map. Updates that end up adjacent are merged
    /// so the queue stays bounded by the map capacity.
    fn drop_oldest_map(&mut self) {
        let Some(position) = self.events.iter().position(RunEvent::is_map) else {
            return;
        };
        let _ = self.events.remove(position);
        self.pending_maps = self.pending_maps.saturating_sub(1);
        self.stats.dropped_maps = self.stats.dropped_maps.saturating_add(1);
        warn!(dropped_maps = self.stats.dropped_maps, "Map event dropped");

        let Some(before) = position.checked_sub(1) else {
            return;
        };
        let adjacent_updates = matches!(
            (self.events.get(before), self.events.get(position)),
            (Some(RunEvent::Update(_)), Some(RunEvent::Update(_)))
        );
        if adjacent_updates {
            let _ = self.events.remove(before);
            self.stats.coalesced_updates = self.stats.coalesced_updates.saturating_add(1);
        }
    }

    fn retire(&mut self) {
        self.closed = true;
        self.retired = true;
        self.events.clear();
        self.pending_maps = 0;
    }
}

/// Observer ownership. While `delivering`, the observer is lent to the
/// dispatcher and `observer` is empty even though one is attached.
#[derive(Default)]
struct Slot {
    observer: Option<Box<dyn RunObserver>>,
    attached: bool,
    delivering: bool,
    /// The lent observer was detached mid-delivery; drop it on return.
    detached_in_flight: bool,
}

struct Shared {
    slot: Mutex<Slot>,
    queue: Mutex<Queue>,
    /// Signalled when a delivery finishes.
    idle: Condvar,
    /// Signalled when the dispatcher may have something to do.
    work: Condvar,
    /// Signalled when map space frees up or waiting is pointless.
    space: Condvar,
    /// Signalled on retirement.
    retired: Condvar,
    map_capacity: usize,
    backpressure_timeout: Duration,
    dispatcher: OnceLock<ThreadId>,
}

impl Shared {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        lock(&self.slot)
    }

    fn on_dispatcher(&self) -> bool {
        self.dispatcher.get() == Some(&std::thread::current().id())
    }

    fn queue(&self) -> MutexGuard<'_, Queue> {
        lock(&self.queue)
    }

    fn emit(&self, event: RunEvent) -> EmitOutcome {
        let mut queue = self.queue();
        if queue.closed {
            return EmitOutcome::Closed;
        }

        let outcome = match event {
            RunEvent::Update(update) => {
                if let Some(RunEvent::Update(tail)) = queue.events.back_mut() {
                    *tail = update;
                    queue.stats.coalesced_updates = queue.stats.coalesced_updates.saturating_add(1);
                    queue.stats.emitted = queue.stats.emitted.saturating_add(1);
                    return EmitOutcome::Coalesced;
                }
                queue.events.push_back(RunEvent::Update(update));
                EmitOutcome::Queued
            }
            RunEvent::Map(map) => {
                if queue.pending_maps >= self.map_capacity && queue.attached {
                    queue = self.wait_for_space(queue);
                    if queue.closed {
                        return EmitOutcome::Closed;
                    }
                }
                let outcome = if queue.pending_maps >= self.map_capacity {
                    queue.drop_oldest_map();
                    EmitOutcome::DroppedOldest
                } else {
                    EmitOutcome::Queued
                };
                queue.events.push_back(RunEvent::Map(map));
                queue.pending_maps = queue.pending_maps.saturating_add(1);
                outcome
            }
        };

        queue.stats.emitted = queue.stats.emitted.saturating_add(1);
        drop(queue);
        self.work.notify_one();
        outcome
    }

    /// Block until map space frees up, the observer detaches, the listener
    /// closes, or the backpressure timeout elapses.
    fn wait_for_space<'a>(&self, mut queue: MutexGuard<'a, Queue>) -> MutexGuard<'a, Queue> {
        let deadline = Instant::now().checked_add(self.backpressure_timeout);
        while queue.pending_maps >= self.map_capacity && queue.attached && !queue.closed {
            let remaining = deadline.map_or(Duration::MAX, |d| d.saturating_duration_since(Instant::now()));
            if remaining.is_zero() {
                debug!(
                    pending_maps = queue.pending_maps,
                    "Backpressure timeout elapsed"
                );
                break;
            }
            queue = self
                .space
                .wait_timeout(queue, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        queue
    }

    fn close(&self) {
        let mut queue = self.queue();
        if !queue.closed {
            queue.closed = true;
            debug!(pending = queue.events.len(), "Listener closed");
        }
        drop(queue);
        self.work.notify_all();
        self.space.notify_all();
    }

    /// Wait until there is an event to deliver. Returns `false`, retiring
    /// the listener, when there never will be.
    fn wait_for_work(&self) -> bool {
        let mut queue = self.queue();
        loop {
            if queue.attached && !queue.events.is_empty() {
                return true;
            }
            if queue.closed && (queue.events.is_empty() || !queue.attached) {
                if !queue.events.is_empty() {
                    debug!(discarded = queue.events.len(), "Discarding undelivered events");
                }
                queue.retire();
                return false;
            }
            queue = self.work.wait(queue).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Pop the next event, with the drop total to report first if it grew.
    fn take_next(&self) -> Option<(RunEvent, Option<u64>)> {
        let mut queue = self.queue();
        let event = queue.events.pop_front()?;
        if event.is_map() {
            queue.pending_maps = queue.pending_maps.saturating_sub(1);
            self.space.notify_one();
        }
        let dropped = (queue.stats.dropped_maps > queue.reported_drops).then(|| {
            queue.reported_drops = queue.stats.dropped_maps;
            queue.stats.dropped_maps
        });
        Some((event, dropped))
    }

    /// Take the observer and the next event out for a delivery.
    fn lend(&self) -> Option<(Box<dyn RunObserver>, RunEvent, Option<u64>)> {
        let mut slot = self.slot();
        if !slot.attached {
            return None;
        }
        let observer = slot.observer.take()?;
        let Some((event, dropped)) = self.take_next() else {
            slot.observer = Some(observer);
            return None;
        };
        slot.delivering = true;
        Some((observer, event, dropped))
    }

    /// Whether the lent observer has been detached since it was lent.
    fn detached_in_flight(&self) -> bool {
        self.slot().detached_in_flight
    }

    /// Put an event back at the head of the queue after an aborted delivery.
    fn requeue(&self, event: RunEvent) {
        let mut queue = self.queue();
        if event.is_map() {
            queue.pending_maps = queue.pending_maps.saturating_add(1);
        }
        queue.events.push_front(event);
    }

    /// Return a lent observer, or drop it if it was detached meanwhile.
    fn give_back(&self, observer: Box<dyn RunObserver>, delivered: bool) {
        let mut slot = self.slot();
        slot.delivering = false;
        let detached = if slot.detached_in_flight {
            slot.detached_in_flight = false;
            Some(observer)
        } else {
            slot.observer = Some(observer);
            None
        };
        if delivered {
            let mut queue = self.queue();
            queue.stats.delivered = queue.stats.delivered.saturating_add(1);
        }
        drop(slot);
        self.idle.notify_all();
        drop(detached);
    }
}

/// Marks the listener retired when the dispatcher exits, even by panic.
struct RetireGuard<'a>(&'a Shared);

impl Drop for RetireGuard<'_> {
    fn drop(&mut self) {
        {
            let mut slot = self.0.slot();
            slot.delivering = false;
            slot.detached_in_flight = false;
        }
        self.0.idle.notify_all();
        self.0.queue().retire();
        self.0.retired.notify_all();
        self.0.space.notify_all();
        debug!("Listener retired");
    }
}

fn dispatch(shared: &Shared) {
    let _ = shared.dispatcher.set(std::thread::current().id());
    let _guard = RetireGuard(shared);
    while shared.wait_for_work() {
        // Attachment flips under the slot lock, so nothing to lend here
        // means a detach won the race and the next wait will block.
        let Some((mut observer, event, dropped)) = shared.lend() else {
            continue;
        };
        if let Some(total) = dropped {
            observer.on_events_dropped(total);
        }
        // The drop notice itself may have detached the observer.
        let deliver = dropped.is_none() || !shared.detached_in_flight();
        if deliver {
            match &event {
                RunEvent::Map(map) => observer.on_map(map),
                RunEvent::Update(update) => observer.on_update(update),
            }
        } else {
            shared.requeue(event);
        }
        shared.give_back(observer, deliver);
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Producer side of a [`RunListener`]. Dropping the sink closes the
/// listener.
pub struct EventSink {
    shared: Arc<Shared>,
}

impl EventSink {
    /// Hand an event to the listener.
    ///
    /// May block for up to the backpressure timeout when map capacity is
    /// exhausted and an observer is attached.
    pub fn emit(&self, event: impl Into<RunEvent>) -> EmitOutcome {
        self.shared.emit(event.into())
    }

    /// Stop accepting events. Idempotent.
    pub fn close(&self) {
        self.shared.close();
    }
}

impl Drop for EventSink {
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink").finish_non_exhaustive()
    }
}

/// Owner side of the run-event bridge.
pub struct RunListener {
    shared: Arc<Shared>,
    dispatcher: Option<JoinHandle<()>>,
}

impl RunListener {
    /// Create a listener, start its dispatcher and return the producer sink.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::Spawn`] if the dispatcher thread cannot be
    /// started.
    pub fn new(config: &ListenerConfig) -> Result<(Self, EventSink), ListenerError> {
        let shared = Arc::new(Shared {
            slot: Mutex::new(Slot::default()),
            queue: Mutex::new(Queue::default()),
            idle: Condvar::new(),
            work: Condvar::new(),
            space: Condvar::new(),
            retired: Condvar::new(),
            map_capacity: config.map_capacity.max(1),
            backpressure_timeout: config.backpressure_timeout(),
            dispatcher: OnceLock::new(),
        });

        let dispatcher = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name(String::from("orgscope-listener"))
                .spawn(move || dispatch(&shared))
                .map_err(|source| ListenerError::Spawn { source })?
        };

        debug!(
            map_capacity = shared.map_capacity,
            backpressure_ms = shared.backpressure_timeout.as_millis(),
            "Listener started"
        );
        let sink = EventSink {
            shared: Arc::clone(&shared),
        };
        Ok((
            Self {
                shared,
                dispatcher: Some(dispatcher),
            },
            sink,
        ))
    }

    /// Attach the observer that receives events from now on.
    ///
    /// May be called from inside an observer callback once that observer
    /// has detached itself.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::AlreadyAttached`] if an observer is active,
    /// or [`ListenerError::Retired`] after retirement.
    pub fn attach<O: RunObserver + 'static>(&self, observer: O) -> Result<(), ListenerError> {
        let mut slot = self.shared.slot();
        let mut queue = self.shared.queue();
        if queue.retired {
            return Err(ListenerError::Retired);
        }
        if slot.attached {
            return Err(ListenerError::AlreadyAttached);
        }
        slot.observer = Some(Box::new(observer));
        slot.attached = true;
        queue.attached = true;
        debug!(pending = queue.events.len(), "Observer attached");
        drop(queue);
        drop(slot);
        self.shared.work.notify_one();
        Ok(())
    }

    /// Detach the current observer. Returns whether one was attached.
    ///
    /// From any thread but the dispatcher this waits for an in-flight
    /// delivery to finish. An observer detaching itself from inside a
    /// callback returns at once; the callback completes and the observer
    /// receives nothing further.
    pub fn detach(&self) -> bool {
        let mut slot = self.shared.slot();
        let was_attached = std::mem::take(&mut slot.attached);
        let observer = slot.observer.take();
        if was_attached && slot.delivering {
            slot.detached_in_flight = true;
        }
        self.shared.queue().attached = false;
        if !self.shared.on_dispatcher() {
            slot = self
                .shared
                .idle
                .wait_while(slot, |s| s.delivering)
                .unwrap_or_else(PoisonError::into_inner);
        }
        drop(slot);
        // A producer waiting on backpressure should give up now.
        self.shared.space.notify_all();
        drop(observer);
        if was_attached {
            debug!("Observer detached");
        }
        was_attached
    }

    /// Current counters.
    pub fn stats(&self) -> ListenerStats {
        self.shared.queue().stats
    }

    /// Stop accepting events. Idempotent.
    pub fn close(&self) {
        self.shared.close();
    }

    /// Whether the listener has been closed and drained.
    pub fn is_retired(&self) -> bool {
        self.shared.queue().retired
    }

    /// Wait up to `timeout` for retirement. Returns whether it happened.
    pub fn wait_retired(&self, timeout: Duration) -> bool {
        let queue = self.shared.queue();
        let (queue, _) = self
            .shared
            .retired
            .wait_timeout_while(queue, timeout, |q| !q.retired)
            .unwrap_or_else(PoisonError::into_inner);
        queue.retired
    }

    /// Close, drain and join the dispatcher, returning the final counters.
    pub fn shutdown(mut self) -> ListenerStats {
        self.close();
        if let Some(dispatcher) = self.dispatcher.take() {
            if dispatcher.join().is_err() {
                warn!("Listener dispatcher panicked");
            }
        }
        self.stats()
    }
}

impl Drop for RunListener {
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl std::fmt::Debug for RunListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunListener")
            .field("stats", &self.stats())
            .field("retired", &self.is_retired())
            .finish_non_exhaustive()
    }
}

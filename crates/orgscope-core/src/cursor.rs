//! Snapshot cursor: a navigation state machine over a [`Trace`].
//!
//! The cursor is either `Empty` (the trace has no snapshots, every
//! transition is a no-op) or at an index in `[0, len)`. Out-of-range
//! selections clamp instead of failing.
//!
//! Auto-advance performs `next` once per tick until the last snapshot is
//! reached, then stops by itself; it never wraps. Ticks are one-shot and
//! requested through a [`TickScheduler`], identified by a [`TickToken`].
//! Stopping cancels the pending tick through the scheduler and forgets its
//! token, so a tick that still arrives afterwards is ignored.

use std::sync::Arc;
use std::time::Duration;

use orgscope_types::{Snapshot, Trace};
use tracing::debug;

/// Identity of one scheduled tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TickToken(u64);

impl TickToken {
    /// Token with the given sequence number.
    pub const fn new(sequence: u64) -> Self {
        Self(sequence)
    }
}

/// Schedules one-shot auto-advance ticks on the cursor's timeline.
pub trait TickScheduler {
    /// Arrange for a tick after `period` and return its token.
    fn schedule(&mut self, period: Duration) -> TickToken;

    /// Cancel a pending tick. Must be a no-op for unknown tokens.
    fn cancel(&mut self, token: TickToken);
}

/// A scheduler driven by hand: the host decides when the pending tick fires.
#[derive(Debug, Default)]
pub struct ManualScheduler {
    next_sequence: u64,
    pending: Option<(TickToken, Duration)>,
}

impl ManualScheduler {
    /// A scheduler with nothing pending.
    pub const fn new() -> Self {
        Self {
            next_sequence: 0,
            pending: None,
        }
    }

    /// The pending tick and its period, if any.
    pub const fn pending(&self) -> Option<(TickToken, Duration)> {
        self.pending
    }

    /// Remove and return the pending tick, as if it fired.
    pub const fn fire(&mut self) -> Option<TickToken> {
        match self.pending.take() {
            Some((token, _)) => Some(token),
            None => None,
        }
    }
}

impl TickScheduler for ManualScheduler {
    fn schedule(&mut self, period: Duration) -> TickToken {
        let token = TickToken(self.next_sequence);
        self.next_sequence = self.next_sequence.wrapping_add(1);
        self.pending = Some((token, period));
        token
    }

    fn cancel(&mut self, token: TickToken) {
        if self.pending.is_some_and(|(pending, _)| pending == token) {
            self.pending = None;
        }
    }
}

/// What a tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The token was stale or auto-advance was off.
    Ignored,
    /// Moved to the given index; another tick is scheduled.
    Advanced(usize),
    /// Moved to the last index; auto-advance stopped.
    Finished(usize),
}

/// Navigable position within a trace, plus optional auto-advance.
#[derive(Debug)]
pub struct SnapshotCursor<S> {
    trace: Arc<Trace>,
    index: Option<usize>,
    period: Duration,
    scheduler: S,
    pending: Option<TickToken>,
}

impl<S: TickScheduler> SnapshotCursor<S> {
    /// A cursor at the first snapshot, or `Empty` for an empty trace.
    ///
    /// `period` is the delay between auto-advance ticks.
    pub fn new(trace: Arc<Trace>, scheduler: S, period: Duration) -> Self {
        let index = if trace.is_empty() { None } else { Some(0) };
        Self {
            trace,
            index,
            period,
            scheduler,
            pending: None,
        }
    }

    /// The trace being navigated.
    pub const fn trace(&self) -> &Arc<Trace> {
        &self.trace
    }

    /// Current index, `None` when `Empty`.
    pub const fn index(&self) -> Option<usize> {
        self.index
    }

    /// Snapshot at the current index.
    pub fn current(&self) -> Option<&Snapshot> {
        self.index.and_then(|i| self.trace.get(i))
    }

    /// Whether auto-advance is running.
    pub const fn is_auto_advancing(&self) -> bool {
        self.pending.is_some()
    }

    /// The tick scheduler.
    pub const fn scheduler(&self) -> &S {
        &self.scheduler
    }

    /// The tick scheduler, for hosts that deliver ticks.
    pub const fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }

    fn last_index(&self) -> Option<usize> {
        self.trace.len().checked_sub(1)
    }

    /// Move to `index` (already in range) and stop auto-advance on arrival
    /// at the end.
    fn move_to(&mut self, index: usize) -> Option<usize> {
        if self.index.is_none() {
            return None;
        }
        self.index = Some(index);
        if self.pending.is_some() && Some(index) == self.last_index() {
            self.stop_auto_advance();
        }
        self.index
    }

    /// Go to the first snapshot.
    pub fn first(&mut self) -> Option<usize> {
        self.move_to(0)
    }

    /// Go to the last snapshot.
    pub fn last(&mut self) -> Option<usize> {
        let last = self.last_index()?;
        self.move_to(last)
    }

    /// Go one snapshot forward, saturating at the end.
    pub fn next(&mut self) -> Option<usize> {
        let (index, last) = (self.index?, self.last_index()?);
        self.move_to(index.saturating_add(1).min(last))
    }

    /// Go one snapshot back, saturating at the start.
    pub fn prev(&mut self) -> Option<usize> {
        let index = self.index?;
        self.move_to(index.saturating_sub(1))
    }

    /// Go to `index`, clamped into `[0, len)`. Negative values clamp to 0.
    pub fn select(&mut self, index: i64) -> Option<usize> {
        let last = self.last_index()?;
        let clamped = usize::try_from(index.max(0)).map_or(last, |i| i.min(last));
        self.move_to(clamped)
    }

    /// Start auto-advance. Returns whether it is running afterwards.
    ///
    /// A no-op on an `Empty` cursor or when already at the last snapshot.
    pub fn start_auto_advance(&mut self) -> bool {
        if self.pending.is_some() {
            return true;
        }
        match (self.index, self.last_index()) {
            (Some(index), Some(last)) if index < last => {
                self.pending = Some(self.scheduler.schedule(self.period));
                debug!(index, period_ms = self.period.as_millis(), "Auto-advance started");
                true
            }
            _ => false,
        }
    }

    /// Stop auto-advance and cancel the pending tick.
    pub fn stop_auto_advance(&mut self) {
        if let Some(token) = self.pending.take() {
            self.scheduler.cancel(token);
            debug!(index = ?self.index, "Auto-advance stopped");
        }
    }

    /// Flip auto-advance. Returns whether it is running afterwards.
    pub fn toggle_auto_advance(&mut self) -> bool {
        if self.pending.is_some() {
            self.stop_auto_advance();
            false
        } else {
            self.start_auto_advance()
        }
    }

    /// Handle a fired tick.
    pub fn on_tick(&mut self, token: TickToken) -> TickOutcome {
        if self.pending != Some(token) {
            return TickOutcome::Ignored;
        }
        self.pending = None;
        let (Some(index), Some(last)) = (self.index, self.last_index()) else {
            return TickOutcome::Ignored;
        };
        let index = index.saturating_add(1).min(last);
        self.index = Some(index);
        if index >= last {
            debug!(index, "Auto-advance reached the last snapshot");
            TickOutcome::Finished(index)
        } else {
            self.pending = Some(self.scheduler.schedule(self.period));
            TickOutcome::Advanced(index)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use orgscope_types::{ExecState, Genome, HeadPositions, Termination};

    use super::*;

    const PERIOD: Duration = Duration::from_millis(50);

    fn trace_of(len: u64) -> Arc<Trace> {
        let snapshots = (0..len)
            .map(|cycle| Snapshot {
                cycle,
                instruction: 'a',
                ip: 0,
                heads: HeadPositions::default(),
                memory: String::from("a"),
                registers: vec![0, 0, 0],
                input_buffer: Vec::new(),
                output_buffer: Vec::new(),
                stack: Vec::new(),
                tasks: Vec::new(),
                state: ExecState::Running,
            })
            .collect();
        Arc::new(Trace::from_parts(Genome::new("a"), snapshots, Termination::CycleCap).unwrap())
    }

    fn cursor(len: u64) -> SnapshotCursor<ManualScheduler> {
        SnapshotCursor::new(trace_of(len), ManualScheduler::new(), PERIOD)
    }

    #[test]
    fn navigation_scenario() {
        let mut cursor = cursor(5);
        assert_eq!(cursor.first(), Some(0));
        for _ in 0..3 {
            let _ = cursor.next();
        }
        assert_eq!(cursor.index(), Some(3));
        assert_eq!(cursor.last(), Some(4));
        assert_eq!(cursor.next(), Some(4));
        assert_eq!(cursor.current().map(|s| s.cycle), Some(4));
    }

    #[test]
    fn prev_saturates_at_zero() {
        let mut cursor = cursor(3);
        assert_eq!(cursor.prev(), Some(0));
        let _ = cursor.last();
        assert_eq!(cursor.prev(), Some(1));
    }

    #[test]
    fn select_clamps_any_integer() {
        let len: u64 = 7;
        let mut cursor = cursor(len);
        for k in [-100_i64, -1, 0, 3, 6, 7, 1000, i64::MIN, i64::MAX] {
            let expected = usize::try_from(k.clamp(0, 6)).unwrap();
            assert_eq!(cursor.select(k), Some(expected), "select({k})");
            assert_eq!(cursor.index(), Some(expected));
        }
    }

    #[test]
    fn empty_cursor_ignores_everything() {
        let mut cursor = cursor(0);
        assert_eq!(cursor.index(), None);
        assert_eq!(cursor.first(), None);
        assert_eq!(cursor.last(), None);
        assert_eq!(cursor.next(), None);
        assert_eq!(cursor.prev(), None);
        assert_eq!(cursor.select(3), None);
        assert!(cursor.current().is_none());
        assert!(!cursor.toggle_auto_advance());
        assert!(cursor.scheduler().pending().is_none());
    }

    #[test]
    fn auto_advance_runs_to_end_and_stops() {
        let mut cursor = cursor(5);
        let _ = cursor.select(1);
        assert!(cursor.toggle_auto_advance());

        let mut outcomes = Vec::new();
        while let Some(token) = cursor.scheduler_mut().fire() {
            outcomes.push(cursor.on_tick(token));
        }
        assert_eq!(
            outcomes,
            vec![
                TickOutcome::Advanced(2),
                TickOutcome::Advanced(3),
                TickOutcome::Finished(4)
            ]
        );
        assert!(!cursor.is_auto_advancing());
        assert_eq!(cursor.index(), Some(4));
    }

    #[test]
    fn auto_advance_at_last_index_is_noop() {
        let mut cursor = cursor(3);
        let _ = cursor.last();
        assert!(!cursor.start_auto_advance());
        assert!(cursor.scheduler().pending().is_none());
    }

    #[test]
    fn stop_cancels_pending_tick() {
        let mut cursor = cursor(4);
        assert!(cursor.toggle_auto_advance());
        let (token, period) = cursor.scheduler().pending().unwrap();
        assert_eq!(period, PERIOD);

        assert!(!cursor.toggle_auto_advance());
        assert!(cursor.scheduler().pending().is_none());
        // A tick that was already in flight is ignored.
        assert_eq!(cursor.on_tick(token), TickOutcome::Ignored);
        assert_eq!(cursor.index(), Some(0));
    }

    #[test]
    fn stale_token_after_restart_is_ignored() {
        let mut cursor = cursor(4);
        let _ = cursor.start_auto_advance();
        let (old, _) = cursor.scheduler().pending().unwrap();
        cursor.stop_auto_advance();
        let _ = cursor.start_auto_advance();
        assert_eq!(cursor.on_tick(old), TickOutcome::Ignored);
        let (fresh, _) = cursor.scheduler().pending().unwrap();
        assert_eq!(cursor.on_tick(fresh), TickOutcome::Advanced(1));
    }

    #[test]
    fn manual_jump_to_end_stops_auto_advance() {
        let mut cursor = cursor(4);
        let _ = cursor.start_auto_advance();
        let _ = cursor.last();
        assert!(!cursor.is_auto_advancing());
        assert!(cursor.scheduler().pending().is_none());
    }
}

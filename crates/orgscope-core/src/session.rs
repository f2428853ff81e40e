//! Cursor session: one tokio task that owns a [`SnapshotCursor`].
//!
//! All cursor mutation happens on the session task. Hosts talk to it via a
//! [`SessionHandle`]: commands go in over an mpsc channel and the current
//! [`CursorView`] comes back over a `watch` channel. Auto-advance ticks are
//! tokio deadlines on the same task, and pending commands are always
//! handled before a due tick. So a stop request that is already queued
//! when a tick comes due wins. [`SessionHandle::request`] also waits for
//! the session to acknowledge, so once a stop returns no tick can move the
//! cursor any more.

use std::sync::Arc;
use std::time::Duration;

use orgscope_types::{Snapshot, Trace};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::debug;

use crate::cursor::{SnapshotCursor, TickOutcome, TickScheduler, TickToken};

/// Command queue depth between a handle and its session.
const COMMAND_BUFFER: usize = 32;

/// Tick scheduler backed by tokio deadlines.
#[derive(Debug, Default)]
pub struct DeadlineScheduler {
    next_sequence: u64,
    pending: Option<(TickToken, Instant)>,
}

impl DeadlineScheduler {
    /// A scheduler with nothing pending.
    pub const fn new() -> Self {
        Self {
            next_sequence: 0,
            pending: None,
        }
    }

    /// The pending tick and its deadline, if any.
    pub const fn next_due(&self) -> Option<(TickToken, Instant)> {
        self.pending
    }

    /// Remove the pending tick so it can be delivered.
    pub const fn fire(&mut self) -> Option<TickToken> {
        match self.pending.take() {
            Some((token, _)) => Some(token),
            None => None,
        }
    }
}

impl TickScheduler for DeadlineScheduler {
    fn schedule(&mut self, period: Duration) -> TickToken {
        let token = TickToken::new(self.next_sequence);
        self.next_sequence = self.next_sequence.wrapping_add(1);
        let now = Instant::now();
        self.pending = Some((token, now.checked_add(period).unwrap_or(now)));
        token
    }

    fn cancel(&mut self, token: TickToken) {
        if self.pending.is_some_and(|(pending, _)| pending == token) {
            self.pending = None;
        }
    }
}

/// Commands accepted by a [`CursorSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorCommand {
    /// Go to the first snapshot.
    First,
    /// Go to the last snapshot.
    Last,
    /// Go one snapshot forward.
    Next,
    /// Go one snapshot back.
    Prev,
    /// Go to an index, clamped into range.
    Select(i64),
    /// Start or stop auto-advance.
    ToggleAutoAdvance,
    /// End the session.
    Close,
}

/// A command with an optional acknowledgement channel.
#[derive(Debug)]
struct Request {
    command: CursorCommand,
    reply: Option<oneshot::Sender<CursorView>>,
}

/// What a session publishes after every change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CursorView {
    /// Current index, `None` for an empty trace.
    pub index: Option<usize>,
    /// Number of snapshots in the trace.
    pub len: usize,
    /// Snapshot at `index`.
    pub snapshot: Option<Snapshot>,
    /// Whether auto-advance is running.
    pub auto_advancing: bool,
}

impl CursorView {
    fn of<S: TickScheduler>(cursor: &SnapshotCursor<S>) -> Self {
        Self {
            index: cursor.index(),
            len: cursor.trace().len(),
            snapshot: cursor.current().cloned(),
            auto_advancing: cursor.is_auto_advancing(),
        }
    }
}

/// The session has ended and no longer accepts commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cursor session closed")]
pub struct SessionClosed;

/// Host side of a [`CursorSession`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Request>,
    view: watch::Receiver<CursorView>,
}

impl SessionHandle {
    /// Queue a command for the session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionClosed`] if the session task has ended.
    pub async fn send(&self, command: CursorCommand) -> Result<(), SessionClosed> {
        self.commands
            .send(Request {
                command,
                reply: None,
            })
            .await
            .map_err(|_| SessionClosed)
    }

    /// Apply a command and wait for the session to handle it.
    ///
    /// Returns the view right after the command and before any later tick.
    /// For [`CursorCommand::Close`] it is the final view.
    ///
    /// # Errors
    ///
    /// Returns [`SessionClosed`] if the session task has ended.
    pub async fn request(&self, command: CursorCommand) -> Result<CursorView, SessionClosed> {
        let (reply, acknowledged) = oneshot::channel();
        self.commands
            .send(Request {
                command,
                reply: Some(reply),
            })
            .await
            .map_err(|_| SessionClosed)?;
        acknowledged.await.map_err(|_| SessionClosed)
    }

    /// A receiver that observes every published view.
    pub fn subscribe(&self) -> watch::Receiver<CursorView> {
        self.view.clone()
    }

    /// The most recently published view.
    pub fn current(&self) -> CursorView {
        self.view.borrow().clone()
    }
}

/// A cursor driven on a single tokio task.
#[derive(Debug)]
pub struct CursorSession {
    cursor: SnapshotCursor<DeadlineScheduler>,
    commands: mpsc::Receiver<Request>,
    view: watch::Sender<CursorView>,
}

impl CursorSession {
    /// Create a session over `trace` and the handle that controls it.
    ///
    /// `period` is the delay between auto-advance ticks.
    pub fn new(trace: Arc<Trace>, period: Duration) -> (Self, SessionHandle) {
        let cursor = SnapshotCursor::new(trace, DeadlineScheduler::new(), period);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (view_tx, view_rx) = watch::channel(CursorView::of(&cursor));
        let session = Self {
            cursor,
            commands: command_rx,
            view: view_tx,
        };
        let handle = SessionHandle {
            commands: command_tx,
            view: view_rx,
        };
        (session, handle)
    }

    /// Drive the cursor until [`CursorCommand::Close`] arrives or every
    /// handle is dropped, then return it.
    pub async fn run(mut self) -> SnapshotCursor<DeadlineScheduler> {
        debug!(len = self.cursor.trace().len(), "Cursor session started");

        let closing = loop {
            let due = self.cursor.scheduler().next_due().map(|(_, at)| at);

            tokio::select! {
                biased;

                request = self.commands.recv() => {
                    let Some(Request { command, reply }) = request else {
                        break None;
                    };
                    if command == CursorCommand::Close {
                        break reply;
                    }
                    self.apply(command);
                    self.publish();
                    if let Some(reply) = reply {
                        let _ = reply.send(CursorView::of(&self.cursor));
                    }
                }
                () = sleep_until(due) => {
                    if let Some(token) = self.cursor.scheduler_mut().fire() {
                        if let TickOutcome::Finished(index) = self.cursor.on_tick(token) {
                            debug!(index, "Playback finished");
                        }
                    }
                    self.publish();
                }
            }
        };

        self.cursor.stop_auto_advance();
        self.publish();
        if let Some(reply) = closing {
            let _ = reply.send(CursorView::of(&self.cursor));
        }
        debug!(index = ?self.cursor.index(), "Cursor session closed");
        self.cursor
    }

    fn apply(&mut self, command: CursorCommand) {
        let cursor = &mut self.cursor;
        match command {
            CursorCommand::First => {
                let _ = cursor.first();
            }
            CursorCommand::Last => {
                let _ = cursor.last();
            }
            CursorCommand::Next => {
                let _ = cursor.next();
            }
            CursorCommand::Prev => {
                let _ = cursor.prev();
            }
            CursorCommand::Select(index) => {
                let _ = cursor.select(index);
            }
            CursorCommand::ToggleAutoAdvance => {
                let _ = cursor.toggle_auto_advance();
            }
            CursorCommand::Close => {}
        }
    }

    fn publish(&self) {
        let next = CursorView::of(&self.cursor);
        self.view.send_if_modified(|view| {
            if *view == next {
                false
            } else {
                *view = next;
                true
            }
        });
    }
}

/// Sleep until `deadline`, or forever when there is none.
async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use orgscope_types::{ExecState, Genome, HeadPositions, Termination};

    use super::*;

    const PERIOD: Duration = Duration::from_millis(100);

    fn trace_of(len: u64) -> Arc<Trace> {
        let snapshots = (0..len)
            .map(|cycle| Snapshot {
                cycle,
                instruction: 'm',
                ip: 0,
                heads: HeadPositions::default(),
                memory: String::from("m"),
                registers: vec![0, i32::try_from(cycle).unwrap(), 0],
                input_buffer: Vec::new(),
                output_buffer: Vec::new(),
                stack: Vec::new(),
                tasks: Vec::new(),
                state: ExecState::Running,
            })
            .collect();
        Arc::new(Trace::from_parts(Genome::new("m"), snapshots, Termination::CycleCap).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn commands_update_the_view() {
        let (session, handle) = CursorSession::new(trace_of(5), PERIOD);
        let task = tokio::spawn(session.run());
        let mut view = handle.subscribe();

        handle.send(CursorCommand::Select(3)).await.unwrap();
        let seen = view.wait_for(|v| v.index == Some(3)).await.unwrap().clone();
        assert_eq!(seen.len, 5);
        assert_eq!(seen.snapshot.map(|s| s.cycle), Some(3));

        handle.send(CursorCommand::Select(-9)).await.unwrap();
        view.wait_for(|v| v.index == Some(0)).await.unwrap();

        handle.send(CursorCommand::Close).await.unwrap();
        let cursor = task.await.unwrap();
        assert_eq!(cursor.index(), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn auto_advance_plays_to_the_end() {
        let (session, handle) = CursorSession::new(trace_of(5), PERIOD);
        let task = tokio::spawn(session.run());
        let mut view = handle.subscribe();
        let started = Instant::now();

        handle.send(CursorCommand::ToggleAutoAdvance).await.unwrap();
        view.wait_for(|v| v.index == Some(4) && !v.auto_advancing)
            .await
            .unwrap();
        assert!(started.elapsed() >= PERIOD * 4);

        // Nothing else happens once playback has finished.
        tokio::time::sleep(PERIOD * 10).await;
        assert_eq!(handle.current().index, Some(4));
        assert!(!handle.current().auto_advancing);

        drop(view);
        drop(handle);
        let cursor = task.await.unwrap();
        assert_eq!(cursor.index(), Some(4));
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_stops_playback() {
        let (session, handle) = CursorSession::new(trace_of(10), PERIOD);
        let task = tokio::spawn(session.run());
        let mut view = handle.subscribe();

        handle.send(CursorCommand::ToggleAutoAdvance).await.unwrap();
        view.wait_for(|v| v.index == Some(2)).await.unwrap();
        handle.send(CursorCommand::ToggleAutoAdvance).await.unwrap();
        view.wait_for(|v| !v.auto_advancing).await.unwrap();
        let stopped_at = handle.current().index;

        tokio::time::sleep(PERIOD * 20).await;
        assert_eq!(handle.current().index, stopped_at);

        handle.send(CursorCommand::Close).await.unwrap();
        let cursor = task.await.unwrap();
        assert!(cursor.scheduler().next_due().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn acknowledged_stop_freezes_the_cursor() {
        let (session, handle) = CursorSession::new(trace_of(10), PERIOD);
        let task = tokio::spawn(session.run());

        let started = handle.request(CursorCommand::ToggleAutoAdvance).await.unwrap();
        assert!(started.auto_advancing);
        assert_eq!(started.index, Some(0));

        tokio::time::sleep(PERIOD * 3 + PERIOD / 2).await;
        let stopped = handle.request(CursorCommand::ToggleAutoAdvance).await.unwrap();
        assert!(!stopped.auto_advancing);
        assert_eq!(stopped.index, Some(3));

        tokio::time::sleep(PERIOD * 20).await;
        assert_eq!(handle.current(), stopped);

        let moved = handle.request(CursorCommand::Next).await.unwrap();
        assert_eq!(moved.index, Some(4));

        let last = handle.request(CursorCommand::Close).await.unwrap();
        assert_eq!(last.index, Some(4));
        let cursor = task.await.unwrap();
        assert_eq!(cursor.index(), Some(4));
        assert!(handle.request(CursorCommand::Next).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_trace_session_stays_empty() {
        let (session, handle) = CursorSession::new(trace_of(0), PERIOD);
        let task = tokio::spawn(session.run());

        handle.send(CursorCommand::ToggleAutoAdvance).await.unwrap();
        handle.send(CursorCommand::Next).await.unwrap();
        handle.send(CursorCommand::Close).await.unwrap();
        let cursor = task.await.unwrap();

        assert_eq!(cursor.index(), None);
        assert_eq!(handle.current().index, None);
        assert!(!handle.current().auto_advancing);
        assert!(handle.send(CursorCommand::Next).await.is_err());
    }
}

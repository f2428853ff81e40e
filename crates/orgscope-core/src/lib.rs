//! Trace capture, snapshot navigation and the run-event bridge.
//!
//! This crate owns the two subsystems behind the organism viewer:
//! stepping a genome into an immutable trace and navigating it, and
//! carrying events from a population run on its own thread to a single
//! observer.
//!
//! # Modules
//!
//! - [`capture`] -- [`TraceCapture`], which drives a fresh machine per genome
//!   into a [`Trace`].
//! - [`config`] -- Configuration loading from `orgscope-config.yaml` into
//!   strongly-typed structs.
//! - [`cursor`] -- [`SnapshotCursor`] navigation state machine, auto-advance
//!   and the [`TickScheduler`] seam.
//! - [`session`] -- [`CursorSession`], the tokio timeline that owns a
//!   cursor and fires its ticks.
//! - [`listener`] -- [`RunListener`] and [`EventSink`], the bounded
//!   single-producer bridge to one observer.
//! - [`run`] -- [`Run`], which drives a [`PopulationEngine`] on a dedicated
//!   thread and publishes through an [`EventSink`].
//!
//! [`TraceCapture`]: capture::TraceCapture
//! [`Trace`]: orgscope_types::Trace
//! [`SnapshotCursor`]: cursor::SnapshotCursor
//! [`TickScheduler`]: cursor::TickScheduler
//! [`CursorSession`]: session::CursorSession
//! [`RunListener`]: listener::RunListener
//! [`EventSink`]: listener::EventSink
//! [`Run`]: run::Run
//! [`PopulationEngine`]: run::PopulationEngine

pub mod capture;
pub mod config;
pub mod cursor;
pub mod listener;
pub mod run;
pub mod session;

//! Shared type definitions for the Orgscope organism viewer core.
//!
//! Everything the trace engine, the cursor and the run-event bridge pass
//! between each other lives here as plain immutable values. Types flow to
//! `TypeScript` via `ts-rs` for the viewer front end.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe identifier for population runs
//! - [`genome`] -- Opaque genome handle handed to the trace engine
//! - [`trace`] -- Machine-state snapshots and the immutable trace
//! - [`task`] -- Logic tasks scored from an organism's outputs
//! - [`events`] -- Map and update events published by a running population

pub mod events;
pub mod genome;
pub mod ids;
pub mod task;
pub mod trace;

// Re-export all public types at crate root for convenience.
pub use events::{MapEvent, MapMode, RunEvent, UpdateEvent};
pub use genome::Genome;
pub use ids::RunId;
pub use task::{LogicTask, TaskCount};
pub use trace::{ExecState, HeadPositions, Snapshot, Termination, Trace, TraceError, VmFault};

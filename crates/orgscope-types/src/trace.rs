//! Machine-state snapshots and the immutable execution trace.
//!
//! A [`Trace`] is built once by the capture engine and never changes
//! afterwards. Each [`Snapshot`] holds the virtual CPU state strictly
//! *after* the instruction executed at its cycle.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::genome::Genome;
use crate::task::TaskCount;

/// A fault raised by a virtual machine while executing a step.
///
/// Faults never propagate out of a capture: they become the execution
/// state of the terminal snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS, thiserror::Error)]
#[ts(export, export_to = "bindings/")]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VmFault {
    /// `h-alloc` executed after memory was already allocated.
    #[error("memory already allocated")]
    AlreadyAllocated,

    /// Memory held a symbol outside the instruction set.
    #[error("invalid instruction symbol {symbol:?}")]
    InvalidInstruction {
        /// The offending symbol.
        symbol: char,
    },

    /// Any other machine-specific failure.
    #[error("internal fault: {message}")]
    Internal {
        /// Description supplied by the machine.
        message: String,
    },
}

/// Execution state of the machine after a step.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ExecState {
    /// The machine can keep stepping.
    Running,
    /// The machine stopped on its own (e.g. a successful divide).
    Halted,
    /// The machine stopped on a fault.
    Faulted {
        /// What went wrong.
        fault: VmFault,
    },
}

impl ExecState {
    /// Whether the machine stopped, either cleanly or on a fault.
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Positions of the heads other than the instruction pointer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct HeadPositions {
    /// Read head, source of `h-copy`.
    pub read: usize,
    /// Write head, destination of `h-copy`.
    pub write: usize,
    /// Flow head, the jump target.
    pub flow: usize,
}

/// One organism machine state at a given execution cycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Snapshot {
    /// Step counter, starting at 0 for the first executed instruction.
    pub cycle: u64,
    /// Symbol of the instruction executed at this cycle.
    pub instruction: char,
    /// Instruction pointer after the step.
    pub ip: usize,
    /// Read, write and flow heads after the step.
    pub heads: HeadPositions,
    /// Memory after the step as instruction symbols, offspring region
    /// included.
    pub memory: String,
    /// Register file, fixed arity for a given machine.
    pub registers: Vec<i32>,
    /// Inputs consumed by I/O instructions so far, oldest first.
    pub input_buffer: Vec<i32>,
    /// Outputs produced by I/O instructions so far, oldest first.
    pub output_buffer: Vec<i32>,
    /// Active operand stack, top first.
    pub stack: Vec<i32>,
    /// Logic tasks performed by the outputs so far, one entry per task.
    pub tasks: Vec<TaskCount>,
    /// Whether the machine is still running after this step.
    pub state: ExecState,
}

/// Why a capture stopped stepping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Termination {
    /// The cycle cap was reached.
    CycleCap,
    /// The machine halted.
    Halted,
    /// The machine faulted; the last snapshot carries the fault.
    Faulted {
        /// The fault raised.
        fault: VmFault,
    },
    /// The full machine state repeated an earlier one.
    Loop {
        /// Cycle whose state the final snapshot repeats.
        repeats_cycle: u64,
    },
}

/// Errors raised when assembling a [`Trace`] from parts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TraceError {
    /// Snapshot cycles are not `0, 1, 2, ...`.
    #[error("snapshot at position {position} has cycle {cycle}")]
    NonContiguousCycles {
        /// Position of the first offending snapshot.
        position: usize,
        /// The cycle found there.
        cycle: u64,
    },

    /// A snapshot before the last one is not running.
    #[error("snapshot at cycle {cycle} is terminal but not last")]
    EarlyTerminal {
        /// Cycle of the offending snapshot.
        cycle: u64,
    },
}

/// An ordered, immutable sequence of snapshots for one genome run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Trace {
    genome: Genome,
    snapshots: Vec<Snapshot>,
    termination: Termination,
}

impl Trace {
    /// Assemble a trace, checking that cycles run `0, 1, 2, ...` without
    /// gaps and that only the final snapshot may be terminal.
    ///
    /// # Errors
    ///
    /// Returns [`TraceError`] if either invariant is violated.
    pub fn from_parts(
        genome: Genome,
        snapshots: Vec<Snapshot>,
        termination: Termination,
    ) -> Result<Self, TraceError> {
        let last = snapshots.len().saturating_sub(1);
        for (position, snapshot) in snapshots.iter().enumerate() {
            if u64::try_from(position).ok() != Some(snapshot.cycle) {
                return Err(TraceError::NonContiguousCycles {
                    position,
                    cycle: snapshot.cycle,
                });
            }
            if position != last && snapshot.state.is_terminal() {
                return Err(TraceError::EarlyTerminal {
                    cycle: snapshot.cycle,
                });
            }
        }
        Ok(Self {
            genome,
            snapshots,
            termination,
        })
    }

    /// The genome this trace executed.
    pub const fn genome(&self) -> &Genome {
        &self.genome
    }

    /// Why capture stopped.
    pub const fn termination(&self) -> &Termination {
        &self.termination
    }

    /// All snapshots in cycle order.
    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    /// Snapshot at `index`, if any.
    pub fn get(&self, index: usize) -> Option<&Snapshot> {
        self.snapshots.get(index)
    }

    /// The final snapshot, if any.
    pub fn last(&self) -> Option<&Snapshot> {
        self.snapshots.last()
    }

    /// Number of snapshots.
    pub const fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Whether the trace has no snapshots.
    pub const fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Iterate over snapshots in cycle order.
    pub fn iter(&self) -> core::slice::Iter<'_, Snapshot> {
        self.snapshots.iter()
    }
}

impl<'a> IntoIterator for &'a Trace {
    type Item = &'a Snapshot;
    type IntoIter = core::slice::Iter<'a, Snapshot>;

    fn into_iter(self) -> Self::IntoIter {
        self.snapshots.iter()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn snapshot(cycle: u64, state: ExecState) -> Snapshot {
        Snapshot {
            cycle,
            instruction: 'a',
            ip: 0,
            heads: HeadPositions::default(),
            memory: String::from("ab"),
            registers: vec![0, 0, 0],
            input_buffer: Vec::new(),
            output_buffer: Vec::new(),
            stack: Vec::new(),
            tasks: Vec::new(),
            state,
        }
    }

    #[test]
    fn accepts_contiguous_cycles() {
        let trace = Trace::from_parts(
            Genome::new("ab"),
            vec![
                snapshot(0, ExecState::Running),
                snapshot(1, ExecState::Halted),
            ],
            Termination::Halted,
        )
        .unwrap();
        assert_eq!(trace.len(), 2);
        assert_eq!(trace.last().map(|s| s.cycle), Some(1));
        assert_eq!(trace.termination(), &Termination::Halted);
    }

    #[test]
    fn rejects_gap_in_cycles() {
        let result = Trace::from_parts(
            Genome::new("ab"),
            vec![snapshot(0, ExecState::Running), snapshot(2, ExecState::Running)],
            Termination::CycleCap,
        );
        assert_eq!(
            result.unwrap_err(),
            TraceError::NonContiguousCycles {
                position: 1,
                cycle: 2
            }
        );
    }

    #[test]
    fn rejects_terminal_snapshot_before_end() {
        let result = Trace::from_parts(
            Genome::new("ab"),
            vec![snapshot(0, ExecState::Halted), snapshot(1, ExecState::Running)],
            Termination::CycleCap,
        );
        assert_eq!(result.unwrap_err(), TraceError::EarlyTerminal { cycle: 0 });
    }

    #[test]
    fn empty_trace_is_valid() {
        let trace = Trace::from_parts(Genome::new("a"), Vec::new(), Termination::CycleCap).unwrap();
        assert!(trace.is_empty());
        assert!(trace.last().is_none());
    }

    #[test]
    fn fault_state_serializes_with_tag() {
        let state = ExecState::Faulted {
            fault: VmFault::AlreadyAllocated,
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["state"], "faulted");
        assert_eq!(json["fault"]["kind"], "already_allocated");
    }
}

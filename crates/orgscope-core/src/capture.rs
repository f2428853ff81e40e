//! Trace capture: stepping one genome into an immutable [`Trace`].
//!
//! A capture loads a fresh machine, steps it synchronously and records one
//! [`Snapshot`] per cycle. It stops at the first of:
//!
//! 1. **Cycle cap** -- the requested number of cycles has run.
//! 2. **Halt** -- the machine stopped on its own.
//! 3. **Fault** -- the machine raised a [`VmFault`]; the fault is recorded in
//!    the terminal snapshot instead of being propagated.
//! 4. **Loop** -- the full machine state equals one seen within the lookback
//!    window, so nothing new can happen.
//!
//! Every snapshot also records memory with the read, write and flow heads,
//! and how many outputs so far performed each logic task.
//!
//! Captures never read the wall clock or unseeded randomness, so the same
//! genome and cycle cap always produce the same trace.
//!
//! [`VmFault`]: orgscope_types::VmFault

use std::collections::VecDeque;

use orgscope_types::{ExecState, Genome, Snapshot, Termination, Trace, TraceError};
use orgscope_vm::tasks::task_counts;
use orgscope_vm::{HeadsLoader, LoadError, MachineLoader, StateKey, StepStatus, VirtualMachine};
use tracing::{debug, info};

use crate::config::CaptureConfig;

/// Errors that can occur during a capture.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// The genome could not be loaded into the machine.
    #[error("invalid genome: {source}")]
    InvalidGenome {
        /// The underlying load error.
        #[from]
        source: LoadError,
    },

    /// The recorded snapshots broke a trace invariant.
    #[error("inconsistent trace: {source}")]
    Inconsistent {
        /// The underlying trace error.
        #[from]
        source: TraceError,
    },
}

/// Drives machines from a [`MachineLoader`] into traces.
#[derive(Debug, Clone)]
pub struct TraceCapture<L = HeadsLoader> {
    loader: L,
    loop_lookback: usize,
}

impl TraceCapture<HeadsLoader> {
    /// A capture engine for the heads CPU.
    pub fn new(config: &CaptureConfig) -> Self {
        Self::with_loader(HeadsLoader::new(), config.loop_lookback)
    }
}

impl<L: MachineLoader> TraceCapture<L> {
    /// A capture engine for any machine.
    ///
    /// `loop_lookback` is how many recent states are compared for loop
    /// detection; 0 disables it.
    pub const fn with_loader(loader: L, loop_lookback: usize) -> Self {
        Self {
            loader,
            loop_lookback,
        }
    }

    /// Step `genome` for at most `cycle_cap` cycles and return the trace.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::InvalidGenome`] if the genome fails to load;
    /// no trace is produced in that case.
    pub fn capture(&self, genome: Genome, cycle_cap: u64) -> Result<Trace, CaptureError> {
        let mut machine = self.loader.load(&genome)?;
        debug!(genome_len = genome.len(), cycle_cap, "Capture starting");

        let mut snapshots = Vec::new();
        let mut recent: VecDeque<(StateKey, u64)> = VecDeque::with_capacity(self.loop_lookback);
        let mut cycle: u64 = 0;

        let termination = loop {
            if cycle >= cycle_cap {
                break Termination::CycleCap;
            }

            let instruction = machine.next_instruction();
            match machine.step() {
                Ok(step) => {
                    let state = match step.status {
                        StepStatus::Running => ExecState::Running,
                        StepStatus::Halted => ExecState::Halted,
                    };
                    snapshots.push(snapshot(&machine, cycle, step.instruction, state));
                    if step.status == StepStatus::Halted {
                        break Termination::Halted;
                    }
                }
                Err(fault) => {
                    let state = ExecState::Faulted {
                        fault: fault.clone(),
                    };
                    snapshots.push(snapshot(&machine, cycle, instruction, state));
                    break Termination::Faulted { fault };
                }
            }

            if self.loop_lookback > 0 {
                let key = machine.state_key();
                if let Some((_, seen)) = recent.iter().find(|(k, _)| *k == key) {
                    break Termination::Loop {
                        repeats_cycle: *seen,
                    };
                }
                if recent.len() >= self.loop_lookback {
                    recent.pop_front();
                }
                recent.push_back((key, cycle));
            }

            cycle = cycle.saturating_add(1);
        };

        debug!(termination = ?termination, "Capture terminated");
        let trace = Trace::from_parts(genome, snapshots, termination)?;
        info!(
            snapshots = trace.len(),
            termination = ?trace.termination(),
            "Trace captured"
        );
        Ok(trace)
    }
}

/// Materialize the machine's current state.
fn snapshot<M: VirtualMachine>(
    machine: &M,
    cycle: u64,
    instruction: char,
    state: ExecState,
) -> Snapshot {
    Snapshot {
        cycle,
        instruction,
        ip: machine.ip(),
        heads: machine.heads(),
        memory: machine.memory(),
        registers: machine.registers(),
        input_buffer: machine.input_buffer().to_vec(),
        output_buffer: machine.output_buffer().to_vec(),
        stack: machine.stack(),
        tasks: task_counts(machine.input_buffer(), machine.output_buffer()),
        state,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use orgscope_types::{HeadPositions, LogicTask, VmFault};

    use super::*;

    fn engine() -> TraceCapture {
        TraceCapture::new(&CaptureConfig::default())
    }

    /// Allocates, copies eleven instructions, then divides at cycle 12.
    fn dividing_genome() -> Genome {
        Genome::new(format!("w{}x", "v".repeat(11)))
    }

    #[test]
    fn halting_genome_stops_at_divide() {
        let trace = engine().capture(dividing_genome(), 100).unwrap();
        assert_eq!(trace.len(), 13);
        let cycles: Vec<u64> = trace.iter().map(|s| s.cycle).collect();
        assert_eq!(cycles, (0..13).collect::<Vec<u64>>());
        assert_eq!(trace.last().map(|s| &s.state), Some(&ExecState::Halted));
        assert_eq!(trace.last().map(|s| s.instruction), Some('x'));
        assert_eq!(trace.termination(), &Termination::Halted);
    }

    #[test]
    fn cycle_cap_bounds_trace() {
        let trace = engine().capture(Genome::new("m"), 10).unwrap();
        assert_eq!(trace.len(), 10);
        assert_eq!(trace.termination(), &Termination::CycleCap);
        assert!(trace.iter().all(|s| s.state == ExecState::Running));
    }

    #[test]
    fn zero_cap_yields_empty_trace() {
        let trace = engine().capture(Genome::new("m"), 0).unwrap();
        assert!(trace.is_empty());
        assert_eq!(trace.termination(), &Termination::CycleCap);
    }

    #[test]
    fn repeated_state_ends_in_loop() {
        let trace = engine().capture(Genome::new("aa"), 100).unwrap();
        assert_eq!(trace.len(), 3);
        assert_eq!(trace.termination(), &Termination::Loop { repeats_cycle: 0 });
    }

    #[test]
    fn zero_lookback_disables_loop_detection() {
        let capture = TraceCapture::with_loader(HeadsLoader::new(), 0);
        let trace = capture.capture(Genome::new("aa"), 10).unwrap();
        assert_eq!(trace.len(), 10);
        assert_eq!(trace.termination(), &Termination::CycleCap);
    }

    #[test]
    fn fault_becomes_terminal_snapshot() {
        let trace = engine().capture(Genome::new("ww"), 100).unwrap();
        assert_eq!(trace.len(), 2);
        let last = trace.last().unwrap();
        assert_eq!(last.instruction, 'w');
        assert_eq!(
            last.state,
            ExecState::Faulted {
                fault: VmFault::AlreadyAllocated
            }
        );
        assert_eq!(
            trace.termination(),
            &Termination::Faulted {
                fault: VmFault::AlreadyAllocated
            }
        );
    }

    #[test]
    fn malformed_genome_is_rejected() {
        let err = engine().capture(Genome::new("ab!"), 100).unwrap_err();
        assert!(matches!(
            err,
            CaptureError::InvalidGenome {
                source: LoadError::UnknownSymbol { position: 2, .. }
            }
        ));
        assert!(matches!(
            engine().capture(Genome::new(""), 10).unwrap_err(),
            CaptureError::InvalidGenome {
                source: LoadError::Empty
            }
        ));
    }

    #[test]
    fn capture_is_deterministic() {
        let genome = Genome::new("mymyoryzabcsdtu");
        let first = engine().capture(genome.clone(), 200).unwrap();
        let second = engine().capture(genome, 200).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }

    #[test]
    fn cycles_are_strictly_increasing() {
        let trace = engine().capture(Genome::new("mymyoqpzabcgh"), 300).unwrap();
        assert!(!trace.is_empty());
        assert!(
            trace
                .snapshots()
                .windows(2)
                .all(|pair| matches!(pair, [a, b] if a.cycle < b.cycle))
        );
    }

    #[test]
    fn snapshots_reflect_state_after_step() {
        let trace = engine().capture(Genome::new("mmo"), 3).unwrap();
        let registers: Vec<Vec<i32>> = trace.iter().map(|s| s.registers.clone()).collect();
        assert_eq!(registers, vec![vec![0, 1, 0], vec![0, 2, 0], vec![0, 2, 0]]);
        assert_eq!(trace.last().map(|s| s.stack.clone()), Some(vec![2]));
    }

    #[test]
    fn snapshots_record_memory_and_heads() {
        let trace = engine().capture(Genome::new("wvx"), 10).unwrap();
        let alloc = trace.get(0).unwrap();
        assert_eq!(alloc.memory, "wvxaaa");
        assert_eq!(
            alloc.heads,
            HeadPositions {
                read: 0,
                write: 3,
                flow: 0
            }
        );
        let copy = trace.get(1).unwrap();
        assert_eq!(copy.memory, "wvxwaa");
        assert_eq!(
            copy.heads,
            HeadPositions {
                read: 1,
                write: 4,
                flow: 0
            }
        );
    }

    #[test]
    fn nand_output_is_counted_as_a_task() {
        // IO into CX, IO into BX, nand, then IO writes the result.
        let trace = engine().capture(Genome::new("ycyuy"), 4).unwrap();
        let last = trace.last().unwrap();
        assert_eq!(last.output_buffer.len(), 3);
        let performed: Vec<(LogicTask, u32)> = last
            .tasks
            .iter()
            .filter(|c| c.count > 0)
            .map(|c| (c.task, c.count))
            .collect();
        assert_eq!(performed, vec![(LogicTask::Nand, 1)]);

        // No task before the result is written.
        let before = trace.get(2).unwrap();
        assert_eq!(before.tasks.len(), LogicTask::ALL.len());
        assert!(before.tasks.iter().all(|c| c.count == 0));
    }
}

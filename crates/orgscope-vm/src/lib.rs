//! Virtual machine seam for the Orgscope trace engine.
//!
//! The trace engine never knows which CPU it drives. It loads a fresh
//! machine per capture through a [`MachineLoader`] and steps it through the
//! [`VirtualMachine`] trait. [`HeadsCpu`] is the reference machine: the
//! Avida heads instruction set without mutation.
//!
//! # Modules
//!
//! - [`instruction`] -- Instruction symbols, mnemonics and nop modifiers
//! - [`heads`] -- The heads CPU and its loader
//! - [`inputs`] -- Deterministic environment inputs for I/O
//! - [`tasks`] -- Scoring outputs against the logic tasks
//! - [`org`] -- Parsing of `.org` genome files

pub mod heads;
pub mod inputs;
pub mod instruction;
pub mod org;
pub mod tasks;

pub use heads::{HeadsCpu, HeadsLoader};
pub use instruction::Instruction;

use orgscope_types::{Genome, HeadPositions, VmFault};

/// Longest genome a machine will load.
pub const MAX_GENOME_LENGTH: usize = 2048;

/// Errors raised while loading a genome into a machine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    /// The genome has no instructions.
    #[error("genome is empty")]
    Empty,

    /// The genome contains a symbol outside the instruction set.
    #[error("unknown instruction symbol {symbol:?} at position {position}")]
    UnknownSymbol {
        /// Position of the symbol in the genome.
        position: usize,
        /// The offending symbol.
        symbol: char,
    },

    /// The genome exceeds [`MAX_GENOME_LENGTH`].
    #[error("genome length {len} exceeds the maximum of {max}")]
    TooLong {
        /// Actual length.
        len: usize,
        /// Maximum accepted length.
        max: usize,
    },
}

/// Outcome of one successful step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// The machine can keep stepping.
    Running,
    /// The machine stopped on its own.
    Halted,
}

/// One executed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    /// Symbol of the executed instruction.
    pub instruction: char,
    /// Whether the machine is still running.
    pub status: StepStatus,
}

/// Full machine state used for loop detection.
///
/// Two keys compare equal exactly when the machine would behave the same
/// from here on: registers, stacks, positions and every byte of state the
/// machine reads back, memory included.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateKey {
    /// Register file.
    pub registers: Vec<i32>,
    /// Every operand stack, bottom first.
    pub stacks: Vec<Vec<i32>>,
    /// Instruction pointer, other heads and any other positional state.
    pub positions: Vec<usize>,
    /// Memory contents and any other content the machine reads back.
    pub contents: Vec<u8>,
}

/// A virtual CPU executing one genome step by step.
pub trait VirtualMachine {
    /// Execute the instruction under the instruction pointer.
    ///
    /// # Errors
    ///
    /// Returns [`VmFault`] when the instruction cannot execute. The machine
    /// must not be stepped again after a fault.
    fn step(&mut self) -> Result<Step, VmFault>;

    /// Register file.
    fn registers(&self) -> Vec<i32>;

    /// Active operand stack, top first.
    fn stack(&self) -> Vec<i32>;

    /// Inputs consumed so far, oldest first.
    fn input_buffer(&self) -> &[i32];

    /// Outputs produced so far, oldest first.
    fn output_buffer(&self) -> &[i32];

    /// Instruction pointer.
    fn ip(&self) -> usize;

    /// Positions of the remaining heads.
    fn heads(&self) -> HeadPositions;

    /// Memory rendered as instruction symbols.
    fn memory(&self) -> String;

    /// Symbol of the instruction under the instruction pointer.
    fn next_instruction(&self) -> char;

    /// Fingerprint of the full machine state.
    fn state_key(&self) -> StateKey;
}

/// Builds a fresh machine for a genome.
pub trait MachineLoader {
    /// The machine type produced.
    type Machine: VirtualMachine;

    /// Load `genome` into a new machine.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError`] if the genome is malformed.
    fn load(&self, genome: &Genome) -> Result<Self::Machine, LoadError>;
}

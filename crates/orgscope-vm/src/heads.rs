//! The heads CPU.
//!
//! Memory is circular and starts as a copy of the genome. Four heads point
//! into it: the instruction pointer, the read and write heads used for
//! copying, and the flow head used as a jump target. A nop following an
//! instruction selects which register or head the instruction acts on and
//! is consumed with it.
//!
//! The machine halts when `h-divide` succeeds, which is where an organism
//! trace naturally ends.

use orgscope_types::{Genome, HeadPositions, VmFault};
use tracing::trace;

use crate::inputs::{environment_inputs, genome_seed};
use crate::instruction::{Instruction, Nop};
use crate::{LoadError, MachineLoader, MAX_GENOME_LENGTH, StateKey, Step, StepStatus, VirtualMachine};

/// Maximum number of entries per stack; pushing more drops the bottom.
const STACK_DEPTH: usize = 10;

/// Longest label read after an instruction.
const MAX_LABEL_LENGTH: usize = 10;

/// A register, selected by nop modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Register {
    Ax,
    Bx,
    Cx,
}

impl Register {
    const fn from_nop(nop: Nop) -> Self {
        match nop {
            Nop::A => Self::Ax,
            Nop::B => Self::Bx,
            Nop::C => Self::Cx,
        }
    }

    /// The register compared against or swapped with this one.
    const fn next(self) -> Self {
        match self {
            Self::Ax => Self::Bx,
            Self::Bx => Self::Cx,
            Self::Cx => Self::Ax,
        }
    }
}

/// A head, selected by nop modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Head {
    Ip,
    Read,
    Write,
}

impl Head {
    const fn from_nop(nop: Nop) -> Self {
        match nop {
            Nop::A => Self::Ip,
            Nop::B => Self::Read,
            Nop::C => Self::Write,
        }
    }
}

/// Loads genomes into fresh [`HeadsCpu`] instances.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeadsLoader {
    input_seed: Option<u64>,
}

impl HeadsLoader {
    /// A loader seeding environment inputs from each genome.
    pub const fn new() -> Self {
        Self { input_seed: None }
    }

    /// A loader using a fixed input seed for every genome.
    pub const fn with_input_seed(seed: u64) -> Self {
        Self {
            input_seed: Some(seed),
        }
    }
}

impl MachineLoader for HeadsLoader {
    type Machine = HeadsCpu;

    fn load(&self, genome: &Genome) -> Result<HeadsCpu, LoadError> {
        let seed = self
            .input_seed
            .unwrap_or_else(|| genome_seed(genome.symbols()));
        HeadsCpu::load(genome, seed)
    }
}

/// The heads virtual CPU.
#[derive(Debug, Clone)]
pub struct HeadsCpu {
    memory: Vec<Instruction>,
    registers: [i32; 3],
    stacks: [Vec<i32>; 2],
    active_stack: usize,
    ip: usize,
    read: usize,
    write: usize,
    flow: usize,
    /// Start of the offspring region once `h-alloc` has run.
    allocated: Option<usize>,
    /// Nops most recently copied by `h-copy`, checked by `if-label`.
    copied_label: Vec<Nop>,
    inputs: [i32; 3],
    input_pointer: usize,
    input_buffer: Vec<i32>,
    output_buffer: Vec<i32>,
    halted: bool,
}

impl HeadsCpu {
    /// Decode `genome` into memory and reset all state.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError`] if the genome is empty, too long, or contains
    /// an unknown symbol.
    pub fn load(genome: &Genome, input_seed: u64) -> Result<Self, LoadError> {
        if genome.is_empty() {
            return Err(LoadError::Empty);
        }
        if genome.len() > MAX_GENOME_LENGTH {
            return Err(LoadError::TooLong {
                len: genome.len(),
                max: MAX_GENOME_LENGTH,
            });
        }
        let memory = genome
            .symbols()
            .iter()
            .enumerate()
            .map(|(position, &symbol)| {
                Instruction::from_symbol(symbol).ok_or(LoadError::UnknownSymbol {
                    position,
                    symbol: char::from(symbol),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            memory,
            registers: [0; 3],
            stacks: [Vec::new(), Vec::new()],
            active_stack: 0,
            ip: 0,
            read: 0,
            write: 0,
            flow: 0,
            allocated: None,
            copied_label: Vec::new(),
            inputs: environment_inputs(input_seed),
            input_pointer: 0,
            input_buffer: Vec::new(),
            output_buffer: Vec::new(),
            halted: false,
        })
    }

    /// Current memory size, including any allocated offspring region.
    pub const fn memory_len(&self) -> usize {
        self.memory.len()
    }

    /// Memory rendered as genome symbols.
    pub fn memory_symbols(&self) -> String {
        self.memory.iter().map(|i| i.symbol()).collect()
    }

    /// Memory symbols, then the copied label, as bytes for the state key.
    fn contents(&self) -> Vec<u8> {
        let byte = |instruction: Instruction| u8::try_from(instruction.symbol()).unwrap_or(b'?');
        let mut contents: Vec<u8> = self.memory.iter().copied().map(byte).collect();
        contents.push(b'|');
        contents.extend(
            self.copied_label
                .iter()
                .map(|&nop| byte(Instruction::from_nop(nop))),
        );
        contents
    }

    /// Whether `h-divide` has succeeded.
    pub const fn is_halted(&self) -> bool {
        self.halted
    }

    // -----------------------------------------------------------------------
    // Addressing
    // -----------------------------------------------------------------------

    fn wrap(&self, position: usize) -> usize {
        position.checked_rem(self.memory.len()).unwrap_or(0)
    }

    fn after(&self, position: usize) -> usize {
        self.wrap(position.wrapping_add(1))
    }

    fn offset(&self, position: usize, delta: i32) -> usize {
        let Ok(len) = i64::try_from(self.memory.len()) else {
            return 0;
        };
        let Ok(start) = i64::try_from(position) else {
            return 0;
        };
        start
            .wrapping_add(i64::from(delta))
            .checked_rem_euclid(len)
            .and_then(|p| usize::try_from(p).ok())
            .unwrap_or(0)
    }

    fn fetch(&self, position: usize) -> Instruction {
        self.memory
            .get(self.wrap(position))
            .copied()
            .unwrap_or(Instruction::NopA)
    }

    const fn head(&self, head: Head) -> usize {
        match head {
            Head::Ip => self.ip,
            Head::Read => self.read,
            Head::Write => self.write,
        }
    }

    fn set_head(&mut self, head: Head, position: usize) {
        let position = self.wrap(position);
        match head {
            Head::Ip => self.ip = position,
            Head::Read => self.read = position,
            Head::Write => self.write = position,
        }
    }

    const fn reg(&self, register: Register) -> i32 {
        match register {
            Register::Ax => self.registers[0],
            Register::Bx => self.registers[1],
            Register::Cx => self.registers[2],
        }
    }

    const fn set_reg(&mut self, register: Register, value: i32) {
        match register {
            Register::Ax => self.registers[0] = value,
            Register::Bx => self.registers[1] = value,
            Register::Cx => self.registers[2] = value,
        }
    }

    fn stack_mut(&mut self) -> &mut Vec<i32> {
        if self.active_stack == 0 {
            &mut self.stacks[0]
        } else {
            &mut self.stacks[1]
        }
    }

    // -----------------------------------------------------------------------
    // Modifiers and labels
    // -----------------------------------------------------------------------

    /// Consume a nop following the instruction pointer, if present.
    fn take_modifier(&mut self) -> Option<Nop> {
        let next = self.after(self.ip);
        let nop = self.fetch(next).as_nop()?;
        self.ip = next;
        Some(nop)
    }

    fn modified_register(&mut self, default: Register) -> Register {
        self.take_modifier().map_or(default, Register::from_nop)
    }

    fn modified_head(&mut self) -> Head {
        self.take_modifier().map_or(Head::Ip, Head::from_nop)
    }

    /// Consume the label (run of nops) following the instruction pointer.
    fn take_label(&mut self) -> Vec<Nop> {
        let mut label = Vec::new();
        while label.len() < MAX_LABEL_LENGTH {
            match self.take_modifier() {
                Some(nop) => label.push(nop),
                None => break,
            }
        }
        label
    }

    /// Position just past the first forward match of `label`, searching
    /// from `start` and never wrapping back onto it.
    fn find_label(&self, label: &[Nop], start: usize) -> Option<usize> {
        let len = self.memory.len();
        (0..len).find_map(|distance| {
            let begin = self.wrap(start.wrapping_add(distance));
            let matches = label.iter().enumerate().all(|(i, nop)| {
                self.fetch(begin.wrapping_add(i)).as_nop() == Some(*nop)
            });
            matches.then(|| self.wrap(begin.wrapping_add(label.len())))
        })
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Execute `instruction`; returns whether the instruction pointer should
    /// advance afterwards.
    #[allow(clippy::too_many_lines)]
    fn execute(&mut self, instruction: Instruction) -> Result<bool, VmFault> {
        match instruction {
            Instruction::NopA | Instruction::NopB | Instruction::NopC => {}
            Instruction::IfNEqu => {
                let register = self.modified_register(Register::Bx);
                if self.reg(register) == self.reg(register.next()) {
                    self.ip = self.after(self.ip);
                }
            }
            Instruction::IfLess => {
                let register = self.modified_register(Register::Bx);
                if self.reg(register) >= self.reg(register.next()) {
                    self.ip = self.after(self.ip);
                }
            }
            Instruction::IfLabel => {
                let label: Vec<Nop> = self.take_label().iter().map(|n| n.complement()).collect();
                let copied_tail = self
                    .copied_label
                    .len()
                    .checked_sub(label.len())
                    .and_then(|from| self.copied_label.get(from..));
                if copied_tail != Some(label.as_slice()) {
                    self.ip = self.after(self.ip);
                }
            }
            Instruction::MovHead => {
                let head = self.modified_head();
                self.set_head(head, self.flow);
                if head == Head::Ip {
                    return Ok(false);
                }
            }
            Instruction::JmpHead => {
                let head = self.modified_head();
                let target = self.offset(self.head(head), self.reg(Register::Cx));
                self.set_head(head, target);
            }
            Instruction::GetHead => {
                let head = self.modified_head();
                let position = i32::try_from(self.head(head)).unwrap_or(i32::MAX);
                self.set_reg(Register::Cx, position);
            }
            Instruction::SetFlow => {
                let register = self.modified_register(Register::Cx);
                self.flow = self.offset(0, self.reg(register));
            }
            Instruction::ShiftR => {
                let register = self.modified_register(Register::Bx);
                self.set_reg(register, self.reg(register).wrapping_shr(1));
            }
            Instruction::ShiftL => {
                let register = self.modified_register(Register::Bx);
                self.set_reg(register, self.reg(register).wrapping_shl(1));
            }
            Instruction::Inc => {
                let register = self.modified_register(Register::Bx);
                self.set_reg(register, self.reg(register).wrapping_add(1));
            }
            Instruction::Dec => {
                let register = self.modified_register(Register::Bx);
                self.set_reg(register, self.reg(register).wrapping_sub(1));
            }
            Instruction::Push => {
                let register = self.modified_register(Register::Bx);
                let value = self.reg(register);
                let stack = self.stack_mut();
                stack.push(value);
                if stack.len() > STACK_DEPTH {
                    stack.remove(0);
                }
            }
            Instruction::Pop => {
                let register = self.modified_register(Register::Bx);
                let value = self.stack_mut().pop().unwrap_or(0);
                self.set_reg(register, value);
            }
            Instruction::SwapStk => {
                self.active_stack = if self.active_stack == 0 { 1 } else { 0 };
            }
            Instruction::Swap => {
                let register = self.modified_register(Register::Bx);
                let other = register.next();
                let (first, second) = (self.reg(register), self.reg(other));
                self.set_reg(register, second);
                self.set_reg(other, first);
            }
            Instruction::Add => {
                let register = self.modified_register(Register::Bx);
                let value = self.reg(Register::Bx).wrapping_add(self.reg(Register::Cx));
                self.set_reg(register, value);
            }
            Instruction::Sub => {
                let register = self.modified_register(Register::Bx);
                let value = self.reg(Register::Bx).wrapping_sub(self.reg(Register::Cx));
                self.set_reg(register, value);
            }
            Instruction::Nand => {
                let register = self.modified_register(Register::Bx);
                let value = !(self.reg(Register::Bx) & self.reg(Register::Cx));
                self.set_reg(register, value);
            }
            Instruction::HCopy => {
                let copied = self.fetch(self.read);
                let write = self.wrap(self.write);
                if let Some(slot) = self.memory.get_mut(write) {
                    *slot = copied;
                }
                match copied.as_nop() {
                    Some(nop) => self.copied_label.push(nop),
                    None => self.copied_label.clear(),
                }
                self.read = self.after(self.read);
                self.write = self.after(self.write);
            }
            Instruction::HAlloc => {
                if self.allocated.is_some() {
                    return Err(VmFault::AlreadyAllocated);
                }
                let old_len = self.memory.len();
                self.memory
                    .extend(core::iter::repeat_n(Instruction::NopA, old_len));
                self.allocated = Some(old_len);
                self.write = old_len;
                self.set_reg(Register::Ax, i32::try_from(old_len).unwrap_or(i32::MAX));
            }
            Instruction::HDivide => {
                if self.allocated.is_some_and(|start| self.write > start) {
                    self.halted = true;
                }
            }
            Instruction::Io => {
                let register = self.modified_register(Register::Bx);
                self.output_buffer.push(self.reg(register));
                let input = self
                    .inputs
                    .get(self.input_pointer)
                    .copied()
                    .unwrap_or_default();
                self.input_pointer = self
                    .input_pointer
                    .wrapping_add(1)
                    .checked_rem(self.inputs.len())
                    .unwrap_or(0);
                self.input_buffer.push(input);
                self.set_reg(register, input);
            }
            Instruction::HSearch => {
                let origin = self.ip;
                let label = self.take_label();
                let after_label = self.after(self.ip);
                let complement: Vec<Nop> = label.iter().map(|n| n.complement()).collect();
                let found = if complement.is_empty() {
                    None
                } else {
                    self.find_label(&complement, after_label)
                };
                match found {
                    Some(end) => {
                        let distance = end
                            .checked_sub(origin)
                            .unwrap_or_else(|| end.wrapping_add(self.memory.len()).wrapping_sub(origin));
                        self.set_reg(Register::Bx, i32::try_from(distance).unwrap_or(i32::MAX));
                        self.set_reg(Register::Cx, i32::try_from(label.len()).unwrap_or(i32::MAX));
                        self.flow = end;
                    }
                    None => {
                        self.set_reg(Register::Bx, 0);
                        self.set_reg(Register::Cx, 0);
                        self.flow = after_label;
                    }
                }
            }
        }
        Ok(true)
    }
}

impl VirtualMachine for HeadsCpu {
    fn step(&mut self) -> Result<Step, VmFault> {
        let instruction = self.fetch(self.ip);
        if self.halted {
            return Ok(Step {
                instruction: instruction.symbol(),
                status: StepStatus::Halted,
            });
        }

        let advance = self.execute(instruction)?;
        if advance {
            self.ip = self.after(self.ip);
        }
        trace!(
            instruction = instruction.mnemonic(),
            ip = self.ip,
            "heads cpu step"
        );

        let status = if self.halted {
            StepStatus::Halted
        } else {
            StepStatus::Running
        };
        Ok(Step {
            instruction: instruction.symbol(),
            status,
        })
    }

    fn registers(&self) -> Vec<i32> {
        self.registers.to_vec()
    }

    fn stack(&self) -> Vec<i32> {
        let stack = if self.active_stack == 0 {
            &self.stacks[0]
        } else {
            &self.stacks[1]
        };
        stack.iter().rev().copied().collect()
    }

    fn input_buffer(&self) -> &[i32] {
        &self.input_buffer
    }

    fn output_buffer(&self) -> &[i32] {
        &self.output_buffer
    }

    fn ip(&self) -> usize {
        self.ip
    }

    fn heads(&self) -> HeadPositions {
        HeadPositions {
            read: self.read,
            write: self.write,
            flow: self.flow,
        }
    }

    fn memory(&self) -> String {
        self.memory_symbols()
    }

    fn next_instruction(&self) -> char {
        self.fetch(self.ip).symbol()
    }

    fn state_key(&self) -> StateKey {
        StateKey {
            registers: self.registers.to_vec(),
            stacks: self.stacks.to_vec(),
            positions: vec![
                self.ip,
                self.read,
                self.write,
                self.flow,
                self.active_stack,
                self.memory.len(),
                self.allocated.unwrap_or(usize::MAX),
                self.input_pointer,
            ],
            contents: self.contents(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn cpu(genome: &str) -> HeadsCpu {
        HeadsLoader::with_input_seed(1).load(&Genome::new(genome)).unwrap()
    }

    fn run(cpu: &mut HeadsCpu, steps: usize) {
        for _ in 0..steps {
            let _ = cpu.step().unwrap();
        }
    }

    #[test]
    fn rejects_malformed_genomes() {
        let loader = HeadsLoader::new();
        assert_eq!(loader.load(&Genome::new("")).unwrap_err(), LoadError::Empty);
        assert_eq!(
            loader.load(&Genome::new("abZ")).unwrap_err(),
            LoadError::UnknownSymbol {
                position: 2,
                symbol: 'Z'
            }
        );
        let long = "a".repeat(MAX_GENOME_LENGTH + 1);
        assert!(matches!(
            loader.load(&Genome::new(long)).unwrap_err(),
            LoadError::TooLong { .. }
        ));
    }

    #[test]
    fn inc_defaults_to_bx_and_nop_selects_register() {
        let mut cpu = cpu("mmamc");
        run(&mut cpu, 3);
        assert_eq!(cpu.registers(), vec![1, 1, 1]);
        assert_eq!(cpu.ip(), 0);
    }

    #[test]
    fn push_pop_and_swap_stk() {
        let mut cpu = cpu("mmoqpa");
        run(&mut cpu, 3);
        assert_eq!(cpu.stack(), vec![2]);
        run(&mut cpu, 2);
        // The second stack is empty, so pop (modified to AX) yields zero.
        assert_eq!(cpu.registers(), vec![0, 2, 0]);
        assert!(cpu.stack().is_empty());
    }

    #[test]
    fn stack_drops_bottom_past_depth() {
        let mut cpu = cpu("mo");
        run(&mut cpu, 2 * (STACK_DEPTH + 2));
        let stack = cpu.stack();
        assert_eq!(stack.len(), STACK_DEPTH);
        assert_eq!(stack.first(), Some(&12));
        assert_eq!(stack.last(), Some(&3));
    }

    #[test]
    fn if_n_equ_skips_when_equal() {
        // BX == CX == 0, so the inc right after is skipped.
        let mut cpu = cpu("dmaa");
        run(&mut cpu, 2);
        assert_eq!(cpu.registers(), vec![0, 0, 0]);
        assert_eq!(cpu.ip(), 3);
    }

    #[test]
    fn io_outputs_then_reads_input() {
        let mut cpu = cpu("mymm");
        run(&mut cpu, 2);
        let inputs = environment_inputs(1);
        assert_eq!(cpu.output_buffer(), &[1]);
        assert_eq!(cpu.input_buffer(), &[inputs[0]]);
        assert_eq!(cpu.registers().get(1), Some(&inputs[0]));
    }

    #[test]
    fn alloc_copy_divide_halts() {
        let mut cpu = cpu("wvx");
        let first = cpu.step().unwrap();
        assert_eq!(first.status, StepStatus::Running);
        assert_eq!(cpu.memory_len(), 6);
        assert_eq!(cpu.registers().first(), Some(&3));
        let _ = cpu.step().unwrap();
        let last = cpu.step().unwrap();
        assert_eq!(last.instruction, 'x');
        assert_eq!(last.status, StepStatus::Halted);
        assert!(cpu.is_halted());
        assert_eq!(cpu.memory_symbols(), "wvxwaa");
    }

    #[test]
    fn divide_without_copy_does_nothing() {
        let mut cpu = cpu("wx");
        run(&mut cpu, 2);
        assert!(!cpu.is_halted());
    }

    #[test]
    fn second_alloc_faults() {
        let mut cpu = cpu("ww");
        let _ = cpu.step().unwrap();
        assert_eq!(cpu.step().unwrap_err(), VmFault::AlreadyAllocated);
    }

    #[test]
    fn h_search_moves_flow_past_complement() {
        // Label "a" searches for its complement "b" at position 3.
        let mut cpu = cpu("zaebc");
        let _ = cpu.step().unwrap();
        assert_eq!(cpu.flow, 4);
        assert_eq!(cpu.registers(), vec![0, 4, 1]);
        assert_eq!(cpu.ip(), 2);
    }

    #[test]
    fn mov_head_jumps_ip_to_flow() {
        // set-flow with CX = 0 points flow at 0; mov-head then loops back.
        let mut cpu = cpu("jge");
        run(&mut cpu, 2);
        assert_eq!(cpu.ip(), 0);
    }

    #[test]
    fn state_key_tracks_memory_contents() {
        let a = cpu("ab");
        let b = cpu("ba");
        assert_eq!(a.registers(), b.registers());
        assert_ne!(a.state_key(), b.state_key());
    }

    #[test]
    fn state_key_repeats_on_pure_nop_loop() {
        let mut cpu = cpu("aq");
        let start = cpu.state_key();
        run(&mut cpu, 4);
        assert_eq!(cpu.state_key(), start);
    }
}

//! The heads instruction set.
//!
//! Each instruction has a one-letter symbol (`a` through `z`, the form
//! genomes are stored in) and a mnemonic (the form used by `.org` files).

/// A heads CPU instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Instruction {
    /// `nop-A`
    NopA,
    /// `nop-B`
    NopB,
    /// `nop-C`
    NopC,
    /// `if-n-equ`
    IfNEqu,
    /// `if-less`
    IfLess,
    /// `if-label`
    IfLabel,
    /// `mov-head`
    MovHead,
    /// `jmp-head`
    JmpHead,
    /// `get-head`
    GetHead,
    /// `set-flow`
    SetFlow,
    /// `shift-r`
    ShiftR,
    /// `shift-l`
    ShiftL,
    /// `inc`
    Inc,
    /// `dec`
    Dec,
    /// `push`
    Push,
    /// `pop`
    Pop,
    /// `swap-stk`
    SwapStk,
    /// `swap`
    Swap,
    /// `add`
    Add,
    /// `sub`
    Sub,
    /// `nand`
    Nand,
    /// `h-copy`
    HCopy,
    /// `h-alloc`
    HAlloc,
    /// `h-divide`
    HDivide,
    /// `IO`
    Io,
    /// `h-search`
    HSearch,
}

/// Symbol, mnemonic and instruction, in symbol order.
const TABLE: [(u8, &str, Instruction); 26] = [
    (b'a', "nop-A", Instruction::NopA),
    (b'b', "nop-B", Instruction::NopB),
    (b'c', "nop-C", Instruction::NopC),
    (b'd', "if-n-equ", Instruction::IfNEqu),
    (b'e', "if-less", Instruction::IfLess),
    (b'f', "if-label", Instruction::IfLabel),
    (b'g', "mov-head", Instruction::MovHead),
    (b'h', "jmp-head", Instruction::JmpHead),
    (b'i', "get-head", Instruction::GetHead),
    (b'j', "set-flow", Instruction::SetFlow),
    (b'k', "shift-r", Instruction::ShiftR),
    (b'l', "shift-l", Instruction::ShiftL),
    (b'm', "inc", Instruction::Inc),
    (b'n', "dec", Instruction::Dec),
    (b'o', "push", Instruction::Push),
    (b'p', "pop", Instruction::Pop),
    (b'q', "swap-stk", Instruction::SwapStk),
    (b'r', "swap", Instruction::Swap),
    (b's', "add", Instruction::Add),
    (b't', "sub", Instruction::Sub),
    (b'u', "nand", Instruction::Nand),
    (b'v', "h-copy", Instruction::HCopy),
    (b'w', "h-alloc", Instruction::HAlloc),
    (b'x', "h-divide", Instruction::HDivide),
    (b'y', "IO", Instruction::Io),
    (b'z', "h-search", Instruction::HSearch),
];

/// A nop used as a modifier or label element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Nop {
    /// `nop-A`
    A,
    /// `nop-B`
    B,
    /// `nop-C`
    C,
}

impl Nop {
    /// The complement used by label matching: A to B, B to C, C to A.
    pub const fn complement(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::C,
            Self::C => Self::A,
        }
    }
}

impl Instruction {
    /// Decode a genome symbol.
    pub fn from_symbol(symbol: u8) -> Option<Self> {
        TABLE
            .iter()
            .find(|(s, _, _)| *s == symbol)
            .map(|(_, _, instruction)| *instruction)
    }

    /// Decode an `.org` mnemonic.
    pub fn from_mnemonic(mnemonic: &str) -> Option<Self> {
        TABLE
            .iter()
            .find(|(_, m, _)| *m == mnemonic)
            .map(|(_, _, instruction)| *instruction)
    }

    /// Genome symbol.
    pub fn symbol(self) -> char {
        TABLE
            .iter()
            .find(|(_, _, instruction)| *instruction == self)
            .map_or('?', |(s, _, _)| char::from(*s))
    }

    /// `.org` mnemonic.
    pub fn mnemonic(self) -> &'static str {
        TABLE
            .iter()
            .find(|(_, _, instruction)| *instruction == self)
            .map_or("?", |(_, m, _)| m)
    }

    /// The nop this instruction is, if it is one.
    pub const fn as_nop(self) -> Option<Nop> {
        match self {
            Self::NopA => Some(Nop::A),
            Self::NopB => Some(Nop::B),
            Self::NopC => Some(Nop::C),
            _ => None,
        }
    }

    /// The instruction for a nop.
    pub const fn from_nop(nop: Nop) -> Self {
        match nop {
            Nop::A => Self::NopA,
            Nop::B => Self::NopB,
            Nop::C => Self::NopC,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbols_and_mnemonics_agree() {
        for (symbol, mnemonic, instruction) in TABLE {
            assert_eq!(Instruction::from_symbol(symbol), Some(instruction));
            assert_eq!(Instruction::from_mnemonic(mnemonic), Some(instruction));
            assert_eq!(instruction.symbol(), char::from(symbol));
            assert_eq!(instruction.mnemonic(), mnemonic);
        }
    }

    #[test]
    fn unknown_symbol_is_rejected() {
        assert_eq!(Instruction::from_symbol(b'A'), None);
        assert_eq!(Instruction::from_mnemonic("halt"), None);
    }

    #[test]
    fn complement_cycles() {
        assert_eq!(Nop::A.complement(), Nop::B);
        assert_eq!(Nop::B.complement(), Nop::C);
        assert_eq!(Nop::C.complement(), Nop::A);
        assert_eq!(Instruction::from_nop(Nop::C).as_nop(), Some(Nop::C));
        assert_eq!(Instruction::Add.as_nop(), None);
    }
}

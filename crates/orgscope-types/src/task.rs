//! Logic tasks an organism can perform on its environment inputs.
//!
//! These are the nine one- and two-input boolean functions of the classic
//! logic environment. An output performs a task when it equals the task's
//! function applied bitwise to inputs the organism has read.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// A bitwise logic function over environment inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum LogicTask {
    /// `!a`
    Not,
    /// `!(a & b)`
    Nand,
    /// `a & b`
    And,
    /// `a | !b`
    OrN,
    /// `a | b`
    Or,
    /// `a & !b`
    AndN,
    /// `!(a | b)`
    Nor,
    /// `a ^ b`
    Xor,
    /// `!(a ^ b)`
    Equ,
}

impl LogicTask {
    /// Every task, in table order.
    pub const ALL: [Self; 9] = [
        Self::Not,
        Self::Nand,
        Self::And,
        Self::OrN,
        Self::Or,
        Self::AndN,
        Self::Nor,
        Self::Xor,
        Self::Equ,
    ];

    /// Upper-case task name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Not => "NOT",
            Self::Nand => "NAND",
            Self::And => "AND",
            Self::OrN => "ORN",
            Self::Or => "OR",
            Self::AndN => "ANDN",
            Self::Nor => "NOR",
            Self::Xor => "XOR",
            Self::Equ => "EQU",
        }
    }

    /// Number of inputs the function reads.
    pub const fn arity(self) -> usize {
        match self {
            Self::Not => 1,
            _ => 2,
        }
    }

    /// Apply the function. `b` is ignored by one-input tasks.
    pub const fn apply(self, a: i32, b: i32) -> i32 {
        match self {
            Self::Not => !a,
            Self::Nand => !(a & b),
            Self::And => a & b,
            Self::OrN => a | !b,
            Self::Or => a | b,
            Self::AndN => a & !b,
            Self::Nor => !(a | b),
            Self::Xor => a ^ b,
            Self::Equ => !(a ^ b),
        }
    }
}

/// How many outputs so far performed one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct TaskCount {
    /// The task.
    pub task: LogicTask,
    /// Outputs that performed it.
    pub count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn functions_match_their_truth_tables() {
        // Truth-table bytes: a = 0b1100, b = 0b1010.
        let (a, b) = (0b1100, 0b1010);
        let low = |task: LogicTask| task.apply(a, b) & 0b1111;
        assert_eq!(low(LogicTask::Not), 0b0011);
        assert_eq!(low(LogicTask::Nand), 0b0111);
        assert_eq!(low(LogicTask::And), 0b1000);
        assert_eq!(low(LogicTask::OrN), 0b1101);
        assert_eq!(low(LogicTask::Or), 0b1110);
        assert_eq!(low(LogicTask::AndN), 0b0100);
        assert_eq!(low(LogicTask::Nor), 0b0001);
        assert_eq!(low(LogicTask::Xor), 0b0110);
        assert_eq!(low(LogicTask::Equ), 0b1001);
    }

    #[test]
    fn only_not_is_unary() {
        let unary: Vec<LogicTask> = LogicTask::ALL
            .into_iter()
            .filter(|task| task.arity() == 1)
            .collect();
        assert_eq!(unary, vec![LogicTask::Not]);
    }
}

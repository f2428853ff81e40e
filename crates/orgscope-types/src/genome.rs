//! Opaque genome handle.
//!
//! A genome is an ordered sequence of instruction symbols. This type does
//! not know the instruction set: whether a genome is well formed is decided
//! when a virtual machine loads it.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// An organism genome as a string of instruction symbols.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(transparent)]
pub struct Genome {
    sequence: String,
}

impl Genome {
    /// Wrap an instruction symbol sequence.
    ///
    /// Surrounding whitespace is trimmed; nothing else is checked.
    pub fn new(sequence: impl Into<String>) -> Self {
        let sequence: String = sequence.into();
        Self {
            sequence: sequence.trim().to_owned(),
        }
    }

    /// The symbol sequence.
    pub fn as_str(&self) -> &str {
        &self.sequence
    }

    /// The symbols as bytes.
    pub fn symbols(&self) -> &[u8] {
        self.sequence.as_bytes()
    }

    /// Number of symbols.
    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    /// Whether the genome has no symbols.
    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }
}

impl core::fmt::Display for Genome {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.sequence)
    }
}

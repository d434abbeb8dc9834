//! Architecture Register Model - typed register state and per-architecture
//! operand semantics.
//!
//! [`state`] holds the snapshot/diff machinery shared by all architectures;
//! [`x86`] and [`arm`] implement the mode-specific effective-address and
//! condition-code rules. The dispatchers here are the surface the annotator
//! and front ends call; unsupported mode/operand combinations surface as
//! typed errors instead of approximated addresses.

use thiserror::Error;

use crate::decode::{Condition, Instruction, Operand};

pub mod arm;
pub mod state;
pub mod x86;

pub use state::{Register, RegisterValue, Snapshot, StateTracker};

/// Execution mode of the debuggee at the current instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuMode {
    X86,
    X86_64,
    Arm32,
    Thumb,
}

impl CpuMode {
    pub fn pointer_bytes(self) -> usize {
        match self {
            CpuMode::X86 | CpuMode::Arm32 | CpuMode::Thumb => 4,
            CpuMode::X86_64 => 8,
        }
    }
}

/// Address/value resolution errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("register '{0}' is absent from the current state")]
    AbsentRegister(String),

    #[error("unsupported operand: {0}")]
    UnsupportedOperand(String),

    #[error("{0} addressing is not defined for this CPU mode")]
    UnsupportedCpuMode(&'static str),

    #[error("segment base for {0} is unavailable")]
    MissingSegmentBase(&'static str),
}

/// Resolve an operand of `insn` to a numeric address under `mode`, reading
/// register values from `snapshot`.
pub fn effective_address(
    mode: CpuMode,
    insn: &Instruction,
    operand: &Operand,
    snapshot: &Snapshot,
) -> Result<u64, AddressError> {
    match mode {
        CpuMode::X86 | CpuMode::X86_64 => x86::effective_address(mode, insn, operand, snapshot),
        CpuMode::Arm32 | CpuMode::Thumb => arm::effective_address(mode, insn, operand, snapshot),
    }
}

/// Evaluate whether a conditional instruction's predicate holds under the
/// flags (and, for the counter-register shortcuts, the registers) in
/// `snapshot`.
pub fn is_condition_taken(
    mode: CpuMode,
    snapshot: &Snapshot,
    condition: Condition,
) -> Result<bool, AddressError> {
    match mode {
        CpuMode::X86 | CpuMode::X86_64 => x86::is_condition_taken(snapshot, condition),
        CpuMode::Arm32 | CpuMode::Thumb => arm::is_condition_taken(snapshot, condition),
    }
}

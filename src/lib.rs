//! Rift - Native-Code Debugger Core
//!
//! The engine behind an interactive debugger: process launch and control
//! over ptrace, race-free child-event waiting, per-architecture register
//! snapshots with change tracking, effective-address and condition-code
//! evaluation, instruction annotation, and exact floating-point
//! classification/parse/format for the FPU and SIMD register views.
//!
//! The instruction decoder, symbol resolution, and syscall catalog are
//! collaborators behind traits in [`decode`] and [`annotate`]; front ends
//! supply implementations backed by a real disassembler and symbol tables.

pub mod annotate;
pub mod arch;
pub mod decode;
pub mod float;
pub mod os;

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
pub mod process;

pub use annotate::{Annotator, MemoryReader, SymbolResolver, SyscallCatalog};
pub use arch::{CpuMode, Snapshot, StateTracker};
pub use decode::{Instruction, InstructionDecoder, Operand};
pub use float::{FloatClass, FloatWidth};

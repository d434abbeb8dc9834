//! Instruction Annotator - human-readable analysis of the current
//! instruction.
//!
//! Combines a decoded instruction, the register snapshot, and the memory /
//! symbol / syscall collaborators into an ordered, de-duplicated list of
//! annotation strings ("jump taken", "rax = 00000000004005d0 <main>",
//! "possible jump from 00401020", ...). Every line is independently
//! failable: unreadable memory or an unresolvable address degrades that one
//! line to a `?` placeholder instead of aborting the pass.

use thiserror::Error;

use crate::arch::{self, CpuMode, Register, Snapshot};
use crate::decode::{
    DataWidth, Instruction, InstructionDecoder, InstructionKind, MemExpression, Operand, RegId,
    ShiftKind,
};

pub mod scan;

/// Debuggee memory read errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("memory at {address:#x} is unreadable")]
    Unreadable { address: u64 },
}

/// Reads debuggee memory. Short reads are allowed at region boundaries.
pub trait MemoryReader {
    fn read_bytes(&self, address: u64, buf: &mut [u8]) -> Result<usize, MemoryError>;
}

/// Resolves addresses to symbol names.
pub trait SymbolResolver {
    /// Function symbol containing `address`, with the offset into it.
    fn find_function_symbol(&self, address: u64) -> Option<(String, u64)>;

    /// Any name for `address` (data symbols, section labels).
    fn find_address_name(&self, address: u64) -> Option<String>;
}

/// One syscall argument: a terse type code (the original catalog encoding:
/// `P` raises the pointer level, `c` is char, `i`/`j`/`l`/`m`/... are sized
/// integers) and the register carrying it.
#[derive(Debug, Clone)]
pub struct SyscallArg {
    pub type_code: String,
    pub register: String,
}

#[derive(Debug, Clone)]
pub struct SyscallInfo {
    pub name: String,
    pub args: Vec<SyscallArg>,
}

/// Syscall number lookup, keyed by the execution mode.
pub trait SyscallCatalog {
    fn lookup(&self, mode: CpuMode, number: u64) -> Option<SyscallInfo>;
}

/// Byte range scanned for "possible jump from" sources, centered on the
/// current instruction.
const JUMP_SOURCE_SCAN: i64 = 128;

/// The annotation engine. Borrows its collaborators for the duration of a
/// pass.
pub struct Annotator<'a> {
    pub mode: CpuMode,
    pub memory: &'a dyn MemoryReader,
    pub symbols: &'a dyn SymbolResolver,
    pub syscalls: &'a dyn SyscallCatalog,
    pub decoder: &'a dyn InstructionDecoder,
}

impl<'a> Annotator<'a> {
    /// Produce the ordered annotation list for `insn` under `snapshot`.
    /// Duplicate lines are suppressed, keeping the first occurrence.
    pub fn annotate(&self, insn: &Instruction, snapshot: &Snapshot) -> Vec<String> {
        let mut lines = Vec::new();

        match insn.kind {
            InstructionKind::ConditionalMove => self.annotate_cmov(insn, snapshot, &mut lines),
            InstructionKind::Return => self.annotate_return(snapshot, &mut lines),
            InstructionKind::Call | InstructionKind::Jump | InstructionKind::ConditionalJump => {
                if insn.is_conditional() {
                    self.annotate_jump(insn, snapshot, &mut lines);
                }
                self.annotate_target(insn, snapshot, &mut lines);
            }
            InstructionKind::Syscall => self.annotate_syscall(snapshot, &mut lines),
            InstructionKind::Interrupt => {
                if self.is_legacy_syscall(insn) {
                    self.annotate_syscall(snapshot, &mut lines);
                } else {
                    self.annotate_operands(insn, snapshot, &mut lines);
                }
            }
            InstructionKind::Other => self.annotate_operands(insn, snapshot, &mut lines),
        }

        self.annotate_jump_sources(insn, &mut lines);

        let mut deduped: Vec<String> = Vec::with_capacity(lines.len());
        for line in lines {
            if !deduped.contains(&line) {
                deduped.push(line);
            }
        }
        deduped
    }

    /// `int 0x80` on 32-bit x86 is the legacy syscall gate.
    fn is_legacy_syscall(&self, insn: &Instruction) -> bool {
        matches!(self.mode, CpuMode::X86 | CpuMode::X86_64)
            && matches!(
                insn.operands.first(),
                Some(Operand::Immediate { value }) if value & 0xff == 0x80
            )
    }

    fn annotate_cmov(&self, insn: &Instruction, snapshot: &Snapshot, lines: &mut Vec<String>) {
        match arch::is_condition_taken(self.mode, snapshot, insn.condition) {
            Ok(true) => lines.push("move performed".to_string()),
            Ok(false) => lines.push("move NOT performed".to_string()),
            Err(e) => {
                log::debug!("cmov predicate unavailable: {e}");
            }
        }
    }

    fn annotate_jump(&self, insn: &Instruction, snapshot: &Snapshot, lines: &mut Vec<String>) {
        match arch::is_condition_taken(self.mode, snapshot, insn.condition) {
            Ok(true) => lines.push("jump taken".to_string()),
            Ok(false) => lines.push("jump NOT taken".to_string()),
            Err(e) => {
                log::debug!("jump predicate unavailable: {e}");
            }
        }
    }

    fn annotate_return(&self, snapshot: &Snapshot, lines: &mut Vec<String>) {
        let Some(sp) = self.stack_pointer(snapshot) else {
            return;
        };
        match self.read_pointer(sp) {
            Some(return_address) => {
                match self.symbols.find_function_symbol(return_address) {
                    Some((name, offset)) => lines.push(format!(
                        "return to {} <{}>",
                        self.format_pointer(return_address),
                        format_symbol(&name, offset)
                    )),
                    None => lines.push(format!(
                        "return to {}",
                        self.format_pointer(return_address)
                    )),
                }
            }
            None => lines.push("return to ?".to_string()),
        }
    }

    /// Call/jump target resolution, including one level of indirection for
    /// memory operands.
    fn annotate_target(&self, insn: &Instruction, snapshot: &Snapshot, lines: &mut Vec<String>) {
        let Some(operand) = insn.operands.first() else {
            return;
        };
        let ea = match arch::effective_address(self.mode, insn, operand, snapshot) {
            Ok(ea) => ea,
            Err(e) => {
                log::debug!("target of {} unresolvable: {e}", insn.mnemonic);
                return;
            }
        };
        let operand_text = self.operand_text(operand);

        match operand {
            Operand::Relative { .. } => {
                // uninteresting without a name: the raw target is already
                // visible in the disassembly text. Addresses outside any
                // function may still carry a plain name (data, PLT stubs)
                if let Some((name, offset)) = self.symbols.find_function_symbol(ea) {
                    lines.push(format!(
                        "{} = {} <{}>",
                        operand_text,
                        self.format_pointer(ea),
                        format_symbol(&name, offset)
                    ));
                } else if let Some(name) = self.symbols.find_address_name(ea) {
                    lines.push(format!(
                        "{} = {} <{}>",
                        operand_text,
                        self.format_pointer(ea),
                        name
                    ));
                }
            }
            Operand::Register { .. } => match self.symbols.find_function_symbol(ea) {
                Some((name, offset)) => lines.push(format!(
                    "{} = {} <{}>",
                    operand_text,
                    self.format_pointer(ea),
                    format_symbol(&name, offset)
                )),
                None => lines.push(format!("{} = {}", operand_text, self.format_pointer(ea))),
            },
            _ => match self.read_pointer(ea) {
                Some(target) => match self.symbols.find_function_symbol(target) {
                    Some((name, offset)) => lines.push(format!(
                        "{} = [{}] = {} <{}>",
                        operand_text,
                        self.format_pointer(ea),
                        self.format_pointer(target),
                        format_symbol(&name, offset)
                    )),
                    None => lines.push(format!(
                        "{} = [{}] = {}",
                        operand_text,
                        self.format_pointer(ea),
                        self.format_pointer(target)
                    )),
                },
                None => lines.push(format!(
                    "{} = [{}] = ?",
                    operand_text,
                    self.format_pointer(ea)
                )),
            },
        }
    }

    /// Generic value dump for instructions with no specialized handler.
    fn annotate_operands(&self, insn: &Instruction, snapshot: &Snapshot, lines: &mut Vec<String>) {
        for operand in &insn.operands {
            match operand {
                Operand::Register { reg } => {
                    let text = match self.register_slot(snapshot, *reg) {
                        Some(r) if r.is_present() => r.to_hex(),
                        _ => "?".to_string(),
                    };
                    lines.push(format!("{} = {}", self.operand_text(operand), text));
                }
                Operand::Expression { width, .. } => {
                    let ea = match arch::effective_address(self.mode, insn, operand, snapshot) {
                        Ok(ea) => ea,
                        Err(_) => return,
                    };
                    let operand_text = self.operand_text(operand);
                    match self.read_sized_hex(ea, *width) {
                        Some(hex) => lines.push(format!(
                            "{} = [{}] = 0x{}",
                            operand_text,
                            self.format_pointer(ea),
                            hex
                        )),
                        None => lines.push(format!(
                            "{} = [{}] = ?",
                            operand_text,
                            self.format_pointer(ea)
                        )),
                    }
                }
                _ => {}
            }
        }
    }

    fn annotate_syscall(&self, snapshot: &Snapshot, lines: &mut Vec<String>) {
        let Some(number) = self.syscall_number(snapshot) else {
            return;
        };
        let Some(info) = self.syscalls.lookup(self.mode, number) else {
            return;
        };
        let mut arguments = Vec::with_capacity(info.args.len());
        for arg in &info.args {
            let value = snapshot
                .by_name(&arg.register)
                .and_then(|r| r.value)
                .and_then(|v| v.as_address());
            match value {
                Some(value) => arguments.push(self.format_argument(&arg.type_code, value)),
                None => arguments.push("?".to_string()),
            }
        }
        lines.push(format!("SYSCALL: {}({})", info.name, arguments.join(",")));
    }

    /// Backward/forward scan for relative jumps landing on this address.
    fn annotate_jump_sources(&self, insn: &Instruction, lines: &mut Vec<String>) {
        let start = insn.address.wrapping_sub(JUMP_SOURCE_SCAN as u64);
        let mut buffer = vec![0u8; self.decoder.max_size()];

        for delta in 0..(2 * JUMP_SOURCE_SCAN - 1) {
            let addr = start.wrapping_add(delta as u64);
            let Ok(n) = self.memory.read_bytes(addr, &mut buffer) else {
                continue;
            };
            let Some(candidate) = self.decoder.decode(&buffer[..n], addr) else {
                continue;
            };
            if !matches!(
                candidate.kind,
                InstructionKind::Jump | InstructionKind::ConditionalJump
            ) {
                continue;
            }
            if let Some(Operand::Relative { target }) = candidate.operands.first() {
                if *target == insn.address {
                    lines.push(format!("possible jump from {}", self.format_pointer(addr)));
                }
            }
        }
    }

    // -- helpers ---------------------------------------------------------

    fn stack_pointer(&self, snapshot: &Snapshot) -> Option<u64> {
        let index = match self.mode {
            CpuMode::X86 | CpuMode::X86_64 => 4,
            CpuMode::Arm32 | CpuMode::Thumb => 13,
        };
        snapshot
            .gpr(index)
            .and_then(|r| r.value)
            .and_then(|v| v.as_address())
    }

    fn syscall_number(&self, snapshot: &Snapshot) -> Option<u64> {
        let index = match self.mode {
            CpuMode::X86 | CpuMode::X86_64 => 0,
            CpuMode::Arm32 | CpuMode::Thumb => 7,
        };
        snapshot
            .gpr(index)
            .and_then(|r| r.value)
            .and_then(|v| v.as_address())
    }

    fn register_slot<'s>(&self, snapshot: &'s Snapshot, reg: RegId) -> Option<&'s Register> {
        match self.mode {
            CpuMode::X86 | CpuMode::X86_64 => {
                if let Some(i) = crate::arch::x86::gpr_index(reg) {
                    snapshot.gpr(i)
                } else if let Some(i) = crate::arch::x86::segment_index(reg) {
                    snapshot.segment(i)
                } else if reg == RegId::Rflags {
                    Some(snapshot.flags())
                } else {
                    None
                }
            }
            CpuMode::Arm32 | CpuMode::Thumb => {
                if let Some(i) = crate::arch::arm::gpr_index(reg) {
                    snapshot.gpr(i)
                } else if reg == RegId::Cpsr {
                    Some(snapshot.flags())
                } else {
                    None
                }
            }
        }
    }

    fn read_pointer(&self, address: u64) -> Option<u64> {
        let mut buf = [0u8; 8];
        let width = self.mode.pointer_bytes();
        let n = self.memory.read_bytes(address, &mut buf[..width]).ok()?;
        if n < width {
            return None;
        }
        Some(u64::from_le_bytes(buf))
    }

    fn read_sized_hex(&self, address: u64, width: DataWidth) -> Option<String> {
        let mut buf = [0u8; 16];
        let bytes = width.bytes();
        let n = self.memory.read_bytes(address, &mut buf[..bytes]).ok()?;
        if n < bytes {
            return None;
        }
        // little-endian: most significant byte first in the rendering
        let hex: String = buf[..bytes]
            .iter()
            .rev()
            .map(|b| format!("{b:02x}"))
            .collect();
        Some(hex)
    }

    fn format_pointer(&self, address: u64) -> String {
        format!(
            "{address:0width$x}",
            width = self.mode.pointer_bytes() * 2
        )
    }

    /// Argument rendering driven by the catalog's type codes.
    fn format_argument(&self, type_code: &str, value: u64) -> String {
        let mut pointer_level = 0usize;
        for ch in type_code.chars() {
            match ch {
                'P' => pointer_level += 1,
                // const/volatile/restrict markers: no display effect
                'r' | 'V' | 'K' => continue,
                'v' => return self.format_pointer_arg(value),
                'c' => return self.format_char_arg(pointer_level, value),
                'b' => return format!("{}", u64::from(value != 0)),
                'a' => return format_int(pointer_level, value as i8 as i64, self, value),
                'h' => return format_uint(pointer_level, u64::from(value as u8), self, value),
                's' => return format_int(pointer_level, value as i16 as i64, self, value),
                't' | 'w' => return format_uint(pointer_level, u64::from(value as u16), self, value),
                'i' => return format_int(pointer_level, value as i32 as i64, self, value),
                'j' => return format_uint(pointer_level, u64::from(value as u32), self, value),
                'l' | 'x' => return format_int(pointer_level, value as i64, self, value),
                'm' | 'y' => return format_uint(pointer_level, value, self, value),
                _ => break,
            }
        }
        self.format_pointer_arg(value)
    }

    fn format_pointer_arg(&self, value: u64) -> String {
        if value == 0 {
            "NULL".to_string()
        } else {
            self.format_pointer(value)
        }
    }

    /// `char*` arguments render the pointed-to string when it is readable
    /// printable ASCII.
    fn format_char_arg(&self, pointer_level: usize, value: u64) -> String {
        if pointer_level != 1 {
            if value < 0x80 && (value as u8).is_ascii_graphic() {
                return format!("'{}'", value as u8 as char);
            }
            return format!("'\\x{:02x}'", value as u16);
        }
        if value == 0 {
            return "NULL".to_string();
        }
        let mut buf = [0u8; 256];
        match self.memory.read_bytes(value, &mut buf) {
            Ok(n) => {
                let data = &buf[..n];
                if let Some(nul) = data.iter().position(|&b| b == 0) {
                    let prefix = &data[..nul];
                    if prefix.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
                        if let Ok(s) = std::str::from_utf8(prefix) {
                            return format!("<{}> \"{}\"", self.format_pointer(value), s);
                        }
                    }
                }
                format!("<{}>", self.format_pointer(value))
            }
            Err(_) => format!("<{}>", self.format_pointer(value)),
        }
    }

    /// Render an operand the way the disassembly column would.
    pub fn operand_text(&self, operand: &Operand) -> String {
        match operand {
            Operand::Register { reg } => reg_text(*reg),
            Operand::Expression { expr, .. } => self.expression_text(expr),
            Operand::Absolute { offset } => format!("[{}]", self.format_pointer(*offset)),
            Operand::Immediate { value } => format!("{value:#x}"),
            Operand::Relative { target } => self.format_pointer(*target),
        }
    }

    fn expression_text(&self, expr: &MemExpression) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Some(base) = expr.base {
            parts.push(reg_text(base));
        }
        if let Some(index) = expr.index {
            let mut index_text = reg_text(index);
            if expr.shift != ShiftKind::None {
                index_text = format!(
                    "{index_text},{}#{}",
                    shift_text(expr.shift),
                    expr.shift_amount
                );
            } else if expr.scale.abs() != 1 && expr.scale != 0 {
                index_text = format!("{index_text}*{}", expr.scale.abs());
            }
            if expr.scale < 0 {
                parts.push(format!("-{index_text}"));
            } else {
                parts.push(index_text);
            }
        }
        if expr.displacement != 0 {
            if expr.displacement < 0 {
                parts.push(format!("-{:#x}", -expr.displacement));
            } else {
                parts.push(format!("{:#x}", expr.displacement));
            }
        }
        if parts.is_empty() {
            parts.push("0x0".to_string());
        }
        format!("[{}]", parts.join("+").replace("+-", "-"))
    }
}

fn format_symbol(name: &str, offset: u64) -> String {
    if offset == 0 {
        name.to_string()
    } else {
        format!("{name}+{offset:#x}")
    }
}

fn reg_text(reg: RegId) -> String {
    match reg {
        RegId::ArmR8 => "r8".to_string(),
        RegId::ArmR9 => "r9".to_string(),
        RegId::ArmR10 => "r10".to_string(),
        RegId::ArmR11 => "r11".to_string(),
        RegId::ArmR12 => "r12".to_string(),
        _ => format!("{reg:?}").to_lowercase(),
    }
}

fn shift_text(kind: ShiftKind) -> &'static str {
    match kind {
        ShiftKind::Lsl => "lsl",
        ShiftKind::Lsr => "lsr",
        ShiftKind::Asr => "asr",
        ShiftKind::Ror => "ror",
        ShiftKind::Rrx => "rrx",
        ShiftKind::None => "",
    }
}

fn format_int(pointer_level: usize, narrowed: i64, a: &Annotator, raw: u64) -> String {
    if pointer_level > 0 {
        a.format_pointer_arg(raw)
    } else {
        format!("{narrowed}")
    }
}

fn format_uint(pointer_level: usize, narrowed: u64, a: &Annotator, raw: u64) -> String {
    if pointer_level > 0 {
        a.format_pointer_arg(raw)
    } else {
        format!("{narrowed}")
    }
}

//! Decoded-instruction model.
//!
//! The instruction decoder itself lives behind the [`InstructionDecoder`]
//! trait; this module only defines the structured form the engine consumes:
//! an instruction with classification flags, ordered operands, and raw bytes.

/// Upper bound on encoded instruction length across supported architectures.
pub const MAX_INSTRUCTION_SIZE: usize = 16;

/// Register identifiers as reported by the decoder.
///
/// Decoder numbering is not contiguous per register bank, so nothing in the
/// engine may rely on discriminant order; the arch modules remap these to
/// fixed architecture-defined indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegId {
    // x86 / x86-64
    Rax,
    Rbx,
    Rcx,
    Rdx,
    Rsi,
    Rdi,
    Rbp,
    Rsp,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
    Rip,
    Rflags,
    Es,
    Cs,
    Ss,
    Ds,
    Fs,
    Gs,
    // ARM
    R0,
    R1,
    R2,
    R3,
    R4,
    R5,
    R6,
    R7,
    ArmR8,
    ArmR9,
    ArmR10,
    ArmR11,
    ArmR12,
    Sp,
    Lr,
    Pc,
    Cpsr,
    /// Decoder could not name the register.
    Invalid,
}

/// Barrel-shift modifier attached to an index register (ARM addressing).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShiftKind {
    #[default]
    None,
    Lsl,
    Lsr,
    Asr,
    Ror,
    /// Rotate right with extend: shifts the carry flag into the top bit.
    Rrx,
}

/// Segment-override prefix on a memory operand (x86 only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SegmentPrefix {
    #[default]
    None,
    Fs,
    Gs,
}

/// Width of the data a memory operand refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataWidth {
    Byte,
    Word,
    Dword,
    Qword,
    Tbyte,
    Xmmword,
}

impl DataWidth {
    pub fn bytes(self) -> usize {
        match self {
            DataWidth::Byte => 1,
            DataWidth::Word => 2,
            DataWidth::Dword => 4,
            DataWidth::Qword => 8,
            DataWidth::Tbyte => 10,
            DataWidth::Xmmword => 16,
        }
    }
}

/// A decoded memory-expression addressing mode:
/// `[base + shift(index) * scale + displacement]`.
#[derive(Debug, Clone, PartialEq)]
pub struct MemExpression {
    pub base: Option<RegId>,
    pub index: Option<RegId>,
    /// Scale applied to the index; ARM uses -1 for subtracted indices.
    pub scale: i32,
    pub displacement: i64,
    pub shift: ShiftKind,
    pub shift_amount: u32,
}

impl MemExpression {
    pub fn base_disp(base: RegId, displacement: i64) -> Self {
        Self {
            base: Some(base),
            index: None,
            scale: 1,
            displacement,
            shift: ShiftKind::None,
            shift_amount: 0,
        }
    }
}

/// One operand of a decoded instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Register {
        reg: RegId,
    },
    Expression {
        expr: MemExpression,
        width: DataWidth,
    },
    /// A fully specified absolute address.
    Absolute {
        offset: u64,
    },
    Immediate {
        value: i64,
    },
    /// PC-relative target, already resolved by the decoder.
    Relative {
        target: u64,
    },
}

/// Condition under which a conditional instruction executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Unconditional,
    /// x86 `jcxz` family: taken iff the counter register is zero.
    Cxz,
    Ecxz,
    Rcxz,
    /// Raw 4-bit condition field (x86 Jcc tttn / ARM cond).
    Code(u8),
}

/// Coarse classification the annotator dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionKind {
    Call,
    Jump,
    ConditionalJump,
    ConditionalMove,
    Return,
    Syscall,
    /// Software interrupt (`int n` / `svc`).
    Interrupt,
    Other,
}

/// A structured instruction handed to the engine by the decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub address: u64,
    pub mnemonic: String,
    pub bytes: Vec<u8>,
    pub operands: Vec<Operand>,
    pub kind: InstructionKind,
    pub condition: Condition,
    pub segment: SegmentPrefix,
    /// True when execution of this instruction rewrites the program counter.
    pub modifies_pc: bool,
}

impl Instruction {
    /// Encoded length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn is_conditional(&self) -> bool {
        !matches!(self.condition, Condition::Unconditional)
    }
}

/// The decoder collaborator. Implementations wrap a real disassembler
/// library; tests use a toy fixed-format decoder.
pub trait InstructionDecoder {
    /// Decode one instruction at `address` from `bytes`, or `None` when the
    /// bytes do not form a valid encoding.
    fn decode(&self, bytes: &[u8], address: u64) -> Option<Instruction>;

    /// Longest encoding this decoder can produce.
    fn max_size(&self) -> usize {
        MAX_INSTRUCTION_SIZE
    }
}

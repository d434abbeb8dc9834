//! x86/x86-64 operand and condition semantics.
//!
//! Effective addresses follow the hardware rules: `[base + index*scale +
//! disp]` with an optional segment-override base, and RIP-relative encodings
//! resolved against the *end* of the current instruction rather than the
//! live snapshot, since the snapshot's RIP may belong to a different
//! instruction than the one being annotated.

use crate::arch::{AddressError, CpuMode, Snapshot};
use crate::decode::{Condition, Instruction, MemExpression, Operand, RegId, SegmentPrefix};

const FLAG_CF: u64 = 1 << 0;
const FLAG_PF: u64 = 1 << 2;
const FLAG_ZF: u64 = 1 << 6;
const FLAG_SF: u64 = 1 << 7;
const FLAG_OF: u64 = 1 << 11;

/// Fixed architectural index for a general-purpose register identifier.
/// Decoder identifiers are not contiguous, so the remap is explicit.
pub(crate) fn gpr_index(reg: RegId) -> Option<usize> {
    Some(match reg {
        RegId::Rax => 0,
        RegId::Rcx => 1,
        RegId::Rdx => 2,
        RegId::Rbx => 3,
        RegId::Rsp => 4,
        RegId::Rbp => 5,
        RegId::Rsi => 6,
        RegId::Rdi => 7,
        RegId::R8 => 8,
        RegId::R9 => 9,
        RegId::R10 => 10,
        RegId::R11 => 11,
        RegId::R12 => 12,
        RegId::R13 => 13,
        RegId::R14 => 14,
        RegId::R15 => 15,
        _ => return None,
    })
}

pub(crate) fn segment_index(reg: RegId) -> Option<usize> {
    Some(match reg {
        RegId::Es => 0,
        RegId::Cs => 1,
        RegId::Ss => 2,
        RegId::Ds => 3,
        RegId::Fs => 4,
        RegId::Gs => 5,
        _ => return None,
    })
}

fn register_name(reg: RegId) -> String {
    format!("{reg:?}").to_lowercase()
}

/// Value of a register as read from the snapshot. RIP is handled by the
/// callers, never here.
fn register_value(snapshot: &Snapshot, reg: RegId) -> Result<u64, AddressError> {
    let slot = if let Some(index) = gpr_index(reg) {
        snapshot.gpr(index)
    } else if let Some(index) = segment_index(reg) {
        snapshot.segment(index)
    } else if reg == RegId::Rflags {
        Some(snapshot.flags())
    } else {
        None
    };

    slot.and_then(|r| r.value)
        .and_then(|v| v.as_address())
        .ok_or_else(|| AddressError::AbsentRegister(register_name(reg)))
}

/// The value RIP contributes to a self-referential encoding: the address of
/// the next instruction.
fn rip_value(insn: &Instruction) -> u64 {
    insn.address.wrapping_add(insn.len() as u64)
}

fn segment_base(
    snapshot: &Snapshot,
    prefix: SegmentPrefix,
) -> Result<u64, AddressError> {
    let name = match prefix {
        SegmentPrefix::None => return Ok(0),
        SegmentPrefix::Fs => "fs_base",
        SegmentPrefix::Gs => "gs_base",
    };
    // a missing base must fail the computation, never degrade to zero
    snapshot
        .segment_base(name)
        .and_then(|r| r.value)
        .and_then(|v| v.as_address())
        .ok_or(AddressError::MissingSegmentBase(match prefix {
            SegmentPrefix::Fs => "fs",
            _ => "gs",
        }))
}

fn expression_address(
    insn: &Instruction,
    expr: &MemExpression,
    snapshot: &Snapshot,
) -> Result<u64, AddressError> {
    let base_reg = expr.base.ok_or_else(|| {
        AddressError::UnsupportedOperand("memory expression without a base register".into())
    })?;

    let base = if base_reg == RegId::Rip {
        rip_value(insn)
    } else {
        register_value(snapshot, base_reg)?
    };

    let mut address = base.wrapping_add(expr.displacement as u64);
    if let Some(index_reg) = expr.index {
        let index = if index_reg == RegId::Rip {
            rip_value(insn)
        } else {
            register_value(snapshot, index_reg)?
        };
        let scale = if expr.scale == 0 { 1 } else { expr.scale };
        address = address.wrapping_add(index.wrapping_mul(scale as i64 as u64));
    }

    Ok(address.wrapping_add(segment_base(snapshot, insn.segment)?))
}

/// Resolve an operand of `insn` to an address.
pub fn effective_address(
    mode: CpuMode,
    insn: &Instruction,
    operand: &Operand,
    snapshot: &Snapshot,
) -> Result<u64, AddressError> {
    let address = match operand {
        Operand::Register { reg } => {
            if *reg == RegId::Rip {
                rip_value(insn)
            } else {
                register_value(snapshot, *reg)?
            }
        }
        Operand::Expression { expr, .. } => expression_address(insn, expr, snapshot)?,
        Operand::Absolute { offset } => {
            offset.wrapping_add(segment_base(snapshot, insn.segment)?)
        }
        Operand::Immediate { value } => *value as u64,
        Operand::Relative { target } => *target,
    };

    Ok(match mode {
        CpuMode::X86 => address & 0xffff_ffff,
        _ => address,
    })
}

/// Jcc predicate for a 4-bit condition field. Even codes are the base
/// predicate; the low bit inverts it.
pub fn jcc_taken(flags: u64, code: u8) -> bool {
    let of = flags & FLAG_OF != 0;
    let cf = flags & FLAG_CF != 0;
    let zf = flags & FLAG_ZF != 0;
    let sf = flags & FLAG_SF != 0;
    let pf = flags & FLAG_PF != 0;

    let taken = match code & 0x0e {
        0x00 => of,
        0x02 => cf,
        0x04 => zf,
        0x06 => cf || zf,
        0x08 => sf,
        0x0a => pf,
        0x0c => sf != of,
        _ => zf || sf != of,
    };
    if code & 1 != 0 {
        !taken
    } else {
        taken
    }
}

fn counter_value(snapshot: &Snapshot, name: &'static str) -> Result<u64, AddressError> {
    snapshot
        .gpr(1)
        .and_then(|r| r.value)
        .and_then(|v| v.as_address())
        .ok_or_else(|| AddressError::AbsentRegister(name.to_string()))
}

/// Evaluate a conditional instruction's predicate against the snapshot.
pub fn is_condition_taken(
    snapshot: &Snapshot,
    condition: Condition,
) -> Result<bool, AddressError> {
    match condition {
        Condition::Unconditional => Ok(true),
        Condition::Cxz => Ok(counter_value(snapshot, "cx")? & 0xffff == 0),
        Condition::Ecxz => Ok(counter_value(snapshot, "ecx")? & 0xffff_ffff == 0),
        Condition::Rcxz => Ok(counter_value(snapshot, "rcx")? == 0),
        Condition::Code(code) => {
            let flags = snapshot
                .flags_value()
                .ok_or_else(|| AddressError::AbsentRegister("flags".to_string()))?;
            Ok(jcc_taken(flags, code))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::RegisterValue;
    use crate::decode::{DataWidth, InstructionKind};

    fn snapshot(pairs: &[(&str, u64)]) -> Snapshot {
        let mut snap = Snapshot::new(CpuMode::X86_64);
        for (name, value) in pairs {
            assert!(snap.set(name, RegisterValue::U64(*value)));
        }
        snap
    }

    fn insn_at(address: u64, len: usize) -> Instruction {
        Instruction {
            address,
            mnemonic: "mov".to_string(),
            bytes: vec![0x90; len],
            operands: Vec::new(),
            kind: InstructionKind::Other,
            condition: Condition::Unconditional,
            segment: SegmentPrefix::None,
            modifies_pc: false,
        }
    }

    #[test]
    fn register_operand_reads_the_snapshot() {
        let snap = snapshot(&[("rbx", 0x1234)]);
        let insn = insn_at(0x1000, 3);
        let op = Operand::Register { reg: RegId::Rbx };
        assert_eq!(
            effective_address(CpuMode::X86_64, &insn, &op, &snap),
            Ok(0x1234)
        );
    }

    #[test]
    fn rip_is_next_instruction_regardless_of_snapshot() {
        // the snapshot deliberately carries a contradictory rip
        let mut snap = snapshot(&[]);
        snap.set("rip", RegisterValue::U64(0xdead_beef));
        let insn = insn_at(0x40_0000, 7);
        let op = Operand::Register { reg: RegId::Rip };
        assert_eq!(
            effective_address(CpuMode::X86_64, &insn, &op, &snap),
            Ok(0x40_0007)
        );
    }

    #[test]
    fn expression_combines_base_index_scale_displacement() {
        let snap = snapshot(&[("rbx", 0x1000), ("rcx", 0x10)]);
        let insn = insn_at(0x2000, 4);
        let op = Operand::Expression {
            expr: MemExpression {
                base: Some(RegId::Rbx),
                index: Some(RegId::Rcx),
                scale: 4,
                displacement: 0x20,
                shift: crate::decode::ShiftKind::None,
                shift_amount: 0,
            },
            width: DataWidth::Qword,
        };
        assert_eq!(
            effective_address(CpuMode::X86_64, &insn, &op, &snap),
            Ok(0x1000 + 0x10 * 4 + 0x20)
        );
    }

    #[test]
    fn baseless_expression_is_a_hard_failure() {
        let snap = snapshot(&[]);
        let insn = insn_at(0x2000, 4);
        let op = Operand::Expression {
            expr: MemExpression {
                base: None,
                index: None,
                scale: 1,
                displacement: 0x20,
                shift: crate::decode::ShiftKind::None,
                shift_amount: 0,
            },
            width: DataWidth::Qword,
        };
        assert!(matches!(
            effective_address(CpuMode::X86_64, &insn, &op, &snap),
            Err(AddressError::UnsupportedOperand(_))
        ));
    }

    #[test]
    fn missing_segment_base_fails_instead_of_zeroing() {
        let snap = snapshot(&[("rbx", 0x1000)]);
        let mut insn = insn_at(0x2000, 4);
        insn.segment = SegmentPrefix::Gs;
        let op = Operand::Expression {
            expr: MemExpression::base_disp(RegId::Rbx, 0x10),
            width: DataWidth::Qword,
        };
        assert_eq!(
            effective_address(CpuMode::X86_64, &insn, &op, &snap),
            Err(AddressError::MissingSegmentBase("gs"))
        );
    }

    #[test]
    fn segment_base_is_added_when_present() {
        let snap = snapshot(&[("rbx", 0x1000), ("gs_base", 0x7000_0000)]);
        let mut insn = insn_at(0x2000, 4);
        insn.segment = SegmentPrefix::Gs;
        let op = Operand::Expression {
            expr: MemExpression::base_disp(RegId::Rbx, 0x10),
            width: DataWidth::Qword,
        };
        assert_eq!(
            effective_address(CpuMode::X86_64, &insn, &op, &snap),
            Ok(0x7000_1010)
        );
    }

    #[test]
    fn absent_register_names_the_register() {
        let snap = Snapshot::new(CpuMode::X86_64);
        let insn = insn_at(0x2000, 4);
        let op = Operand::Register { reg: RegId::R13 };
        assert_eq!(
            effective_address(CpuMode::X86_64, &insn, &op, &snap),
            Err(AddressError::AbsentRegister("r13".to_string()))
        );
    }

    #[test]
    fn jcc_is_involutive_under_the_inversion_bit() {
        for flags in [0u64, FLAG_CF, FLAG_ZF, FLAG_SF | FLAG_OF, FLAG_PF | FLAG_ZF, 0xffff] {
            for code in 0..16u8 {
                assert_eq!(jcc_taken(flags, code), !jcc_taken(flags, code ^ 1));
            }
        }
    }

    #[test]
    fn jcc_table_spot_checks() {
        // jz / jnz
        assert!(jcc_taken(FLAG_ZF, 0x4));
        assert!(!jcc_taken(FLAG_ZF, 0x5));
        // jbe: CF || ZF
        assert!(jcc_taken(FLAG_CF, 0x6));
        assert!(jcc_taken(FLAG_ZF, 0x6));
        assert!(!jcc_taken(0, 0x6));
        // jl: SF != OF
        assert!(jcc_taken(FLAG_SF, 0xc));
        assert!(!jcc_taken(FLAG_SF | FLAG_OF, 0xc));
        // jle: ZF || SF != OF
        assert!(jcc_taken(FLAG_ZF, 0xe));
        assert!(!jcc_taken(0, 0xe));
    }

    #[test]
    fn counter_shortcuts_mask_to_their_width() {
        let snap = snapshot(&[("rcx", 0x1_0000)]);
        assert_eq!(is_condition_taken(&snap, Condition::Cxz), Ok(true));
        assert_eq!(is_condition_taken(&snap, Condition::Ecxz), Ok(false));
        assert_eq!(is_condition_taken(&snap, Condition::Rcxz), Ok(false));
        let zero = snapshot(&[("rcx", 0)]);
        assert_eq!(is_condition_taken(&zero, Condition::Rcxz), Ok(true));
    }
}

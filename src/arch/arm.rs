//! ARM operand and condition semantics.
//!
//! Covers the 32-bit ARM and Thumb modes: barrel-shifted index operands,
//! the pipeline-biased program counter (PC reads as the instruction address
//! plus 8 in ARM state, plus 4 in Thumb), and the N/Z/C/V condition table.

use crate::arch::{AddressError, CpuMode, Snapshot};
use crate::decode::{Condition, Instruction, MemExpression, Operand, RegId, ShiftKind};

const FLAG_N: u32 = 1 << 31;
const FLAG_Z: u32 = 1 << 30;
const FLAG_C: u32 = 1 << 29;
const FLAG_V: u32 = 1 << 28;

/// Fixed architectural index for a register identifier; decoder identifiers
/// are not contiguous.
pub(crate) fn gpr_index(reg: RegId) -> Option<usize> {
    Some(match reg {
        RegId::R0 => 0,
        RegId::R1 => 1,
        RegId::R2 => 2,
        RegId::R3 => 3,
        RegId::R4 => 4,
        RegId::R5 => 5,
        RegId::R6 => 6,
        RegId::R7 => 7,
        RegId::ArmR8 => 8,
        RegId::ArmR9 => 9,
        RegId::ArmR10 => 10,
        RegId::ArmR11 => 11,
        RegId::ArmR12 => 12,
        RegId::Sp => 13,
        RegId::Lr => 14,
        RegId::Pc => 15,
        _ => return None,
    })
}

/// Apply a barrel-shift to a 32-bit value. `carry` feeds the
/// rotate-with-extend variant.
pub fn shift(value: u32, kind: ShiftKind, amount: u32, carry: bool) -> u32 {
    match kind {
        ShiftKind::None => value,
        ShiftKind::Lsl => {
            if amount >= 32 {
                0
            } else {
                value << amount
            }
        }
        ShiftKind::Lsr => {
            if amount >= 32 {
                0
            } else {
                value >> amount
            }
        }
        ShiftKind::Asr => {
            if amount >= 32 {
                // the sign bit replicates across the whole word
                if value & 0x8000_0000 != 0 {
                    0xffff_ffff
                } else {
                    0
                }
            } else {
                ((value as i32) >> amount) as u32
            }
        }
        ShiftKind::Ror => value.rotate_right(amount % 32),
        ShiftKind::Rrx => (u32::from(carry) << 31) | (value >> 1),
    }
}

/// The value PC contributes to an operand: instruction address plus the
/// mode's pipeline bias.
pub fn pc_relative_value(mode: CpuMode, address: u64) -> Result<u64, AddressError> {
    match mode {
        CpuMode::Arm32 => Ok(address.wrapping_add(8) & 0xffff_ffff),
        CpuMode::Thumb => Ok(address.wrapping_add(4) & 0xffff_ffff),
        _ => Err(AddressError::UnsupportedCpuMode("PC-relative")),
    }
}

fn register_name(reg: RegId) -> String {
    format!("{reg:?}").to_lowercase()
}

fn register_value(
    mode: CpuMode,
    insn: &Instruction,
    snapshot: &Snapshot,
    reg: RegId,
) -> Result<u64, AddressError> {
    if reg == RegId::Pc {
        return pc_relative_value(mode, insn.address);
    }
    if reg == RegId::Cpsr {
        return snapshot
            .flags_value()
            .ok_or_else(|| AddressError::AbsentRegister("cpsr".to_string()));
    }
    let index = gpr_index(reg)
        .ok_or_else(|| AddressError::UnsupportedOperand(format!("register {reg:?}")))?;
    snapshot
        .gpr(index)
        .and_then(|r| r.value)
        .and_then(|v| v.as_address())
        .ok_or_else(|| AddressError::AbsentRegister(register_name(reg)))
}

/// Index registers read their raw architectural value; only the base
/// register sees the PC pipeline bias.
fn index_register_value(snapshot: &Snapshot, reg: RegId) -> Result<u64, AddressError> {
    let index = gpr_index(reg)
        .ok_or_else(|| AddressError::UnsupportedOperand(format!("register {reg:?}")))?;
    snapshot
        .gpr(index)
        .and_then(|r| r.value)
        .and_then(|v| v.as_address())
        .ok_or_else(|| AddressError::AbsentRegister(register_name(reg)))
}

fn expression_address(
    mode: CpuMode,
    insn: &Instruction,
    expr: &MemExpression,
    snapshot: &Snapshot,
) -> Result<u64, AddressError> {
    let base_reg = expr.base.ok_or_else(|| {
        AddressError::UnsupportedOperand("memory expression without a base register".into())
    })?;
    let base = register_value(mode, insn, snapshot, base_reg)?;

    let mut address = base.wrapping_add(expr.displacement as u64);
    if let Some(index_reg) = expr.index {
        let index = index_register_value(snapshot, index_reg)? as u32;
        // rotate-with-extend pulls the carry in; an absent CPSR would
        // fabricate debuggee state, so it is a hard failure
        let carry = if expr.shift == ShiftKind::Rrx {
            let cpsr = snapshot
                .flags_value()
                .ok_or_else(|| AddressError::AbsentRegister("cpsr".to_string()))?;
            cpsr as u32 & FLAG_C != 0
        } else {
            false
        };
        let shifted = shift(index, expr.shift, expr.shift_amount, carry);
        // scale is +1/-1: added or subtracted index forms
        let scale = if expr.scale == 0 { 1 } else { expr.scale };
        address = address.wrapping_add(u64::from(shifted).wrapping_mul(scale as i64 as u64));
    }

    Ok(address & 0xffff_ffff)
}

/// Resolve an operand of `insn` to an address.
pub fn effective_address(
    mode: CpuMode,
    insn: &Instruction,
    operand: &Operand,
    snapshot: &Snapshot,
) -> Result<u64, AddressError> {
    match operand {
        Operand::Register { reg } => register_value(mode, insn, snapshot, *reg),
        Operand::Expression { expr, .. } => expression_address(mode, insn, expr, snapshot),
        Operand::Absolute { offset } => Ok(*offset & 0xffff_ffff),
        Operand::Immediate { value } => Ok(*value as u64 & 0xffff_ffff),
        Operand::Relative { target } => Ok(*target & 0xffff_ffff),
    }
}

/// The ARM condition table. Even codes are the base predicate; the low bit
/// inverts it. Code 14 is "always"; its inversion (15) is never taken.
pub fn condition_taken(cpsr: u32, code: u8) -> bool {
    let n = cpsr & FLAG_N != 0;
    let z = cpsr & FLAG_Z != 0;
    let c = cpsr & FLAG_C != 0;
    let v = cpsr & FLAG_V != 0;

    let taken = match code & 0x0e {
        0x00 => z,           // eq
        0x02 => c,           // cs
        0x04 => n,           // mi
        0x06 => v,           // vs
        0x08 => c && !z,     // hi
        0x0a => n == v,      // ge
        0x0c => !z && n == v, // gt
        _ => true,           // al
    };
    if code & 1 != 0 {
        !taken
    } else {
        taken
    }
}

/// Evaluate a conditional instruction's predicate against the snapshot.
pub fn is_condition_taken(
    snapshot: &Snapshot,
    condition: Condition,
) -> Result<bool, AddressError> {
    match condition {
        Condition::Unconditional => Ok(true),
        Condition::Code(code) => {
            let cpsr = snapshot
                .flags_value()
                .ok_or_else(|| AddressError::AbsentRegister("cpsr".to_string()))?;
            Ok(condition_taken(cpsr as u32, code))
        }
        _ => Err(AddressError::UnsupportedOperand(
            "counter-register condition on ARM".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::RegisterValue;
    use crate::decode::{DataWidth, InstructionKind, SegmentPrefix};

    fn snapshot(pairs: &[(&str, u32)]) -> Snapshot {
        let mut snap = Snapshot::new(CpuMode::Arm32);
        for (name, value) in pairs {
            assert!(snap.set(name, RegisterValue::U32(*value)));
        }
        snap
    }

    fn insn_at(address: u64) -> Instruction {
        Instruction {
            address,
            mnemonic: "ldr".to_string(),
            bytes: vec![0; 4],
            operands: Vec::new(),
            kind: InstructionKind::Other,
            condition: Condition::Unconditional,
            segment: SegmentPrefix::None,
            modifies_pc: false,
        }
    }

    #[test]
    fn shift_edge_cases() {
        assert_eq!(shift(0xffff_ffff, ShiftKind::Lsr, 32, false), 0);
        assert_eq!(shift(0x8000_0001, ShiftKind::Asr, 32, false), 0xffff_ffff);
        assert_eq!(shift(0x7fff_ffff, ShiftKind::Asr, 32, false), 0);
        assert_eq!(shift(0x1234_5678, ShiftKind::Ror, 32, false), 0x1234_5678);
        assert_eq!(shift(0x1234_5678, ShiftKind::Ror, 36, false), 0x8123_4567);
        assert_eq!(shift(0x0000_0002, ShiftKind::Rrx, 1, true), 0x8000_0001);
        assert_eq!(shift(0x0000_0002, ShiftKind::Rrx, 1, false), 0x0000_0001);
        assert_eq!(shift(1, ShiftKind::Lsl, 4, false), 16);
    }

    #[test]
    fn pc_reads_with_the_pipeline_bias() {
        let snap = snapshot(&[("pc", 0xdead_beef)]);
        let insn = insn_at(0x8000);
        let op = Operand::Register { reg: RegId::Pc };
        assert_eq!(
            effective_address(CpuMode::Arm32, &insn, &op, &snap),
            Ok(0x8008)
        );
        assert_eq!(
            effective_address(CpuMode::Thumb, &insn, &op, &snap),
            Ok(0x8004)
        );
    }

    #[test]
    fn pc_relative_rejects_other_modes() {
        assert_eq!(
            pc_relative_value(CpuMode::X86_64, 0x8000),
            Err(AddressError::UnsupportedCpuMode("PC-relative"))
        );
    }

    #[test]
    fn scaled_index_with_barrel_shift() {
        let snap = snapshot(&[("r1", 0x1000), ("r2", 4)]);
        let insn = insn_at(0x8000);
        let op = Operand::Expression {
            expr: MemExpression {
                base: Some(RegId::R1),
                index: Some(RegId::R2),
                scale: 1,
                displacement: 0,
                shift: ShiftKind::Lsl,
                shift_amount: 2,
            },
            width: DataWidth::Dword,
        };
        assert_eq!(
            effective_address(CpuMode::Arm32, &insn, &op, &snap),
            Ok(0x1010)
        );
    }

    #[test]
    fn subtracted_index_form() {
        let snap = snapshot(&[("r1", 0x1000), ("r2", 0x10)]);
        let insn = insn_at(0x8000);
        let op = Operand::Expression {
            expr: MemExpression {
                base: Some(RegId::R1),
                index: Some(RegId::R2),
                scale: -1,
                displacement: 0,
                shift: ShiftKind::None,
                shift_amount: 0,
            },
            width: DataWidth::Dword,
        };
        assert_eq!(
            effective_address(CpuMode::Arm32, &insn, &op, &snap),
            Ok(0xff0)
        );
    }

    #[test]
    fn rrx_index_requires_the_carry_flag() {
        let op = |snapless: &Snapshot| {
            let insn = insn_at(0x8000);
            let expr = Operand::Expression {
                expr: MemExpression {
                    base: Some(RegId::R1),
                    index: Some(RegId::R2),
                    scale: 1,
                    displacement: 0,
                    shift: ShiftKind::Rrx,
                    shift_amount: 1,
                },
                width: DataWidth::Dword,
            };
            effective_address(CpuMode::Arm32, &insn, &expr, snapless)
        };

        // no CPSR in the snapshot: the carry cannot be fabricated
        let without_flags = snapshot(&[("r1", 0x1000), ("r2", 2)]);
        assert_eq!(
            op(&without_flags),
            Err(AddressError::AbsentRegister("cpsr".to_string()))
        );

        // with CPSR present the carry rotates into bit 31
        let with_carry = snapshot(&[("r1", 0x1000), ("r2", 2), ("cpsr", FLAG_C)]);
        assert_eq!(op(&with_carry), Ok(0x1000 + 0x8000_0001));
    }

    #[test]
    fn pc_index_reads_the_raw_register() {
        // the pipeline bias applies to a PC base, never to a PC index
        let snap = snapshot(&[("r1", 0x1000), ("pc", 0x2000)]);
        let insn = insn_at(0x8000);
        let op = Operand::Expression {
            expr: MemExpression {
                base: Some(RegId::R1),
                index: Some(RegId::Pc),
                scale: 1,
                displacement: 0,
                shift: ShiftKind::None,
                shift_amount: 0,
            },
            width: DataWidth::Dword,
        };
        assert_eq!(
            effective_address(CpuMode::Arm32, &insn, &op, &snap),
            Ok(0x3000)
        );
    }

    #[test]
    fn condition_table_is_involutive() {
        for cpsr in [0u32, FLAG_N, FLAG_Z, FLAG_C, FLAG_V, FLAG_N | FLAG_V, FLAG_C | FLAG_Z] {
            for code in 0..16u8 {
                assert_eq!(condition_taken(cpsr, code), !condition_taken(cpsr, code ^ 1));
            }
        }
    }

    #[test]
    fn condition_table_spot_checks() {
        // eq / ne
        assert!(condition_taken(FLAG_Z, 0));
        assert!(!condition_taken(FLAG_Z, 1));
        // hi: C && !Z
        assert!(condition_taken(FLAG_C, 8));
        assert!(!condition_taken(FLAG_C | FLAG_Z, 8));
        // ge: N == V
        assert!(condition_taken(FLAG_N | FLAG_V, 10));
        assert!(condition_taken(0, 10));
        assert!(!condition_taken(FLAG_N, 10));
        // gt: !Z && N == V
        assert!(!condition_taken(FLAG_Z, 12));
        // al
        assert!(condition_taken(0, 14));
        assert!(!condition_taken(0, 15));
    }
}

//! Backward scan for the previous instruction boundary.
//!
//! Variable-length encodings make "what instruction precedes this one"
//! ambiguous without function metadata. The heuristic tries three stages,
//! each weaker than the last: an instruction ending exactly at the current
//! offset, then a previous+resynchronized-current pair ending where the
//! original current instruction ends, then a lone undecodable byte whose
//! successors all decode. Within a stage the longest candidate wins.

use crate::decode::InstructionDecoder;

/// Length in bytes of the instruction preceding the one at `cur_offset`, or
/// 0 when every stage fails.
pub fn previous_instruction_length(
    decoder: &dyn InstructionDecoder,
    buf: &[u8],
    cur_offset: usize,
) -> usize {
    let cur_offset = cur_offset.min(buf.len());

    // stage 1: longest instruction ending exactly at the current offset
    let mut final_size = 0;
    for offset in (0..cur_offset).rev() {
        if let Some(inst) = decoder.decode(&buf[offset..cur_offset], 0) {
            if offset + inst.len() == cur_offset {
                final_size = inst.len();
            }
        }
    }
    if final_size != 0 {
        return final_size;
    }

    // stage 2: a previous instruction plus a re-decoded current one that
    // together end exactly where the original current instruction ends;
    // the previous instruction should still be as long as possible
    let original_end = cur_offset
        + decoder
            .decode(&buf[cur_offset..], 0)
            .map_or(0, |inst| inst.len());
    for offset in (0..cur_offset).rev() {
        let Some(prev) = decoder.decode(&buf[offset..cur_offset], 0) else {
            continue;
        };
        let resync = offset + prev.len();
        if let Some(new_cur) = decoder.decode(&buf[resync..], 0) {
            if resync + new_cur.len() == original_end {
                final_size = cur_offset - offset;
            }
        }
    }
    if final_size != 0 {
        return final_size;
    }

    // stage 3: a single undecodable byte directly above, so that rendering
    // it as data does not swallow the line after it
    for offset in (0..cur_offset).rev() {
        if decoder.decode(&buf[offset..], 0).is_none() {
            return cur_offset - offset;
        }
    }

    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{Condition, Instruction, InstructionKind, SegmentPrefix};

    /// Toy decoder: a byte 1..=4 encodes an instruction of that length
    /// (consuming that many bytes); anything else is invalid.
    struct LengthDecoder;

    impl InstructionDecoder for LengthDecoder {
        fn decode(&self, bytes: &[u8], address: u64) -> Option<Instruction> {
            let len = usize::from(*bytes.first()?);
            if !(1..=4).contains(&len) || bytes.len() < len {
                return None;
            }
            Some(Instruction {
                address,
                mnemonic: format!("op{len}"),
                bytes: bytes[..len].to_vec(),
                operands: Vec::new(),
                kind: InstructionKind::Other,
                condition: Condition::Unconditional,
                segment: SegmentPrefix::None,
                modifies_pc: false,
            })
        }

        fn max_size(&self) -> usize {
            4
        }
    }

    #[test]
    fn stage1_prefers_the_longest_exact_predecessor() {
        // both [3,1,1] from 0 and [1] from 2 end at offset 3
        let buf = [3, 1, 1, 1];
        assert_eq!(previous_instruction_length(&LengthDecoder, &buf, 3), 3);
    }

    #[test]
    fn stage1_finds_a_simple_predecessor() {
        let buf = [2, 0, 1];
        assert_eq!(previous_instruction_length(&LengthDecoder, &buf, 2), 2);
    }

    #[test]
    fn stage2_resynchronizes_across_the_boundary() {
        // no instruction ends at offset 2, but op1 at 0 followed by op2 at 1
        // ends where the original current instruction (op1 at 2) ends
        let buf = [1, 2, 1, 9];
        assert_eq!(previous_instruction_length(&LengthDecoder, &buf, 2), 2);
    }

    #[test]
    fn stage3_yields_a_lone_invalid_byte() {
        // offset 1 holds an undecodable byte; everything after decodes
        let buf = [9, 0, 1, 1];
        assert_eq!(previous_instruction_length(&LengthDecoder, &buf, 2), 1);
    }

    #[test]
    fn no_predecessor_at_the_buffer_start() {
        let buf = [1, 1];
        assert_eq!(previous_instruction_length(&LengthDecoder, &buf, 0), 0);
    }
}

//! Register snapshots and change tracking.
//!
//! A [`Snapshot`] is a bag of typed registers captured from a stopped
//! debuggee; once captured it is never mutated. Registers that do not exist
//! in the current mode (or whose capture failed) are carried as *absent*,
//! never as zero, so the display layer can distinguish "is zero" from
//! "cannot be read". [`StateTracker`] keeps the current and previous
//! snapshots in a two-slot arena and answers "did this register change"
//! queries for highlight rendering.

use std::mem;

use crate::arch::CpuMode;
use crate::float::Value80;

/// A typed register value. The variant fixes the width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterValue {
    U16(u16),
    U32(u32),
    U64(u64),
    U80(Value80),
    U128(u128),
    U256([u128; 2]),
}

impl RegisterValue {
    /// Width in bits.
    pub fn width_bits(self) -> u32 {
        match self {
            RegisterValue::U16(_) => 16,
            RegisterValue::U32(_) => 32,
            RegisterValue::U64(_) => 64,
            RegisterValue::U80(_) => 80,
            RegisterValue::U128(_) => 128,
            RegisterValue::U256(_) => 256,
        }
    }

    /// The value as an address, for variants narrow enough to be one.
    pub fn as_address(self) -> Option<u64> {
        match self {
            RegisterValue::U16(v) => Some(u64::from(v)),
            RegisterValue::U32(v) => Some(u64::from(v)),
            RegisterValue::U64(v) => Some(v),
            _ => None,
        }
    }

    /// Fixed-width zero-padded hex rendering.
    pub fn to_hex(self) -> String {
        match self {
            RegisterValue::U16(v) => format!("{v:04x}"),
            RegisterValue::U32(v) => format!("{v:08x}"),
            RegisterValue::U64(v) => format!("{v:016x}"),
            RegisterValue::U80(v) => v.to_hex(),
            RegisterValue::U128(v) => format!("{v:032x}"),
            RegisterValue::U256([lo, hi]) => format!("{hi:032x}{lo:032x}"),
        }
    }
}

/// A named register with a validity flag. Equality compares both the
/// validity and the value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Register {
    pub name: &'static str,
    pub value: Option<RegisterValue>,
}

impl Register {
    fn absent(name: &'static str) -> Self {
        Self { name, value: None }
    }

    pub fn is_present(&self) -> bool {
        self.value.is_some()
    }

    /// Hex text, or a placeholder when the register is absent.
    pub fn to_hex(&self) -> String {
        match self.value {
            Some(v) => v.to_hex(),
            None => "????".to_string(),
        }
    }
}

const X86_64_GPR_NAMES: [&str; 16] = [
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12",
    "r13", "r14", "r15",
];
const X86_GPR_NAMES: [&str; 8] = ["eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi"];
const ARM_GPR_NAMES: [&str; 16] = [
    "r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7", "r8", "r9", "r10", "r11", "r12", "sp", "lr",
    "pc",
];
const SEGMENT_NAMES: [&str; 6] = ["es", "cs", "ss", "ds", "fs", "gs"];
const ST_NAMES: [&str; 8] = ["st0", "st1", "st2", "st3", "st4", "st5", "st6", "st7"];
const XMM_NAMES: [&str; 16] = [
    "xmm0", "xmm1", "xmm2", "xmm3", "xmm4", "xmm5", "xmm6", "xmm7", "xmm8", "xmm9", "xmm10",
    "xmm11", "xmm12", "xmm13", "xmm14", "xmm15",
];
const YMM_NAMES: [&str; 16] = [
    "ymm0", "ymm1", "ymm2", "ymm3", "ymm4", "ymm5", "ymm6", "ymm7", "ymm8", "ymm9", "ymm10",
    "ymm11", "ymm12", "ymm13", "ymm14", "ymm15",
];

/// One captured register state. `mode() == None` is the empty sentinel
/// meaning "no live process".
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    mode: Option<CpuMode>,
    gprs: Vec<Register>,
    instruction_pointer: Register,
    flags: Register,
    segments: Vec<Register>,
    segment_bases: Vec<Register>,
    fpu_st: Vec<Register>,
    fpu_control: Register,
    fpu_status: Register,
    fpu_tag: Register,
    xmm: Vec<Register>,
    ymm: Vec<Register>,
    mxcsr: Register,
}

impl Snapshot {
    /// The empty sentinel: no mode, every register absent.
    pub fn empty() -> Self {
        Self {
            mode: None,
            gprs: Vec::new(),
            instruction_pointer: Register::absent("pc"),
            flags: Register::absent("flags"),
            segments: Vec::new(),
            segment_bases: Vec::new(),
            fpu_st: Vec::new(),
            fpu_control: Register::absent("fctrl"),
            fpu_status: Register::absent("fstat"),
            fpu_tag: Register::absent("ftag"),
            xmm: Vec::new(),
            ymm: Vec::new(),
            mxcsr: Register::absent("mxcsr"),
        }
    }

    /// A snapshot with the register set appropriate for `mode`, every
    /// register initially absent.
    pub fn new(mode: CpuMode) -> Self {
        let mut snap = Self::empty();
        snap.mode = Some(mode);
        match mode {
            CpuMode::X86_64 => {
                snap.gprs = X86_64_GPR_NAMES.iter().map(|n| Register::absent(n)).collect();
                snap.instruction_pointer = Register::absent("rip");
                snap.flags = Register::absent("rflags");
                snap.segments = SEGMENT_NAMES.iter().map(|n| Register::absent(n)).collect();
                snap.segment_bases = vec![Register::absent("fs_base"), Register::absent("gs_base")];
                snap.fpu_st = ST_NAMES.iter().map(|n| Register::absent(n)).collect();
                snap.xmm = XMM_NAMES.iter().map(|n| Register::absent(n)).collect();
                snap.ymm = YMM_NAMES.iter().map(|n| Register::absent(n)).collect();
            }
            CpuMode::X86 => {
                snap.gprs = X86_GPR_NAMES.iter().map(|n| Register::absent(n)).collect();
                snap.instruction_pointer = Register::absent("eip");
                snap.flags = Register::absent("eflags");
                snap.segments = SEGMENT_NAMES.iter().map(|n| Register::absent(n)).collect();
                snap.segment_bases = vec![Register::absent("fs_base"), Register::absent("gs_base")];
                snap.fpu_st = ST_NAMES.iter().map(|n| Register::absent(n)).collect();
                snap.xmm = XMM_NAMES[..8].iter().map(|n| Register::absent(n)).collect();
                snap.ymm = YMM_NAMES[..8].iter().map(|n| Register::absent(n)).collect();
            }
            CpuMode::Arm32 | CpuMode::Thumb => {
                snap.gprs = ARM_GPR_NAMES.iter().map(|n| Register::absent(n)).collect();
                // the program counter is gprs[15]; the dedicated slot stays
                // absent and the accessor redirects
                snap.flags = Register::absent("cpsr");
            }
        }
        snap
    }

    pub fn mode(&self) -> Option<CpuMode> {
        self.mode
    }

    pub fn is_empty(&self) -> bool {
        self.mode.is_none()
    }

    /// General-purpose register by its fixed architecture index.
    pub fn gpr(&self, index: usize) -> Option<&Register> {
        self.gprs.get(index)
    }

    pub fn gpr_count(&self) -> usize {
        self.gprs.len()
    }

    /// The instruction-pointer register (`rip`/`eip`, or `pc` on ARM).
    pub fn instruction_pointer(&self) -> &Register {
        match self.mode {
            Some(CpuMode::Arm32) | Some(CpuMode::Thumb) => &self.gprs[15],
            _ => &self.instruction_pointer,
        }
    }

    pub fn flags(&self) -> &Register {
        &self.flags
    }

    pub fn flags_value(&self) -> Option<u64> {
        self.flags.value.and_then(RegisterValue::as_address)
    }

    pub fn segment(&self, index: usize) -> Option<&Register> {
        self.segments.get(index)
    }

    /// `fs_base`/`gs_base` by name.
    pub fn segment_base(&self, name: &str) -> Option<&Register> {
        self.segment_bases.iter().find(|r| r.name == name)
    }

    pub fn fpu_st(&self, index: usize) -> Option<&Register> {
        self.fpu_st.get(index)
    }

    pub fn fpu_control(&self) -> &Register {
        &self.fpu_control
    }

    pub fn fpu_status(&self) -> &Register {
        &self.fpu_status
    }

    pub fn fpu_tag(&self) -> &Register {
        &self.fpu_tag
    }

    /// Top-of-stack field from the FPU status word.
    pub fn fpu_top(&self) -> Option<usize> {
        match self.fpu_status.value {
            Some(RegisterValue::U16(v)) => Some(usize::from((v >> 11) & 7)),
            _ => None,
        }
    }

    /// Two-bit tag field for physical FPU register `index`.
    pub fn fpu_tag_bits(&self, index: usize) -> Option<u8> {
        match self.fpu_tag.value {
            Some(RegisterValue::U16(v)) => Some(((v >> (2 * index)) & 3) as u8),
            _ => None,
        }
    }

    pub fn xmm(&self, index: usize) -> Option<&Register> {
        self.xmm.get(index)
    }

    pub fn ymm(&self, index: usize) -> Option<&Register> {
        self.ymm.get(index)
    }

    pub fn mxcsr(&self) -> &Register {
        &self.mxcsr
    }

    /// Every register in this snapshot, in display order.
    pub fn iter(&self) -> impl Iterator<Item = &Register> {
        self.gprs
            .iter()
            .chain(std::iter::once(&self.instruction_pointer))
            .chain(std::iter::once(&self.flags))
            .chain(self.segments.iter())
            .chain(self.segment_bases.iter())
            .chain(self.fpu_st.iter())
            .chain(std::iter::once(&self.fpu_control))
            .chain(std::iter::once(&self.fpu_status))
            .chain(std::iter::once(&self.fpu_tag))
            .chain(self.xmm.iter())
            .chain(self.ymm.iter())
            .chain(std::iter::once(&self.mxcsr))
    }

    fn iter_mut(&mut self) -> impl Iterator<Item = &mut Register> {
        self.gprs
            .iter_mut()
            .chain(std::iter::once(&mut self.instruction_pointer))
            .chain(std::iter::once(&mut self.flags))
            .chain(self.segments.iter_mut())
            .chain(self.segment_bases.iter_mut())
            .chain(self.fpu_st.iter_mut())
            .chain(std::iter::once(&mut self.fpu_control))
            .chain(std::iter::once(&mut self.fpu_status))
            .chain(std::iter::once(&mut self.fpu_tag))
            .chain(self.xmm.iter_mut())
            .chain(self.ymm.iter_mut())
            .chain(std::iter::once(&mut self.mxcsr))
    }

    /// Register lookup by display name (`"rax"`, `"gs_base"`, `"xmm3"`, ...).
    pub fn by_name(&self, name: &str) -> Option<&Register> {
        self.iter().find(|r| r.name == name)
    }

    /// Set a register's value by name. Returns false when no register of
    /// that name exists in this snapshot's mode.
    pub fn set(&mut self, name: &str, value: RegisterValue) -> bool {
        for reg in self.iter_mut() {
            if reg.name == name {
                reg.value = Some(value);
                return true;
            }
        }
        false
    }
}

/// Two-slot current/previous snapshot arena.
#[derive(Debug)]
pub struct StateTracker {
    current: Snapshot,
    previous: Snapshot,
}

impl StateTracker {
    pub fn new() -> Self {
        Self {
            current: Snapshot::empty(),
            previous: Snapshot::empty(),
        }
    }

    pub fn current(&self) -> &Snapshot {
        &self.current
    }

    pub fn previous(&self) -> &Snapshot {
        &self.previous
    }

    /// Install a freshly captured snapshot; the old current slides into the
    /// previous slot without copying.
    pub fn refresh(&mut self, fresh: Snapshot) {
        self.previous = mem::replace(&mut self.current, fresh);
    }

    /// True iff the named register differs between the current and previous
    /// snapshots. A register present on one side but not the other counts
    /// as changed.
    pub fn changed(&self, name: &str) -> bool {
        match (self.current.by_name(name), self.previous.by_name(name)) {
            (Some(a), Some(b)) => a.value != b.value,
            (None, None) => false,
            _ => true,
        }
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a snapshot from the raw ptrace register blocks.
#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
pub fn from_user_regs(
    regs: &libc::user_regs_struct,
    fpregs: Option<&libc::user_fpregs_struct>,
) -> Snapshot {
    let mut snap = Snapshot::new(CpuMode::X86_64);

    let gpr_values = [
        regs.rax, regs.rcx, regs.rdx, regs.rbx, regs.rsp, regs.rbp, regs.rsi, regs.rdi, regs.r8,
        regs.r9, regs.r10, regs.r11, regs.r12, regs.r13, regs.r14, regs.r15,
    ];
    for (i, value) in gpr_values.iter().enumerate() {
        snap.gprs[i].value = Some(RegisterValue::U64(*value));
    }
    snap.instruction_pointer.value = Some(RegisterValue::U64(regs.rip));
    snap.flags.value = Some(RegisterValue::U64(regs.eflags));

    let seg_values = [regs.es, regs.cs, regs.ss, regs.ds, regs.fs, regs.gs];
    for (i, value) in seg_values.iter().enumerate() {
        snap.segments[i].value = Some(RegisterValue::U16(*value as u16));
    }
    snap.segment_bases[0].value = Some(RegisterValue::U64(regs.fs_base));
    snap.segment_bases[1].value = Some(RegisterValue::U64(regs.gs_base));

    if let Some(fp) = fpregs {
        snap.fpu_control.value = Some(RegisterValue::U16(fp.cwd));
        snap.fpu_status.value = Some(RegisterValue::U16(fp.swd));

        let top = usize::from((fp.swd >> 11) & 7);
        let mut full_tag: u16 = 0;
        for stack_index in 0..8 {
            // st_space stores st(i) as four dwords, ten bytes significant
            let words = &fp.st_space[stack_index * 4..stack_index * 4 + 3];
            let mut bytes = [0u8; 10];
            bytes[0..4].copy_from_slice(&words[0].to_le_bytes());
            bytes[4..8].copy_from_slice(&words[1].to_le_bytes());
            bytes[8..10].copy_from_slice(&words[2].to_le_bytes()[0..2]);
            let value = Value80::from_le_bytes(bytes);
            snap.fpu_st[stack_index].value = Some(RegisterValue::U80(value));

            // the FXSAVE tag word is abridged to one valid bit per physical
            // register; rebuild the two-bit form the display expects
            let physical = (top + stack_index) & 7;
            let tag: u16 = if (fp.ftw >> physical) & 1 == 0 {
                3 // empty
            } else {
                let exponent = value.sign_exponent & 0x7fff;
                let fraction = value.mantissa & !(1u64 << 63);
                let integer_bit = value.mantissa >> 63;
                if exponent == 0 && fraction == 0 && integer_bit == 0 {
                    1 // zero
                } else if exponent == 0x7fff || exponent == 0 || integer_bit == 0 {
                    2 // special
                } else {
                    0 // valid
                }
            };
            full_tag |= u16::from(tag) << (2 * physical);
        }
        snap.fpu_tag.value = Some(RegisterValue::U16(full_tag));

        for i in 0..16 {
            let words = &fp.xmm_space[i * 4..i * 4 + 4];
            let mut bytes = [0u8; 16];
            for (j, w) in words.iter().enumerate() {
                bytes[j * 4..j * 4 + 4].copy_from_slice(&w.to_le_bytes());
            }
            snap.xmm[i].value = Some(RegisterValue::U128(u128::from_le_bytes(bytes)));
        }
        snap.mxcsr.value = Some(RegisterValue::U32(fp.mxcsr));
        // ymm stays absent: the upper halves are not part of this register
        // block, and absent-not-zero is the contract
    }

    snap
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x64_with(pairs: &[(&str, u64)]) -> Snapshot {
        let mut snap = Snapshot::new(CpuMode::X86_64);
        for (name, value) in pairs {
            assert!(snap.set(name, RegisterValue::U64(*value)), "no register {name}");
        }
        snap
    }

    #[test]
    fn empty_sentinel_has_no_mode_and_no_registers() {
        let snap = Snapshot::empty();
        assert!(snap.is_empty());
        assert!(snap.by_name("rax").is_none());
        assert!(!snap.instruction_pointer().is_present());
    }

    #[test]
    fn gpr_order_is_the_architectural_encoding_order() {
        let snap = Snapshot::new(CpuMode::X86_64);
        assert_eq!(snap.gpr(0).unwrap().name, "rax");
        assert_eq!(snap.gpr(1).unwrap().name, "rcx");
        assert_eq!(snap.gpr(4).unwrap().name, "rsp");
        assert_eq!(snap.gpr(15).unwrap().name, "r15");
        let arm = Snapshot::new(CpuMode::Arm32);
        assert_eq!(arm.gpr(13).unwrap().name, "sp");
        assert_eq!(arm.gpr(15).unwrap().name, "pc");
    }

    #[test]
    fn arm_instruction_pointer_is_r15() {
        let mut snap = Snapshot::new(CpuMode::Arm32);
        snap.set("pc", RegisterValue::U32(0x8000));
        assert_eq!(
            snap.instruction_pointer().value,
            Some(RegisterValue::U32(0x8000))
        );
    }

    #[test]
    fn diff_reports_value_changes() {
        let mut tracker = StateTracker::new();
        tracker.refresh(x64_with(&[("rax", 5), ("rbx", 7)]));
        tracker.refresh(x64_with(&[("rax", 5), ("rbx", 8)]));
        assert!(!tracker.changed("rax"));
        assert!(tracker.changed("rbx"));
    }

    #[test]
    fn absent_versus_present_is_a_change() {
        let mut tracker = StateTracker::new();
        tracker.refresh(x64_with(&[("rax", 5)]));
        // fresh snapshot where rax was never captured
        tracker.refresh(Snapshot::new(CpuMode::X86_64));
        assert!(tracker.changed("rax"));
        // a register absent from both sides is unchanged
        assert!(!tracker.changed("does_not_exist"));
    }

    #[test]
    fn refresh_slides_current_into_previous() {
        let mut tracker = StateTracker::new();
        tracker.refresh(x64_with(&[("rax", 1)]));
        tracker.refresh(x64_with(&[("rax", 2)]));
        assert_eq!(
            tracker.previous().by_name("rax").unwrap().value,
            Some(RegisterValue::U64(1))
        );
        assert_eq!(
            tracker.current().by_name("rax").unwrap().value,
            Some(RegisterValue::U64(2))
        );
    }

    #[test]
    fn fpu_top_comes_from_status_bits() {
        let mut snap = Snapshot::new(CpuMode::X86_64);
        snap.set("fstat", RegisterValue::U16(5 << 11));
        assert_eq!(snap.fpu_top(), Some(5));
    }

    #[test]
    fn hex_rendering_is_fixed_width() {
        assert_eq!(RegisterValue::U16(0xab).to_hex(), "00ab");
        assert_eq!(RegisterValue::U64(0x7fff_0000).to_hex(), "000000007fff0000");
        assert_eq!(Register::absent("rax").to_hex(), "????");
    }

    #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
    #[test]
    fn fxsave_tag_word_is_rebuilt_per_physical_register() {
        let regs: libc::user_regs_struct = unsafe { std::mem::zeroed() };
        let mut fp: libc::user_fpregs_struct = unsafe { std::mem::zeroed() };
        fp.swd = 2 << 11; // TOP = 2
        fp.ftw = 0b0000_1100; // physical 2 and 3 in use
        // st(0) -> physical 2, holds zero; st(1) -> physical 3, holds 1.5
        fp.st_space[5] = 0xc000_0000;
        fp.st_space[6] = 0x0000_3fff;

        let snap = from_user_regs(&regs, Some(&fp));
        assert_eq!(snap.fpu_top(), Some(2));
        assert_eq!(snap.fpu_tag_bits(2), Some(1)); // zero
        assert_eq!(snap.fpu_tag_bits(3), Some(0)); // valid
        assert_eq!(snap.fpu_tag_bits(0), Some(3)); // empty
        match snap.fpu_st(1).and_then(|r| r.value) {
            Some(RegisterValue::U80(v)) => assert_eq!(v.to_f64(), 1.5),
            other => panic!("st(1) was {other:?}"),
        }
    }
}

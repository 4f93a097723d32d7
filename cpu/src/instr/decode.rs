// SPDX-License-Identifier: MPL-2.0

//! Instruction field extraction.

use std::fmt;

/// A raw 32-bit instruction word.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct Opcode(pub u32);

impl fmt::Debug for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Opcode({:#010x})", self.0)
    }
}

macro_rules! def_decode_instr_part {
    ($fn_name:ident, $range:ident, $ty:ty) => {
        #[inline(always)]
        pub fn $fn_name(self) -> $ty {
            let range = enc_range::$range;
            let width = range.end - range.start;

            ((self.0 >> range.start) & ((1 << width) - 1)) as $ty
        }
    };
}

impl Opcode {
    def_decode_instr_part!(op, OP, u32);
    def_decode_instr_part!(target, TARGET, u32);
    def_decode_instr_part!(imm, IMM, u16);
    def_decode_instr_part!(rs, RS, usize);
    def_decode_instr_part!(rt, RT, usize);
    def_decode_instr_part!(rd, RD, usize);
    def_decode_instr_part!(shamt, SHAMT, u32);
    def_decode_instr_part!(funct, FUNCT, u32);
    def_decode_instr_part!(compare_cc, COMPARE_CC, usize);
    def_decode_instr_part!(branch_cc, BRANCH_CC, usize);
    def_decode_instr_part!(nd, ND, u32);
    def_decode_instr_part!(tf, TF, u32);

    /// The immediate operand, sign-extended to 64 bits.
    #[inline(always)]
    pub fn simm(self) -> u64 {
        crate::instr::sign_extend_16(self.imm())
    }

    /// The floating-point format field of a COP1 computational instruction.
    #[inline(always)]
    pub fn fmt(self) -> usize {
        self.rs()
    }

    /// The COP1X addend register.
    #[inline(always)]
    pub fn fr(self) -> usize {
        self.rs()
    }

    #[inline(always)]
    pub fn ft(self) -> usize {
        self.rt()
    }

    #[inline(always)]
    pub fn fs(self) -> usize {
        self.rd()
    }

    #[inline(always)]
    pub fn fd(self) -> usize {
        self.shamt() as usize
    }
}

mod enc_range {
    use std::ops::Range;

    pub const FUNCT: Range<u32> = 0..6;
    pub const SHAMT: Range<u32> = 6..11;
    pub const COMPARE_CC: Range<u32> = 8..11;
    pub const RD: Range<u32> = 11..16;
    pub const TF: Range<u32> = 16..17;
    pub const ND: Range<u32> = 17..18;
    pub const BRANCH_CC: Range<u32> = 18..21;
    pub const RT: Range<u32> = 16..21;
    pub const RS: Range<u32> = 21..26;
    pub const IMM: Range<u32> = 0..16;
    pub const TARGET: Range<u32> = 0..26;
    pub const OP: Range<u32> = 26..32;
}

// SPDX-License-Identifier: MPL-2.0

//! A tiny assembler and a RAM-backed harness for unit tests.

#![allow(dead_code)]

use crate::{
    bus::Ram,
    cop0,
    mem::Endian,
    tlb::Entry,
    Config,
    Cpu,
    Reset,
    State,
};

/// Where [`Rig::run`] and [`Rig::run_op`] place their code.
pub const CODE_BASE: u32 = 0x8000_0000;

const RAM_SIZE: usize = 1 << 20;

/// A processor wired to 1 MiB of mirrored RAM.
pub struct Rig {
    pub state: State,
    pub ram: Ram,
}

impl Rig {
    pub fn new(endian: Endian) -> Self {
        let reset = Reset { big_endian: endian.is_big(), ..Reset::default() };

        Self::with_config(Config::default(), reset)
    }

    pub fn with_config(config: Config, reset: Reset) -> Self {
        let endian = if reset.big_endian { Endian::Big } else { Endian::Little };
        let mut state = State::new(config).unwrap();
        state.reset(reset).unwrap();

        Self { state, ram: Ram::new(RAM_SIZE, endian) }
    }

    pub fn cpu(&mut self) -> Cpu<'_, '_, Ram> {
        self.state.connect_bus(&mut self.ram)
    }

    /// Writes instructions at the given virtual address.
    pub fn load(&mut self, vaddr: u32, code: &[u32]) {
        let base = self
            .state
            .translate_for_debug(vaddr)
            .unwrap_or(vaddr & 0x1fff_ffff);
        for (i, op) in code.iter().enumerate() {
            self.ram.set_32(base as usize + 4 * i, *op);
        }
        // Stale code pages must not outlive new code.
        self.state.code_page = None;
    }

    pub fn execute(&mut self, cycles: i32) -> i32 {
        self.cpu().execute(cycles)
    }

    /// Runs the given straight-line code from [`CODE_BASE`] until control leaves it.
    ///
    /// Instructions are stepped one at a time, so multi-cycle instructions never cut the run
    /// short.
    pub fn run(&mut self, code: &[u32]) {
        self.load(CODE_BASE, code);
        self.state.set_pc(CODE_BASE);

        let end = CODE_BASE + 4 * code.len() as u32;
        while (CODE_BASE..end).contains(&self.state.pc()) {
            self.execute(1);
        }
    }

    pub fn run_op(&mut self, op: u32) {
        self.run(&[op]);
    }

    /// Maps the 8 KiB starting at `vaddr` onto the same physical addresses with a global entry.
    pub fn map_identity(&mut self, vaddr: u32) {
        let pfn = u64::from(vaddr >> 12);
        let flags = Entry::V | Entry::D | Entry::G;
        let (index, page_mask, entry_hi) = (
            self.state.cop0_reg(cop0::File::INDEX),
            self.state.cop0_reg(cop0::File::PAGE_MASK),
            self.state.cop0_reg(cop0::File::ENTRY_HI),
        );

        self.state.write_cop0(cop0::File::PAGE_MASK, 0);
        self.state.write_cop0(cop0::File::ENTRY_HI, u64::from(vaddr & !0x1fff));
        self.state.write_cop0(cop0::File::ENTRY_LO0, (pfn << 6) | flags);
        self.state.write_cop0(cop0::File::ENTRY_LO1, ((pfn + 1) << 6) | flags);
        self.state.tlb_write(0);

        self.state.write_cop0(cop0::File::INDEX, index);
        self.state.write_cop0(cop0::File::PAGE_MASK, page_mask);
        self.state.write_cop0(cop0::File::ENTRY_HI, entry_hi);
    }
}

fn r_type(rs: usize, rt: usize, rd: usize, sa: u32, funct: u32) -> u32 {
    ((rs as u32) << 21) | ((rt as u32) << 16) | ((rd as u32) << 11) | (sa << 6) | funct
}

fn i_type(op: u32, rs: usize, rt: usize, imm: u16) -> u32 {
    (op << 26) | ((rs as u32) << 21) | ((rt as u32) << 16) | u32::from(imm)
}

macro_rules! def_r3 {
    ($($name:ident = $funct:literal),* $(,)?) => {
        $(
            pub fn $name(rd: usize, rs: usize, rt: usize) -> u32 {
                r_type(rs, rt, rd, 0, $funct)
            }
        )*
    };
}

macro_rules! def_shift {
    ($($name:ident = $funct:literal),* $(,)?) => {
        $(
            pub fn $name(rd: usize, rt: usize, sa: u32) -> u32 {
                r_type(0, rt, rd, sa, $funct)
            }
        )*
    };
}

macro_rules! def_hi_lo {
    ($($name:ident = $funct:literal),* $(,)?) => {
        $(
            pub fn $name(rs: usize, rt: usize) -> u32 {
                r_type(rs, rt, 0, 0, $funct)
            }
        )*
    };
}

macro_rules! def_imm {
    ($($name:ident = $op:literal),* $(,)?) => {
        $(
            pub fn $name(rt: usize, rs: usize, imm: i16) -> u32 {
                i_type($op, rs, rt, imm as u16)
            }
        )*
    };
}

macro_rules! def_mem {
    ($($name:ident = $op:literal),* $(,)?) => {
        $(
            pub fn $name(rt: usize, base: usize, offset: i16) -> u32 {
                i_type($op, base, rt, offset as u16)
            }
        )*
    };
}

def_r3! {
    add = 0x20, addu = 0x21, sub = 0x22, subu = 0x23,
    and = 0x24, or = 0x25, xor = 0x26, nor = 0x27,
    slt = 0x2a, sltu = 0x2b,
    dadd = 0x2c, daddu = 0x2d, dsub = 0x2e, dsubu = 0x2f,
    movz = 0x0a, movn = 0x0b,
}

def_shift! {
    sll = 0x00, srl = 0x02, sra = 0x03,
    dsll = 0x38, dsrl = 0x3a, dsra = 0x3b,
    dsll32 = 0x3c, dsrl32 = 0x3e, dsra32 = 0x3f,
}

def_hi_lo! {
    mult = 0x18, multu = 0x19, div = 0x1a, divu = 0x1b,
    dmult = 0x1c, dmultu = 0x1d, ddiv = 0x1e, ddivu = 0x1f,
    tge = 0x30, tgeu = 0x31, tlt = 0x32, tltu = 0x33, teq = 0x34, tne = 0x36,
}

def_imm! {
    addi = 0x08, addiu = 0x09, slti = 0x0a,
    daddi = 0x18, daddiu = 0x19,
}

def_mem! {
    ldl = 0x1a, ldr = 0x1b,
    lb = 0x20, lh = 0x21, lwl = 0x22, lw = 0x23, lbu = 0x24, lhu = 0x25, lwr = 0x26, lwu = 0x27,
    sb = 0x28, sh = 0x29, swl = 0x2a, sw = 0x2b, sdl = 0x2c, sdr = 0x2d, swr = 0x2e,
    ll = 0x30, lwc1 = 0x31, lwc2 = 0x32, lld = 0x34, ldc1 = 0x35, ldc2 = 0x36, ld = 0x37,
    sc = 0x38, swc1 = 0x39, swc2 = 0x3a, scd = 0x3c, sdc1 = 0x3d, sdc2 = 0x3e, sd = 0x3f,
}

pub fn nop() -> u32 {
    0
}

pub fn ori(rt: usize, rs: usize, imm: u16) -> u32 {
    i_type(0x0d, rs, rt, imm)
}

pub fn lui(rt: usize, imm: u16) -> u32 {
    i_type(0x0f, 0, rt, imm)
}

pub fn j(target: u32) -> u32 {
    (0x02 << 26) | ((target >> 2) & 0x03ff_ffff)
}

pub fn jal(target: u32) -> u32 {
    (0x03 << 26) | ((target >> 2) & 0x03ff_ffff)
}

pub fn jr(rs: usize) -> u32 {
    r_type(rs, 0, 0, 0, 0x08)
}

pub fn jalr(rd: usize, rs: usize) -> u32 {
    r_type(rs, 0, rd, 0, 0x09)
}

/// The offset of a branch counts instructions from the delay slot.
pub fn beq(rs: usize, rt: usize, offset: i16) -> u32 {
    i_type(0x04, rs, rt, offset as u16)
}

pub fn bne(rs: usize, rt: usize, offset: i16) -> u32 {
    i_type(0x05, rs, rt, offset as u16)
}

pub fn beql(rs: usize, rt: usize, offset: i16) -> u32 {
    i_type(0x14, rs, rt, offset as u16)
}

pub fn bnel(rs: usize, rt: usize, offset: i16) -> u32 {
    i_type(0x15, rs, rt, offset as u16)
}

pub fn bltzall(rs: usize, offset: i16) -> u32 {
    i_type(0x01, rs, 0x12, offset as u16)
}

pub fn tnei(rs: usize, imm: i16) -> u32 {
    i_type(0x01, rs, 0x0e, imm as u16)
}

pub fn teqi(rs: usize, imm: i16) -> u32 {
    i_type(0x01, rs, 0x0c, imm as u16)
}

pub fn syscall() -> u32 {
    0x0c
}

pub fn brk() -> u32 {
    0x0d
}

pub fn mad(rs: usize, rt: usize) -> u32 {
    (0x1c << 26) | r_type(rs, rt, 0, 0, 0x00)
}

pub fn mul(rd: usize, rs: usize, rt: usize) -> u32 {
    (0x1c << 26) | r_type(rs, rt, rd, 0, 0x02)
}

fn cop(unit: u32, rs: usize, rt: usize, rd: usize, funct: u32) -> u32 {
    ((0x10 | unit) << 26) | r_type(rs, rt, rd, 0, funct)
}

pub fn mfc0(rt: usize, rd: usize) -> u32 {
    cop(0, 0x00, rt, rd, 0)
}

pub fn mtc0(rt: usize, rd: usize) -> u32 {
    cop(0, 0x04, rt, rd, 0)
}

pub fn tlbr() -> u32 {
    cop(0, 0x10, 0, 0, 0x01)
}

pub fn tlbwi() -> u32 {
    cop(0, 0x10, 0, 0, 0x02)
}

pub fn tlbwr() -> u32 {
    cop(0, 0x10, 0, 0, 0x06)
}

pub fn tlbp() -> u32 {
    cop(0, 0x10, 0, 0, 0x08)
}

pub fn eret() -> u32 {
    cop(0, 0x10, 0, 0, 0x18)
}

pub fn mfc1(rt: usize, fs: usize) -> u32 {
    cop(1, 0x00, rt, fs, 0)
}

pub fn dmfc1(rt: usize, fs: usize) -> u32 {
    cop(1, 0x01, rt, fs, 0)
}

pub fn cfc1(rt: usize, fs: usize) -> u32 {
    cop(1, 0x02, rt, fs, 0)
}

pub fn mtc1(rt: usize, fs: usize) -> u32 {
    cop(1, 0x04, rt, fs, 0)
}

pub fn dmtc1(rt: usize, fs: usize) -> u32 {
    cop(1, 0x05, rt, fs, 0)
}

pub fn ctc1(rt: usize, fs: usize) -> u32 {
    cop(1, 0x06, rt, fs, 0)
}

fn bc1(cc: usize, likely: bool, on_true: bool, offset: i16) -> u32 {
    let rt = (cc << 2) | (usize::from(likely) << 1) | usize::from(on_true);

    i_type(0x11, 0x08, rt, offset as u16)
}

pub fn bc1t(cc: usize, offset: i16) -> u32 {
    bc1(cc, false, true, offset)
}

pub fn bc1tl(cc: usize, offset: i16) -> u32 {
    bc1(cc, true, true, offset)
}

/// A COP1 computational instruction.
pub fn fp(fmt: usize, funct: u32, fd: usize, fs: usize, ft: usize) -> u32 {
    cop(1, fmt, ft, fs, 0) | ((fd as u32) << 6) | funct
}

/// `C.cond.fmt`, where `cond` is the low four bits of the function field.
pub fn c(fmt: usize, cond: u32, cc: usize, fs: usize, ft: usize) -> u32 {
    cop(1, fmt, ft, fs, 0) | ((cc as u32) << 8) | 0x30 | cond
}

pub fn cop1x(fr: usize, ft: usize, fs: usize, fd: usize, funct: u32) -> u32 {
    (0x13 << 26) | r_type(fr, ft, fs, fd as u32, funct)
}

/// A register move for COP2 or COP3.
pub fn cop_move(unit: u32, rs: usize, rt: usize, rd: usize) -> u32 {
    cop(unit, rs, rt, rd, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instr::decode::Opcode;

    #[test]
    fn encodings() {
        assert_eq!(addiu(29, 29, -16), 0x27bd_fff0);
        assert_eq!(c(17, 0b0010, 3, 2, 4), 0x4624_1332);
        assert_eq!(bc1tl(5, 0), 0x4517_0000);
        assert_eq!(jr(31), 0x03e0_0008);

        let op = Opcode(fp(17, 0x0d, 8, 2, 0));
        assert_eq!((op.fmt(), op.fd(), op.fs(), op.funct()), (17, 8, 2, 0x0d));
    }

    #[test]
    fn runs_reach_the_end_of_the_code() {
        let mut rig = Rig::new(Endian::Big);
        rig.state.set_gpr(1, 3);
        rig.run(&[mult(1, 1), ddiv(1, 1), addiu(2, 0, 7), addiu(3, 0, 9)]);

        assert_eq!(rig.state.pc(), CODE_BASE + 16);
        assert_eq!(rig.state.lo(), 1);
        assert_eq!(rig.state.gpr(2), 7);
        assert_eq!(rig.state.gpr(3), 9);
    }
}

// SPDX-License-Identifier: MPL-2.0

//! Instruction execution.
//!
//! Dispatch is a two-level `match`: the primary opcode field first, then the `funct` field of
//! SPECIAL (and the IDT multiply-accumulate group), the `rt` field of REGIMM, or the `rs` field of
//! the coprocessor groups. Every handler runs after the fetch has already advanced the program
//! counter, so `self.reg.pc` is the address of the following instruction (the delay slot, for
//! branches). Handlers report faults by returning an [`Exception`]; the execution loop delivers it.

pub mod decode;

use decode::Opcode;

use crate::{
    exc::{Exception, Kind},
    mem::Side,
    Bus,
    Cpu,
    Variant,
};

#[inline(always)]
pub fn sign_extend_8(value: u8) -> u64 {
    value as i8 as i64 as u64
}

#[inline(always)]
pub fn sign_extend_16(value: u16) -> u64 {
    value as i16 as i64 as u64
}

#[inline(always)]
pub fn sign_extend_32(value: u32) -> u64 {
    value as i32 as i64 as u64
}

/// Extra cycles charged on top of the base cost of one cycle per instruction.
pub mod cost {
    pub const MULT: i32 = 3;
    pub const DIV: i32 = 35;
    pub const DMULT: i32 = 7;
    pub const DDIV: i32 = 67;
    pub const MAD: i32 = 3;
}

fn reserved() -> Result<(), Exception> {
    Err(Exception::new(Kind::ReservedInstr))
}

fn trap_if(cond: bool) -> Result<(), Exception> {
    if cond {
        Err(Exception::new(Kind::Trap))
    } else {
        Ok(())
    }
}

impl<B: Bus + ?Sized> Cpu<'_, '_, B> {
    /// Executes a single instruction.
    pub fn execute_opcode(&mut self, op: Opcode) -> Result<(), Exception> {
        let (rs, rt) = (op.rs(), op.rt());
        let s = self.reg.gpr(rs);
        let t = self.reg.gpr(rt);

        match op.op() {
            0x00 => return self.execute_special(op),
            0x01 => return self.execute_regimm(op),
            0x02 => {
                self.reg.next_pc = Some(self.jump_target(op));
            }
            0x03 => {
                self.link(31);
                self.reg.next_pc = Some(self.jump_target(op));
            }
            0x04 => self.branch(s == t, op, false),
            0x05 => self.branch(s != t, op, false),
            0x06 => self.branch(s as i64 <= 0, op, false),
            0x07 => self.branch(s as i64 > 0, op, false),
            0x08 => {
                let value = self.add_32(s, op.simm())?;
                self.reg.set_gpr(rt, value);
            }
            0x09 => {
                let value = sign_extend_32((s as u32).wrapping_add(op.simm() as u32));
                self.reg.set_gpr(rt, value);
            }
            0x0a => self.reg.set_gpr(rt, u64::from((s as i64) < (op.simm() as i64))),
            0x0b => self.reg.set_gpr(rt, u64::from(s < op.simm())),
            0x0c => self.reg.set_gpr(rt, s & u64::from(op.imm())),
            0x0d => self.reg.set_gpr(rt, s | u64::from(op.imm())),
            0x0e => self.reg.set_gpr(rt, s ^ u64::from(op.imm())),
            0x0f => self.reg.set_gpr(rt, sign_extend_32(u32::from(op.imm()) << 16)),
            0x10 => return self.execute_cop0(op),
            0x11 => return self.execute_cop1(op),
            0x12 => return self.execute_cop(2, op),
            0x13 if self.mips4 => return self.execute_cop1x(op),
            0x13 => return self.execute_cop(3, op),
            0x14 => self.branch(s == t, op, true),
            0x15 => self.branch(s != t, op, true),
            0x16 => self.branch(s as i64 <= 0, op, true),
            0x17 => self.branch(s as i64 > 0, op, true),
            0x18 => {
                let value = self.add_64(s, op.simm())?;
                self.reg.set_gpr(rt, value);
            }
            0x19 => self.reg.set_gpr(rt, s.wrapping_add(op.simm())),
            0x1a => {
                let vaddr = self.vaddr(op);
                let mem = self.read_64(vaddr & !0b111)?;
                let value = self.endian.load_dword(Side::Left, vaddr, t, mem);
                self.reg.set_gpr(rt, value);
            }
            0x1b => {
                let vaddr = self.vaddr(op);
                let mem = self.read_64(vaddr & !0b111)?;
                let value = self.endian.load_dword(Side::Right, vaddr, t, mem);
                self.reg.set_gpr(rt, value);
            }
            0x1c => match self.config.variant {
                Variant::Idt => return self.execute_idt(op),
                Variant::Generic => return reserved(),
            },
            0x20 => {
                let value = self.read_8(self.vaddr(op))?;
                self.reg.set_gpr(rt, sign_extend_8(value));
            }
            0x21 => {
                let value = self.read_16(self.vaddr(op))?;
                self.reg.set_gpr(rt, sign_extend_16(value));
            }
            0x22 => {
                let vaddr = self.vaddr(op);
                let mem = self.read_32(vaddr & !0b11)?;
                let value = self.endian.load_word(Side::Left, vaddr, t as u32, mem);
                self.reg.set_gpr(rt, sign_extend_32(value));
            }
            0x23 => {
                let value = self.read_32(self.vaddr(op))?;
                self.reg.set_gpr(rt, sign_extend_32(value));
            }
            0x24 => {
                let value = self.read_8(self.vaddr(op))?;
                self.reg.set_gpr(rt, u64::from(value));
            }
            0x25 => {
                let value = self.read_16(self.vaddr(op))?;
                self.reg.set_gpr(rt, u64::from(value));
            }
            0x26 => {
                let vaddr = self.vaddr(op);
                let mem = self.read_32(vaddr & !0b11)?;
                let value = self.endian.load_word(Side::Right, vaddr, t as u32, mem);
                self.reg.set_gpr(rt, sign_extend_32(value));
            }
            0x27 => {
                let value = self.read_32(self.vaddr(op))?;
                self.reg.set_gpr(rt, u64::from(value));
            }
            0x28 => self.write_8(self.vaddr(op), t as u8)?,
            0x29 => self.write_16(self.vaddr(op), t as u16)?,
            0x2a => {
                let vaddr = self.vaddr(op);
                let merge = self.endian.store_word(Side::Left, vaddr, t as u32);
                self.write_32_masked(vaddr & !0b11, merge)?;
            }
            0x2b => self.write_32(self.vaddr(op), t as u32)?,
            0x2c => {
                let vaddr = self.vaddr(op);
                let merge = self.endian.store_dword(Side::Left, vaddr, t);
                self.write_64_masked(vaddr & !0b111, merge)?;
            }
            0x2d => {
                let vaddr = self.vaddr(op);
                let merge = self.endian.store_dword(Side::Right, vaddr, t);
                self.write_64_masked(vaddr & !0b111, merge)?;
            }
            0x2e => {
                let vaddr = self.vaddr(op);
                let merge = self.endian.store_word(Side::Right, vaddr, t as u32);
                self.write_32_masked(vaddr & !0b11, merge)?;
            }
            // CACHE. Caches are not modeled.
            0x2f => self.check_cop_usable(0)?,
            0x30 => {
                let value = self.read_32(self.vaddr(op))?;
                self.link.bit = true;
                self.link.ll_value = value;
                self.reg.set_gpr(rt, sign_extend_32(value));
            }
            0x31 => {
                self.check_cop_usable(1)?;
                let value = self.read_32(self.vaddr(op))?;
                self.fpu.set_word(op.ft(), value);
            }
            0x32 => return self.execute_cop_load(2, op, false),
            // PREF.
            0x33 if self.mips4 => {}
            0x34 => {
                let value = self.read_64(self.vaddr(op))?;
                self.link.bit = true;
                self.link.lld_value = value;
                self.reg.set_gpr(rt, value);
            }
            0x35 => {
                self.check_cop_usable(1)?;
                let value = self.read_64(self.vaddr(op))?;
                self.fpu.set_dword(op.ft(), value);
            }
            0x36 => return self.execute_cop_load(2, op, true),
            0x37 => {
                let value = self.read_64(self.vaddr(op))?;
                self.reg.set_gpr(rt, value);
            }
            0x38 => {
                let vaddr = self.vaddr(op);
                let succeeded = self.link.bit && self.read_32(vaddr)? == self.link.ll_value;
                if succeeded {
                    self.write_32(vaddr, t as u32)?;
                }
                self.reg.set_gpr(rt, u64::from(succeeded));
            }
            0x39 => {
                self.check_cop_usable(1)?;
                let value = self.fpu.word(op.ft());
                self.write_32(self.vaddr(op), value)?;
            }
            0x3a => return self.execute_cop_store(2, op, false),
            0x3c => {
                let vaddr = self.vaddr(op);
                let succeeded = self.link.bit && self.read_64(vaddr)? == self.link.lld_value;
                if succeeded {
                    self.write_64(vaddr, t)?;
                }
                self.reg.set_gpr(rt, u64::from(succeeded));
            }
            0x3d => {
                self.check_cop_usable(1)?;
                let value = self.fpu.dword(op.ft());
                self.write_64(self.vaddr(op), value)?;
            }
            0x3e => return self.execute_cop_store(2, op, true),
            0x3f => self.write_64(self.vaddr(op), t)?,
            _ => return reserved(),
        }

        Ok(())
    }

    fn execute_special(&mut self, op: Opcode) -> Result<(), Exception> {
        let (rs, rt, rd, sa) = (op.rs(), op.rt(), op.rd(), op.shamt());
        let s = self.reg.gpr(rs);
        let t = self.reg.gpr(rt);

        match op.funct() {
            0x00 => self.reg.set_gpr(rd, sign_extend_32((t as u32) << sa)),
            0x01 if self.mips4 => {
                self.check_cop_usable(1)?;
                if self.fpu.condition(op.branch_cc()) == (op.tf() == 1) {
                    self.reg.set_gpr(rd, s);
                }
            }
            0x02 => self.reg.set_gpr(rd, sign_extend_32((t as u32) >> sa)),
            0x03 => self.reg.set_gpr(rd, sign_extend_32(((t as i32) >> sa) as u32)),
            0x04 => self.reg.set_gpr(rd, sign_extend_32((t as u32) << (s & 0x1f))),
            0x06 => self.reg.set_gpr(rd, sign_extend_32((t as u32) >> (s & 0x1f))),
            0x07 => self.reg.set_gpr(rd, sign_extend_32(((t as i32) >> (s & 0x1f)) as u32)),
            0x08 => {
                self.reg.next_pc = Some(s as u32);
            }
            0x09 => {
                self.link(rd);
                self.reg.next_pc = Some(s as u32);
            }
            0x0a if self.mips4 => {
                if t == 0 {
                    self.reg.set_gpr(rd, s);
                }
            }
            0x0b if self.mips4 => {
                if t != 0 {
                    self.reg.set_gpr(rd, s);
                }
            }
            0x0c => return Err(Exception::new(Kind::Syscall)),
            0x0d => return Err(Exception::new(Kind::Breakpoint)),
            // SYNC.
            0x0f => {}
            0x10 => {
                let hi = self.reg.hi();
                self.reg.set_gpr(rd, hi);
            }
            0x11 => *self.reg.hi_mut() = s,
            0x12 => {
                let lo = self.reg.lo();
                self.reg.set_gpr(rd, lo);
            }
            0x13 => *self.reg.lo_mut() = s,
            0x14 => self.reg.set_gpr(rd, t << (s & 0x3f)),
            0x16 => self.reg.set_gpr(rd, t >> (s & 0x3f)),
            0x17 => self.reg.set_gpr(rd, ((t as i64) >> (s & 0x3f)) as u64),
            0x18 => {
                let product = i64::from(s as i32) * i64::from(t as i32);
                self.set_hi_lo(product as u64);
                self.charge(cost::MULT);
            }
            0x19 => {
                let product = u64::from(s as u32) * u64::from(t as u32);
                self.set_hi_lo(product);
                self.charge(cost::MULT);
            }
            0x1a => {
                let (n, d) = (s as i32, t as i32);
                if d != 0 {
                    *self.reg.lo_mut() = sign_extend_32(n.wrapping_div(d) as u32);
                    *self.reg.hi_mut() = sign_extend_32(n.wrapping_rem(d) as u32);
                }
                self.charge(cost::DIV);
            }
            0x1b => {
                let (n, d) = (s as u32, t as u32);
                if d != 0 {
                    *self.reg.lo_mut() = sign_extend_32(n / d);
                    *self.reg.hi_mut() = sign_extend_32(n % d);
                }
                self.charge(cost::DIV);
            }
            0x1c => {
                let product = i128::from(s as i64) * i128::from(t as i64);
                *self.reg.lo_mut() = product as u64;
                *self.reg.hi_mut() = (product >> 64) as u64;
                self.charge(cost::DMULT);
            }
            0x1d => {
                let product = u128::from(s) * u128::from(t);
                *self.reg.lo_mut() = product as u64;
                *self.reg.hi_mut() = (product >> 64) as u64;
                self.charge(cost::DMULT);
            }
            0x1e => {
                let (n, d) = (s as i64, t as i64);
                if d != 0 {
                    *self.reg.lo_mut() = n.wrapping_div(d) as u64;
                    *self.reg.hi_mut() = n.wrapping_rem(d) as u64;
                }
                self.charge(cost::DDIV);
            }
            0x1f => {
                if t != 0 {
                    *self.reg.lo_mut() = s / t;
                    *self.reg.hi_mut() = s % t;
                }
                self.charge(cost::DDIV);
            }
            0x20 => {
                let value = self.add_32(s, t)?;
                self.reg.set_gpr(rd, value);
            }
            0x21 => self.reg.set_gpr(rd, sign_extend_32((s as u32).wrapping_add(t as u32))),
            0x22 => {
                let value = self.sub_32(s, t)?;
                self.reg.set_gpr(rd, value);
            }
            0x23 => self.reg.set_gpr(rd, sign_extend_32((s as u32).wrapping_sub(t as u32))),
            0x24 => self.reg.set_gpr(rd, s & t),
            0x25 => self.reg.set_gpr(rd, s | t),
            0x26 => self.reg.set_gpr(rd, s ^ t),
            0x27 => self.reg.set_gpr(rd, !(s | t)),
            0x2a => self.reg.set_gpr(rd, u64::from((s as i64) < (t as i64))),
            0x2b => self.reg.set_gpr(rd, u64::from(s < t)),
            0x2c => {
                let value = self.add_64(s, t)?;
                self.reg.set_gpr(rd, value);
            }
            0x2d => self.reg.set_gpr(rd, s.wrapping_add(t)),
            0x2e => {
                let value = self.sub_64(s, t)?;
                self.reg.set_gpr(rd, value);
            }
            0x2f => self.reg.set_gpr(rd, s.wrapping_sub(t)),
            0x30 => trap_if(s as i64 >= t as i64)?,
            0x31 => trap_if(s >= t)?,
            0x32 => trap_if((s as i64) < (t as i64))?,
            0x33 => trap_if(s < t)?,
            0x34 => trap_if(s == t)?,
            0x36 => trap_if(s != t)?,
            0x38 => self.reg.set_gpr(rd, t << sa),
            0x3a => self.reg.set_gpr(rd, t >> sa),
            0x3b => self.reg.set_gpr(rd, ((t as i64) >> sa) as u64),
            0x3c => self.reg.set_gpr(rd, t << (sa + 32)),
            0x3e => self.reg.set_gpr(rd, t >> (sa + 32)),
            0x3f => self.reg.set_gpr(rd, ((t as i64) >> (sa + 32)) as u64),
            _ => return reserved(),
        }

        Ok(())
    }

    fn execute_regimm(&mut self, op: Opcode) -> Result<(), Exception> {
        let s = self.reg.gpr(op.rs());
        let imm = op.simm();

        match op.rt() {
            0x00 => self.branch((s as i64) < 0, op, false),
            0x01 => self.branch(s as i64 >= 0, op, false),
            0x02 => self.branch((s as i64) < 0, op, true),
            0x03 => self.branch(s as i64 >= 0, op, true),
            0x08 => trap_if(s as i64 >= imm as i64)?,
            0x09 => trap_if(s >= imm)?,
            0x0a => trap_if((s as i64) < (imm as i64))?,
            0x0b => trap_if(s < imm)?,
            0x0c => trap_if(s == imm)?,
            0x0e => trap_if(s != imm)?,
            0x10..=0x13 => {
                // The link is written whether or not the branch is taken.
                self.link(31);
                let taken = match op.rt() & 1 {
                    0 => (s as i64) < 0,
                    _ => s as i64 >= 0,
                };
                self.branch(taken, op, op.rt() & 0b10 != 0);
            }
            _ => return reserved(),
        }

        Ok(())
    }

    /// The IDT multiply-accumulate group under primary opcode `0x1c`.
    fn execute_idt(&mut self, op: Opcode) -> Result<(), Exception> {
        let s = self.reg.gpr(op.rs()) as u32;
        let t = self.reg.gpr(op.rt()) as u32;
        let acc = (self.reg.hi() << 32) | (self.reg.lo() & 0xffff_ffff);

        match op.funct() {
            0x00 => {
                let product = i64::from(s as i32) * i64::from(t as i32);
                self.set_hi_lo(acc.wrapping_add(product as u64));
            }
            0x01 => {
                let product = u64::from(s) * u64::from(t);
                self.set_hi_lo(acc.wrapping_add(product));
            }
            0x02 => {
                let product = (s as i32).wrapping_mul(t as i32);
                self.reg.set_gpr(op.rd(), sign_extend_32(product as u32));
            }
            0x04 => {
                let product = i64::from(s as i32) * i64::from(t as i32);
                self.set_hi_lo(acc.wrapping_sub(product as u64));
            }
            0x05 => {
                let product = u64::from(s) * u64::from(t);
                self.set_hi_lo(acc.wrapping_sub(product));
            }
            _ => return reserved(),
        }
        self.charge(cost::MAD);

        Ok(())
    }

    /// Splits a 64-bit result into the sign-extended `HI` and `LO` halves.
    fn set_hi_lo(&mut self, value: u64) {
        *self.reg.lo_mut() = sign_extend_32(value as u32);
        *self.reg.hi_mut() = sign_extend_32((value >> 32) as u32);
    }

    /// The effective address of a load or store.
    #[inline(always)]
    pub(crate) fn vaddr(&self, op: Opcode) -> u32 {
        self.reg.gpr(op.rs()).wrapping_add(op.simm()) as u32
    }

    #[inline(always)]
    fn jump_target(&self, op: Opcode) -> u32 {
        (self.reg.pc & 0xf000_0000) | (op.target() << 2)
    }

    /// Writes the return address, which follows the delay slot, to the given register.
    #[inline(always)]
    fn link(&mut self, index: usize) {
        let ret_addr = self.reg.pc.wrapping_add(4);
        self.reg.set_gpr(index, sign_extend_32(ret_addr));
    }

    /// Schedules a PC-relative branch.
    ///
    /// A likely branch that is not taken nullifies its delay slot by skipping it.
    pub(crate) fn branch(&mut self, taken: bool, op: Opcode, likely: bool) {
        if taken {
            let offset = (op.simm() << 2) as u32;
            self.reg.next_pc = Some(self.reg.pc.wrapping_add(offset));
        } else if likely {
            self.reg.pc = self.reg.pc.wrapping_add(4);
        }
    }

    fn add_32(&self, a: u64, b: u64) -> Result<u64, Exception> {
        let (result, overflowed) = (a as i32).overflowing_add(b as i32);
        self.check_overflow(overflowed)?;

        Ok(sign_extend_32(result as u32))
    }

    fn sub_32(&self, a: u64, b: u64) -> Result<u64, Exception> {
        let (result, overflowed) = (a as i32).overflowing_sub(b as i32);
        self.check_overflow(overflowed)?;

        Ok(sign_extend_32(result as u32))
    }

    fn add_64(&self, a: u64, b: u64) -> Result<u64, Exception> {
        let (result, overflowed) = (a as i64).overflowing_add(b as i64);
        self.check_overflow(overflowed)?;

        Ok(result as u64)
    }

    fn sub_64(&self, a: u64, b: u64) -> Result<u64, Exception> {
        let (result, overflowed) = (a as i64).overflowing_sub(b as i64);
        self.check_overflow(overflowed)?;

        Ok(result as u64)
    }

    fn check_overflow(&self, overflowed: bool) -> Result<(), Exception> {
        if overflowed && self.config.overflow_traps {
            Err(Exception::new(Kind::IntegerOverflow))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        asm::{self, Rig},
        cop0,
        exc::code,
        mem::Endian,
        Config,
        Reset,
    };

    #[test]
    fn alu() {
        let mut rig = Rig::new(Endian::Big);
        rig.state.set_gpr(1, 0xffff_ffff_8000_0000);
        rig.state.set_gpr(2, 3);
        rig.run(&[
            asm::addiu(3, 0, -1),
            asm::lui(4, 0x8001),
            asm::ori(5, 0, 0xffff),
            asm::sll(6, 2, 31),
            asm::sra(7, 1, 4),
            asm::srl(8, 1, 4),
            asm::dsll32(9, 2, 4),
            asm::daddiu(10, 9, -1),
            asm::slt(11, 1, 2),
            asm::sltu(12, 1, 2),
            asm::nor(13, 0, 0),
        ]);

        assert_eq!(rig.state.gpr(3), !0);
        assert_eq!(rig.state.gpr(4), 0xffff_ffff_8001_0000);
        assert_eq!(rig.state.gpr(5), 0xffff);
        assert_eq!(rig.state.gpr(6), 0xffff_ffff_8000_0000);
        assert_eq!(rig.state.gpr(7), 0xffff_ffff_f800_0000);
        assert_eq!(rig.state.gpr(8), 0x0800_0000);
        assert_eq!(rig.state.gpr(9), 0x30_0000_0000);
        assert_eq!(rig.state.gpr(10), 0x2f_ffff_ffff);
        assert_eq!(rig.state.gpr(11), 1);
        assert_eq!(rig.state.gpr(12), 0);
        assert_eq!(rig.state.gpr(13), !0);
    }

    #[test]
    fn multiply_and_divide() {
        let mut rig = Rig::new(Endian::Big);
        rig.state.set_gpr(1, (-7_i64) as u64);
        rig.state.set_gpr(2, 2);
        rig.state.set_gpr(3, 0);
        rig.run(&[asm::mult(1, 2)]);
        assert_eq!(rig.state.lo(), (-14_i64) as u64);
        assert_eq!(rig.state.hi(), !0);

        rig.run(&[asm::div(1, 2)]);
        assert_eq!(rig.state.lo(), (-3_i64) as u64);
        assert_eq!(rig.state.hi(), (-1_i64) as u64);

        // Division by zero leaves HI and LO alone.
        rig.run(&[asm::div(1, 3)]);
        assert_eq!(rig.state.lo(), (-3_i64) as u64);

        rig.state.set_gpr(4, u64::MAX);
        rig.run(&[asm::dmultu(4, 4)]);
        assert_eq!(rig.state.lo(), 1);
        assert_eq!(rig.state.hi(), u64::MAX - 1);
    }

    #[test]
    fn multiply_costs_extra_cycles() {
        let mut rig = Rig::new(Endian::Big);
        rig.load(0x8000_0000, &[asm::mult(1, 2), asm::nop()]);
        rig.state.set_pc(0x8000_0000);
        assert_eq!(rig.execute(1), 1 + cost::MULT);
    }

    #[test]
    fn overflow_traps() {
        let mut rig = Rig::new(Endian::Big);
        rig.state.set_gpr(1, 0x7fff_ffff);
        rig.state.set_gpr(2, 1);
        rig.state.set_gpr(3, 0x1234);
        rig.load(0x8000_0000, &[asm::add(3, 1, 2)]);
        rig.state.set_pc(0x8000_0000);
        rig.execute(1);
        assert_eq!(rig.state.gpr(3), 0x1234);
        assert_eq!(rig.state.cop0.cause().exc_code(), code::INTEGER_OVERFLOW as u8);
        assert_eq!(rig.state.cop0_reg(cop0::File::EPC), 0xffff_ffff_8000_0000);

        rig.state.set_gpr(4, i64::MAX as u64);
        rig.state.set_gpr(5, 0x1234);
        rig.load(0x8000_0100, &[asm::dadd(5, 4, 2)]);
        rig.state.set_pc(0x8000_0100);
        rig.execute(1);
        assert_eq!(rig.state.gpr(5), 0x1234);
        assert_eq!(rig.state.cop0_reg(cop0::File::EPC), 0xffff_ffff_8000_0100);

        // The unsigned forms never trap.
        rig.run(&[asm::addu(3, 1, 2), asm::daddu(5, 4, 2)]);
        assert_eq!(rig.state.gpr(3), 0xffff_ffff_8000_0000);
        assert_eq!(rig.state.gpr(5), i64::MIN as u64);
    }

    #[test]
    fn overflow_traps_can_be_disabled() {
        let config = Config { overflow_traps: false, ..Config::default() };
        let mut rig = Rig::with_config(config, Reset::default());
        rig.state.set_gpr(1, 0x7fff_ffff);
        rig.state.set_gpr(2, 1);
        rig.run(&[asm::add(3, 1, 2), asm::sub(4, 3, 2)]);
        assert_eq!(rig.state.gpr(3), 0xffff_ffff_8000_0000);
        assert_eq!(rig.state.gpr(4), 0x7fff_ffff);
    }

    #[test]
    fn traps() {
        let mut rig = Rig::new(Endian::Big);
        rig.state.set_gpr(1, 5);
        rig.run(&[asm::tnei(1, 5), asm::teq(1, 0)]);
        assert_eq!(rig.state.pc(), 0x8000_0008);

        rig.load(0x8000_0000, &[asm::teqi(1, 5)]);
        rig.state.set_pc(0x8000_0000);
        rig.execute(1);
        assert_eq!(rig.state.cop0.cause().exc_code(), code::TRAP as u8);
    }

    #[test]
    fn delay_slot_executes_before_target() {
        let mut rig = Rig::new(Endian::Big);
        rig.load(0x8000_0000, &[
            asm::beq(0, 0, 3),
            asm::addiu(1, 0, 1),
            asm::addiu(2, 0, 2),
            asm::addiu(3, 0, 3),
            asm::addiu(4, 0, 4),
        ]);
        rig.state.set_pc(0x8000_0000);
        rig.execute(2);

        assert_eq!(rig.state.gpr(1), 1);
        assert_eq!(rig.state.gpr(2), 0);
        assert_eq!(rig.state.gpr(3), 0);
        assert_eq!(rig.state.pc(), 0x8000_0010);
        assert_eq!(rig.state.reg.next_pc(), None);
    }

    #[test]
    fn delay_slot_completes_past_budget() {
        let mut rig = Rig::new(Endian::Big);
        rig.load(0x8000_0000, &[asm::j(0x8000_0100), asm::addiu(1, 0, 1)]);
        rig.state.set_pc(0x8000_0000);

        assert_eq!(rig.execute(1), 2);
        assert_eq!(rig.state.gpr(1), 1);
        assert_eq!(rig.state.pc(), 0x8000_0100);
    }

    #[test]
    fn likely_branch_nullifies_untaken_delay_slot() {
        let mut rig = Rig::new(Endian::Big);
        rig.state.set_gpr(5, 1);
        rig.load(0x8000_0000, &[
            asm::beql(5, 0, 7),
            asm::addiu(1, 0, 1),
            asm::addiu(2, 0, 2),
        ]);
        rig.state.set_pc(0x8000_0000);
        rig.execute(2);

        assert_eq!(rig.state.gpr(1), 0);
        assert_eq!(rig.state.gpr(2), 2);
        assert_eq!(rig.state.pc(), 0x8000_000c);

        // Taken, the delay slot runs as usual.
        rig.load(0x8000_0000, &[
            asm::bnel(5, 0, 2),
            asm::addiu(1, 0, 1),
            asm::addiu(2, 0, 3),
            asm::addiu(3, 0, 3),
        ]);
        rig.state.set_pc(0x8000_0000);
        rig.execute(2);
        assert_eq!(rig.state.gpr(1), 1);
        assert_eq!(rig.state.gpr(2), 2);
        assert_eq!(rig.state.pc(), 0x8000_000c);
    }

    #[test]
    fn links_skip_the_delay_slot() {
        let mut rig = Rig::new(Endian::Big);
        rig.load(0x8000_0000, &[asm::jal(0x8000_0040), asm::nop()]);
        rig.state.set_pc(0x8000_0000);
        rig.execute(1);
        assert_eq!(rig.state.gpr(31), 0xffff_ffff_8000_0008);
        assert_eq!(rig.state.pc(), 0x8000_0040);

        // BLTZALL links even when it falls through.
        rig.state.set_gpr(4, 1);
        rig.load(0x8000_0100, &[asm::bltzall(4, 4), asm::addiu(1, 0, 9), asm::nop()]);
        rig.state.set_pc(0x8000_0100);
        rig.execute(1);
        assert_eq!(rig.state.gpr(31), 0xffff_ffff_8000_0108);
        assert_eq!(rig.state.gpr(1), 0);
        assert_eq!(rig.state.pc(), 0x8000_0108);

        rig.state.set_gpr(6, 0x8000_0200);
        rig.load(0x8000_0200, &[asm::jalr(7, 6), asm::nop()]);
        rig.state.set_pc(0x8000_0200);
        rig.execute(1);
        assert_eq!(rig.state.gpr(7), 0xffff_ffff_8000_0208);
    }

    #[test]
    fn loads_and_stores() {
        let mut rig = Rig::new(Endian::Big);
        rig.state.set_gpr(1, 0xffff_ffff_8000_2000);
        rig.state.set_gpr(2, 0x0123_4567_89ab_cdef);
        rig.run(&[
            asm::sd(2, 1, 0),
            asm::lb(3, 1, 4),
            asm::lbu(4, 1, 4),
            asm::lh(5, 1, 4),
            asm::lw(6, 1, 4),
            asm::lwu(7, 1, 4),
            asm::ld(8, 1, 0),
            asm::sb(2, 1, 8),
            asm::lbu(9, 1, 8),
        ]);
        assert_eq!(rig.state.gpr(3), 0xffff_ffff_ffff_ff89);
        assert_eq!(rig.state.gpr(4), 0x89);
        assert_eq!(rig.state.gpr(5), 0xffff_ffff_ffff_89ab);
        assert_eq!(rig.state.gpr(6), 0xffff_ffff_89ab_cdef);
        assert_eq!(rig.state.gpr(7), 0x89ab_cdef);
        assert_eq!(rig.state.gpr(8), 0x0123_4567_89ab_cdef);
        assert_eq!(rig.state.gpr(9), 0xef);
    }

    #[test]
    fn unaligned_round_trip() {
        for endian in [Endian::Big, Endian::Little] {
            for offset in 0..8_i16 {
                let mut rig = Rig::new(endian);
                let value: u64 = rand::random();
                let word = value as u32 as i32 as i64 as u64;
                rig.state.set_gpr(1, 0xffff_ffff_8000_1000);
                rig.state.set_gpr(2, value);
                rig.state.set_gpr(3, word);

                let (first, last) = match endian {
                    Endian::Big => (offset, offset + 7),
                    Endian::Little => (offset + 7, offset),
                };
                let (first_w, last_w) = match endian {
                    Endian::Big => (offset + 0x20, offset + 0x23),
                    Endian::Little => (offset + 0x23, offset + 0x20),
                };
                rig.run(&[
                    asm::sdl(2, 1, first),
                    asm::sdr(2, 1, last),
                    asm::ldl(4, 1, first),
                    asm::ldr(4, 1, last),
                    asm::swl(3, 1, first_w),
                    asm::swr(3, 1, last_w),
                    asm::lwl(5, 1, first_w),
                    asm::lwr(5, 1, last_w),
                ]);

                assert_eq!(rig.state.gpr(4), value, "{:?} doubleword at offset {}", endian, offset);
                assert_eq!(rig.state.gpr(5), word, "{:?} word at offset {}", endian, offset);
            }
        }
    }

    #[test]
    fn unaligned_load_merges_register() {
        let mut rig = Rig::new(Endian::Big);
        rig.state.set_gpr(1, 0xffff_ffff_8000_1000);
        rig.state.set_gpr(2, 0x1122_3344);
        rig.state.set_gpr(3, 0xaabb_ccdd);
        rig.run(&[asm::sw(2, 1, 0), asm::lwl(3, 1, 1)]);
        assert_eq!(rig.state.gpr(3), 0x2233_44dd);
    }

    #[test]
    fn reservation_survives_only_without_exceptions() {
        let mut rig = Rig::new(Endian::Big);
        rig.state.set_gpr(1, 0xffff_ffff_8000_3000);
        rig.state.set_gpr(2, 0x55);
        rig.run(&[asm::sw(2, 1, 0), asm::ll(3, 1, 0), asm::sc(2, 1, 0)]);
        assert_eq!(rig.state.gpr(2), 1);

        // LL, then a breakpoint, then SC at the same, unchanged address.
        rig.load(0x8000_0000, &[asm::ll(3, 1, 0), asm::brk()]);
        rig.load(0x8000_0180, &[asm::mfc0(26, cop0::File::EPC), asm::addiu(26, 26, 4), asm::mtc0(26, cop0::File::EPC), asm::eret()]);
        rig.load(0x8000_0008, &[asm::sc(4, 1, 0)]);
        rig.state.write_cop0(cop0::File::STATUS, 0);
        rig.state.set_gpr(4, 0x66);
        rig.state.set_pc(0x8000_0000);
        // ll, break, four handler instructions, sc.
        rig.execute(7);

        assert_eq!(rig.state.pc(), 0x8000_000c);
        assert_eq!(rig.state.gpr(4), 0);
        let mut cpu = rig.cpu();
        assert_eq!(cpu.read_32(0x8000_3000).unwrap(), 0x55);
    }

    #[test]
    fn idt_group_needs_the_variant() {
        let mut rig = Rig::new(Endian::Big);
        rig.load(0x8000_0000, &[asm::mul(3, 1, 2)]);
        rig.state.set_pc(0x8000_0000);
        rig.execute(1);
        assert_eq!(rig.state.cop0.cause().exc_code(), code::RESERVED_INSTR as u8);

        let config = Config { variant: Variant::Idt, ..Config::default() };
        let mut rig = Rig::with_config(config, Reset::default());
        rig.state.set_gpr(1, 6);
        rig.state.set_gpr(2, (-7_i64) as u64);
        rig.run(&[asm::mul(3, 1, 2), asm::mult(1, 1), asm::mad(1, 2)]);
        assert_eq!(rig.state.gpr(3), (-42_i64) as u64);
        assert_eq!(rig.state.lo(), (-6_i64) as u64);
        assert_eq!(rig.state.hi(), !0);
    }

    #[test]
    fn mips4_extensions_need_the_isa() {
        let mut rig = Rig::new(Endian::Big);
        rig.load(0x8000_0000, &[asm::movz(3, 1, 0)]);
        rig.state.set_pc(0x8000_0000);
        rig.execute(1);
        assert_eq!(rig.state.cop0.cause().exc_code(), code::RESERVED_INSTR as u8);

        let reset = Reset { extended_isa: true, proc_id: 0x2310, ..Reset::default() };
        let mut rig = Rig::with_config(Config::default(), reset);
        rig.state.set_gpr(1, 0x77);
        rig.state.set_gpr(2, 1);
        rig.run(&[asm::movz(3, 1, 0), asm::movn(4, 1, 0), asm::movn(5, 1, 2)]);
        assert_eq!(rig.state.gpr(3), 0x77);
        assert_eq!(rig.state.gpr(4), 0);
        assert_eq!(rig.state.gpr(5), 0x77);
    }
}

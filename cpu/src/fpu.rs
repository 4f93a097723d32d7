// SPDX-License-Identifier: MPL-2.0

//! The floating-point unit, COP1.
//!
//! The 32 registers are stored as 64-bit slots. With `Status.FR` set, each slot is an independent
//! register; with it clear, the unit behaves like a 32-bit FPU: even/odd pairs share the even slot,
//! and a 32-bit access to an odd register lands in the upper half of its even neighbour.

use std::ops::{Add, Div, Mul, Neg, Sub};

use serde::{Deserialize, Serialize};

use crate::{
    exc::{Exception, Kind},
    instr::{decode::Opcode, sign_extend_32},
    Bus,
    Cpu,
};

/// Floating-point control register indices.
pub mod ctrl {
    /// Implementation/revision.
    pub const FIR: usize = 0;
    /// Control/status.
    pub const FCSR: usize = 31;
}

/// Bit of FCSR holding condition code 0.
const CC0_BIT: u32 = 23;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct File {
    pub(crate) regs: [u64; 32],
    pub(crate) ctrl: [u64; 32],
    /// Mirrors `Status.FR`.
    pub(crate) fr: bool,
}

impl File {
    /// Reads the 32-bit register `index`.
    pub fn word(&self, index: usize) -> u32 {
        if self.fr {
            self.regs[index] as u32
        } else {
            (self.regs[index & !1] >> (32 * (index & 1))) as u32
        }
    }

    pub fn set_word(&mut self, index: usize, value: u32) {
        let (slot, shift) = if self.fr {
            (index, 0)
        } else {
            (index & !1, 32 * (index & 1))
        };
        let slot = &mut self.regs[slot];
        *slot = (*slot & !(0xffff_ffff << shift)) | (u64::from(value) << shift);
    }

    /// Reads the 64-bit register `index`.
    pub fn dword(&self, index: usize) -> u64 {
        if self.fr {
            self.regs[index]
        } else {
            self.regs[index & !1]
        }
    }

    pub fn set_dword(&mut self, index: usize, value: u64) {
        if self.fr {
            self.regs[index] = value;
        } else {
            self.regs[index & !1] = value;
        }
    }

    pub fn fcsr(&self) -> u32 {
        self.ctrl[ctrl::FCSR] as u32
    }

    /// The state of condition code `cc`.
    pub fn condition(&self, cc: usize) -> bool {
        self.fcsr() & (1 << cc_bit(cc)) != 0
    }

    pub fn set_condition(&mut self, cc: usize, value: bool) {
        let bit = 1 << cc_bit(cc);
        let fcsr = &mut self.ctrl[ctrl::FCSR];
        if value {
            *fcsr |= bit;
        } else {
            *fcsr &= !bit;
        }
    }

    /// The rounding mode selected in FCSR.
    pub fn rounding_mode(&self) -> Rounding {
        Rounding::from_bits(self.fcsr())
    }
}

fn cc_bit(cc: usize) -> u32 {
    match cc {
        0 => CC0_BIT,
        cc => 24 + cc as u32,
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Rounding {
    Nearest,
    Zero,
    Up,
    Down,
}

impl Rounding {
    fn from_bits(bits: u32) -> Self {
        match bits & 0b11 {
            0 => Self::Nearest,
            1 => Self::Zero,
            2 => Self::Up,
            _ => Self::Down,
        }
    }

    fn apply(self, value: f64) -> f64 {
        match self {
            Self::Nearest => value.round_ties_even(),
            Self::Zero => value.trunc(),
            Self::Up => value.ceil(),
            Self::Down => value.floor(),
        }
    }
}

/// Converts to a 32-bit integer; NaN and out-of-range values saturate to the invalid result.
fn to_word(value: f64) -> u32 {
    if value.is_nan() || value < f64::from(i32::MIN) || value > f64::from(i32::MAX) {
        i32::MAX as u32
    } else {
        value as i32 as u32
    }
}

fn to_dword(value: f64) -> u64 {
    if value.is_nan() || value < i64::MIN as f64 || value >= i64::MAX as f64 {
        i64::MAX as u64
    } else {
        value as i64 as u64
    }
}

/// A floating-point format the unit computes in.
pub trait FpValue:
    Copy
    + PartialOrd
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
{
    /// The `fmt` field value naming this format.
    const FMT: usize;

    fn read(file: &File, index: usize) -> Self;
    fn write(self, file: &mut File, index: usize);
    fn from_f64(value: f64) -> Self;
    fn to_f64(self) -> f64;
    fn sqrt(self) -> Self;
    fn abs(self) -> Self;
    fn is_nan(self) -> bool;
}

impl FpValue for f32 {
    const FMT: usize = fmt::S;

    fn read(file: &File, index: usize) -> Self {
        f32::from_bits(file.word(index))
    }

    fn write(self, file: &mut File, index: usize) {
        file.set_word(index, self.to_bits());
    }

    fn from_f64(value: f64) -> Self {
        value as f32
    }

    fn to_f64(self) -> f64 {
        f64::from(self)
    }

    fn sqrt(self) -> Self {
        f32::sqrt(self)
    }

    fn abs(self) -> Self {
        f32::abs(self)
    }

    fn is_nan(self) -> bool {
        f32::is_nan(self)
    }
}

impl FpValue for f64 {
    const FMT: usize = fmt::D;

    fn read(file: &File, index: usize) -> Self {
        f64::from_bits(file.dword(index))
    }

    fn write(self, file: &mut File, index: usize) {
        file.set_dword(index, self.to_bits());
    }

    fn from_f64(value: f64) -> Self {
        value
    }

    fn to_f64(self) -> f64 {
        self
    }

    fn sqrt(self) -> Self {
        f64::sqrt(self)
    }

    fn abs(self) -> Self {
        f64::abs(self)
    }

    fn is_nan(self) -> bool {
        f64::is_nan(self)
    }
}

/// Values of the `fmt` field.
pub mod fmt {
    pub const S: usize = 16;
    pub const D: usize = 17;
    pub const W: usize = 20;
    pub const L: usize = 21;
}

fn reserved() -> Result<(), Exception> {
    Err(Exception::new(Kind::ReservedInstr))
}

impl<B: Bus + ?Sized> Cpu<'_, '_, B> {
    pub(crate) fn execute_cop1(&mut self, op: Opcode) -> Result<(), Exception> {
        self.check_cop_usable(1)?;

        let (rt, fs) = (op.rt(), op.fs());
        match op.rs() {
            0x00 => {
                let value = sign_extend_32(self.fpu.word(fs));
                self.reg.set_gpr(rt, value);
            }
            0x01 => {
                let value = self.fpu.dword(fs);
                self.reg.set_gpr(rt, value);
            }
            0x02 => {
                let value = match fs {
                    ctrl::FIR | ctrl::FCSR => self.fpu.ctrl[fs],
                    _ => 0,
                };
                self.reg.set_gpr(rt, sign_extend_32(value as u32));
            }
            0x04 => {
                let value = self.reg.gpr(rt) as u32;
                self.fpu.set_word(fs, value);
            }
            0x05 => {
                let value = self.reg.gpr(rt);
                self.fpu.set_dword(fs, value);
            }
            0x06 => {
                if fs == ctrl::FCSR {
                    self.fpu.ctrl[ctrl::FCSR] = u64::from(self.reg.gpr(rt) as u32);
                }
            }
            0x08 => {
                let cc = if self.mips4 { op.branch_cc() } else { 0 };
                let taken = self.fpu.condition(cc) == (op.tf() == 1);
                self.branch(taken, op, op.nd() == 1);
            }
            fmt::S => return self.execute_fp::<f32>(op),
            fmt::D => return self.execute_fp::<f64>(op),
            fmt::W => {
                let value = f64::from(self.fpu.word(fs) as i32);
                return self.convert_integer(op, value);
            }
            fmt::L => {
                let value = self.fpu.dword(fs) as i64 as f64;
                return self.convert_integer(op, value);
            }
            _ => return reserved(),
        }

        Ok(())
    }

    /// `CVT.S` and `CVT.D` from an integer format.
    fn convert_integer(&mut self, op: Opcode, value: f64) -> Result<(), Exception> {
        match op.funct() {
            0x20 => f32::from_f64(value).write(&mut self.fpu, op.fd()),
            0x21 => value.write(&mut self.fpu, op.fd()),
            _ => return reserved(),
        }

        Ok(())
    }

    fn execute_fp<T: FpValue>(&mut self, op: Opcode) -> Result<(), Exception> {
        let (fs, ft, fd) = (op.fs(), op.ft(), op.fd());
        let a = T::read(&self.fpu, fs);
        let b = T::read(&self.fpu, ft);

        match op.funct() {
            0x00 => (a + b).write(&mut self.fpu, fd),
            0x01 => (a - b).write(&mut self.fpu, fd),
            0x02 => (a * b).write(&mut self.fpu, fd),
            0x03 => (a / b).write(&mut self.fpu, fd),
            0x04 => a.sqrt().write(&mut self.fpu, fd),
            0x05 => a.abs().write(&mut self.fpu, fd),
            0x06 => a.write(&mut self.fpu, fd),
            0x07 => (-a).write(&mut self.fpu, fd),
            0x08..=0x0b => {
                let value = fixed_rounding(op.funct(), a.to_f64());
                self.fpu.set_dword(fd, to_dword(value));
            }
            0x0c..=0x0f => {
                let value = fixed_rounding(op.funct(), a.to_f64());
                self.fpu.set_word(fd, to_word(value));
            }
            0x11 if self.mips4 => {
                if self.fpu.condition(op.branch_cc()) == (op.tf() == 1) {
                    a.write(&mut self.fpu, fd);
                }
            }
            0x12 if self.mips4 => {
                if self.reg.gpr(ft) == 0 {
                    a.write(&mut self.fpu, fd);
                }
            }
            0x13 if self.mips4 => {
                if self.reg.gpr(ft) != 0 {
                    a.write(&mut self.fpu, fd);
                }
            }
            0x15 if self.mips4 => (T::from_f64(1.0) / a).write(&mut self.fpu, fd),
            0x16 if self.mips4 => (T::from_f64(1.0) / a.sqrt()).write(&mut self.fpu, fd),
            0x20 if T::FMT != fmt::S => f32::from_f64(a.to_f64()).write(&mut self.fpu, fd),
            0x21 if T::FMT != fmt::D => a.to_f64().write(&mut self.fpu, fd),
            0x24 => {
                let value = self.fpu.rounding_mode().apply(a.to_f64());
                self.fpu.set_word(fd, to_word(value));
            }
            0x25 => {
                let value = self.fpu.rounding_mode().apply(a.to_f64());
                self.fpu.set_dword(fd, to_dword(value));
            }
            0x30..=0x3f => {
                let cond = op.funct() & 0b111;
                let unordered = a.is_nan() || b.is_nan();
                let result = (cond & 0b001 != 0 && unordered)
                    || (cond & 0b010 != 0 && !unordered && a == b)
                    || (cond & 0b100 != 0 && !unordered && a < b);
                let cc = if self.mips4 { op.compare_cc() } else { 0 };
                self.fpu.set_condition(cc, result);
            }
            _ => return reserved(),
        }

        Ok(())
    }

    /// Executes a COP1X instruction: indexed loads and stores, and fused multiply-adds.
    pub(crate) fn execute_cop1x(&mut self, op: Opcode) -> Result<(), Exception> {
        self.check_cop_usable(1)?;

        let vaddr = self.reg.gpr(op.rs()).wrapping_add(self.reg.gpr(op.rt())) as u32;
        match op.funct() {
            0x00 => {
                let value = self.read_32(vaddr)?;
                self.fpu.set_word(op.fd(), value);
            }
            0x01 => {
                let value = self.read_64(vaddr)?;
                self.fpu.set_dword(op.fd(), value);
            }
            0x08 => {
                let value = self.fpu.word(op.fs());
                self.write_32(vaddr, value)?;
            }
            0x09 => {
                let value = self.fpu.dword(op.fs());
                self.write_64(vaddr, value)?;
            }
            // PREFX.
            0x0f => {}
            0x20 | 0x28 | 0x30 | 0x38 => self.multiply_add::<f32>(op),
            0x21 | 0x29 | 0x31 | 0x39 => self.multiply_add::<f64>(op),
            _ => return reserved(),
        }

        Ok(())
    }

    fn multiply_add<T: FpValue>(&mut self, op: Opcode) {
        let addend = T::read(&self.fpu, op.fr());
        let product = T::read(&self.fpu, op.fs()) * T::read(&self.fpu, op.ft());
        let value = match op.funct() >> 3 {
            4 => product + addend,
            5 => product - addend,
            6 => -(product + addend),
            _ => -(product - addend),
        };
        value.write(&mut self.fpu, op.fd());
    }
}

/// The fixed rounding of `ROUND`, `TRUNC`, `CEIL` and `FLOOR`, selected by the low bits of `funct`.
fn fixed_rounding(funct: u32, value: f64) -> f64 {
    match funct & 0b11 {
        0 => value.round(),
        1 => value.trunc(),
        2 => value.ceil(),
        _ => value.floor(),
    }
}

// SPDX-License-Identifier: MPL-2.0

//! Coprocessor 0: exception and interrupt control, the Count/Compare timer, and the TLB
//! interface registers.

use serde::{Deserialize, Serialize};

use crate::{
    exc::{Exception, Kind},
    instr::{decode::Opcode, sign_extend_32},
    tlb,
    Bus,
    Config,
    Cpu,
    Endian,
    State,
};

bitfield::bitfield! {
    /// The `Status` register.
    #[derive(Clone, Copy, Default, Eq, PartialEq)]
    pub struct Status(u32);
    impl Debug;
    /// Interrupt enable.
    pub ie, set_ie: 0;
    /// Exception level.
    pub exl, set_exl: 1;
    /// Error level.
    pub erl, set_erl: 2;
    /// Privilege: 0 is kernel, 1 supervisor, 2 user.
    pub u8, ksu, set_ksu: 4, 3;
    /// Interrupt mask.
    pub u8, im, set_im: 15, 8;
    /// Bootstrap exception vectors.
    pub bev, set_bev: 22;
    /// Selects 32 full 64-bit floating-point registers.
    pub fr, set_fr: 26;
    /// Coprocessor usability, one bit per unit.
    pub u8, cu, set_cu: 31, 28;
}

impl Status {
    /// The interrupt mask bit of the Count/Compare timer.
    pub const IM7: u32 = 0x8000;
    pub const BEV: u32 = 1 << 22;
    pub const ERL: u32 = 1 << 2;

    pub fn with_exl(mut self, exl: bool) -> Self {
        self.set_exl(exl);
        self
    }

    pub fn mode(self) -> Mode {
        if self.exl() || self.erl() {
            return Mode::Kernel;
        }

        match self.ksu() {
            0 => Mode::Kernel,
            1 => Mode::Supervisor,
            _ => Mode::User,
        }
    }

    pub fn is_usable(self, unit: u8) -> bool {
        (self.cu() >> unit) & 1 == 1
    }
}

bitfield::bitfield! {
    /// The `Cause` register.
    #[derive(Clone, Copy, Default, Eq, PartialEq)]
    pub struct Cause(u32);
    impl Debug;
    /// Set when the last exception was taken in a delay slot.
    pub bd, _: 31;
    /// The coprocessor unit of a Coprocessor-Unusable exception.
    pub u8, ce, _: 29, 28;
    /// Interrupts pending.
    pub u8, ip, _: 15, 8;
    pub u8, exc_code, _: 6, 2;
}

impl Cause {
    pub const BD: u32 = 1 << 31;
    pub const CE: u32 = 0b11 << 28;
    /// The pending bit of the Count/Compare timer.
    pub const IP7: u32 = 0x8000;
    /// The two software interrupts, the only bits software may write.
    pub const IP_SOFTWARE: u32 = 0x300;
}

/// A privilege level.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Mode {
    Kernel,
    Supervisor,
    User,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct File {
    pub(crate) regs: [u64; 32],
    /// Control registers, reachable only through `CFC0`/`CTC0`.
    pub(crate) ctrl: [u64; 32],
    /// The cycle at which `Count` read zero.
    pub(crate) count_zero_time: u64,
    /// Whether a `Compare` write is waiting to match.
    pub(crate) compare_armed: bool,
    /// The cycle at which the timer interrupt is raised.
    pub(crate) compare_deadline: Option<u64>,
}

impl File {
    pub const INDEX: usize = 0;
    pub const RANDOM: usize = 1;
    pub const ENTRY_LO0: usize = 2;
    pub const ENTRY_LO1: usize = 3;
    pub const CONTEXT: usize = 4;
    pub const PAGE_MASK: usize = 5;
    pub const WIRED: usize = 6;
    pub const BAD_VADDR: usize = 8;
    pub const COUNT: usize = 9;
    pub const ENTRY_HI: usize = 10;
    pub const COMPARE: usize = 11;
    pub const STATUS: usize = 12;
    pub const CAUSE: usize = 13;
    pub const EPC: usize = 14;
    pub const PRID: usize = 15;
    pub const CONFIG: usize = 16;
    pub const LL_ADDR: usize = 17;
    pub const XCONTEXT: usize = 20;
    pub const ERROR_EPC: usize = 30;

    pub fn status(&self) -> Status {
        Status(self.regs[Self::STATUS] as u32)
    }

    /// Replaces `Status` without any of the side effects of an `MTC0`.
    pub(crate) fn set_status(&mut self, status: Status) {
        self.regs[Self::STATUS] = u64::from(status.0);
    }

    pub fn cause(&self) -> Cause {
        Cause(self.regs[Self::CAUSE] as u32)
    }

    pub fn asid(&self) -> u8 {
        self.regs[Self::ENTRY_HI] as u8
    }

    /// The value of `Count` at the given cycle.
    pub fn count(&self, cycles: u64) -> u32 {
        (cycles.wrapping_sub(self.count_zero_time) / 2) as u32
    }

    /// The value of `Random` at the given cycle.
    pub fn random(&self, cycles: u64) -> u32 {
        let wired = (self.regs[Self::WIRED] & 0x3f) as u32;
        if wired >= tlb::ENTRY_COUNT as u32 {
            return tlb::ENTRY_COUNT as u32 - 1;
        }
        let span = u64::from(tlb::ENTRY_COUNT as u32 - wired);

        (cycles.wrapping_sub(self.count_zero_time) % span) as u32 + wired
    }
}

/// Computes the `Config` register for the given configuration and byte order.
pub fn config_register(config: &Config, endian: Endian) -> u32 {
    let mut reg = 0x0002_6030;

    // Cache sizes are encoded as log2(size / 4 KiB).
    reg |= ((config.dcache_size >> 12).trailing_zeros() & 0b111) << 6;
    reg |= ((config.icache_size >> 12).trailing_zeros() & 0b111) << 9;

    if endian.is_big() {
        reg |= 1 << 15;
    }

    let mut divisor = 2;
    if config.system_clock != 0 {
        let ratio = config.cpu_clock / config.system_clock;
        if ratio * config.system_clock != config.cpu_clock {
            reg |= 1 << 31;
            divisor = config.cpu_clock * 2 / config.system_clock;
        } else {
            divisor = ratio * 2;
        }
    }
    reg |= (divisor.clamp(2, 8) - 2) << 28;

    reg
}

/// The read-only `R` and `BadVPN2` fields of `XContext`.
pub(crate) const XCONTEXT_BAD_VPN2: u64 = 0x1_ffff_fff0;

impl State {
    /// Reads a COP0 register as `MFC0`/`DMFC0` see it.
    pub(crate) fn read_cop0(&mut self, index: usize) -> u64 {
        match index {
            File::COUNT => {
                self.charge(250);
                u64::from(self.cop0.count(self.cycles))
            }
            File::CAUSE => {
                self.charge(250);
                self.cop0.regs[File::CAUSE]
            }
            File::RANDOM => u64::from(self.cop0.random(self.cycles)),
            _ => self.cop0.regs[index],
        }
    }

    /// Writes a COP0 register as `MTC0`/`DMTC0` do, with all side effects.
    pub fn write_cop0(&mut self, index: usize, value: u64) {
        match index {
            File::INDEX => {
                self.cop0.regs[File::INDEX] = value & 0x3f;
            }
            File::RANDOM | File::BAD_VADDR | File::PRID => {}
            File::CONTEXT => {
                let context = &mut self.cop0.regs[File::CONTEXT];
                *context = (*context & 0x7f_fff0) | (value & !0x7f_fff0);
            }
            File::XCONTEXT => {
                let xcontext = &mut self.cop0.regs[File::XCONTEXT];
                *xcontext = (*xcontext & XCONTEXT_BAD_VPN2) | (value & !XCONTEXT_BAD_VPN2);
            }
            File::PAGE_MASK => {
                self.cop0.regs[File::PAGE_MASK] = value & 0x01ff_e000;
            }
            File::WIRED => {
                let wired = value & 0x3f;
                if wired >= tlb::ENTRY_COUNT as u64 {
                    tracing::warn!("Wired set to {} with only {} TLB entries", wired, tlb::ENTRY_COUNT);
                }
                self.cop0.regs[File::WIRED] = wired;
            }
            File::COUNT => {
                let count = value as u32;
                self.cop0.regs[File::COUNT] = u64::from(count);
                self.cop0.count_zero_time = self.cycles.wrapping_sub(u64::from(count) * 2);
                self.schedule_timer();
            }
            File::ENTRY_HI => {
                self.set_entry_hi(value & !0x1f00);
            }
            File::COMPARE => {
                self.cop0.compare_armed = true;
                self.cop0.regs[File::CAUSE] &= !u64::from(Cause::IP7);
                self.cop0.regs[File::COMPARE] = u64::from(value as u32);
                self.schedule_timer();
            }
            File::STATUS => {
                let old = self.cop0.status();
                let new = Status(value as u32);
                self.cop0.set_status(new);
                if (old.0 ^ new.0) & Status::IM7 != 0 {
                    self.schedule_timer();
                }
                self.fpu.fr = new.fr();
                // Privilege may have changed.
                self.code_page = None;
                self.check_irqs();
            }
            File::CAUSE => {
                let cause = &mut self.cop0.regs[File::CAUSE];
                *cause = (*cause & !u64::from(Cause::IP_SOFTWARE))
                    | (value & u64::from(Cause::IP_SOFTWARE));
                let cause = *cause as u32;

                let status = self.cop0.status();
                let taken = cause & status.0 & Cause::IP_SOFTWARE != 0
                    && status.ie()
                    && !status.exl()
                    && !status.erl();
                if taken {
                    // Land a pending branch before the interrupt is taken.
                    if let Some(target) = self.reg.next_pc.take() {
                        self.reg.pc = target;
                    }
                }
                self.check_irqs();
            }
            File::CONFIG => {
                let config = &mut self.cop0.regs[File::CONFIG];
                *config = (*config & !0b111) | (value & 0b111);
            }
            _ => {
                self.cop0.regs[index] = value;
            }
        }
    }

    /// Replaces `EntryHi`, rebuilding the translation cache if the ASID changes.
    pub(crate) fn set_entry_hi(&mut self, value: u64) {
        let old_asid = self.cop0.asid();
        if old_asid != value as u8 {
            self.tlb.unmap_all(old_asid);
            self.cop0.regs[File::ENTRY_HI] = value;
            self.tlb.map_all(value as u8);
            self.code_page = None;
            tracing::trace!("ASID {:#04x} -> {:#04x}", old_asid, value as u8);
        } else {
            self.cop0.regs[File::ENTRY_HI] = value;
        }
    }

    /// Recomputes the cycle at which `Count` reaches `Compare`.
    pub(crate) fn schedule_timer(&mut self) {
        let status = self.cop0.status();
        self.cop0.compare_deadline = if self.cop0.compare_armed && (status.0 & Status::IM7 != 0) {
            let elapsed = self.cycles.wrapping_sub(self.cop0.count_zero_time);
            let count = (elapsed / 2) as u32;
            let compare = self.cop0.regs[File::COMPARE] as u32;
            let left = match compare.wrapping_sub(count) {
                0 => 1 << 32,
                left => u64::from(left),
            };
            // Count ticks on every other cycle.
            let deadline = self.cycles + left * 2 - (elapsed & 1);
            tracing::trace!("Timer scheduled for cycle {}", deadline);

            Some(deadline)
        } else {
            None
        };
    }

    /// Raises the timer interrupt if its deadline has passed.
    pub(crate) fn poll_timer(&mut self) {
        if matches!(self.cop0.compare_deadline, Some(deadline) if self.cycles >= deadline) {
            self.cop0.compare_deadline = None;
            self.cop0.compare_armed = false;
            self.cop0.regs[File::CAUSE] |= u64::from(Cause::IP7);
            self.check_irqs();
        }
    }

    /// Takes an interrupt if one is pending, unmasked, and enabled.
    pub fn check_irqs(&mut self) -> bool {
        let status = self.cop0.status();
        let pending = self.cop0.regs[File::CAUSE] as u32 & status.0 & 0xff00;
        if pending != 0 && status.ie() && !status.exl() && !status.erl() {
            self.raise_exception(Exception::new(Kind::Interrupt), false);

            true
        } else {
            false
        }
    }

    /// Returns from an exception or error handler.
    pub(crate) fn eret(&mut self) {
        let mut status = self.cop0.status();
        if status.erl() {
            self.reg.pc = self.cop0.regs[File::ERROR_EPC] as u32;
            status.set_erl(false);
        } else {
            self.reg.pc = self.cop0.regs[File::EPC] as u32;
            status.set_exl(false);
        }
        self.cop0.set_status(status);
        // A reservation never survives an exception.
        self.link.bit = false;
        self.code_page = None;
        self.check_irqs();
    }

    pub fn mode(&self) -> Mode {
        self.cop0.status().mode()
    }

    pub(crate) fn check_cop_usable(&self, unit: u8) -> Result<(), Exception> {
        let status = self.cop0.status();
        let usable = status.is_usable(unit) || (unit == 0 && status.mode() == Mode::Kernel);
        if usable {
            Ok(())
        } else {
            Err(Exception::new(Kind::CopUnusable(unit)))
        }
    }
}

impl<B: Bus + ?Sized> Cpu<'_, '_, B> {
    pub(crate) fn execute_cop0(&mut self, op: Opcode) -> Result<(), Exception> {
        self.check_cop_usable(0)?;

        let (rt, rd) = (op.rt(), op.rd());
        match op.rs() {
            0x00 => {
                let value = self.read_cop0(rd);
                self.reg.set_gpr(rt, sign_extend_32(value as u32));
            }
            0x01 => {
                let value = self.read_cop0(rd);
                self.reg.set_gpr(rt, value);
            }
            0x02 => {
                let value = sign_extend_32(self.cop0.ctrl[rd] as u32);
                self.reg.set_gpr(rt, value);
            }
            0x04 => {
                let value = sign_extend_32(self.reg.gpr(rt) as u32);
                self.write_cop0(rd, value);
            }
            0x05 => {
                let value = self.reg.gpr(rt);
                self.write_cop0(rd, value);
            }
            0x06 => {
                let value = sign_extend_32(self.reg.gpr(rt) as u32);
                self.cop0.ctrl[rd] = value;
            }
            0x10..=0x1f => match op.funct() {
                0x01 => {
                    tracing::trace!("tlbr");
                    self.tlbr();
                }
                0x02 => {
                    tracing::trace!("tlbwi");
                    let index = self.cop0.regs[File::INDEX] as usize & 0x3f;
                    self.tlb_write(index);
                }
                0x06 => {
                    tracing::trace!("tlbwr");
                    let index = self.cop0.random(self.cycles) as usize;
                    self.tlb_write(index);
                }
                0x08 => {
                    tracing::trace!("tlbp");
                    self.tlbp();
                }
                0x18 => {
                    tracing::trace!("eret");
                    self.eret();
                }
                _ => return Err(Exception::new(Kind::ReservedInstr)),
            },
            _ => return Err(Exception::new(Kind::ReservedInstr)),
        }

        Ok(())
    }
}

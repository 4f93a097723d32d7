// SPDX-License-Identifier: MPL-2.0

//! A cycle-counting interpreter for 64-bit MIPS III and MIPS IV processors of the R4600/R5000
//! families.
//!
//! The processor is split into a [`State`], which owns every architectural register, the TLB and
//! its translation cache, and a short-lived [`Cpu`], which borrows the state together with a
//! physical [`Bus`] for the duration of an [`execute`](Cpu::execute) call.
//!
//! ```ignore
//! let mut state = State::new(Config::default())?;
//! state.reset(Reset::default())?;
//! let consumed = state.connect_bus(&mut board).execute(10_000);
//! ```

pub mod bus;
pub mod cop;
pub mod cop0;
pub mod exc;
pub mod fpu;
pub mod instr;
pub mod mem;
pub mod mmu;
pub mod reg;
pub mod tlb;

#[cfg(test)]
mod asm;

pub use bus::Bus;
pub use exc::Exception;
pub use instr::sign_extend_32;
pub use mem::Endian;

use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use exc::Kind;
use instr::decode::Opcode;

/// The address execution starts from after a reset.
pub const RESET_VECTOR: u32 = 0xbfc0_0000;

/// Processor capabilities beyond the base ISA.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum Variant {
    #[default]
    Generic,
    /// IDT R4650-class parts, which add the multiply-accumulate group.
    Idt,
}

/// Fixed properties of the modeled part and its board.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Instruction cache size in bytes.
    pub icache_size: u32,
    /// Data cache size in bytes.
    pub dcache_size: u32,
    /// System interface clock in Hz.
    pub system_clock: u32,
    /// Pipeline clock in Hz.
    pub cpu_clock: u32,
    /// Whether `ADD`, `SUB` and friends raise Integer-Overflow.
    pub overflow_traps: bool,
    pub variant: Variant,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            icache_size: 16 * 1024,
            dcache_size: 16 * 1024,
            system_clock: 50_000_000,
            cpu_clock: 100_000_000,
            overflow_traps: true,
            variant: Variant::Generic,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (cache, size) in [("instruction", self.icache_size), ("data", self.dcache_size)] {
            if !size.is_power_of_two() || !(4 * 1024..=512 * 1024).contains(&size) {
                return Err(ConfigError::CacheSize { cache, size });
            }
        }
        if self.cpu_clock == 0 {
            return Err(ConfigError::ZeroCpuClock);
        }
        if self.system_clock > self.cpu_clock {
            return Err(ConfigError::SystemClock {
                system: self.system_clock,
                cpu: self.cpu_clock,
            });
        }

        Ok(())
    }
}

/// The pin-strapped state sampled at reset.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Reset {
    pub big_endian: bool,
    /// Whether the MIPS IV extensions are present.
    pub extended_isa: bool,
    /// The value of `PRId`.
    pub proc_id: u32,
}

impl Default for Reset {
    fn default() -> Self {
        Self {
            big_endian: true,
            extended_isa: false,
            // R4600 rev. 2.0.
            proc_id: 0x2020,
        }
    }
}

impl Reset {
    /// Resolves the ISA level, checking it against the implementation number when that is known.
    fn is_mips4(&self) -> Result<bool, ConfigError> {
        let implied = match (self.proc_id >> 8) & 0xff {
            // R4600, R4700, R4650.
            0x20 | 0x21 | 0x22 => Some(false),
            // R5000, RM7000, RM5270.
            0x23 | 0x27 | 0x28 => Some(true),
            _ => None,
        };

        match implied {
            Some(mips4) if mips4 != self.extended_isa => Err(ConfigError::IsaMismatch {
                proc_id: self.proc_id,
                extended_isa: self.extended_isa,
            }),
            _ => Ok(self.extended_isa),
        }
    }
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    #[error("{cache} cache size {size:#x} is not a power of two between 4 KiB and 512 KiB")]
    CacheSize { cache: &'static str, size: u32 },
    #[error("CPU clock is zero")]
    ZeroCpuClock,
    #[error("system clock ({system} Hz) is faster than the CPU clock ({cpu} Hz)")]
    SystemClock { system: u32, cpu: u32 },
    #[error("PRId {proc_id:#06x} contradicts extended_isa = {extended_isa}")]
    IsaMismatch { proc_id: u32, extended_isa: bool },
}

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("failed to encode context: {0}")]
    Encode(#[source] bincode::Error),
    #[error("failed to decode context: {0}")]
    Decode(#[source] bincode::Error),
}

/// The complete architectural state of one processor.
#[derive(Clone, Serialize, Deserialize)]
pub struct State {
    pub config: Config,
    /// The integer register file.
    pub reg: reg::File,
    pub cop0: cop0::File,
    pub fpu: fpu::File,
    pub cop2: cop::Bank,
    pub cop3: cop::Bank,
    pub tlb: tlb::Tlb,
    pub link: mmu::Link,
    /// Cycles executed since creation.
    pub cycles: u64,
    pub(crate) endian: Endian,
    pub(crate) mips4: bool,
    /// Cycles owed by the host, paid at the next `execute`.
    pub(crate) interrupt_cycles: i32,
    /// Cycles left in the current `execute` call.
    #[serde(skip)]
    pub(crate) icount: i32,
    /// The virtual page number and physical base of the page code is running from.
    #[serde(skip)]
    pub(crate) code_page: Option<(u32, u32)>,
}

impl State {
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;
        tracing::debug!("New processor: {:?}", config);

        let mut state = Self {
            config,
            reg: Default::default(),
            cop0: Default::default(),
            fpu: Default::default(),
            cop2: Default::default(),
            cop3: Default::default(),
            tlb: Default::default(),
            link: Default::default(),
            cycles: 0,
            endian: Endian::Big,
            mips4: false,
            interrupt_cycles: 0,
            icount: 0,
            code_page: None,
        };
        state.tlb.recompute(0);

        Ok(state)
    }

    /// Brings the processor to its power-on state.
    pub fn reset(&mut self, reset: Reset) -> Result<(), ConfigError> {
        let mips4 = reset.is_mips4()?;
        self.endian = if reset.big_endian { Endian::Big } else { Endian::Little };
        self.mips4 = mips4;

        self.reg = Default::default();
        self.reg.pc = RESET_VECTOR;

        self.cop0 = Default::default();
        self.cop0.regs[cop0::File::STATUS] = u64::from(cop0::Status::BEV | cop0::Status::ERL);
        self.cop0.regs[cop0::File::COMPARE] = 0xffff_ffff;
        self.cop0.regs[cop0::File::PRID] = u64::from(reset.proc_id);
        self.cop0.regs[cop0::File::CONFIG] =
            u64::from(cop0::config_register(&self.config, self.endian));
        self.cop0.count_zero_time = self.cycles;

        self.fpu = Default::default();
        self.fpu.ctrl[fpu::ctrl::FIR] = u64::from(reset.proc_id & 0xff00);
        self.cop2 = Default::default();
        self.cop3 = Default::default();
        self.link = Default::default();

        self.tlb.clear();
        self.tlb.recompute(0);
        self.interrupt_cycles = 0;
        self.code_page = None;

        tracing::debug!(
            "Reset: {} endian, MIPS {}, PRId {:#06x}",
            if reset.big_endian { "big" } else { "little" },
            if mips4 { "IV" } else { "III" },
            reset.proc_id,
        );

        Ok(())
    }

    pub fn connect_bus<'s, 'b, B: Bus + ?Sized>(&'s mut self, bus: &'b mut B) -> Cpu<'s, 'b, B> {
        Cpu { state: self, bus }
    }

    /// Serializes the whole processor.
    pub fn get_context(&self) -> Result<Vec<u8>, ContextError> {
        bincode::serialize(self).map_err(ContextError::Encode)
    }

    /// Replaces the whole processor with one produced by [`get_context`](Self::get_context).
    pub fn set_context(&mut self, blob: &[u8]) -> Result<(), ContextError> {
        let mut state: Self = bincode::deserialize(blob).map_err(ContextError::Decode)?;
        state.tlb.recompute(state.cop0.asid());
        state.code_page = None;
        *self = state;

        Ok(())
    }

    /// Drives external interrupt line `line` (0 to 5), which appears in `Cause.IP[line + 2]`.
    pub fn set_irq_line(&mut self, line: u8, asserted: bool) {
        debug_assert!(line < 6, "IRQ line out of range: {}", line);

        let bit = 1 << (10 + u32::from(line));
        let cause = &mut self.cop0.regs[cop0::File::CAUSE];
        if asserted {
            *cause |= bit;
        } else {
            *cause &= !bit;
        }
        self.check_irqs();
    }

    /// Charges cycles spent outside the processor, such as a bus stall, to the next `execute`.
    pub fn stall(&mut self, cycles: u32) {
        let cycles = i32::try_from(cycles).unwrap_or(i32::MAX);
        self.interrupt_cycles = self.interrupt_cycles.saturating_add(cycles);
    }

    #[inline(always)]
    pub(crate) fn charge(&mut self, cycles: i32) {
        self.icount -= cycles;
        self.cycles += cycles as u64;
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn is_mips4(&self) -> bool {
        self.mips4
    }

    pub fn pc(&self) -> u32 {
        self.reg.pc
    }

    /// Moves execution to `pc`, abandoning any pending branch.
    pub fn set_pc(&mut self, pc: u32) {
        self.reg.pc = pc;
        self.reg.next_pc = None;
    }

    pub fn gpr(&self, index: usize) -> u64 {
        self.reg.gpr(index)
    }

    pub fn set_gpr(&mut self, index: usize, value: u64) {
        self.reg.set_gpr(index, value);
    }

    pub fn hi(&self) -> u64 {
        self.reg.hi()
    }

    pub fn set_hi(&mut self, value: u64) {
        *self.reg.hi_mut() = value;
    }

    pub fn lo(&self) -> u64 {
        self.reg.lo()
    }

    pub fn set_lo(&mut self, value: u64) {
        *self.reg.lo_mut() = value;
    }

    /// Reads a COP0 register without side effects, deriving `Count` and `Random` on the spot.
    pub fn cop0_reg(&self, index: usize) -> u64 {
        match index {
            cop0::File::COUNT => u64::from(self.cop0.count(self.cycles)),
            cop0::File::RANDOM => u64::from(self.cop0.random(self.cycles)),
            _ => self.cop0.regs[index],
        }
    }

    pub fn set_cop0_reg(&mut self, index: usize, value: u64) {
        self.write_cop0(index, value);
    }
}

/// A processor connected to its bus.
pub struct Cpu<'s, 'b, B: Bus + ?Sized> {
    state: &'s mut State,
    bus: &'b mut B,
}

impl<B: Bus + ?Sized> Deref for Cpu<'_, '_, B> {
    type Target = State;

    fn deref(&self) -> &Self::Target {
        &*self.state
    }
}

impl<B: Bus + ?Sized> DerefMut for Cpu<'_, '_, B> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.state
    }
}

impl<B: Bus + ?Sized> Cpu<'_, '_, B> {
    pub fn bus(&self) -> &B {
        &*self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut *self.bus
    }

    /// Runs for roughly `cycles` cycles and returns the number actually consumed.
    ///
    /// The count may overshoot: a pending delay slot always completes, and multiply, divide and
    /// COP0 accesses cost more than one cycle.
    pub fn execute(&mut self, cycles: i32) -> i32 {
        self.icount = cycles;
        let debt = std::mem::take(&mut self.interrupt_cycles);
        self.charge(debt);
        self.poll_timer();
        self.check_irqs();

        while self.icount > 0 || self.reg.next_pc.is_some() {
            self.step();
        }

        cycles - self.icount
    }

    /// Fetches and executes one instruction.
    fn step(&mut self) {
        let pc = self.reg.pc;
        self.reg.ppc = pc;
        self.reg.delay_slot = self.reg.next_pc.is_some();

        let op = match self.fetch(pc) {
            Ok(op) => op,
            Err(exc) => {
                self.raise_exception(exc, true);
                self.charge(1);
                return;
            }
        };

        self.reg.pc = match self.reg.next_pc.take() {
            Some(target) => target,
            None => pc.wrapping_add(4),
        };
        if let Err(exc) = self.execute_opcode(op) {
            self.raise_exception(exc, true);
        }

        self.charge(1);
        self.poll_timer();
    }

    fn fetch(&mut self, pc: u32) -> Result<Opcode, Exception> {
        let addr = self.fetch_addr(pc)?;

        self.bus.read_32(addr).map(Opcode).map_err(|e| {
            tracing::debug!("Bus error on fetch: {}", e);

            Exception::new(Kind::BusFetch)
        })
    }
}

// SPDX-License-Identifier: MPL-2.0

//! CPU exceptions.

use crate::{cop0, sign_extend_32, State};

/// The base address of the exception vectors while `Status.BEV` is clear.
pub const RAM_VECTOR_BASE: u32 = 0x8000_0000;
/// The base address of the exception vectors while `Status.BEV` is set.
pub const ROM_VECTOR_BASE: u32 = 0xbfc0_0200;
/// The offset of the TLB refill vector.
pub const REFILL_OFFSET: u32 = 0x000;
/// The offset of the general exception vector.
pub const GENERAL_OFFSET: u32 = 0x180;

pub mod code {
    //! Exception codes, as stored in `Cause.ExcCode`.

    /// The code for interrupts.
    pub const INTERRUPT: u32 = 0;
    /// The code for stores to pages whose TLB entry is not marked dirty.
    pub const TLB_MODIFICATION: u32 = 1;
    /// The code for TLB misses caused by loads and instruction fetches.
    pub const TLB_LOAD: u32 = 2;
    /// The code for TLB misses caused by stores.
    pub const TLB_STORE: u32 = 3;
    /// The code for address-related exceptions caused by memory loads (e.g. instruction fetches).
    ///
    /// In particular, this code is yielded on attempts to access kernel segments outside of kernel
    /// mode, or on attempts to read a value at a misaligned address.
    pub const ADDRESS_LOAD: u32 = 4;
    /// The code for address-related exceptions caused by memory stores.
    pub const ADDRESS_STORE: u32 = 5;
    /// The code for bus-related exceptions caused by instruction fetches.
    pub const BUS_FETCH: u32 = 6;
    /// The code for bus-related exceptions caused by data accesses.
    pub const BUS_DATA: u32 = 7;
    /// The code for `syscall` instruction invocations.
    pub const SYSCALL: u32 = 8;
    /// The code for `break` instruction invocations.
    pub const BREAKPOINT: u32 = 9;
    /// The code yielded in attempts to execute instructions not defined for the current ISA level.
    ///
    /// In many cases, this code indicates an attempt to execute non-code data.
    pub const RESERVED_INSTR: u32 = 10;
    /// The code yielded in attempts to access an unavailable coprocessor.
    pub const COP_UNUSABLE: u32 = 11;
    /// The code yielded in signed arithmetic overflow.
    ///
    /// This code is never yielded due to unsigned arithmetic instructions (e.g. *addu*).
    pub const INTEGER_OVERFLOW: u32 = 12;
    /// The code for trap instructions whose condition held.
    pub const TRAP: u32 = 13;
}

/// The kind of a CPU exception.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Kind {
    Interrupt,
    TlbModification,
    TlbLoad,
    TlbStore,
    AddressLoad,
    AddressStore,
    BusFetch,
    BusData,
    Syscall,
    Breakpoint,
    ReservedInstr,
    /// The operand is the number of the unusable coprocessor.
    CopUnusable(u8),
    IntegerOverflow,
    Trap,
}

impl Kind {
    pub fn code(self) -> u32 {
        match self {
            Self::Interrupt => code::INTERRUPT,
            Self::TlbModification => code::TLB_MODIFICATION,
            Self::TlbLoad => code::TLB_LOAD,
            Self::TlbStore => code::TLB_STORE,
            Self::AddressLoad => code::ADDRESS_LOAD,
            Self::AddressStore => code::ADDRESS_STORE,
            Self::BusFetch => code::BUS_FETCH,
            Self::BusData => code::BUS_DATA,
            Self::Syscall => code::SYSCALL,
            Self::Breakpoint => code::BREAKPOINT,
            Self::ReservedInstr => code::RESERVED_INSTR,
            Self::CopUnusable(_) => code::COP_UNUSABLE,
            Self::IntegerOverflow => code::INTEGER_OVERFLOW,
            Self::Trap => code::TRAP,
        }
    }

    fn is_tlb(self) -> bool {
        matches!(self, Self::TlbModification | Self::TlbLoad | Self::TlbStore)
    }
}

/// A CPU exception.
///
/// Exceptions are not necessarily errors---they are, more accurately, interruptions in normal
/// code execution, which may be caused by errors (e.g., misaligned addresses, signed integer
/// overflow), but which may also be manually triggered by the program with instructions such as
/// `syscall` and `break`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Exception {
    pub kind: Kind,
    /// The virtual address that caused an address or TLB exception.
    pub bad_vaddr: Option<u32>,
    /// Whether this exception is taken through the TLB refill vector.
    pub refill: bool,
}

impl Exception {
    pub fn new(kind: Kind) -> Self {
        Self { kind, bad_vaddr: None, refill: false }
    }

    /// Creates an address error for the given virtual address.
    pub fn address(kind: Kind, vaddr: u32) -> Self {
        Self { kind, bad_vaddr: Some(vaddr), refill: false }
    }

    /// Creates a TLB exception for the given virtual address.
    pub fn tlb(kind: Kind, vaddr: u32, refill: bool) -> Self {
        Self { kind, bad_vaddr: Some(vaddr), refill }
    }
}

impl From<Kind> for Exception {
    fn from(kind: Kind) -> Self {
        Self::new(kind)
    }
}

impl State {
    /// Delivers an exception to the emulated program.
    ///
    /// With `rollback`, the exception is attributed to the instruction being executed, which
    /// restarts from its own address once the handler returns.
    pub fn raise_exception(&mut self, exc: Exception, rollback: bool) {
        if rollback {
            self.reg.pc = self.reg.ppc;
        }

        let mut epc = self.reg.pc;
        let mut cause = self.cop0.regs[cop0::File::CAUSE] as u32;
        cause &= !(cop0::Cause::BD | cop0::Cause::CE | 0xff);
        cause |= exc.kind.code() << 2;
        if let Kind::CopUnusable(unit) = exc.kind {
            cause |= u32::from(unit & 0b11) << 28;
        }

        // An exception in a delay slot restarts at the branch.
        let pending_branch = self.reg.next_pc.take().is_some();
        if pending_branch || (rollback && self.reg.delay_slot) {
            epc = epc.wrapping_sub(4);
            cause |= cop0::Cause::BD;
        }

        let status = self.cop0.status();
        let offset = if exc.refill && !status.exl() {
            REFILL_OFFSET
        } else {
            GENERAL_OFFSET
        };

        if let Some(vaddr) = exc.bad_vaddr {
            self.cop0.regs[cop0::File::BAD_VADDR] = sign_extend_32(vaddr);
            if exc.kind.is_tlb() {
                let context = self.cop0.regs[cop0::File::CONTEXT];
                self.cop0.regs[cop0::File::CONTEXT] =
                    (context & !0x7f_ffff) | u64::from((vaddr >> 9) & 0x7f_fff0);
                // XContext holds the region in bits 32:31 and VA[39:13] below it.
                let wide = sign_extend_32(vaddr);
                let xcontext = self.cop0.regs[cop0::File::XCONTEXT];
                self.cop0.regs[cop0::File::XCONTEXT] = (xcontext & !cop0::XCONTEXT_BAD_VPN2)
                    | ((wide >> 62) << 31)
                    | (((wide >> 13) & 0x7ff_ffff) << 4);
                // The ASID is kept, so the translation cache stays valid.
                let asid = self.cop0.regs[cop0::File::ENTRY_HI] & 0xff;
                self.cop0.regs[cop0::File::ENTRY_HI] = sign_extend_32(vaddr & 0xffff_e000) | asid;
            }
        }

        self.cop0.regs[cop0::File::EPC] = sign_extend_32(epc);
        self.cop0.regs[cop0::File::CAUSE] = u64::from(cause);
        self.cop0.set_status(status.with_exl(true));
        self.link.bit = false;
        self.code_page = None;

        let base = if status.bev() {
            ROM_VECTOR_BASE
        } else {
            RAM_VECTOR_BASE
        };
        self.reg.pc = base + offset;

        if exc.kind != Kind::Interrupt {
            tracing::debug!(
                "Exception: {:?} (epc={:#010x}, bad_vaddr={:x?}, vector={:#010x})",
                exc.kind,
                epc,
                exc.bad_vaddr,
                self.reg.pc,
            );
        }
    }
}

// SPDX-License-Identifier: MPL-2.0

//! Virtual memory accesses.
//!
//! Every load, store, and instruction fetch passes through [`State::translate`], which applies the
//! privilege rules of the current mode and then consults the flattened TLB table. The `read_*`
//! and `write_*` trampolines on [`Cpu`] add alignment checks and forward the physical access to the
//! bus, converting bus failures into Bus-Error exceptions.

use serde::{Deserialize, Serialize};

use crate::{
    cop0::Mode,
    exc::{Exception, Kind},
    mem::Merge,
    Bus,
    Cpu,
    State,
};

/// The direction of a memory access.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Access {
    Load,
    Store,
    Fetch,
}

impl Access {
    fn address_error(self) -> Kind {
        match self {
            Self::Store => Kind::AddressStore,
            Self::Load | Self::Fetch => Kind::AddressLoad,
        }
    }

    fn tlb_miss(self) -> Kind {
        match self {
            Self::Store => Kind::TlbStore,
            Self::Load | Self::Fetch => Kind::TlbLoad,
        }
    }
}

/// The load-linked reservation.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct Link {
    /// Set by `LL`/`LLD`; cleared on exception entry and `ERET`.
    pub bit: bool,
    /// The word loaded by the last `LL`.
    pub ll_value: u32,
    /// The doubleword loaded by the last `LLD`.
    pub lld_value: u64,
}

impl State {
    /// Translates the given virtual address to a physical address.
    pub fn translate(&self, vaddr: u32, access: Access) -> Result<u32, Exception> {
        let allowed = match self.mode() {
            Mode::Kernel => true,
            Mode::Supervisor => vaddr < 0x8000_0000 || (0xc000_0000..0xe000_0000).contains(&vaddr),
            Mode::User => vaddr < 0x8000_0000,
        };
        if !allowed {
            return Err(Exception::address(access.address_error(), vaddr));
        }

        let slot = self.tlb.table().get(vaddr >> 12);
        match slot.base() {
            None => Err(Exception::tlb(access.tlb_miss(), vaddr, true)),
            Some(_) if access == Access::Store && !slot.is_writable() => {
                Err(Exception::tlb(Kind::TlbStore, vaddr, false))
            }
            Some(base) => Ok(base | (vaddr & 0xfff)),
        }
    }

    /// Translates the given virtual address without privilege checks or side effects.
    pub fn translate_for_debug(&self, vaddr: u32) -> Option<u32> {
        self.tlb
            .table()
            .get(vaddr >> 12)
            .base()
            .map(|base| base | (vaddr & 0xfff))
    }

    /// Resolves the physical address of the instruction at `pc`, reusing the cached code page.
    pub(crate) fn fetch_addr(&mut self, pc: u32) -> Result<u32, Exception> {
        if pc & 0b11 != 0 {
            return Err(Exception::address(Kind::AddressLoad, pc));
        }

        let vpage = pc >> 12;
        if let Some((page, base)) = self.code_page {
            if page == vpage {
                return Ok(base | (pc & 0xfff));
            }
        }

        let addr = self.translate(pc, Access::Fetch)?;
        self.code_page = Some((vpage, addr & !0xfff));

        Ok(addr)
    }
}

macro_rules! def_read {
    (
        fn $fn_name:ident() -> $fn_out_ty:ty = $bus_fn_name:ident
    ) => {
        /// Reads the value at the given virtual address.
        pub fn $fn_name(&mut self, vaddr: u32) -> Result<$fn_out_ty, Exception> {
            const ALIGN: u32 = std::mem::size_of::<$fn_out_ty>() as u32 - 1;

            if vaddr & ALIGN != 0 {
                return Err(Exception::address(Kind::AddressLoad, vaddr));
            }
            let addr = self.translate(vaddr, Access::Load)?;

            self.bus.$bus_fn_name(addr).map_err(|e| {
                tracing::debug!("Bus error on load: {}", e);

                Exception::new(Kind::BusData)
            })
        }
    };
}

macro_rules! def_write {
    (
        fn $fn_name:ident($fn_in_ty:ty) = $bus_fn_name:ident
    ) => {
        /// Writes a value to the given virtual address.
        pub fn $fn_name(&mut self, vaddr: u32, value: $fn_in_ty) -> Result<(), Exception> {
            const ALIGN: u32 = std::mem::size_of::<$fn_in_ty>() as u32 - 1;

            if vaddr & ALIGN != 0 {
                return Err(Exception::address(Kind::AddressStore, vaddr));
            }
            let addr = self.translate(vaddr, Access::Store)?;

            self.bus.$bus_fn_name(addr, value).map_err(|e| {
                tracing::debug!("Bus error on store: {}", e);

                Exception::new(Kind::BusData)
            })
        }
    };
}

macro_rules! def_write_masked {
    (
        fn $fn_name:ident($fn_in_ty:ty) = $bus_read_fn_name:ident, $bus_write_fn_name:ident
    ) => {
        /// Merges part of a value into the aligned unit at the given virtual address.
        pub fn $fn_name(&mut self, vaddr: u32, merge: Merge<$fn_in_ty>) -> Result<(), Exception> {
            let addr = self.translate(vaddr, Access::Store)?;
            let bus_error = |e| {
                tracing::debug!("Bus error on partial store: {}", e);

                Exception::new(Kind::BusData)
            };

            let old = self.bus.$bus_read_fn_name(addr).map_err(bus_error)?;
            self.bus.$bus_write_fn_name(addr, merge.apply(old)).map_err(bus_error)
        }
    };
}

impl<B: Bus + ?Sized> Cpu<'_, '_, B> {
    def_read! { fn read_8() -> u8 = read_8 }
    def_read! { fn read_16() -> u16 = read_16 }
    def_read! { fn read_32() -> u32 = read_32 }
    def_read! { fn read_64() -> u64 = read_64 }
    def_write! { fn write_8(u8) = write_8 }
    def_write! { fn write_16(u16) = write_16 }
    def_write! { fn write_32(u32) = write_32 }
    def_write! { fn write_64(u64) = write_64 }
    def_write_masked! { fn write_32_masked(u32) = read_32, write_32 }
    def_write_masked! { fn write_64_masked(u64) = read_64, write_64 }
}

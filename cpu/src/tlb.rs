// SPDX-License-Identifier: MPL-2.0

//! The translation lookaside buffer and its flattened page table.
//!
//! Software manages the 48 TLB entries through COP0. Lookups never walk the entries; instead,
//! every page that the entries (and the two unmapped kernel windows) make reachable is expanded
//! into a flat [`Table`] indexed by 4 KiB virtual page number. The table is derived data: it is
//! rebuilt by [`Tlb::map_entry`]/[`Tlb::unmap_entry`] whenever an entry or the current ASID
//! changes, and is never serialized.

use serde::{Deserialize, Serialize};

use crate::{cop0, State};

/// The number of entries in the TLB.
pub const ENTRY_COUNT: usize = 48;
/// The number of 4 KiB pages in the 32-bit virtual address space.
pub const PAGE_COUNT: usize = 1 << 20;

/// The first page of the unmapped kernel windows (*kseg0* and *kseg1*).
const KSEG0_PAGE: u32 = 0x8_0000;
/// The first page after the unmapped kernel windows.
const KSSEG_PAGE: u32 = 0xc_0000;

/// A single TLB entry, as written by `TLBWI`/`TLBWR`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub page_mask: u64,
    pub entry_hi: u64,
    /// The even and odd half-page mappings.
    pub entry_lo: [u64; 2],
}

impl Entry {
    /// `EntryLo` global bit.
    pub const G: u64 = 1 << 0;
    /// `EntryLo` valid bit.
    pub const V: u64 = 1 << 1;
    /// `EntryLo` dirty (writable) bit.
    pub const D: u64 = 1 << 2;

    /// Whether this entry matches every ASID.
    pub fn is_global(&self) -> bool {
        self.entry_lo[0] & self.entry_lo[1] & Self::G != 0
    }

    pub fn asid(&self) -> u8 {
        self.entry_hi as u8
    }

    fn is_visible_to(&self, asid: u8) -> bool {
        self.is_global() || self.asid() == asid
    }

    /// The number of 4 KiB pages each half of this entry covers.
    fn pages_per_half(&self) -> u32 {
        ((self.page_mask >> 13) & 0xfff) as u32 + 1
    }

    /// The first virtual page of the even half.
    fn first_page(&self) -> u32 {
        (self.entry_hi as u32 & 0xffff_e000) >> 12
    }

    /// Calls `f` with each cacheable virtual page of this entry and the `EntryLo` mapping it.
    fn for_each_page(&self, mut f: impl FnMut(u32, u32, u64)) {
        let count = self.pages_per_half();
        let mut page = self.first_page();
        for lo in self.entry_lo {
            let pfn = ((lo >> 6) & 0xff_ffff) as u32;
            for i in 0..count {
                let vpn = page + i;
                if is_cacheable(vpn) {
                    f(vpn, pfn.wrapping_add(i), lo);
                }
            }
            page += count;
        }
    }
}

/// Whether the given virtual page is translated through the TLB.
fn is_cacheable(vpn: u32) -> bool {
    vpn < KSEG0_PAGE || (KSSEG_PAGE..(PAGE_COUNT as u32)).contains(&vpn)
}

/// One flattened page mapping: a physical page base plus a writable flag.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Slot(u32);

impl Slot {
    pub const UNMAPPED: Self = Self(!0);
    const WRITABLE: u32 = 1;

    pub fn new(base: u32, is_writable: bool) -> Self {
        debug_assert_eq!(base & 0xfff, 0);

        Self(base | u32::from(is_writable))
    }

    /// The physical address of the start of the page.
    pub fn base(self) -> Option<u32> {
        if self == Self::UNMAPPED {
            None
        } else {
            Some(self.0 & !0xfff)
        }
    }

    pub fn is_writable(self) -> bool {
        self.0 & Self::WRITABLE != 0
    }
}

/// The flattened page table.
#[derive(Clone)]
pub struct Table(Box<[Slot]>);

impl Default for Table {
    fn default() -> Self {
        Self(vec![Slot::UNMAPPED; PAGE_COUNT].into_boxed_slice())
    }
}

impl Table {
    pub fn get(&self, vpn: u32) -> Slot {
        self.0[vpn as usize]
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Tlb {
    #[serde(with = "serde_arrays")]
    entries: [Entry; ENTRY_COUNT],
    #[serde(skip)]
    table: Table,
}

impl Default for Tlb {
    fn default() -> Self {
        Self {
            entries: [Entry::default(); ENTRY_COUNT],
            table: Table::default(),
        }
    }
}

impl Tlb {
    pub fn entry(&self, index: usize) -> &Entry {
        &self.entries[index]
    }

    pub fn entries(&self) -> &[Entry; ENTRY_COUNT] {
        &self.entries
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    /// Clears every entry.
    pub(crate) fn clear(&mut self) {
        self.entries = [Entry::default(); ENTRY_COUNT];
    }

    /// Rebuilds the whole table: the unmapped kernel windows followed by every entry visible to
    /// `asid`.
    pub fn recompute(&mut self, asid: u8) {
        self.table.0.fill(Slot::UNMAPPED);
        for vpn in KSEG0_PAGE..KSSEG_PAGE {
            self.table.0[vpn as usize] = Slot::new((vpn << 12) & 0x1fff_ffff, true);
        }
        self.map_all(asid);
        tracing::debug!("Translation cache rebuilt (asid={:#04x})", asid);
    }

    /// Expands the entry at `index` into the table, if `asid` can see it.
    pub fn map_entry(&mut self, index: usize, asid: u8) {
        let entry = self.entries[index];
        if !entry.is_visible_to(asid) {
            return;
        }

        let table = &mut self.table.0;
        entry.for_each_page(|vpn, pfn, lo| {
            if lo & Entry::V != 0 {
                table[vpn as usize] = Slot::new(pfn << 12, lo & Entry::D != 0);
            }
        });
    }

    /// Resets exactly the slots that [`Self::map_entry`] would have filled for the entry at
    /// `index`.
    pub fn unmap_entry(&mut self, index: usize, asid: u8) {
        let entry = self.entries[index];
        if !entry.is_visible_to(asid) {
            return;
        }

        let table = &mut self.table.0;
        entry.for_each_page(|vpn, _, lo| {
            if lo & Entry::V != 0 {
                table[vpn as usize] = Slot::UNMAPPED;
            }
        });
    }

    pub fn map_all(&mut self, asid: u8) {
        for index in 0..ENTRY_COUNT {
            self.map_entry(index, asid);
        }
    }

    pub fn unmap_all(&mut self, asid: u8) {
        for index in 0..ENTRY_COUNT {
            self.unmap_entry(index, asid);
        }
    }

    /// Finds the entry matching the given `EntryHi`.
    pub fn probe(&self, entry_hi: u64) -> Option<usize> {
        let asid = entry_hi as u8;
        self.entries.iter().position(|entry| {
            let mask = 0xffff_e000 & !(entry.page_mask as u32);

            (entry.entry_hi as u32 & mask) == (entry_hi as u32 & mask) && entry.is_visible_to(asid)
        })
    }
}

impl State {
    /// `TLBR`.
    pub(crate) fn tlbr(&mut self) {
        let index = self.cop0.regs[cop0::File::INDEX] as usize & 0x3f;
        let Some(entry) = self.tlb.entries.get(index).copied() else {
            tracing::warn!("TLBR with out-of-range index {}", index);
            return;
        };

        self.cop0.regs[cop0::File::PAGE_MASK] = entry.page_mask;
        self.cop0.regs[cop0::File::ENTRY_LO0] = entry.entry_lo[0];
        self.cop0.regs[cop0::File::ENTRY_LO1] = entry.entry_lo[1];
        self.set_entry_hi(entry.entry_hi);
    }

    /// `TLBWI` and `TLBWR`.
    pub(crate) fn tlb_write(&mut self, index: usize) {
        if index >= ENTRY_COUNT {
            tracing::warn!("TLB write with out-of-range index {}", index);
            return;
        }

        let asid = self.cop0.asid();
        let page_mask = self.cop0.regs[cop0::File::PAGE_MASK] & 0x01ff_e000;
        self.tlb.unmap_entry(index, asid);
        self.tlb.entries[index] = Entry {
            page_mask,
            entry_hi: self.cop0.regs[cop0::File::ENTRY_HI] & !page_mask,
            entry_lo: [
                self.cop0.regs[cop0::File::ENTRY_LO0],
                self.cop0.regs[cop0::File::ENTRY_LO1],
            ],
        };
        // Entries may overlap, so every entry gets a chance to refill the slots just cleared.
        self.tlb.map_all(asid);
        self.code_page = None;
    }

    /// `TLBP`.
    pub(crate) fn tlbp(&mut self) {
        self.cop0.regs[cop0::File::INDEX] = match self.tlb.probe(self.cop0.regs[cop0::File::ENTRY_HI]) {
            Some(index) => index as u64,
            None => 0x8000_0000,
        };
    }
}

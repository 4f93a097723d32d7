// SPDX-License-Identifier: MPL-2.0

//! The integer register file.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct File {
    /// The program counter.
    pub(crate) pc: u32,
    /// The target of a taken branch whose delay slot has not been fetched yet.
    pub(crate) next_pc: Option<u32>,
    /// The address of the instruction being executed.
    pub(crate) ppc: u32,
    /// Whether the instruction being executed sits in a branch delay slot.
    pub(crate) delay_slot: bool,
    hi: u64,
    lo: u64,
    /// General-purpose registers. Zero-indexed.
    gprs: [u64; 31],
}

impl fmt::Display for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "pc: {:08x}          next: {}", self.pc, match self.next_pc {
            Some(target) => format!("{:08x}", target),
            None => String::from("(none)"),
        })?;
        for row in 0..16 {
            writeln!(
                f,
                "r{:<2}:{:016x} r{:<2}:{:016x}",
                row,
                self.gpr(row),
                row + 16,
                self.gpr(row + 16),
            )?;
        }
        writeln!(f, "hi: {:016x} lo: {:016x}", self.hi, self.lo)?;

        Ok(())
    }
}

impl File {
    pub fn pc(&self) -> u32 {
        self.pc
    }

    pub fn pc_mut(&mut self) -> &mut u32 {
        &mut self.pc
    }

    /// The pending branch target, if the next instruction is a delay slot.
    pub fn next_pc(&self) -> Option<u32> {
        self.next_pc
    }

    pub fn hi(&self) -> u64 {
        self.hi
    }

    pub fn hi_mut(&mut self) -> &mut u64 {
        &mut self.hi
    }

    pub fn lo(&self) -> u64 {
        self.lo
    }

    pub fn lo_mut(&mut self) -> &mut u64 {
        &mut self.lo
    }

    pub fn gpr(&self, index: usize) -> u64 {
        debug_assert!(index < 32, "GPR index out of range: {}", index);

        if index == 0 {
            0
        } else {
            self.gprs[index - 1]
        }
    }

    pub fn set_gpr(&mut self, index: usize, value: u64) {
        debug_assert!(index < 32, "GPR index out of range: {}", index);

        if index > 0 {
            self.gprs[index - 1] = value;
        }
    }
}

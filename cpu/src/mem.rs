// SPDX-License-Identifier: MPL-2.0

//! Byte order and the unaligned load/store family.
//!
//! The CPU exchanges whole values with the [bus](crate::Bus) in the byte order it was reset with.
//! Within a value, that byte order decides which bits an address lane selects, which only matters
//! to the `LWL`/`LWR`/`SWL`/`SWR` and `LDL`/`LDR`/`SDL`/`SDR` instructions; everything else here is
//! about those.

use serde::{Deserialize, Serialize};

/// The byte order of a CPU and its bus.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum Endian {
    #[default]
    Big,
    Little,
}

/// The half of an unaligned access pair.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Side {
    /// `LWL`, `SWL`, `LDL`, and `SDL`.
    Left,
    /// `LWR`, `SWR`, `LDR`, and `SDR`.
    Right,
}

/// A partial store: the value to merge into memory and the bits of it that are written.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Merge<T> {
    pub value: T,
    pub mask: T,
}

impl<T> Merge<T>
where
    T: Copy + std::ops::BitAnd<Output = T> + std::ops::BitOr<Output = T> + std::ops::Not<Output = T>,
{
    /// Applies this merge to the value currently held by memory.
    pub fn apply(self, old: T) -> T {
        (old & !self.mask) | (self.value & self.mask)
    }
}

macro_rules! def_unaligned {
    (
        $ty:ty,
        lane_mask: $lane_mask:literal,
        $load_fn:ident,
        $store_fn:ident $(,)?
    ) => {
        impl Endian {
            /// Merges the aligned value `mem`, read from the aligned unit containing `addr`, into the
            /// register value `reg`.
            pub fn $load_fn(self, side: Side, addr: u32, reg: $ty, mem: $ty) -> $ty {
                let shift = self.lane_shift(side, addr, $lane_mask);
                match side {
                    Side::Left => {
                        let mask = <$ty>::MAX << shift;
                        (reg & !mask) | (mem << shift)
                    }
                    Side::Right => {
                        let mask = <$ty>::MAX >> shift;
                        (reg & !mask) | (mem >> shift)
                    }
                }
            }

            /// Computes the bytes of `reg` that a store at `addr` deposits into the aligned unit
            /// containing `addr`.
            pub fn $store_fn(self, side: Side, addr: u32, reg: $ty) -> Merge<$ty> {
                let shift = self.lane_shift(side, addr, $lane_mask);
                match side {
                    Side::Left => Merge {
                        value: reg >> shift,
                        mask: <$ty>::MAX >> shift,
                    },
                    Side::Right => Merge {
                        value: reg << shift,
                        mask: <$ty>::MAX << shift,
                    },
                }
            }
        }
    };
}

def_unaligned!(u32, lane_mask: 0b11, load_word, store_word);
def_unaligned!(u64, lane_mask: 0b111, load_dword, store_dword);

impl Endian {
    pub fn is_big(self) -> bool {
        self == Self::Big
    }

    /// The bit shift selected by the low address bits.
    ///
    /// The left half of a big-endian pair and the right half of a little-endian pair count lanes
    /// from the most significant end; the other two count from the least significant end.
    fn lane_shift(self, side: Side, addr: u32, lane_mask: u32) -> u32 {
        let lane = addr & lane_mask;
        let lane = match (self, side) {
            (Self::Big, Side::Left) | (Self::Little, Side::Right) => lane,
            (Self::Big, Side::Right) | (Self::Little, Side::Left) => lane_mask - lane,
        };

        8 * lane
    }
}

// SPDX-License-Identifier: MPL-2.0

//! The physical memory bus.
//!
//! The CPU never owns memory. Every access that survives address translation is handed to a
//! [`Bus`] implementation supplied by the host, which decodes the physical address and reports
//! failure with [`Error`]. Values cross the bus whole; the bus is responsible for storing them in
//! the byte order the system was built with.

use crate::mem::Endian;

/// The error type returned by `read` and `write` functions.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    /// An access targeted a physical address that no device decodes.
    #[error("unmapped physical address {0:#010x}")]
    UnmappedAddress(u32),
}

/// A physical memory bus.
///
/// Addresses are physical and naturally aligned to the access width; the CPU raises address
/// errors before misaligned accesses reach the bus.
pub trait Bus {
    fn read_8(&mut self, addr: u32) -> Result<u8, Error>;
    fn read_16(&mut self, addr: u32) -> Result<u16, Error>;
    fn read_32(&mut self, addr: u32) -> Result<u32, Error>;
    fn read_64(&mut self, addr: u32) -> Result<u64, Error>;
    fn write_8(&mut self, addr: u32, value: u8) -> Result<(), Error>;
    fn write_16(&mut self, addr: u32, value: u16) -> Result<(), Error>;
    fn write_32(&mut self, addr: u32, value: u32) -> Result<(), Error>;
    fn write_64(&mut self, addr: u32, value: u64) -> Result<(), Error>;
}

/// A flat, mirrored bank of memory.
///
/// Internally, the data contained within this type is boxed so as to avoid stack overflows from
/// large allocations.
pub struct Ram {
    endian: Endian,
    data: Box<[u8]>,
}

macro_rules! def_access {
    ($ty:ty, $read_fn:ident, $write_fn:ident $(,)?) => {
        /// Reads a value at the given byte offset, wrapping around the end of the bank.
        pub fn $read_fn(&self, offset: usize) -> $ty {
            const SIZE: usize = std::mem::size_of::<$ty>();

            let start = offset & (self.data.len() - 1) & !(SIZE - 1);
            let mut bytes = [0; SIZE];
            bytes.copy_from_slice(&self.data[start..(start + SIZE)]);

            match self.endian {
                Endian::Big => <$ty>::from_be_bytes(bytes),
                Endian::Little => <$ty>::from_le_bytes(bytes),
            }
        }

        /// Writes a value at the given byte offset, wrapping around the end of the bank.
        pub fn $write_fn(&mut self, offset: usize, value: $ty) {
            const SIZE: usize = std::mem::size_of::<$ty>();

            let start = offset & (self.data.len() - 1) & !(SIZE - 1);
            let bytes = match self.endian {
                Endian::Big => value.to_be_bytes(),
                Endian::Little => value.to_le_bytes(),
            };
            self.data[start..(start + SIZE)].copy_from_slice(&bytes);
        }
    };
}

impl Ram {
    /// Creates a zero-filled `Ram` of `size` bytes.
    ///
    /// `size` must be a power of two; addresses beyond it wrap around.
    pub fn new(size: usize, endian: Endian) -> Self {
        debug_assert!(size.is_power_of_two(), "RAM size must be a power of two");

        Self {
            endian,
            data: vec![0; size].into_boxed_slice(),
        }
    }

    /// The size, in bytes, of this memory bank.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// The raw contents of this bank, in memory order.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    def_access!(u8, get_8, set_8);
    def_access!(u16, get_16, set_16);
    def_access!(u32, get_32, set_32);
    def_access!(u64, get_64, set_64);
}

impl Bus for Ram {
    fn read_8(&mut self, addr: u32) -> Result<u8, Error> {
        Ok(self.get_8(addr as usize))
    }

    fn read_16(&mut self, addr: u32) -> Result<u16, Error> {
        Ok(self.get_16(addr as usize))
    }

    fn read_32(&mut self, addr: u32) -> Result<u32, Error> {
        Ok(self.get_32(addr as usize))
    }

    fn read_64(&mut self, addr: u32) -> Result<u64, Error> {
        Ok(self.get_64(addr as usize))
    }

    fn write_8(&mut self, addr: u32, value: u8) -> Result<(), Error> {
        self.set_8(addr as usize, value);

        Ok(())
    }

    fn write_16(&mut self, addr: u32, value: u16) -> Result<(), Error> {
        self.set_16(addr as usize, value);

        Ok(())
    }

    fn write_32(&mut self, addr: u32, value: u32) -> Result<(), Error> {
        self.set_32(addr as usize, value);

        Ok(())
    }

    fn write_64(&mut self, addr: u32, value: u64) -> Result<(), Error> {
        self.set_64(addr as usize, value);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_order() {
        let mut big = Ram::new(0x1000, Endian::Big);
        big.set_32(0x10, 0x1122_3344);
        assert_eq!(&big.as_bytes()[0x10..0x14], &[0x11, 0x22, 0x33, 0x44]);
        assert_eq!(big.get_8(0x10), 0x11);
        assert_eq!(big.get_16(0x12), 0x3344);

        let mut little = Ram::new(0x1000, Endian::Little);
        little.set_32(0x10, 0x1122_3344);
        assert_eq!(&little.as_bytes()[0x10..0x14], &[0x44, 0x33, 0x22, 0x11]);
        assert_eq!(little.get_8(0x10), 0x44);
        assert_eq!(little.get_16(0x12), 0x1122);
    }

    #[test]
    fn mirrors() {
        let mut ram = Ram::new(0x1000, Endian::Big);
        for _ in 0..64 {
            let offset = (rand::random::<usize>() & 0xff8) as u32;
            let value: u64 = rand::random();
            ram.write_64(offset | 0x1fc0_0000, value).unwrap();
            assert_eq!(ram.read_64(offset).unwrap(), value);
        }
    }
}

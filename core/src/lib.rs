// SPDX-License-Identifier: MPL-2.0

//! A minimal board around the `r4k-cpu` interpreter: RAM, a boot ROM, and save states.

pub mod log;

use r4k_cpu::{bus, mem::Endian, Bus};
use thiserror::Error;

pub use r4k_cpu::{Config, ConfigError, ContextError, Cpu, Reset, State};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error("image of {len:#x} bytes does not fit in the {capacity:#x}-byte boot ROM")]
    RomTooLarge { len: usize, capacity: usize },
}

/// One processor and the board it sits on.
pub struct Core {
    cpu_state: State,
    board: Board,
}

impl Core {
    pub fn new(config: Config, reset: Reset) -> Result<Self, Error> {
        let mut cpu_state = State::new(config)?;
        cpu_state.reset(reset)?;
        let board = Board::new(cpu_state.endian());

        Ok(Self { cpu_state, board })
    }

    pub fn cpu(&mut self) -> Cpu<'_, '_, Board> {
        self.cpu_state.connect_bus(&mut self.board)
    }

    pub fn state(&self) -> &State {
        &self.cpu_state
    }

    pub fn state_mut(&mut self) -> &mut State {
        &mut self.cpu_state
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut Board {
        &mut self.board
    }

    /// Copies a raw image, already in the board's byte order, to the start of the boot ROM.
    pub fn load_rom(&mut self, image: &[u8]) -> Result<(), Error> {
        let rom = self.board.rom.as_bytes_mut();
        if image.len() > rom.len() {
            return Err(Error::RomTooLarge {
                len: image.len(),
                capacity: rom.len(),
            });
        }
        rom[..image.len()].copy_from_slice(image);
        tracing::info!("Loaded {:#x} bytes into the boot ROM", image.len());

        Ok(())
    }

    pub fn execute(&mut self, cycles: i32) -> i32 {
        self.cpu().execute(cycles)
    }

    pub fn set_irq_line(&mut self, line: u8, asserted: bool) {
        self.cpu_state.set_irq_line(line, asserted);
    }

    /// Captures the processor state. Memory contents are not included.
    pub fn save_state(&self) -> Result<Vec<u8>, Error> {
        Ok(self.cpu_state.get_context()?)
    }

    pub fn load_state(&mut self, blob: &[u8]) -> Result<(), Error> {
        self.cpu_state.set_context(blob)?;

        Ok(())
    }
}

/// The physical address map: RAM from zero and the boot ROM at the reset vector.
pub struct Board {
    pub ram: bus::Ram,
    pub rom: bus::Ram,
}

impl Board {
    pub const RAM_SIZE: usize = 8 * 1024 * 1024;
    const RAM_END: u32 = Self::RAM_SIZE as u32 - 1;
    pub const ROM_BASE: u32 = 0x1fc0_0000;
    pub const ROM_SIZE: usize = 4 * 1024 * 1024;
    const ROM_END: u32 = Self::ROM_BASE + (Self::ROM_SIZE as u32 - 1);

    pub fn new(endian: Endian) -> Self {
        Self {
            ram: bus::Ram::new(Self::RAM_SIZE, endian),
            rom: bus::Ram::new(Self::ROM_SIZE, endian),
        }
    }

    /// Selects the bank decoding a physical address and the offset into it.
    ///
    /// The flag is whether the bank accepts writes.
    fn select_bank(&mut self, addr: u32) -> Result<(&mut bus::Ram, usize, bool), bus::Error> {
        match addr {
            0..=Self::RAM_END => Ok((&mut self.ram, addr as usize, true)),
            Self::ROM_BASE..=Self::ROM_END => {
                Ok((&mut self.rom, (addr - Self::ROM_BASE) as usize, false))
            }
            _ => Err(bus::Error::UnmappedAddress(addr)),
        }
    }
}

macro_rules! def_bus_access {
    (
        fn $read_fn:ident, $write_fn:ident($ty:ty) = $get_fn:ident, $set_fn:ident
    ) => {
        fn $read_fn(&mut self, addr: u32) -> Result<$ty, bus::Error> {
            let (bank, offset, _) = self.select_bank(addr)?;

            Ok(bank.$get_fn(offset))
        }

        fn $write_fn(&mut self, addr: u32, value: $ty) -> Result<(), bus::Error> {
            let (bank, offset, writable) = self.select_bank(addr)?;
            if writable {
                bank.$set_fn(offset, value);
            } else {
                tracing::debug!("Dropped write to ROM at {:#010x}", addr);
            }

            Ok(())
        }
    };
}

impl Bus for Board {
    def_bus_access! { fn read_8, write_8(u8) = get_8, set_8 }
    def_bus_access! { fn read_16, write_16(u16) = get_16, set_16 }
    def_bus_access! { fn read_32, write_32(u32) = get_32, set_32 }
    def_bus_access! { fn read_64, write_64(u64) = get_64, set_64 }
}

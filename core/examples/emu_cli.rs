// SPDX-License-Identifier: MPL-2.0

//! Boots a raw big-endian ROM image and dumps the register file after every quantum.
//!
//! Usage: `emu_cli <image> [quanta]`

use std::error::Error;

const QUANTUM: i32 = 100_000;

fn main() -> Result<(), Box<dyn Error>> {
    r4k::log::init();

    let mut args = std::env::args().skip(1);
    let rom_filepath = args.next().ok_or("expected ROM filepath")?;
    let quanta: u32 = match args.next() {
        Some(it) => it.parse()?,
        None => 10,
    };
    let rom = std::fs::read(rom_filepath)?;

    let mut core = r4k::Core::new(r4k::Config::default(), r4k::Reset::default())?;
    core.load_rom(&rom)?;

    for quantum in 0..quanta {
        let ran = core.execute(QUANTUM);
        println!("quantum {} ({} cycles), pc {:#010x}", quantum, ran, core.state().pc());
        println!("{}", core.state().reg);
    }

    Ok(())
}

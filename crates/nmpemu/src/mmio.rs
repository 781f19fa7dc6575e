//! Memory-Mapped I/O (MMIO) handling for the cartridge bus.
//!
//! The music player exposes its registers in the Game Pak SRAM window. The
//! bus is 8 bits wide, so every access is a single byte.
//!
//! # Memory Map
//! - `0x0E000000-0x0E000008`: NMP registers (CNT, PARAMETER, DATA_IN, DATA_OUT)
//! - everything else: open bus

use nmp_hw::mmio::nmp as nmp_regs;
use tracing::instrument;

pub mod generic;
pub mod nmp;

pub use nmp::{NmpSettings, NmpState, OpState};

/// Emulator state reachable from the bus handlers and the main loop
#[derive(Debug)]
pub struct EmulatorState {
    pub nmp: NmpState,
}

impl EmulatorState {
    pub fn new(nmp: NmpState) -> Self {
        Self { nmp }
    }
}

/// Bus read of one byte
#[instrument(level = "trace", skip(state))]
pub fn read_handler(state: &mut EmulatorState, addr: u32) -> u8 {
    if (nmp_regs::BASE..nmp_regs::END).contains(&addr) {
        state.nmp.read(addr - nmp_regs::BASE)
    } else {
        generic::read_handler(addr)
    }
}

/// Bus write of one byte
#[instrument(level = "trace", skip(state))]
pub fn write_handler(state: &mut EmulatorState, addr: u32, value: u8) {
    if (nmp_regs::BASE..nmp_regs::END).contains(&addr) {
        state.nmp.write(addr - nmp_regs::BASE, value);
    } else {
        generic::write_handler(addr, value);
    }
}

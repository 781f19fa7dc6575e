//! Open-bus handler for cartridge addresses outside the register window.
//!
//! Reads return zero and writes are dropped.

use tracing::{instrument, trace};

/// Generic bus read handler - returns zero
#[instrument(level = "trace")]
pub fn read_handler(addr: u32) -> u8 {
    trace!("Open bus read: addr={:#X}", addr);
    0
}

/// Generic bus write handler - ignores writes
#[instrument(level = "trace")]
pub fn write_handler(addr: u32, value: u8) {
    trace!("Open bus write: addr={:#X}, value={:#04X}", addr, value);
}

//! Hardware facts for the Nintendo MP3 Player cartridge.
//!
//! Addresses, register offsets, protocol symbols and timing constants only.
//! Nothing in this crate has behavior.

pub mod memory_map;
pub mod mmio;
pub mod specs;

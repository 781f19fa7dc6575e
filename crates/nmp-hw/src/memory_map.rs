//! # References
//! - <https://problemkaputt.de/gbatek.htm#gbamemorymap>

/// Game Pak SRAM window. The cartridge data bus is 8 bits wide here, which is
/// why every device register is accessed one byte at a time.
pub mod cart_sram {
    /// SRAM window base address
    pub const BASE: u32 = 0x0E00_0000;
    /// SRAM window size (64 KB)
    pub const SIZE: usize = 64 * 1024;
}

/// Game Pak ROM space, the largest region a firmware image can address
pub mod cart_rom {
    /// ROM base address (wait state 0)
    pub const BASE: u32 = 0x0800_0000;
    /// ROM size (32 MB)
    pub const SIZE: usize = 32 * 1024 * 1024;
}

/// Interrupt controller bits raised by the cartridge
pub mod interrupt {
    /// Game Pak interrupt bit in REG_IF / REG_IE
    pub const GAME_PAK: u16 = 1 << 13;
}

//! Nintendo MP3 Player register window and command protocol symbols.
//!
//! # References
//! - GBATEK, "GBA Cart Music Player" (Play-Yan / Nintendo MP3 Player)

use crate::memory_map::cart_sram;

/// NMP register window base address
pub const BASE: u32 = cart_sram::BASE;

/// NMP register window end address (exclusive)
pub const END: u32 = BASE + 0x08;

/// NMP register offsets (relative to `BASE`).
///
/// Each register is 16 bits wide and written one byte at a time. The byte at
/// the even offset is the HIGH half, the byte at `+1` is the LOW half, and the
/// low-half write is what commits the value.
pub mod registers {
    /// Device control register (access mode)
    pub const CNT: u32 = 0x000;

    /// Device parameter register (access parameter / address)
    pub const PARAMETER: u32 = 0x002;

    /// Data input register (firmware bytes, command stream)
    pub const DATA_IN: u32 = 0x004;

    /// Data output register (status bytes, card data)
    pub const DATA_OUT: u32 = 0x006;
}

/// Values latched into the control register
pub mod access_mode {
    /// Parameter writes address the device (status or data block access)
    pub const ACCESS: u16 = 0x0000;

    /// Terminate the command stream and execute the command
    pub const EXECUTE: u16 = 0x0404;

    /// Firmware loaded, request the boot interrupt
    pub const BOOT: u16 = 0x0808;

    /// Next parameter value is the high half of a 32-bit parameter
    pub const PARAM_HIGH: u16 = 0x1010;
}

/// Values written to the parameter register while in `access_mode::ACCESS`
pub mod access_param {
    /// Cartridge status word (boot handshake, then last command status)
    pub const CART_STATUS: u32 = 0x100;

    /// Begin a command stream / acknowledge a finished command
    pub const COMMAND: u32 = 0x10F;

    /// I/O busy flag
    pub const BUSY: u32 = 0x110;

    /// Tag data block access id (forced by GET_ID3_DATA)
    pub const TAG_BLOCK: u32 = 0x101;

    /// Audio stream access id (reported by UPDATE_AUDIO)
    pub const AUDIO_BLOCK: u32 = 0x202;
}

/// Command opcodes, the first 16 bits of a command stream (big endian)
pub mod opcode {
    pub const START_FILE_LIST: u16 = 0x0010;
    pub const CONTINUE_FILE_LIST: u16 = 0x0011;
    pub const SET_DIR: u16 = 0x0020;
    pub const GET_ID3_DATA: u16 = 0x0040;
    pub const PLAY_MUSIC: u16 = 0x0050;
    pub const STOP_MUSIC: u16 = 0x0051;
    pub const PAUSE: u16 = 0x0052;
    pub const RESUME: u16 = 0x0053;
    pub const SEEK: u16 = 0x0060;
    pub const SET_VOLUME: u16 = 0x0080;
    pub const PLAY_SFX: u16 = 0x0200;
    pub const CHECK_FIRMWARE_FILE: u16 = 0x0300;
    pub const READ_FIRMWARE_FILE: u16 = 0x0303;
    pub const CLOSE_FIRMWARE_FILE: u16 = 0x0304;
    pub const SLEEP: u16 = 0x0500;
    pub const WAKE: u16 = 0x0501;
    pub const INIT: u16 = 0x8001;
    pub const UPDATE_AUDIO: u16 = 0x8100;
    pub const HEADPHONE_STATUS: u16 = 0x8600;
}

/// Tags OR'd into an opcode to form its completion status word
pub mod status_tag {
    /// Command completed, poll for result
    pub const COMPLETE: u16 = 0x4000;

    /// Sleep / wake acknowledged
    pub const POWER: u16 = 0x8000;
}

/// Command stream layout
pub mod stream {
    /// First byte of the name argument (every other byte from here on)
    pub const NAME_START: usize = 3;

    /// Stride between name characters
    pub const NAME_STRIDE: usize = 2;

    /// Leading marker values skipped at `NAME_START`
    pub const NAME_MARKERS: [u8; 2] = [0x01, 0x02];

    /// Index of the single-byte argument of SEEK / SET_VOLUME
    pub const BYTE_ARG: usize = 3;
}

/// Size of the status buffer read back after each protocol step
pub const STATUS_SIZE: usize = 16;

/// File / folder listing block
pub mod list_block {
    /// Total block size in bytes
    pub const SIZE: usize = 528;

    /// First byte of the name (2 bytes per character)
    pub const NAME_OFFSET: usize = 2;

    /// Longest name rendered
    pub const NAME_MAX: usize = 255;

    /// Offset of the folder / file flag
    pub const KIND_OFFSET: usize = 525;

    /// Kind value for folders (also the sort tag)
    pub const FOLDER: u8 = 0x01;

    /// Kind value for files (also the sort tag)
    pub const FILE: u8 = 0x02;
}

/// ID3 tag block
pub mod tag_block {
    /// Total block size in bytes
    pub const SIZE: usize = 272;

    /// First byte of the title
    pub const TITLE_OFFSET: usize = 4;

    /// Longest title rendered
    pub const TITLE_MAX: usize = 66;

    /// First byte of the artist
    pub const ARTIST_OFFSET: usize = 136;

    /// Longest artist rendered
    pub const ARTIST_MAX: usize = 68;
}

/// Offsets into the status buffer used by command replies
pub mod status_field {
    /// List complete flag (bytes 2-3) / audio chunk size (bytes 2-3)
    pub const WORD1: usize = 2;

    /// Audio stream access id (bytes 4-5)
    pub const ACCESS_ID: usize = 4;

    /// Tag block access id (bytes 6-7)
    pub const TAG_ACCESS_ID: usize = 6;

    /// Trackbar position, 0-99
    pub const PROGRESS: usize = 8;

    /// Elapsed seconds, big endian (bytes 12-13)
    pub const TIMESTAMP: usize = 12;
}

/// Audio path specifications
pub mod audio {
    /// Fixed pseudo-rate of the speaker path, in samples per second
    pub const SPEAKER_RATE: u32 = 16384;

    /// Audio chunk size in bytes (max 0x480, must be a multiple of 16)
    pub const CHUNK_SIZE: usize = 0x480;

    /// Trailing bytes appended to every audio chunk
    pub const CHUNK_PADDING: usize = 2;

    /// Highest volume the device accepts
    pub const DEVICE_VOLUME_MAX: u8 = 46;

    /// Highest volume of the host output line
    pub const OUTPUT_VOLUME_MAX: u8 = 63;
}

/// Interrupt timing, in scheduler ticks (one tick per video frame, 60 Hz)
pub mod timing {
    /// Delay between the boot request and the boot-complete interrupt
    pub const BOOT_IRQ_DELAY: u32 = 30;

    /// Delay before the first trackbar update of a headphone track
    pub const HEADPHONE_START_DELAY: u32 = 10;

    /// Trackbar update cadence on the headphone path (once a second)
    pub const HEADPHONE_UPDATE_DELAY: u32 = 60;

    /// Delay between audio chunks on the speaker path
    pub const STREAM_UPDATE_DELAY: u32 = 1;

    /// Delay before a completed track is stopped
    pub const END_OF_TRACK_DELAY: u32 = 1;

    /// Delay of the update forced after switching to headphones
    pub const HEADPHONE_SWITCH_DELAY: u32 = 1;

    /// Tick counter increment per command poll, roughly the device's ~60 Hz update
    pub const POLL_TICKS: u16 = 6;

    /// Number of cartridge status polls answered with boot data
    pub const INIT_POLLS: u8 = 4;

    /// Init poll on which the boot handshake raises the interrupt
    pub const INIT_IRQ_POLL: u8 = 2;

    /// Scheduler ticks per second
    pub const TICKS_PER_SECOND: u32 = 60;
}

/// Fallback track length (seconds) when a track cannot be loaded
pub const FALLBACK_TRACK_LENGTH: u32 = 2;

/// Firmware passthrough buffer size (full cartridge address space)
pub const FIRMWARE_SIZE: usize = crate::memory_map::cart_rom::SIZE;

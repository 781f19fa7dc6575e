//! Register-level driver performing the guest firmware's access sequences.
//!
//! Everything here goes through [`EmulatorCore::write8`] / [`EmulatorCore::read8`]
//! exactly like the player software running on the console would: the driver
//! decides everything from status bytes and never reads device state, except
//! for the host audio mixer on the headphone path which lives outside the
//! guest anyway.

use crate::core::EmulatorCore;
use crate::error::{NmpError, Result};
use crate::library::TrackTags;
use crate::mmio::nmp::card;
use crate::mmio::nmp::navigation::EntryKind;
use crate::audio;
use nmp_hw::mmio::nmp::{
    BASE, STATUS_SIZE, access_mode, access_param, list_block, opcode, registers, status_field,
    status_tag, tag_block,
};
use nmp_hw::specs::timing;
use tracing::{debug, trace, warn};

/// Interrupts handled per tick before giving up
const MAX_IRQS_PER_TICK: usize = 8;

/// Status word and reply bytes of a finished command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandReply {
    /// Completion status from the cartridge status access
    pub status: u16,
    /// Status buffer read right after the command executed
    pub data: [u8; STATUS_SIZE],
}

impl CommandReply {
    pub fn word(&self, offset: usize) -> u16 {
        u16::from_be_bytes([self.data[offset], self.data[offset + 1]])
    }
}

/// Speaker chunk channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Left,
    Right,
}

/// Something the guest observed while playing
#[derive(Debug, Clone, PartialEq)]
pub enum AudioEvent {
    /// Dithered 8-bit chunk for the console speaker
    Chunk { channel: Channel, samples: Vec<i8> },
    /// 16-bit frames rendered by the cartridge headphone output
    Pcm {
        frequency: u32,
        channels: u16,
        samples: Vec<i16>,
    },
    /// Trackbar update
    Progress { percent: u8, elapsed_secs: u16 },
    /// The track ended
    Finished,
}

/// Register-level protocol driver
#[derive(Debug)]
pub struct GuestDriver<'a> {
    core: &'a mut EmulatorCore,
    /// Channel of the next speaker chunk
    next_channel: Channel,
}

impl<'a> GuestDriver<'a> {
    pub fn new(core: &'a mut EmulatorCore) -> Self {
        Self {
            core,
            next_channel: Channel::Left,
        }
    }

    pub fn core(&mut self) -> &mut EmulatorCore {
        self.core
    }

    // ========================================================================
    // Register primitives
    // ========================================================================

    /// Write a 16-bit register, high byte first
    fn write_reg(&mut self, reg: u32, value: u16) {
        self.core.write8(BASE + reg, (value >> 8) as u8);
        self.core.write8(BASE + reg + 1, value as u8);
    }

    fn write_data(&mut self, bytes: &[u8]) {
        for (i, &byte) in bytes.iter().enumerate() {
            self.core
                .write8(BASE + registers::DATA_IN + (i as u32 & 1), byte);
        }
    }

    fn read_data(&mut self, len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| self.core.read8(BASE + registers::DATA_OUT + (i as u32 & 1)))
            .collect()
    }

    /// Latch an access parameter in mode ACCESS, going through PARAM_HIGH
    /// for parameters wider than 16 bits
    pub fn access(&mut self, param: u32) {
        if param > 0xFFFF {
            self.write_reg(registers::CNT, access_mode::PARAM_HIGH);
            self.write_reg(registers::PARAMETER, (param >> 16) as u16);
        }
        self.write_reg(registers::CNT, access_mode::ACCESS);
        self.write_reg(registers::PARAMETER, param as u16);
    }

    pub fn read_status(&mut self) -> [u8; STATUS_SIZE] {
        let mut status = [0; STATUS_SIZE];
        status.copy_from_slice(&self.read_data(STATUS_SIZE));
        status
    }

    /// Cartridge status word
    pub fn cart_status(&mut self) -> u16 {
        self.access(access_param::CART_STATUS);
        let bytes = self.read_data(2);
        u16::from_be_bytes([bytes[0], bytes[1]])
    }

    /// Data block access
    pub fn read_block(&mut self, param: u32, len: usize) -> Vec<u8> {
        self.access(param);
        self.read_data(len)
    }

    /// Upload bytes to the firmware buffer at `addr` (even)
    pub fn upload_firmware(&mut self, addr: u32, data: &[u8]) {
        self.access(addr >> 1);
        self.write_data(data);
    }

    // ========================================================================
    // Protocol sequences
    // ========================================================================

    /// Request the boot interrupt, wait for it and run the init handshake.
    /// Returns the handshake status words.
    pub fn boot(&mut self) -> Result<[u16; 4]> {
        self.write_reg(registers::CNT, access_mode::BOOT);

        let mut waited = 0;
        while !self.core.acknowledge_irq() {
            if waited > timing::BOOT_IRQ_DELAY * 2 {
                return Err(NmpError::Protocol("no boot interrupt".to_string()));
            }
            self.core.tick();
            waited += 1;
        }
        debug!("Boot interrupt after {} ticks", waited);

        let mut words = [0; 4];
        for word in words.iter_mut() {
            *word = self.cart_status();
        }
        if !self.core.acknowledge_irq() {
            return Err(NmpError::Protocol(
                "no interrupt during init handshake".to_string(),
            ));
        }
        Ok(words)
    }

    /// Submit a command and collect its reply
    pub fn command(&mut self, op: u16, args: &[u8]) -> CommandReply {
        self.access(access_param::COMMAND);
        self.write_data(&op.to_be_bytes());
        self.write_data(args);
        self.write_reg(registers::CNT, access_mode::EXECUTE);
        let data = self.read_status();

        // Acknowledge: a valid command raises the interrupt here
        self.access(access_param::COMMAND);
        self.core.acknowledge_irq();

        let status = self.cart_status();
        trace!("Command {:#06X} -> status {:#06X}", op, status);
        CommandReply { status, data }
    }

    /// List the current directory
    pub fn list_dir(&mut self) -> Vec<(String, EntryKind)> {
        let mut entries = Vec::new();
        let mut reply = self.command(opcode::START_FILE_LIST, &[]);

        while reply.word(status_field::WORD1) != 1 {
            let block = self.read_block(0, list_block::SIZE);
            match card::parse_list_block(&block) {
                Some(entry) => entries.push(entry),
                None => warn!("Empty listing block"),
            }
            reply = self.command(opcode::CONTINUE_FILE_LIST, &[]);
        }

        entries
    }

    /// Enter a folder, or the parent with `".."`
    pub fn change_dir(&mut self, name: &str) -> CommandReply {
        self.command(opcode::SET_DIR, &encode_name(name))
    }

    /// Walk into a '/'-separated folder path below the current directory
    pub fn enter_path(&mut self, path: &str) {
        for part in path.split('/').filter(|p| !p.is_empty()) {
            self.change_dir(part);
        }
    }

    pub fn tags(&mut self, file: &str) -> TrackTags {
        let reply = self.command(opcode::GET_ID3_DATA, &encode_name(file));
        let block = self.read_block(reply.word(status_field::TAG_ACCESS_ID) as u32, tag_block::SIZE);
        let (title, artist) = card::parse_tag_block(&block);
        TrackTags { title, artist }
    }

    pub fn play(&mut self, file: &str) -> CommandReply {
        self.next_channel = Channel::Left;
        self.command(opcode::PLAY_MUSIC, &encode_name(file))
    }

    pub fn play_sfx(&mut self) -> CommandReply {
        self.next_channel = Channel::Left;
        self.command(opcode::PLAY_SFX, &[])
    }

    pub fn stop(&mut self) -> CommandReply {
        self.command(opcode::STOP_MUSIC, &[])
    }

    pub fn pause(&mut self) -> CommandReply {
        self.command(opcode::PAUSE, &[])
    }

    pub fn resume(&mut self) -> CommandReply {
        self.command(opcode::RESUME, &[])
    }

    pub fn set_volume(&mut self, volume: u8) -> CommandReply {
        self.command(opcode::SET_VOLUME, &[0x00, volume])
    }

    pub fn seek(&mut self, position: u8) -> CommandReply {
        self.command(opcode::SEEK, &[0x00, position])
    }

    pub fn toggle_headphones(&mut self) -> CommandReply {
        self.command(opcode::HEADPHONE_STATUS, &[])
    }

    // ========================================================================
    // Audio pump
    // ========================================================================

    /// Status word and reply of an interrupt-driven command
    fn interrupt_reply(&mut self) -> (u16, [u8; STATUS_SIZE]) {
        // Leave the data phase so that DATA_OUT returns status again
        self.access(access_param::BUSY);
        self.access(access_param::CART_STATUS);
        let data = self.read_status();
        (u16::from_be_bytes([data[0], data[1]]), data)
    }

    /// Handle one interrupt. Returns `false` once playback is over.
    fn handle_interrupt(&mut self, sink: &mut impl FnMut(AudioEvent)) -> bool {
        let (status, data) = self.interrupt_reply();

        if status == opcode::STOP_MUSIC | status_tag::COMPLETE {
            debug!("Track finished");
            sink(AudioEvent::Finished);
            return false;
        }
        if status != opcode::UPDATE_AUDIO {
            trace!("Ignoring interrupt with status {:#06X}", status);
            return true;
        }

        let word1 = u16::from_be_bytes([data[status_field::WORD1], data[status_field::WORD1 + 1]]);
        let access_id = u16::from_be_bytes([
            data[status_field::ACCESS_ID],
            data[status_field::ACCESS_ID + 1],
        ]);

        if access_id as u32 == access_param::AUDIO_BLOCK && word1 != 0 {
            let chunk = self.read_block(access_param::AUDIO_BLOCK, word1 as usize + 2);
            let channel = self.next_channel;
            self.next_channel = match channel {
                Channel::Left => Channel::Right,
                Channel::Right => Channel::Left,
            };
            sink(AudioEvent::Chunk {
                channel,
                samples: audio::decode_chunk(&chunk, 0),
            });
            true
        } else {
            let elapsed_secs = u16::from_be_bytes([
                data[status_field::TIMESTAMP],
                data[status_field::TIMESTAMP + 1],
            ]);
            self.next_channel = Channel::Left;
            sink(AudioEvent::Progress {
                percent: data[status_field::PROGRESS],
                elapsed_secs,
            });
            true
        }
    }

    /// Mix one tick of the host line on the headphone path
    fn render_headphones(&mut self, sink: &mut impl FnMut(AudioEvent)) {
        let ext = &mut self.core.nmp_mut().ext_audio;
        if !ext.use_headphones || !ext.playing || ext.channels == 0 {
            return;
        }

        let frames = (ext.frequency / timing::TICKS_PER_SECOND) as usize;
        let mut samples = vec![0i16; frames * ext.channels as usize];
        ext.render(&mut samples);
        sink(AudioEvent::Pcm {
            frequency: ext.frequency,
            channels: ext.channels,
            samples,
        });
    }

    /// Run the clock for up to `ticks` ticks, servicing interrupts the way the
    /// player does. Stops early when the track finishes or the core reaches
    /// its tick limit. Returns the number of ticks run.
    pub fn pump_audio(&mut self, ticks: u64, mut sink: impl FnMut(AudioEvent)) -> u64 {
        for tick in 0..ticks {
            if self.core.should_stop() {
                debug!("Tick limit reached at tick {}", self.core.total_ticks());
                return tick;
            }
            self.core.tick();
            self.render_headphones(&mut sink);

            for _ in 0..MAX_IRQS_PER_TICK {
                if !self.core.acknowledge_irq() {
                    break;
                }
                if !self.handle_interrupt(&mut sink) {
                    return tick + 1;
                }
            }
        }
        ticks
    }
}

/// Encode a name argument: marker, then one 16-bit character per byte, then
/// a terminator
pub fn encode_name(name: &str) -> Vec<u8> {
    let mut args = vec![0x00, 0x01];
    for byte in name.bytes() {
        args.extend_from_slice(&[0x00, byte]);
    }
    args.extend_from_slice(&[0x00, 0x00]);
    args
}

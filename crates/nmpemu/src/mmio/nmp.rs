//! Nintendo MP3 Player register handling.
//!
//! This module implements the cartridge's 8-bit register interface. The guest
//! drives the device with four 16-bit registers, each written one byte at a
//! time (high byte first, the low byte commits):
//!
//! - `CNT` latches the access mode. Committing `BOOT` starts the boot
//!   sequence, committing `EXECUTE` runs the assembled command.
//! - `PARAMETER` latches the access parameter. Committing it in mode `ACCESS`
//!   performs a status access or a data block access.
//! - `DATA_IN` receives firmware bytes or the command stream.
//! - `DATA_OUT` returns status bytes or the current data block.
//!
//! # References
//! - GBATEK, "GBA Cart Music Player"

pub mod card;
pub mod command;
pub mod navigation;

use crate::audio::{self, ExtAudio, Playback};
use crate::library::{MediaLibrary, TrackTags};
use crate::scheduler::IrqIntent;
use command::{Command, SeekState};
use navigation::Navigation;
use nmp_hw::mmio::nmp::{STATUS_SIZE, access_mode, access_param, opcode, registers};
use nmp_hw::specs::{self, audio::CHUNK_PADDING, timing};
use tracing::{debug, trace, warn};

/// NMP register offsets, split into their byte halves
mod reg {
    use super::registers;

    pub const CNT_HI: u32 = registers::CNT;
    pub const CNT_LO: u32 = registers::CNT + 1;
    pub const PARAM_HI: u32 = registers::PARAMETER;
    pub const PARAM_LO: u32 = registers::PARAMETER + 1;
    pub const DATA_IN_HI: u32 = registers::DATA_IN;
    pub const DATA_IN_LO: u32 = registers::DATA_IN + 1;
    pub const DATA_OUT_HI: u32 = registers::DATA_OUT;
    pub const DATA_OUT_LO: u32 = registers::DATA_OUT + 1;
}

/// Protocol phase, decides how DATA_IN / DATA_OUT are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpState {
    Init,
    BootSequence,
    Wait,
    ProcessCmd,
    GetSdData,
}

/// Host-side settings of the device
#[derive(Debug, Clone)]
pub struct NmpSettings {
    /// Virtual path of the menu sound effect
    pub sfx_path: String,
    /// Extension of the files listed as music
    pub music_extension: String,
    /// Initial output routing
    pub headphones: bool,
    /// Status words returned during the boot handshake
    pub boot_data: [u16; 2],
}

impl Default for NmpSettings {
    fn default() -> Self {
        Self {
            sfx_path: "play_yan/sfx.wav".to_string(),
            music_extension: ".mp3".to_string(),
            headphones: false,
            boot_data: [0x0808, 0x0909],
        }
    }
}

/// NMP state tracking registers, protocol and playback
#[derive(Debug)]
pub struct NmpState {
    // ========================================================================
    // REGISTER STATE
    // ========================================================================
    /// Latched control register
    pub access_mode: u16,
    /// Latched parameter register (upper half set through `PARAM_HIGH`)
    pub access_param: u32,
    pub op_state: OpState,

    // ========================================================================
    // COMMAND STATE
    // ========================================================================
    /// Current / last opcode
    pub cmd: u16,
    /// Completion status reported by the cartridge status access
    pub cmd_status: u16,
    /// A finished command still owes its interrupt
    pub valid_command: bool,
    /// Free-running counter reported by the command poll
    pub ticks: u16,
    /// Device volume, 0-46
    pub volume: u8,

    pub nav: Navigation,
    pub tags: TrackTags,
    pub playback: Playback,
    pub seek: SeekState,
    pub irq: IrqIntent,
    pub ext_audio: ExtAudio,

    // ========================================================================
    // INTERNAL STATE
    // ========================================================================
    /// Bytes received since the last command poll
    command_stream: Vec<u8>,

    /// Reply of the last protocol step
    status_data: [u8; STATUS_SIZE],

    /// Data block of the last data access
    card_data: Vec<u8>,

    /// Read cursor shared by status and card data
    data_index: usize,

    /// Firmware passthrough buffer and its write cursor
    firmware: Vec<u8>,
    firmware_addr: u32,

    /// Boot handshake progress
    init_stage: u8,

    settings: NmpSettings,
    library: Box<dyn MediaLibrary>,
}

impl NmpState {
    pub fn new(library: Box<dyn MediaLibrary>, settings: NmpSettings) -> Self {
        Self {
            access_mode: 0,
            access_param: 0,
            op_state: OpState::Init,

            cmd: 0,
            cmd_status: 0,
            valid_command: false,
            ticks: 0,
            volume: 0,

            nav: Navigation::default(),
            tags: TrackTags::default(),
            playback: Playback::default(),
            seek: SeekState::default(),
            irq: IrqIntent::default(),
            ext_audio: ExtAudio::new(settings.headphones),

            command_stream: Vec::new(),
            status_data: [0; STATUS_SIZE],
            card_data: Vec::new(),
            data_index: 0,
            firmware: Vec::new(),
            firmware_addr: 0,
            init_stage: 0,

            settings,
            library,
        }
    }

    pub fn status_data(&self) -> &[u8; STATUS_SIZE] {
        &self.status_data
    }

    pub fn card_data(&self) -> &[u8] {
        &self.card_data
    }

    pub fn command_stream(&self) -> &[u8] {
        &self.command_stream
    }

    pub fn firmware(&self) -> &[u8] {
        &self.firmware
    }

    pub fn firmware_addr(&self) -> u32 {
        self.firmware_addr
    }

    pub fn settings(&self) -> &NmpSettings {
        &self.settings
    }

    /// Handle a write to an NMP register byte
    pub fn write(&mut self, offset: u32, value: u8) {
        trace!("NMP register write: offset={:#X}, value={:#04X}", offset, value);

        match offset {
            reg::CNT_HI => {
                self.access_mode = (self.access_mode & 0x00FF) | ((value as u16) << 8);
            }
            reg::CNT_LO => {
                self.access_mode = (self.access_mode & 0xFF00) | value as u16;
                self.commit_access_mode();
            }
            reg::PARAM_HI => {
                self.access_param = (self.access_param & !0xFF00) | ((value as u32) << 8);
            }
            reg::PARAM_LO => {
                self.access_param = (self.access_param & !0x00FF) | value as u32;
                self.commit_access_param();
            }
            reg::DATA_IN_HI | reg::DATA_IN_LO => self.write_data_in(value),
            reg::DATA_OUT_HI | reg::DATA_OUT_LO => {
                trace!("Ignoring write to DATA_OUT: {:#04X}", value);
            }
            _ => {
                warn!(
                    "Unknown NMP register write: offset={:#X}, value={:#04X}",
                    offset, value
                );
            }
        }
    }

    /// Handle a read from an NMP register byte
    pub fn read(&mut self, offset: u32) -> u8 {
        let value = match offset {
            reg::DATA_OUT_HI | reg::DATA_OUT_LO => self.read_data_out(),
            reg::CNT_HI..=reg::DATA_IN_LO => 0,
            _ => {
                warn!("Unknown NMP register read: offset={:#X}", offset);
                0
            }
        };
        trace!("NMP register read: offset={:#X} -> {:#04X}", offset, value);
        value
    }

    // ========================================================================
    // Register Interface / Command Assembler
    // ========================================================================

    fn commit_access_mode(&mut self) {
        match (self.access_mode, self.op_state) {
            (access_mode::BOOT, OpState::Init) => {
                debug!("NMP firmware loaded, boot interrupt in {} ticks", timing::BOOT_IRQ_DELAY);
                self.irq.schedule(timing::BOOT_IRQ_DELAY);
                self.op_state = OpState::BootSequence;
            }
            (access_mode::EXECUTE, OpState::ProcessCmd) => self.execute_command(),
            _ => {}
        }
    }

    fn commit_access_param(&mut self) {
        match self.access_mode {
            access_mode::PARAM_HIGH => self.access_param <<= 16,
            access_mode::ACCESS => self.access(),
            _ => {}
        }
    }

    fn write_data_in(&mut self, value: u8) {
        if self.firmware_addr != 0 {
            let addr = self.firmware_addr as usize;
            if addr < specs::FIRMWARE_SIZE {
                if addr >= self.firmware.len() {
                    self.firmware.resize(addr + 1, 0);
                }
                self.firmware[addr] = value;
            } else {
                warn!("NMP firmware write out of range: addr={:#X}", addr);
            }
            self.firmware_addr = self.firmware_addr.wrapping_add(1);
        } else if self.op_state == OpState::ProcessCmd {
            self.command_stream.push(value);
        }
    }

    fn read_data_out(&mut self) -> u8 {
        let source: &[u8] = if self.op_state == OpState::GetSdData {
            &self.card_data
        } else {
            &self.status_data
        };

        match source.get(self.data_index) {
            Some(&value) => {
                self.data_index += 1;
                value
            }
            None => 0,
        }
    }

    /// Terminate command input and dispatch the opcode it carries
    fn execute_command(&mut self) {
        if self.command_stream.len() < 2 {
            trace!("EXECUTE with {} stream bytes, ignored", self.command_stream.len());
            return;
        }
        if self.command_stream.len() % 2 != 0 {
            warn!(
                "NMP command stream has odd length {}",
                self.command_stream.len()
            );
        }
        self.cmd = u16::from_be_bytes([self.command_stream[0], self.command_stream[1]]);
        self.dispatch(self.cmd);
    }

    // ========================================================================
    // Virtual SD Responder
    // ========================================================================

    /// Whether an access parameter addresses a data block instead of status
    fn is_data_access(&self, param: u32) -> bool {
        param == 0
            || param == access_param::TAG_BLOCK
            || param == access_param::AUDIO_BLOCK
            || param == self.playback.audio_index
    }

    /// Parameter commit in mode `ACCESS`
    fn access(&mut self) {
        self.firmware_addr = 0;

        if self.is_data_access(self.access_param) {
            self.data_access();
        } else {
            self.status_access();
        }
    }

    fn status_access(&mut self) {
        let param = self.access_param;
        self.firmware_addr = param << 1;

        let status = match param {
            access_param::CART_STATUS => self.cart_status(),
            access_param::COMMAND => self.command_poll(),
            access_param::BUSY => {
                // Never busy
                self.op_state = OpState::Wait;
                0
            }
            _ => 0,
        };

        trace!("NMP status access {:#X} -> {:#06X}", param, status);
        self.status_data[0..2].copy_from_slice(&status.to_be_bytes());
        self.data_index = 0;
        self.access_param = 0;
    }

    /// Boot handshake during the first polls, last command status afterwards
    fn cart_status(&mut self) -> u16 {
        if self.init_stage < timing::INIT_POLLS {
            let status = self.settings.boot_data[(self.init_stage >> 1) as usize];
            self.init_stage += 1;
            if self.init_stage == timing::INIT_IRQ_POLL {
                self.irq.request_line();
            }
            status
        } else {
            self.cmd_status
        }
    }

    /// Open a new command stream, acknowledging the previous command
    fn command_poll(&mut self) -> u16 {
        self.op_state = OpState::ProcessCmd;
        self.firmware_addr = 0;
        self.command_stream.clear();

        if self.valid_command {
            self.irq.request_line();
            self.valid_command = false;
        }

        self.ticks = self.ticks.wrapping_add(timing::POLL_TICKS);
        self.ticks
    }

    fn data_access(&mut self) {
        self.card_data.clear();
        self.op_state = OpState::GetSdData;
        self.data_index = 0;

        match Command::from_opcode(self.cmd) {
            Some(Command::StartFileList | Command::ContinueFileList) => {
                self.card_data = card::build_list_block(self.nav.current_entry());
            }
            Some(Command::GetId3Data) => {
                self.card_data = card::build_tag_block(&self.tags.title, &self.tags.artist);
            }
            Some(Command::UpdateAudio) if self.playback.update_audio_stream => {
                self.stream_audio_chunk();
            }
            _ => trace!("NMP data access without a block (cmd={:#06X})", self.cmd),
        }
    }

    fn stream_audio_chunk(&mut self) {
        self.card_data
            .resize(self.playback.buffer_size + CHUNK_PADDING, 0);

        let was_playing = self.playback.is_music_playing;
        let trigger_timestamp =
            audio::fill_chunk(&mut self.playback, &mut self.ext_audio, &mut self.card_data);

        if was_playing && !self.playback.is_music_playing {
            // Stream ran out before the trackbar did, end the track the same way
            debug!("NMP audio stream exhausted");
            self.irq.manual_irq = false;
            self.irq.manual_cmd = opcode::STOP_MUSIC;
            self.irq.schedule(timing::END_OF_TRACK_DELAY);
        } else if trigger_timestamp {
            self.playback.update_audio_stream = false;
            self.playback.update_trackbar_timestamp = true;
            self.irq.trigger_now();
        }
    }

    // ========================================================================
    // Scheduler hooks
    // ========================================================================

    /// Boot delay elapsed
    pub fn finish_boot(&mut self) {
        debug!("NMP boot complete");
        self.op_state = OpState::Wait;
    }

    /// Run the command the interrupt was scheduled for
    pub fn run_manual_command(&mut self) {
        self.cmd = self.irq.manual_cmd;
        self.dispatch(self.cmd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::MemoryLibrary;

    fn state() -> NmpState {
        NmpState::new(Box::new(MemoryLibrary::new()), NmpSettings::default())
    }

    fn write16(nmp: &mut NmpState, reg: u32, value: u16) {
        nmp.write(reg, (value >> 8) as u8);
        nmp.write(reg + 1, value as u8);
    }

    fn access(nmp: &mut NmpState, param: u16) {
        write16(nmp, registers::CNT, access_mode::ACCESS);
        write16(nmp, registers::PARAMETER, param);
    }

    fn send(nmp: &mut NmpState, bytes: &[u8]) {
        access(nmp, access_param::COMMAND as u16);
        for &b in bytes {
            nmp.write(registers::DATA_IN, b);
        }
        write16(nmp, registers::CNT, access_mode::EXECUTE);
    }

    #[test]
    fn control_register_assembles_high_then_low() {
        let mut nmp = state();
        nmp.write(registers::CNT, 0x12);
        assert_eq!(nmp.access_mode, 0x1200);
        nmp.write(registers::CNT + 1, 0x34);
        assert_eq!(nmp.access_mode, 0x1234);
    }

    #[test]
    fn boot_request_schedules_interrupt() {
        let mut nmp = state();
        write16(&mut nmp, registers::CNT, access_mode::BOOT);
        assert_eq!(nmp.op_state, OpState::BootSequence);
        assert_eq!(nmp.irq.delay, 30);

        // Only honoured once
        nmp.irq.delay = 0;
        write16(&mut nmp, registers::CNT, access_mode::BOOT);
        assert_eq!(nmp.irq.delay, 0);
    }

    #[test]
    fn command_stream_dispatches_big_endian_opcode() {
        let mut nmp = state();
        send(&mut nmp, &[0x80, 0x01]);
        assert_eq!(nmp.cmd, opcode::INIT);
        assert_eq!(nmp.cmd_status, opcode::INIT);
        assert!(nmp.valid_command);
        assert_eq!(nmp.command_stream(), &[0x80, 0x01]);
    }

    #[test]
    fn short_stream_does_not_dispatch() {
        let mut nmp = state();
        send(&mut nmp, &[0x80]);
        assert_eq!(nmp.cmd, 0);
        assert!(!nmp.valid_command);
    }

    #[test]
    fn command_poll_acknowledges_and_counts_ticks() {
        let mut nmp = state();
        send(&mut nmp, &[0x80, 0x01]);
        access(&mut nmp, access_param::COMMAND as u16);
        assert!(nmp.irq.line_request);
        assert!(!nmp.valid_command);
        assert_eq!(nmp.status_data()[0..2], [0, 12]);
        assert!(nmp.command_stream().is_empty());
    }

    #[test]
    fn boot_handshake_returns_boot_data_then_command_status() {
        let mut nmp = state();
        let mut words = Vec::new();
        for poll in 0..4 {
            access(&mut nmp, access_param::CART_STATUS as u16);
            words.push(u16::from_be_bytes([nmp.status_data()[0], nmp.status_data()[1]]));
            assert_eq!(nmp.irq.line_request, poll >= 1);
        }
        assert_eq!(words, vec![0x0808, 0x0808, 0x0909, 0x0909]);

        nmp.cmd_status = 0x4010;
        access(&mut nmp, access_param::CART_STATUS as u16);
        assert_eq!(nmp.status_data()[0..2], [0x40, 0x10]);
    }

    #[test]
    fn status_reads_stop_after_sixteen_bytes() {
        let mut nmp = state();
        send(&mut nmp, &[0x80, 0x01]);
        let bytes: Vec<u8> = (0..20).map(|_| nmp.read(registers::DATA_OUT)).collect();
        assert_eq!(&bytes[0..2], &[0x80, 0x01]);
        assert!(bytes[16..].iter().all(|&b| b == 0));
    }

    #[test]
    fn card_reads_past_end_return_zero() {
        let mut nmp = state();
        send(&mut nmp, &[0x00, 0x40]);
        access(&mut nmp, access_param::TAG_BLOCK as u16);
        assert_eq!(nmp.op_state, OpState::GetSdData);
        for _ in 0..272 {
            nmp.read(registers::DATA_OUT + 1);
        }
        assert_eq!(nmp.read(registers::DATA_OUT), 0);
        assert_eq!(nmp.read(registers::DATA_OUT), 0);
    }

    #[test]
    fn busy_poll_enters_wait() {
        let mut nmp = state();
        access(&mut nmp, access_param::BUSY as u16);
        assert_eq!(nmp.op_state, OpState::Wait);
        assert_eq!(nmp.status_data()[0..2], [0, 0]);
    }

    #[test]
    fn status_access_redirects_data_in_to_firmware() {
        let mut nmp = state();
        access(&mut nmp, 0x0200);
        assert_eq!(nmp.firmware_addr(), 0x400);
        nmp.write(registers::DATA_IN, 0xAB);
        nmp.write(registers::DATA_IN + 1, 0xCD);
        assert_eq!(&nmp.firmware()[0x400..0x402], &[0xAB, 0xCD]);
        assert_eq!(nmp.firmware_addr(), 0x402);
        assert!(nmp.command_stream().is_empty());
    }

    #[test]
    fn param_high_builds_wide_address() {
        let mut nmp = state();
        write16(&mut nmp, registers::CNT, access_mode::PARAM_HIGH);
        write16(&mut nmp, registers::PARAMETER, 0x0001);
        assert_eq!(nmp.access_param, 0x0001_0000);
        access(&mut nmp, 0x0234);
        assert_eq!(nmp.firmware_addr(), 0x0002_0468);
        assert_eq!(nmp.access_param, 0);
    }
}

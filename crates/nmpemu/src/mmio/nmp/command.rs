//! NMP command dispatcher.
//!
//! Every command overwrites the status buffer: bytes 0-1 echo the opcode,
//! the rest is zero unless the handler fills it in. Most commands also set
//! `cmd_status` (reported by the next cartridge status access) and mark the
//! command valid so that the next command poll raises the interrupt.

use super::navigation::parse_stream_name;
use super::NmpState;
use crate::audio::Playback;
use crate::library::make_printable;
use nmp_hw::mmio::nmp::{STATUS_SIZE, access_param, opcode, status_field, status_tag, stream};
use nmp_hw::specs::audio::{CHUNK_SIZE, DEVICE_VOLUME_MAX, OUTPUT_VOLUME_MAX, SPEAKER_RATE};
use nmp_hw::specs::{self, timing};
use tracing::{debug, trace, warn};

/// Commands understood by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    StartFileList,
    ContinueFileList,
    SetDir,
    GetId3Data,
    PlayMusic,
    StopMusic,
    Pause,
    Resume,
    Seek,
    SetVolume,
    PlaySfx,
    CheckFirmwareFile,
    ReadFirmwareFile,
    CloseFirmwareFile,
    Sleep,
    Wake,
    Init,
    UpdateAudio,
    HeadphoneStatus,
}

impl Command {
    pub fn from_opcode(op: u16) -> Option<Self> {
        let command = match op {
            opcode::START_FILE_LIST => Command::StartFileList,
            opcode::CONTINUE_FILE_LIST => Command::ContinueFileList,
            opcode::SET_DIR => Command::SetDir,
            opcode::GET_ID3_DATA => Command::GetId3Data,
            opcode::PLAY_MUSIC => Command::PlayMusic,
            opcode::STOP_MUSIC => Command::StopMusic,
            opcode::PAUSE => Command::Pause,
            opcode::RESUME => Command::Resume,
            opcode::SEEK => Command::Seek,
            opcode::SET_VOLUME => Command::SetVolume,
            opcode::PLAY_SFX => Command::PlaySfx,
            opcode::CHECK_FIRMWARE_FILE => Command::CheckFirmwareFile,
            opcode::READ_FIRMWARE_FILE => Command::ReadFirmwareFile,
            opcode::CLOSE_FIRMWARE_FILE => Command::CloseFirmwareFile,
            opcode::SLEEP => Command::Sleep,
            opcode::WAKE => Command::Wake,
            opcode::INIT => Command::Init,
            opcode::UPDATE_AUDIO => Command::UpdateAudio,
            opcode::HEADPHONE_STATUS => Command::HeadphoneStatus,
            _ => return None,
        };
        Some(command)
    }

    pub fn opcode(self) -> u16 {
        match self {
            Command::StartFileList => opcode::START_FILE_LIST,
            Command::ContinueFileList => opcode::CONTINUE_FILE_LIST,
            Command::SetDir => opcode::SET_DIR,
            Command::GetId3Data => opcode::GET_ID3_DATA,
            Command::PlayMusic => opcode::PLAY_MUSIC,
            Command::StopMusic => opcode::STOP_MUSIC,
            Command::Pause => opcode::PAUSE,
            Command::Resume => opcode::RESUME,
            Command::Seek => opcode::SEEK,
            Command::SetVolume => opcode::SET_VOLUME,
            Command::PlaySfx => opcode::PLAY_SFX,
            Command::CheckFirmwareFile => opcode::CHECK_FIRMWARE_FILE,
            Command::ReadFirmwareFile => opcode::READ_FIRMWARE_FILE,
            Command::CloseFirmwareFile => opcode::CLOSE_FIRMWARE_FILE,
            Command::Sleep => opcode::SLEEP,
            Command::Wake => opcode::WAKE,
            Command::Init => opcode::INIT,
            Command::UpdateAudio => opcode::UPDATE_AUDIO,
            Command::HeadphoneStatus => opcode::HEADPHONE_STATUS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekDirection {
    Rewind,
    FastForward,
}

/// Seek gesture state.
///
/// The first SEEK commands of a gesture carry a position byte; the direction
/// is inferred from two consecutive non-zero positions. Later SEEKs step by a
/// growing number of seconds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeekState {
    pub pos: u8,
    pub direction: Option<SeekDirection>,
    pub count: u32,
}

impl SeekState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Seconds skipped by the current SEEK
    pub fn step_secs(&self) -> u32 {
        2 + self.count / 10
    }
}

/// Map the device volume (0-46) onto the output line (0-63), truncating
pub fn output_volume(device_volume: u8) -> u8 {
    let volume = device_volume.min(DEVICE_VOLUME_MAX) as f64;
    (volume / DEVICE_VOLUME_MAX as f64 * OUTPUT_VOLUME_MAX as f64) as u8
}

/// Move a position by `delta` samples, clamping at zero
fn shift_position(pos: u32, delta: i64) -> u32 {
    (pos as i64 + delta).clamp(0, u32::MAX as i64) as u32
}

impl NmpState {
    /// Execute one command
    pub fn dispatch(&mut self, op: u16) {
        self.status_data = [0; STATUS_SIZE];
        self.status_data[0..2].copy_from_slice(&op.to_be_bytes());

        let Some(command) = Command::from_opcode(op) else {
            warn!("Unknown NMP command: {:#06X}", op);
            self.valid_command = false;
            self.cmd_status = 0;
            return;
        };

        debug!("NMP command: {:?}", command);

        match command {
            Command::StartFileList => self.cmd_start_file_list(),
            Command::ContinueFileList => self.cmd_continue_file_list(),
            Command::SetDir => self.cmd_set_dir(),
            Command::GetId3Data => self.cmd_get_id3_data(),
            Command::PlayMusic => self.cmd_play_music(),
            Command::StopMusic => self.cmd_stop_music(),
            Command::Pause => self.cmd_pause(),
            Command::Resume => self.cmd_resume(),
            Command::Seek => self.cmd_seek(),
            Command::SetVolume => self.cmd_set_volume(),
            Command::PlaySfx => self.cmd_play_sfx(),
            Command::CheckFirmwareFile | Command::ReadFirmwareFile => self.complete(command),
            Command::CloseFirmwareFile => {
                self.complete(command);
                self.cmd = 0;
            }
            Command::Sleep | Command::Wake => {
                self.cmd_status = command.opcode() | status_tag::POWER;
                self.valid_command = true;
            }
            Command::Init => {
                self.cmd_status = command.opcode();
                self.valid_command = true;
            }
            Command::UpdateAudio => self.cmd_update_audio(),
            Command::HeadphoneStatus => self.cmd_headphone_status(),
        }
    }

    /// Report `command` as completed
    fn complete(&mut self, command: Command) {
        self.cmd_status = command.opcode() | status_tag::COMPLETE;
        self.valid_command = true;
    }

    fn set_status_word(&mut self, offset: usize, value: u16) {
        self.status_data[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
    }

    // ========================================================================
    // Navigation
    // ========================================================================

    fn report_list_state(&mut self) {
        if self.nav.list_complete() {
            self.set_status_word(status_field::WORD1, 1);
        }
    }

    fn cmd_start_file_list(&mut self) {
        self.complete(Command::StartFileList);
        self.nav
            .snapshot(self.library.as_mut(), &self.settings.music_extension);
        self.report_list_state();
        self.nav.advance();
    }

    fn cmd_continue_file_list(&mut self) {
        self.complete(Command::ContinueFileList);
        self.report_list_state();
        self.nav.advance();
    }

    fn cmd_set_dir(&mut self) {
        self.complete(Command::SetDir);
        let name = parse_stream_name(&self.command_stream);
        self.nav.change_dir(&name);
    }

    fn cmd_get_id3_data(&mut self) {
        self.complete(Command::GetId3Data);
        self.nav.current_music_file = parse_stream_name(&self.command_stream);
        self.set_status_word(status_field::TAG_ACCESS_ID, access_param::TAG_BLOCK as u16);

        let path = self.nav.path_of(&self.nav.current_music_file);
        let tags = self.library.read_tags(&path).unwrap_or_else(|e| {
            warn!("Failed to read tags of {:?}: {}", path, e);
            Default::default()
        });
        self.tags.title = make_printable(&tags.title);
        self.tags.artist = make_printable(&tags.artist);
        trace!("Tags of {:?}: {:?}", path, self.tags);
    }

    // ========================================================================
    // Playback control
    // ========================================================================

    /// Load a track into the audio path. On failure the format is cleared and
    /// the track gets a fallback length.
    fn load_track(&mut self, path: &str) -> bool {
        match self.library.load_audio(path) {
            Ok(audio) => {
                debug!("Loaded {:?}: {} s", path, audio.duration_secs);
                self.playback.sample_rate = audio.sample_rate;
                self.playback.channels = audio.channels;
                self.playback.music_length = audio.duration_secs;
                self.ext_audio.load(audio.samples);
                true
            }
            Err(e) => {
                warn!("Failed to load {:?}: {}", path, e);
                self.playback.sample_rate = 0;
                self.playback.channels = 0;
                self.playback.music_length = specs::FALLBACK_TRACK_LENGTH;
                self.ext_audio.load(Vec::new());
                false
            }
        }
    }

    /// Rewind both clock domains for a new session
    fn begin_session(&mut self) {
        self.ext_audio.stop();
        self.irq.cancel();
        self.playback.set_playing(true);
        self.playback.rewind();
        self.ext_audio.sample_pos = 0;
        self.ext_audio.last_pos = 0;
        self.seek.reset();
    }

    fn cmd_play_music(&mut self) {
        self.complete(Command::PlayMusic);
        self.begin_session();

        if self.ext_audio.use_headphones {
            self.playback.update_audio_stream = false;
            self.playback.update_trackbar_timestamp = true;
            self.irq.manual_cmd = opcode::UPDATE_AUDIO;
            self.irq.schedule(timing::HEADPHONE_START_DELAY);
        } else {
            self.playback.update_audio_stream = true;
            self.playback.update_trackbar_timestamp = false;
            self.irq.manual_cmd = opcode::UPDATE_AUDIO;
            self.irq.schedule(timing::STREAM_UPDATE_DELAY);
        }

        self.nav.current_music_file = parse_stream_name(&self.command_stream);
        let path = self.nav.path_of(&self.nav.current_music_file);
        self.load_track(&path);
    }

    fn cmd_stop_music(&mut self) {
        self.complete(Command::StopMusic);
        self.playback.set_playing(false);
        self.ext_audio.stop();
        self.playback.frame_count = 0;
        self.playback.tracker_update_size = 0;
        self.playback.update_audio_stream = false;
        self.playback.update_trackbar_timestamp = false;
        self.seek.reset();
        self.irq.cancel();
    }

    fn cmd_pause(&mut self) {
        self.complete(Command::Pause);
        self.playback.set_playing(false);
        self.ext_audio.stop();
        self.seek.reset();

        self.irq.last_delay = self.irq.delay;
        self.irq.manual_cmd = 0;
        self.irq.delay = 0;
        self.irq.manual_irq = false;
    }

    fn cmd_resume(&mut self) {
        // The device reports RESUME with the PAUSE status
        self.complete(Command::Pause);
        self.playback.set_playing(true);
        self.ext_audio
            .resume(self.playback.channels, self.playback.sample_rate);

        self.irq.manual_cmd = opcode::UPDATE_AUDIO;
        if self.ext_audio.use_headphones {
            self.playback.update_audio_stream = false;
            self.playback.update_trackbar_timestamp = true;
            self.irq.schedule(self.irq.last_delay.max(1));
        } else {
            self.playback.update_audio_stream = true;
            self.irq.schedule(timing::STREAM_UPDATE_DELAY);
        }
        self.irq.last_delay = 0;
    }

    fn cmd_seek(&mut self) {
        self.complete(Command::Seek);
        let Some(&arg) = self.command_stream.get(stream::BYTE_ARG) else {
            trace!("SEEK without argument");
            return;
        };

        self.seek.count += 1;
        let step = self.seek.step_secs() as i64;

        match self.seek.direction {
            None => {
                let last = self.seek.pos;
                self.seek.pos = arg;
                if last != 0 && arg != 0 {
                    self.seek.direction = Some(if arg < last {
                        SeekDirection::Rewind
                    } else {
                        SeekDirection::FastForward
                    });
                    debug!("Seek direction: {:?}", self.seek.direction);
                }
            }
            Some(direction) => {
                let sign = match direction {
                    SeekDirection::Rewind => -1,
                    SeekDirection::FastForward => 1,
                };
                if self.ext_audio.use_headphones {
                    let delta = sign * self.playback.sample_rate as i64 * step;
                    self.ext_audio.sample_pos = shift_position(self.ext_audio.sample_pos, delta);
                } else {
                    let delta = sign * SPEAKER_RATE as i64 * step;
                    self.playback.sample_index = shift_position(self.playback.sample_index, delta);
                }
            }
        }

        self.irq.manual_cmd = opcode::UPDATE_AUDIO;
        self.playback.update_audio_stream = false;
        self.playback.update_trackbar_timestamp = true;
        self.irq.trigger_now();
    }

    fn cmd_set_volume(&mut self) {
        if let Some(&arg) = self.command_stream.get(stream::BYTE_ARG) {
            self.volume = arg.min(DEVICE_VOLUME_MAX);
            self.ext_audio.volume = output_volume(self.volume);
            debug!("Volume {} -> output {}", self.volume, self.ext_audio.volume);
        }
        self.seek.pos = 0;
        self.seek.direction = None;
    }

    fn cmd_play_sfx(&mut self) {
        self.valid_command = true;
        self.begin_session();
        self.playback.update_audio_stream = true;
        self.playback.update_trackbar_timestamp = false;

        let path = self.settings.sfx_path.clone();
        self.load_track(&path);

        self.irq.manual_cmd = opcode::UPDATE_AUDIO;
        self.irq.trigger_now();
    }

    // ========================================================================
    // Audio stream
    // ========================================================================

    fn cmd_update_audio(&mut self) {
        self.cmd_status = opcode::UPDATE_AUDIO;
        self.valid_command = false;
        self.data_index = 0;

        if !self.playback.is_music_playing {
            return;
        }

        self.irq.manual_cmd = opcode::UPDATE_AUDIO;
        self.playback.buffer_size = CHUNK_SIZE;
        let headphones = self.ext_audio.use_headphones;

        if self.playback.update_audio_stream && !headphones {
            self.set_status_word(status_field::WORD1, self.playback.buffer_size as u16);
            self.set_status_word(status_field::ACCESS_ID, access_param::AUDIO_BLOCK as u16);
            self.playback.audio_index =
                access_param::AUDIO_BLOCK + (self.playback.buffer_size / 4) as u32;
        } else if self.playback.update_trackbar_timestamp {
            self.playback.update_audio_stream = true;
            self.playback.update_trackbar_timestamp = false;
            self.playback.frame_count = 0;

            if !self.update_trackbar(headphones) {
                return;
            }

            if headphones {
                self.irq.schedule(timing::HEADPHONE_UPDATE_DELAY);
                self.playback.update_audio_stream = false;
                self.playback.update_trackbar_timestamp = true;
            }
        }

        if !headphones
            && self.playback.update_audio_stream
            && self.irq.delay == 0
            && !self.irq.manual_irq
        {
            self.irq.schedule(timing::STREAM_UPDATE_DELAY);
        }

        self.ext_audio
            .start(self.playback.channels, self.playback.sample_rate);
    }

    /// Write progress and elapsed time into the status buffer. Returns
    /// `false` if the track ended and STOP_MUSIC has been scheduled.
    fn update_trackbar(&mut self, headphones: bool) -> bool {
        let (pos, rate) = if headphones {
            (self.ext_audio.sample_pos, self.playback.sample_rate)
        } else {
            (self.playback.sample_index, SPEAKER_RATE)
        };
        if rate != 0 {
            self.playback.tracker_update_size = pos / rate;
        }
        let elapsed = self.playback.tracker_update_size;

        if self.playback.music_length > 1 {
            let progress = elapsed as f64 / (self.playback.music_length - 1) as f64 * 100.0;
            self.status_data[status_field::PROGRESS] = progress.min(u8::MAX as f64) as u8;

            if progress >= 100.0 {
                debug!("Track finished after {} s", elapsed);
                self.irq.manual_cmd = opcode::STOP_MUSIC;
                self.irq.schedule(timing::END_OF_TRACK_DELAY);
                return false;
            }
        }

        self.set_status_word(status_field::TIMESTAMP, elapsed as u16);
        true
    }

    fn cmd_headphone_status(&mut self) {
        self.cmd_status = opcode::HEADPHONE_STATUS;
        self.valid_command = true;
        self.ext_audio.use_headphones = !self.ext_audio.use_headphones;

        let channels = self.playback.channels as u32;

        if self.ext_audio.use_headphones {
            debug!("Audio routed to headphones");
            self.set_status_word(status_field::WORD1, 1);
            self.playback.update_audio_stream = false;
            self.playback.update_trackbar_timestamp = true;

            if channels != 0 {
                self.ext_audio.sample_pos = self.ext_audio.last_pos / channels;
            }
            if self.ext_audio.playing {
                self.irq.manual_cmd = opcode::UPDATE_AUDIO;
                self.irq.schedule(timing::HEADPHONE_SWITCH_DELAY);
            }
        } else {
            debug!("Audio routed to speaker");
            self.playback.update_audio_stream = true;
            self.playback.update_trackbar_timestamp = false;

            if channels != 0 && self.playback.sample_rate != 0 {
                self.playback.sample_index =
                    speaker_index(&self.playback, self.ext_audio.sample_pos);
            }
            if self.playback.is_music_playing {
                self.irq.manual_cmd = opcode::UPDATE_AUDIO;
                self.irq.trigger_now();
            } else {
                self.irq.manual_cmd = 0;
                self.irq.delay = 0;
            }
        }
    }
}

/// Speaker-domain index (even) of a headphone frame position
fn speaker_index(playback: &Playback, frame: u32) -> u32 {
    ((frame as f64 / playback.ratio()) as u32) & !1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::{DecodedAudio, MemoryLibrary, TrackTags};
    use crate::mmio::nmp::{NmpSettings, OpState};

    const RATE: u32 = 32768;

    fn track(secs: u32) -> DecodedAudio {
        DecodedAudio {
            samples: vec![0x0100; (RATE * secs * 2) as usize],
            sample_rate: RATE,
            channels: 2,
            duration_secs: secs,
        }
    }

    fn state(headphones: bool) -> NmpState {
        let mut lib = MemoryLibrary::new();
        lib.add_folder("/albums")
            .add_track(
                "/song.mp3",
                Some(track(10)),
                TrackTags {
                    title: "Caf\u{e9} Song".into(),
                    artist: "Band\x01".into(),
                },
            )
            .add_track("/broken.mp3", None, TrackTags::default())
            .add_track("/play_yan/sfx.wav", Some(track(1)), TrackTags::default());
        let settings = NmpSettings {
            headphones,
            ..Default::default()
        };
        NmpState::new(Box::new(lib), settings)
    }

    fn run(nmp: &mut NmpState, op: u16, args: &[u8]) {
        nmp.command_stream.clear();
        nmp.command_stream.extend_from_slice(&op.to_be_bytes());
        nmp.command_stream.extend_from_slice(args);
        nmp.cmd = op;
        nmp.dispatch(op);
    }

    fn name_args(name: &str) -> Vec<u8> {
        let mut args = vec![0x00, 0x01];
        for b in name.bytes() {
            args.extend_from_slice(&[0x00, b]);
        }
        args.extend_from_slice(&[0x00, 0x00]);
        args
    }

    fn byte_arg(value: u8) -> Vec<u8> {
        vec![0x00, value]
    }

    #[test]
    fn opcodes_round_trip() {
        for op in [
            opcode::START_FILE_LIST,
            opcode::SEEK,
            opcode::PLAY_SFX,
            opcode::CLOSE_FIRMWARE_FILE,
            opcode::HEADPHONE_STATUS,
        ] {
            assert_eq!(Command::from_opcode(op).map(Command::opcode), Some(op));
        }
        assert_eq!(Command::from_opcode(0x1234), None);
    }

    #[test]
    fn status_echoes_opcode_and_clears_rest() {
        let mut nmp = state(false);
        nmp.status_data = [0xFF; STATUS_SIZE];
        run(&mut nmp, opcode::SLEEP, &[]);
        assert_eq!(nmp.status_data[0..2], [0x05, 0x00]);
        assert!(nmp.status_data[2..].iter().all(|&b| b == 0));
        assert_eq!(nmp.cmd_status, 0x8500);
    }

    #[test]
    fn unknown_command_is_not_valid() {
        let mut nmp = state(false);
        nmp.valid_command = true;
        nmp.cmd_status = 0x4010;
        run(&mut nmp, 0x7777, &[]);
        assert!(!nmp.valid_command);
        assert_eq!(nmp.cmd_status, 0);
        assert_eq!(nmp.status_data[0..2], [0x77, 0x77]);
    }

    #[test]
    fn file_list_reports_completion_after_last_entry() {
        let mut nmp = state(false);
        // Root holds "albums", "play_yan", "broken.mp3", "song.mp3"
        run(&mut nmp, opcode::START_FILE_LIST, &[]);
        assert_eq!(nmp.cmd_status, 0x4010);
        assert_eq!(nmp.status_data[2..4], [0, 0]);
        assert_eq!(nmp.nav.current_entry().map(|(n, _)| n.to_string()), Some("albums".into()));

        for _ in 0..3 {
            run(&mut nmp, opcode::CONTINUE_FILE_LIST, &[]);
            assert_eq!(nmp.status_data[2..4], [0, 0]);
        }
        assert_eq!(nmp.nav.current_entry().map(|(n, _)| n.to_string()), Some("song.mp3".into()));

        run(&mut nmp, opcode::CONTINUE_FILE_LIST, &[]);
        assert_eq!(nmp.status_data[2..4], [0, 1]);
        assert_eq!(nmp.nav.current_entry(), None);
    }

    #[test]
    fn empty_directory_is_complete_immediately() {
        let mut nmp = state(false);
        run(&mut nmp, opcode::SET_DIR, &name_args("albums"));
        assert_eq!(nmp.nav.current_dir, "/albums");
        run(&mut nmp, opcode::START_FILE_LIST, &[]);
        assert_eq!(nmp.status_data[2..4], [0, 1]);
    }

    #[test]
    fn set_dir_parent_returns_to_root() {
        let mut nmp = state(false);
        run(&mut nmp, opcode::SET_DIR, &name_args("albums"));
        run(&mut nmp, opcode::SET_DIR, &name_args(".."));
        assert_eq!(nmp.nav.current_dir, "");
        assert_eq!(nmp.cmd_status, 0x4020);
    }

    #[test]
    fn id3_tags_are_made_printable() {
        let mut nmp = state(false);
        run(&mut nmp, opcode::GET_ID3_DATA, &name_args("song.mp3"));
        assert_eq!(nmp.nav.current_music_file, "song.mp3");
        assert_eq!(nmp.status_data[6..8], [1, 1]);
        assert_eq!(nmp.tags.title, "Caf Song");
        assert_eq!(nmp.tags.artist, "Band");

        run(&mut nmp, opcode::GET_ID3_DATA, &name_args("missing.mp3"));
        assert_eq!(nmp.tags, TrackTags::default());
    }

    #[test]
    fn volume_maps_onto_output_range() {
        let mut nmp = state(false);
        run(&mut nmp, opcode::SET_VOLUME, &byte_arg(23));
        assert_eq!(nmp.volume, 23);
        assert_eq!(nmp.ext_audio.volume, 31);
        run(&mut nmp, opcode::SET_VOLUME, &byte_arg(46));
        assert_eq!(nmp.ext_audio.volume, 63);
        run(&mut nmp, opcode::SET_VOLUME, &byte_arg(0));
        assert_eq!(nmp.ext_audio.volume, 0);
        run(&mut nmp, opcode::SET_VOLUME, &byte_arg(200));
        assert_eq!(nmp.volume, 46);
        assert_eq!(nmp.ext_audio.volume, 63);
    }

    #[test]
    fn set_volume_reports_no_status_and_resets_seek_direction() {
        let mut nmp = state(false);
        nmp.cmd_status = 0x4050;
        nmp.seek.pos = 5;
        nmp.seek.direction = Some(SeekDirection::Rewind);
        nmp.seek.count = 3;
        run(&mut nmp, opcode::SET_VOLUME, &byte_arg(10));
        assert_eq!(nmp.cmd_status, 0x4050);
        assert!(!nmp.valid_command);
        assert_eq!(nmp.seek.pos, 0);
        assert_eq!(nmp.seek.direction, None);
        assert_eq!(nmp.seek.count, 3);
    }

    #[test]
    fn set_volume_without_argument_keeps_volume() {
        let mut nmp = state(false);
        run(&mut nmp, opcode::SET_VOLUME, &byte_arg(20));
        run(&mut nmp, opcode::SET_VOLUME, &[]);
        assert_eq!(nmp.volume, 20);
    }

    #[test]
    fn play_music_speaker_streams() {
        let mut nmp = state(false);
        run(&mut nmp, opcode::PLAY_MUSIC, &name_args("song.mp3"));
        assert_eq!(nmp.cmd_status, 0x4050);
        assert!(nmp.playback.is_music_playing);
        assert!(nmp.playback.update_audio_stream);
        assert!(!nmp.playback.update_trackbar_timestamp);
        assert_eq!(nmp.playback.music_length, 10);
        assert_eq!(nmp.playback.sample_rate, RATE);
        assert_eq!(nmp.irq.manual_cmd, opcode::UPDATE_AUDIO);
        assert_eq!(nmp.irq.delay, 1);
    }

    #[test]
    fn play_music_headphones_schedules_first_update() {
        let mut nmp = state(true);
        run(&mut nmp, opcode::PLAY_MUSIC, &name_args("song.mp3"));
        assert!(!nmp.playback.update_audio_stream);
        assert!(nmp.playback.update_trackbar_timestamp);
        assert_eq!(nmp.irq.manual_cmd, opcode::UPDATE_AUDIO);
        assert_eq!(nmp.irq.delay, 10);
    }

    #[test]
    fn undecodable_track_uses_fallback_length() {
        let mut nmp = state(false);
        run(&mut nmp, opcode::PLAY_MUSIC, &name_args("broken.mp3"));
        assert_eq!(nmp.playback.music_length, 2);
        assert_eq!(nmp.playback.sample_rate, 0);
        assert!(nmp.ext_audio.buffer.is_empty());
        assert!(nmp.playback.is_music_playing);
    }

    #[test]
    fn play_music_stops_previous_line_and_rewinds() {
        let mut nmp = state(true);
        run(&mut nmp, opcode::PLAY_MUSIC, &name_args("song.mp3"));
        nmp.ext_audio.start(2, RATE);
        nmp.ext_audio.sample_pos = 9000;
        nmp.playback.sample_index = 500;
        nmp.playback.left_error = 3;

        run(&mut nmp, opcode::PLAY_MUSIC, &name_args("song.mp3"));
        assert!(!nmp.ext_audio.playing);
        assert_eq!(nmp.ext_audio.sample_pos, 0);
        assert_eq!(nmp.playback.sample_index, 0);
        assert_eq!(nmp.playback.left_error, 0);
    }

    #[test]
    fn stop_clears_playback_and_pending_interrupts() {
        let mut nmp = state(false);
        run(&mut nmp, opcode::PLAY_MUSIC, &name_args("song.mp3"));
        nmp.irq.last_delay = 7;
        run(&mut nmp, opcode::STOP_MUSIC, &[]);
        assert_eq!(nmp.cmd_status, 0x4051);
        assert!(!nmp.playback.is_music_playing);
        assert!(!nmp.playback.is_media_playing);
        assert!(!nmp.playback.update_audio_stream);
        assert_eq!(nmp.irq.manual_cmd, 0);
        assert_eq!(nmp.irq.delay, 0);
        assert_eq!(nmp.irq.last_delay, 0);
        assert!(!nmp.irq.manual_irq);
    }

    #[test]
    fn pause_and_resume_restore_headphone_cadence() {
        let mut nmp = state(true);
        run(&mut nmp, opcode::PLAY_MUSIC, &name_args("song.mp3"));
        nmp.ext_audio.start(2, RATE);
        nmp.ext_audio.sample_pos = 1234;
        nmp.irq.delay = 42;

        run(&mut nmp, opcode::PAUSE, &[]);
        assert_eq!(nmp.cmd_status, 0x4052);
        assert!(!nmp.playback.is_music_playing);
        assert!(!nmp.ext_audio.playing);
        assert_eq!(nmp.irq.last_delay, 42);
        assert_eq!(nmp.irq.delay, 0);
        assert_eq!(nmp.irq.manual_cmd, 0);

        run(&mut nmp, opcode::RESUME, &[]);
        assert_eq!(nmp.cmd_status, 0x4052);
        assert!(nmp.playback.is_music_playing);
        assert!(nmp.ext_audio.playing);
        assert_eq!(nmp.ext_audio.sample_pos, 1234);
        assert_eq!(nmp.irq.delay, 42);
        assert_eq!(nmp.irq.last_delay, 0);
        assert_eq!(nmp.irq.manual_cmd, opcode::UPDATE_AUDIO);
    }

    #[test]
    fn seek_infers_direction_from_positions() {
        let mut nmp = state(false);
        run(&mut nmp, opcode::PLAY_MUSIC, &name_args("song.mp3"));

        run(&mut nmp, opcode::SEEK, &byte_arg(10));
        assert_eq!(nmp.seek.direction, None);
        run(&mut nmp, opcode::SEEK, &byte_arg(8));
        assert_eq!(nmp.seek.direction, Some(SeekDirection::Rewind));
        assert_eq!(nmp.playback.sample_index, 0);

        let mut nmp = state(false);
        run(&mut nmp, opcode::SEEK, &byte_arg(8));
        run(&mut nmp, opcode::SEEK, &byte_arg(10));
        assert_eq!(nmp.seek.direction, Some(SeekDirection::FastForward));

        // A zero position never decides the direction
        let mut nmp = state(false);
        run(&mut nmp, opcode::SEEK, &byte_arg(0));
        run(&mut nmp, opcode::SEEK, &byte_arg(5));
        assert_eq!(nmp.seek.direction, None);
    }

    #[test]
    fn seek_steps_grow_every_ten_commands() {
        let mut nmp = state(false);
        run(&mut nmp, opcode::PLAY_MUSIC, &name_args("song.mp3"));
        run(&mut nmp, opcode::SEEK, &byte_arg(1));
        run(&mut nmp, opcode::SEEK, &byte_arg(2));
        assert_eq!(nmp.seek.direction, Some(SeekDirection::FastForward));

        let mut positions = Vec::new();
        for _ in 0..20 {
            run(&mut nmp, opcode::SEEK, &byte_arg(3));
            positions.push(nmp.playback.sample_index);
        }
        // Seeks 3..=9 step 2 s, 10..=19 step 3 s, 20..=22 step 4 s
        let steps: Vec<u32> = positions
            .windows(2)
            .map(|w| (w[1] - w[0]) / SPEAKER_RATE)
            .collect();
        assert_eq!(positions[0], 2 * SPEAKER_RATE);
        assert!(steps[..6].iter().all(|&s| s == 2));
        assert!(steps[6..16].iter().all(|&s| s == 3));
        assert!(steps[16..].iter().all(|&s| s == 4));
    }

    #[test]
    fn rewind_clamps_at_zero() {
        let mut nmp = state(true);
        run(&mut nmp, opcode::PLAY_MUSIC, &name_args("song.mp3"));
        run(&mut nmp, opcode::SEEK, &byte_arg(9));
        run(&mut nmp, opcode::SEEK, &byte_arg(4));
        nmp.ext_audio.sample_pos = RATE;
        run(&mut nmp, opcode::SEEK, &byte_arg(3));
        assert_eq!(nmp.ext_audio.sample_pos, 0);
        assert!(nmp.irq.manual_irq);
        assert_eq!(nmp.irq.manual_cmd, opcode::UPDATE_AUDIO);
        assert!(nmp.playback.update_trackbar_timestamp);
    }

    #[test]
    fn seek_without_argument_does_nothing() {
        let mut nmp = state(false);
        run(&mut nmp, opcode::SEEK, &[]);
        assert_eq!(nmp.seek.count, 0);
        assert!(!nmp.irq.manual_irq);
    }

    #[test]
    fn update_audio_announces_speaker_chunk() {
        let mut nmp = state(false);
        run(&mut nmp, opcode::PLAY_MUSIC, &name_args("song.mp3"));
        nmp.irq.delay = 0;
        run(&mut nmp, opcode::UPDATE_AUDIO, &[]);

        assert_eq!(nmp.cmd_status, 0x8100);
        assert!(!nmp.valid_command);
        assert_eq!(nmp.status_data[2..6], [0x04, 0x80, 0x02, 0x02]);
        assert_eq!(nmp.playback.audio_index, 0x202 + 0x120);
        assert_eq!(nmp.playback.buffer_size, 0x480);
        assert!(nmp.ext_audio.playing);
        // Streaming keeps itself going
        assert_eq!(nmp.irq.delay, 1);
    }

    #[test]
    fn update_audio_is_silent_when_stopped() {
        let mut nmp = state(false);
        run(&mut nmp, opcode::UPDATE_AUDIO, &[]);
        assert_eq!(nmp.status_data[2..], [0; 14]);
        assert_eq!(nmp.irq.manual_cmd, 0);
        assert!(!nmp.ext_audio.playing);
    }

    #[test]
    fn headphone_timestamp_reports_progress() {
        let mut nmp = state(true);
        run(&mut nmp, opcode::PLAY_MUSIC, &name_args("song.mp3"));
        run(&mut nmp, opcode::UPDATE_AUDIO, &[]);
        assert!(nmp.ext_audio.playing);
        assert_eq!(nmp.irq.delay, 60);

        nmp.ext_audio.sample_pos = RATE * 3;
        run(&mut nmp, opcode::UPDATE_AUDIO, &[]);
        // 3 / 9 * 100
        assert_eq!(nmp.status_data[8], 33);
        assert_eq!(nmp.status_data[12..14], [0, 3]);
        assert!(nmp.playback.update_trackbar_timestamp);
        assert!(!nmp.playback.update_audio_stream);
    }

    #[test]
    fn finished_track_schedules_stop() {
        let mut nmp = state(true);
        run(&mut nmp, opcode::PLAY_MUSIC, &name_args("song.mp3"));
        nmp.ext_audio.sample_pos = RATE * 9;
        run(&mut nmp, opcode::UPDATE_AUDIO, &[]);
        assert_eq!(nmp.status_data[8], 100);
        assert_eq!(nmp.irq.manual_cmd, opcode::STOP_MUSIC);
        assert_eq!(nmp.irq.delay, 1);

        nmp.run_manual_command();
        assert!(!nmp.playback.is_music_playing);
        assert_eq!(nmp.cmd_status, 0x4051);
    }

    #[test]
    fn speaker_timestamp_uses_speaker_rate() {
        let mut nmp = state(false);
        run(&mut nmp, opcode::PLAY_MUSIC, &name_args("song.mp3"));
        nmp.playback.update_audio_stream = false;
        nmp.playback.update_trackbar_timestamp = true;
        nmp.playback.sample_index = SPEAKER_RATE * 2;
        run(&mut nmp, opcode::UPDATE_AUDIO, &[]);
        assert_eq!(nmp.status_data[12..14], [0, 2]);
        assert!(nmp.playback.update_audio_stream);
        assert_eq!(nmp.playback.frame_count, 0);
    }

    #[test]
    fn headphone_round_trip_preserves_even_speaker_index() {
        let mut nmp = state(false);
        run(&mut nmp, opcode::PLAY_MUSIC, &name_args("song.mp3"));
        nmp.ext_audio.last_pos = 2 * 50_001;

        run(&mut nmp, opcode::HEADPHONE_STATUS, &[]);
        assert!(nmp.ext_audio.use_headphones);
        assert_eq!(nmp.cmd_status, 0x8600);
        assert_eq!(nmp.status_data[2..4], [0, 1]);
        assert_eq!(nmp.ext_audio.sample_pos, 50_001);

        run(&mut nmp, opcode::HEADPHONE_STATUS, &[]);
        assert!(!nmp.ext_audio.use_headphones);
        // 50001 frames at ratio 2 -> 25000 speaker samples
        assert_eq!(nmp.playback.sample_index, 25_000);
        assert_eq!(nmp.playback.sample_index % 2, 0);
        assert!(nmp.playback.update_audio_stream);
    }

    #[test]
    fn headphone_seek_survives_switch_to_speaker() {
        let mut nmp = state(true);
        run(&mut nmp, opcode::PLAY_MUSIC, &name_args("song.mp3"));
        nmp.ext_audio.sample_pos = RATE;
        for pos in [10, 20, 20] {
            run(&mut nmp, opcode::SEEK, &[0x00, pos]);
        }
        assert_eq!(nmp.ext_audio.sample_pos, 3 * RATE);

        run(&mut nmp, opcode::HEADPHONE_STATUS, &[]);
        assert!(!nmp.ext_audio.use_headphones);
        assert_eq!(nmp.playback.sample_index, 3 * SPEAKER_RATE);
    }

    #[test]
    fn switch_to_headphones_while_playing_forces_update() {
        let mut nmp = state(false);
        run(&mut nmp, opcode::PLAY_MUSIC, &name_args("song.mp3"));
        nmp.irq.delay = 0;
        run(&mut nmp, opcode::UPDATE_AUDIO, &[]);
        assert!(nmp.ext_audio.playing);

        run(&mut nmp, opcode::HEADPHONE_STATUS, &[]);
        assert_eq!(nmp.irq.manual_cmd, opcode::UPDATE_AUDIO);
        assert_eq!(nmp.irq.delay, 1);
        assert!(nmp.playback.update_trackbar_timestamp);
    }

    #[test]
    fn play_sfx_streams_immediately() {
        let mut nmp = state(false);
        nmp.cmd_status = 0x4010;
        run(&mut nmp, opcode::PLAY_SFX, &[]);
        assert!(nmp.valid_command);
        assert_eq!(nmp.cmd_status, 0x4010);
        assert!(nmp.playback.update_audio_stream);
        assert_eq!(nmp.playback.music_length, 1);
        assert!(nmp.irq.manual_irq);
        assert_eq!(nmp.irq.manual_cmd, opcode::UPDATE_AUDIO);
    }

    #[test]
    fn firmware_and_power_commands_report_status() {
        let mut nmp = state(false);
        run(&mut nmp, opcode::CHECK_FIRMWARE_FILE, &[]);
        assert_eq!(nmp.cmd_status, 0x4300);
        run(&mut nmp, opcode::CLOSE_FIRMWARE_FILE, &[]);
        assert_eq!(nmp.cmd_status, 0x4304);
        assert_eq!(nmp.cmd, 0);
        run(&mut nmp, opcode::WAKE, &[]);
        assert_eq!(nmp.cmd_status, 0x8501);
        run(&mut nmp, opcode::INIT, &[]);
        assert_eq!(nmp.cmd_status, 0x8001);
        assert!(nmp.valid_command);
        assert_eq!(nmp.op_state, OpState::Init);
    }
}

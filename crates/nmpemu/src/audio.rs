//! Audio path of the music player.
//!
//! Two clock domains exist and exactly one is authoritative at a time:
//!
//! - **speaker**: the device streams 8-bit chunks to the guest, which plays
//!   them through the console speaker. Position is [`Playback::sample_index`],
//!   counted at a fixed pseudo-rate of 16384 samples per second.
//! - **headphone**: the cartridge plays the decoded PCM itself at the source
//!   rate. Position is [`ExtAudio::sample_pos`], advanced by the host mixer.
//!
//! Speaker chunks carry a single channel each; consecutive chunks alternate
//! left and right, decided by the parity of a running frame counter.

use nmp_hw::specs::audio::{CHUNK_SIZE, OUTPUT_VOLUME_MAX, SPEAKER_RATE};
use tracing::{debug, trace};

/// Host audio output line.
///
/// Holds the decoded track and the state the host mixer needs to render it on
/// the headphone path.
#[derive(Debug, Clone, Default)]
pub struct ExtAudio {
    /// Decoded interleaved PCM of the loaded track
    pub buffer: Vec<i16>,
    /// Interleaved channel count of `buffer`
    pub channels: u16,
    /// Source frequency of `buffer`
    pub frequency: u32,
    /// Line is rendering
    pub playing: bool,
    /// Output volume, 0-63
    pub volume: u8,
    /// Output routed to the cartridge headphone jack
    pub use_headphones: bool,
    /// Frame cursor of the headphone path
    pub sample_pos: u32,
    /// Last consumed interleaved sample index
    pub last_pos: u32,
}

impl ExtAudio {
    pub fn new(use_headphones: bool) -> Self {
        Self {
            volume: OUTPUT_VOLUME_MAX,
            use_headphones,
            ..Default::default()
        }
    }

    /// Start the line with the given format, rewinding the cursor.
    ///
    /// Edge-triggered: does nothing if the line is already playing or the
    /// format is unknown. Returns whether the line was started.
    pub fn start(&mut self, channels: u16, frequency: u32) -> bool {
        if self.playing || channels == 0 || frequency == 0 {
            return false;
        }
        self.channels = channels;
        self.frequency = frequency;
        self.sample_pos = 0;
        self.playing = true;
        debug!("External audio started ({} Hz, {} ch)", frequency, channels);
        true
    }

    /// Continue a paused line from its current cursor
    pub fn resume(&mut self, channels: u16, frequency: u32) {
        if channels == 0 || frequency == 0 {
            return;
        }
        self.channels = channels;
        self.frequency = frequency;
        self.playing = true;
    }

    pub fn stop(&mut self) {
        if self.playing {
            debug!("External audio stopped");
        }
        self.playing = false;
    }

    /// Replace the loaded track
    pub fn load(&mut self, samples: Vec<i16>) {
        self.buffer = samples;
        self.sample_pos = 0;
        self.last_pos = 0;
    }

    /// Render interleaved frames at the source rate into `out`, advancing
    /// `sample_pos`. Frames past the end of the track, or rendered while the
    /// line is stopped, are silence. Returns the number of frames consumed.
    pub fn render(&mut self, out: &mut [i16]) -> usize {
        let channels = self.channels.max(1) as usize;
        out.fill(0);
        if !self.playing || self.channels == 0 {
            return 0;
        }

        let mut consumed = 0;
        for frame in out.chunks_exact_mut(channels) {
            let start = self.sample_pos as usize * channels;
            if start + channels > self.buffer.len() {
                break;
            }
            for (ch, sample) in frame.iter_mut().enumerate() {
                let raw = self.buffer[start + ch] as i32;
                *sample = (raw * self.volume as i32 / OUTPUT_VOLUME_MAX as i32) as i16;
            }
            self.sample_pos += 1;
            self.last_pos = self.sample_pos * channels as u32;
            consumed += 1;
        }
        consumed
    }
}

/// Playback state of the device
#[derive(Debug, Clone, Default)]
pub struct Playback {
    pub is_music_playing: bool,
    pub is_media_playing: bool,
    /// Speaker-domain position, in 16384 Hz samples
    pub sample_index: u32,
    /// Source rate of the loaded track
    pub sample_rate: u32,
    /// Channel count of the loaded track
    pub channels: u16,
    /// Dither residual of the left channel
    pub left_error: i16,
    /// Dither residual of the right channel
    pub right_error: i16,
    /// Audio chunk size in bytes
    pub buffer_size: usize,
    /// Chunks delivered since the last timestamp update
    pub frame_count: u32,
    /// Track length in seconds
    pub music_length: u32,
    /// Elapsed seconds reported on the last trackbar update
    pub tracker_update_size: u32,
    /// Next update delivers an audio chunk
    pub update_audio_stream: bool,
    /// Next update refreshes the trackbar / timestamp
    pub update_trackbar_timestamp: bool,
    /// Data access id the guest uses to fetch the current chunk
    pub audio_index: u32,
}

impl Playback {
    /// Rewind position and dither state for a new track
    pub fn rewind(&mut self) {
        self.sample_index = 0;
        self.left_error = 0;
        self.right_error = 0;
        self.tracker_update_size = 0;
    }

    pub fn set_playing(&mut self, playing: bool) {
        self.is_music_playing = playing;
        self.is_media_playing = playing;
    }

    /// Speaker-to-source rate ratio
    pub fn ratio(&self) -> f64 {
        self.sample_rate as f64 / SPEAKER_RATE as f64
    }
}

/// Quantize one 16-bit sample to 8 bits with error diffusion.
///
/// 7/16 of the previous residual is added before truncation; the new residual
/// is the low byte discarded from the raw sample. Returns the output sample and
/// the new residual.
pub fn dither_sample(raw: i16, error: i16) -> (i8, i16) {
    let sample = (raw as i32 + (error >> 4) as i32 * 7) >> 8;
    let sample = sample.clamp(i8::MIN as i32, i8::MAX as i32) as i8;
    let error = (raw as i32 & 0xFF) as i16;
    (sample, error)
}

/// Fill `chunk` (at least `buffer_size + 2` bytes) with the next speaker chunk.
///
/// Returns `true` when a trackbar update is due: on the first right-channel
/// chunk of a track, and whenever the right channel crosses a whole second of
/// speaker-domain samples.
pub fn fill_chunk(playback: &mut Playback, ext: &mut ExtAudio, chunk: &mut [u8]) -> bool {
    playback.frame_count = playback.frame_count.wrapping_add(1);

    if playback.sample_rate == 0 || playback.channels == 0 || ext.buffer.is_empty() {
        return false;
    }

    let ratio = playback.ratio();
    let stream_size = ext.buffer.len() as u32;
    let is_left = playback.frame_count & 0x01 != 0;
    let channel_shift = if is_left { 0 } else { 1 };
    let limit = playback.buffer_size / 2 + 2;

    let mut trigger_timestamp = playback.sample_index == 0 && !is_left;
    let mut sample_count = 0;
    let mut index = 0;

    for x in 2..limit {
        let error = if is_left {
            playback.left_error
        } else {
            playback.right_error
        };

        index = (ratio * playback.sample_index as f64) as u32;
        index = index
            .wrapping_mul(playback.channels as u32)
            .wrapping_add(channel_shift);

        if index >= stream_size {
            index = stream_size - 1;
            playback.set_playing(false);
        }

        let (sample, error) = dither_sample(ext.buffer[index as usize], error);
        if is_left {
            playback.left_error = error;
        } else {
            playback.right_error = error;
        }

        // Samples are stored byte-swapped within each 16-bit word
        let offset = if playback.sample_index & 0x01 != 0 {
            x - 1
        } else {
            x + 1
        };
        if let Some(byte) = chunk.get_mut(offset) {
            *byte = sample as u8;
        }

        playback.sample_index += 1;
        sample_count += 1;

        if playback.sample_index % SPEAKER_RATE == 0 && !is_left {
            trigger_timestamp = true;
        }
    }

    // The right channel replays the span the left channel just covered
    if is_left {
        playback.sample_index -= sample_count;
    } else {
        ext.last_pos = index;
    }

    trace!(
        "Audio chunk {} ({}): sample_index={}, last_pos={}",
        playback.frame_count,
        if is_left { "L" } else { "R" },
        playback.sample_index,
        ext.last_pos
    );

    trigger_timestamp
}

/// Unpack a speaker chunk back into signed samples, in playback order.
///
/// `first_index` is the speaker-domain index the chunk started at; it decides
/// the byte order of the first word.
pub fn decode_chunk(chunk: &[u8], first_index: u32) -> Vec<i8> {
    let count = CHUNK_SIZE / 2;
    (0..count)
        .map(|n| {
            let x = n + 2;
            let offset = if (first_index as usize + n) & 0x01 != 0 {
                x - 1
            } else {
                x + 1
            };
            chunk.get(offset).copied().unwrap_or(0) as i8
        })
        .collect()
}

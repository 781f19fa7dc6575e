//! Shared fixtures for the integration tests

#![allow(dead_code)]

use nmpemu::{DecodedAudio, EmulatorConfig, EmulatorCore, GuestDriver, MemoryLibrary, TrackTags};

/// Speaker tests use twice the speaker rate so that resampling steps by 2
pub const SPEAKER_TEST_RATE: u32 = 32768;

/// Headphone tests use a rate that renders a whole number of frames per tick
pub const HEADPHONE_TEST_RATE: u32 = 30000;

/// Left channel constant
pub const LEFT_LEVEL: i16 = 0x1000;

/// Right channel constant
pub const RIGHT_LEVEL: i16 = -0x1000;

/// Stereo track with constant left / right levels
pub fn track(rate: u32, secs: u32) -> DecodedAudio {
    let frames = (rate * secs) as usize;
    let mut samples = Vec::with_capacity(frames * 2);
    for _ in 0..frames {
        samples.push(LEFT_LEVEL);
        samples.push(RIGHT_LEVEL);
    }
    DecodedAudio {
        samples,
        sample_rate: rate,
        channels: 2,
        duration_secs: secs,
    }
}

fn tags(title: &str, artist: &str) -> TrackTags {
    TrackTags {
        title: title.to_string(),
        artist: artist.to_string(),
    }
}

/// Card layout:
///
/// ```text
/// /albums/rock/
/// /albums/a.mp3
/// /broken.mp3      (undecodable)
/// /long.mp3        (10 s)
/// /notes.txt
/// /play_yan/sfx.wav
/// /song.mp3        (3 s)
/// /hp.mp3          (3 s, headphone rate)
/// ```
pub fn library() -> MemoryLibrary {
    let mut lib = MemoryLibrary::new();
    lib.add_folder("/albums/rock")
        .add_track("/albums/a.mp3", Some(track(SPEAKER_TEST_RATE, 10)), tags("A", "Band"))
        .add_track("/broken.mp3", None, TrackTags::default())
        .add_track(
            "/long.mp3",
            Some(track(SPEAKER_TEST_RATE, 10)),
            tags("Long Song", "Someone"),
        )
        .add_track("/notes.txt", None, TrackTags::default())
        .add_track("/play_yan/sfx.wav", Some(track(SPEAKER_TEST_RATE, 1)), TrackTags::default())
        .add_track(
            "/song.mp3",
            Some(track(SPEAKER_TEST_RATE, 3)),
            tags("Caf\u{e9} \u{1}Song", "The Band"),
        )
        .add_track("/hp.mp3", Some(track(HEADPHONE_TEST_RATE, 3)), TrackTags::default());
    lib
}

pub fn core(headphones: bool) -> EmulatorCore {
    let config = EmulatorConfig {
        headphones,
        ..Default::default()
    };
    EmulatorCore::with_library(Box::new(library()), &config)
}

/// Core with the boot handshake already done
pub fn booted_core(headphones: bool) -> EmulatorCore {
    let mut core = core(headphones);
    GuestDriver::new(&mut core)
        .boot()
        .expect("device should boot");
    core
}

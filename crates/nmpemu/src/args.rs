use crate::EmulatorConfig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "nmpemu-cli", about = "Headless Nintendo MP3 Player cartridge emulator")]
pub struct Args {
    /// Host directory used as the SD card
    #[arg(long, global = true)]
    pub library: Option<PathBuf>,

    /// Path to SD card image (raw FAT disk image). Mutually exclusive with --library.
    #[arg(long, global = true)]
    pub sd_card: Option<PathBuf>,

    /// Menu sound effect, relative to the card root
    #[arg(long, global = true, default_value = "play_yan/sfx.wav")]
    pub sfx: String,

    /// Extension of the files listed as music. Tracks are decoded as WAV
    /// whatever their extension; anything else plays as silence
    #[arg(long, global = true, default_value = ".mp3")]
    pub extension: String,

    /// Route audio to the cartridge headphone output instead of the speaker
    #[arg(long, global = true)]
    pub headphones: bool,

    /// Boot handshake status words, comma separated (hex: 0x1234 or decimal: 1234)
    #[arg(long, global = true, value_parser = parse_hex_or_dec, value_delimiter = ',')]
    pub boot_data: Option<Vec<u64>>,

    /// Stop after this many ticks (60 per second)
    #[arg(long, global = true, value_parser = parse_hex_or_dec)]
    pub max_ticks: Option<u64>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CliCommand {
    /// List a folder as the player shows it
    Ls {
        /// Folder path below the card root
        dir: Option<String>,
    },

    /// Show the title and artist of a track
    Tags {
        /// Folder path below the card root
        dir: String,
        /// Track file name
        file: String,
    },

    /// Play a track through the device's audio path
    Play {
        /// Folder path below the card root
        dir: String,
        /// Track file name
        file: String,

        /// Seconds of playback to emulate
        #[arg(long, default_value_t = 10)]
        seconds: u64,

        /// Device volume, 0-46
        #[arg(long)]
        volume: Option<u8>,

        /// Write the audio the console would hear to a WAV file
        #[arg(long)]
        wav_out: Option<PathBuf>,
    },
}

impl Args {
    /// Validate that the arguments are consistent
    pub fn validate(&self) -> Result<(), String> {
        if self.library.is_some() && self.sd_card.is_some() {
            return Err("--library and --sd-card are mutually exclusive".to_string());
        }
        if let Some(words) = &self.boot_data {
            if words.len() != 2 {
                return Err(format!("--boot-data takes 2 words, got {}", words.len()));
            }
            if let Some(word) = words.iter().find(|&&w| w > u16::MAX as u64) {
                return Err(format!("--boot-data word {:#X} does not fit 16 bits", word));
            }
        }
        if let CliCommand::Play { seconds: 0, .. } = self.command {
            return Err("--seconds must be at least 1".to_string());
        }
        Ok(())
    }

    /// Convert Args to EmulatorConfig
    pub fn to_emulator_config(&self) -> EmulatorConfig {
        let defaults = EmulatorConfig::default();
        let boot_data = match self.boot_data.as_deref() {
            Some(&[first, second]) => [first as u16, second as u16],
            _ => defaults.boot_data,
        };

        EmulatorConfig {
            library: self.library.clone(),
            sd_card: self.sd_card.clone(),
            sfx: self.sfx.clone(),
            music_extension: self.extension.clone(),
            headphones: self.headphones,
            boot_data,
            max_ticks: self.max_ticks,
        }
    }
}

pub fn parse_hex_or_dec(s: &str) -> Result<u64, std::num::ParseIntError> {
    if let Some(hex) = s.strip_prefix("0x") {
        u64::from_str_radix(hex, 16)
    } else {
        s.parse()
    }
}

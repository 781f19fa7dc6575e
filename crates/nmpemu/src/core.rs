//! Core emulator API for the music player cartridge.
//!
//! This module provides the main emulator interface: byte-wide bus access to
//! the cartridge, the tick clock and the Game Pak interrupt line. It is used
//! both by the headless CLI and by tests.

use crate::error::{NmpError, Result};
use crate::library::{FatImageLibrary, HostLibrary, MediaLibrary, MemoryLibrary};
use crate::mmio::{self, NmpSettings, NmpState};
use crate::scheduler::{Scheduler, SchedulerConfig};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};

/// Configuration for the emulator
#[derive(Debug, Clone)]
pub struct EmulatorConfig {
    /// Host directory serving as the SD card
    pub library: Option<PathBuf>,
    /// FAT disk image serving as the SD card
    pub sd_card: Option<PathBuf>,
    /// Menu sound effect, relative to the card root
    pub sfx: String,
    /// Extension of the files listed as music
    pub music_extension: String,
    /// Start with output routed to the headphones
    pub headphones: bool,
    /// Status words of the boot handshake
    pub boot_data: [u16; 2],
    /// Stop after this many ticks
    pub max_ticks: Option<u64>,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        let device = NmpSettings::default();
        Self {
            library: None,
            sd_card: None,
            sfx: device.sfx_path,
            music_extension: device.music_extension,
            headphones: device.headphones,
            boot_data: device.boot_data,
            max_ticks: None,
        }
    }
}

impl EmulatorConfig {
    fn device_settings(&self) -> NmpSettings {
        NmpSettings {
            sfx_path: self.sfx.clone(),
            music_extension: self.music_extension.clone(),
            headphones: self.headphones,
            boot_data: self.boot_data,
        }
    }

    /// Open the library backend the configuration names
    pub fn open_library(&self) -> Result<Box<dyn MediaLibrary>> {
        match (&self.library, &self.sd_card) {
            (Some(_), Some(_)) => Err(NmpError::Config(
                "library and sd_card are mutually exclusive".to_string(),
            )),
            (Some(root), None) => {
                if !root.is_dir() {
                    return Err(NmpError::Config(format!(
                        "library is not a directory: {}",
                        root.display()
                    )));
                }
                Ok(Box::new(HostLibrary::new(root)))
            }
            (None, Some(image)) => Ok(Box::new(FatImageLibrary::open(image)?)),
            (None, None) => {
                warn!("No library configured, using an empty card");
                Ok(Box::new(MemoryLibrary::new()))
            }
        }
    }
}

/// Core emulator for the music player cartridge
#[derive(Debug)]
pub struct EmulatorCore {
    state: mmio::EmulatorState,
    scheduler: Scheduler,
    start_time: Instant,
}

impl EmulatorCore {
    /// Create a new emulator, opening the configured library
    pub fn new(config: EmulatorConfig) -> Result<Self> {
        let library = config.open_library()?;
        Ok(Self::with_library(library, &config))
    }

    /// Create a new emulator around an already opened library
    pub fn with_library(library: Box<dyn MediaLibrary>, config: &EmulatorConfig) -> Self {
        info!("=== NMP Setup ===");
        info!(
            "Extension: {}, SFX: {}, output: {}",
            config.music_extension,
            config.sfx,
            if config.headphones { "headphones" } else { "speaker" }
        );

        let nmp = NmpState::new(library, config.device_settings());
        let scheduler = Scheduler::new(SchedulerConfig {
            max_ticks: config.max_ticks,
        });

        Self {
            state: mmio::EmulatorState::new(nmp),
            scheduler,
            start_time: Instant::now(),
        }
    }

    /// Write one byte on the cartridge bus
    pub fn write8(&mut self, addr: u32, value: u8) {
        mmio::write_handler(&mut self.state, addr, value);
        self.scheduler.service(&mut self.state.nmp);
    }

    /// Read one byte from the cartridge bus
    pub fn read8(&mut self, addr: u32) -> u8 {
        let value = mmio::read_handler(&mut self.state, addr);
        self.scheduler.service(&mut self.state.nmp);
        value
    }

    /// Advance the clock by one tick
    pub fn tick(&mut self) {
        self.scheduler.tick(&mut self.state.nmp);
    }

    /// Advance the clock by `ticks` ticks
    pub fn run_ticks(&mut self, ticks: u64) {
        for _ in 0..ticks {
            self.tick();
        }
    }

    /// Check if any stop condition is met
    pub fn should_stop(&self) -> bool {
        self.scheduler.check_stop_conditions()
    }

    /// Check if the Game Pak interrupt is pending
    pub fn irq_pending(&self) -> bool {
        self.scheduler.line().pending()
    }

    /// Acknowledge the Game Pak interrupt, returning whether it was pending
    pub fn acknowledge_irq(&mut self) -> bool {
        self.scheduler.line_mut().acknowledge()
    }

    /// Number of interrupts raised so far
    pub fn irq_count(&self) -> u64 {
        self.scheduler.line().raised()
    }

    /// Get total ticks elapsed
    pub fn total_ticks(&self) -> u64 {
        self.scheduler.total_ticks()
    }

    /// Get elapsed time since start
    pub fn elapsed(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    pub fn nmp(&self) -> &NmpState {
        &self.state.nmp
    }

    pub fn nmp_mut(&mut self) -> &mut NmpState {
        &mut self.state.nmp
    }

    /// Print final emulator state
    pub fn print_final_state(&self) {
        let nmp = self.nmp();
        info!("Total ticks: {}", self.total_ticks());
        info!("Interrupts raised: {}", self.irq_count());
        info!("Elapsed time: {:.2?}", self.elapsed());
        info!(
            "NMP: state={:?} cmd={:#06X} status={:#06X} dir={:?} file={:?}",
            nmp.op_state,
            nmp.cmd,
            nmp.cmd_status,
            nmp.nav.current_dir,
            nmp.nav.current_music_file
        );
    }
}

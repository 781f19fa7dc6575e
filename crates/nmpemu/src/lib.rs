pub mod args;
pub mod audio;
pub mod core;
pub mod error;
pub mod guest;
pub mod library;
pub mod mmio;
pub mod scheduler;

// Re-export commonly used types
pub use args::{Args, CliCommand};
pub use core::{EmulatorConfig, EmulatorCore};
pub use error::{NmpError, Result};
pub use guest::{AudioEvent, Channel, CommandReply, GuestDriver};
pub use library::{DecodedAudio, FatImageLibrary, HostLibrary, MediaLibrary, MemoryLibrary, TrackTags};
pub use mmio::{EmulatorState, NmpSettings, NmpState, OpState};
pub use scheduler::{IrqIntent, SchedulerConfig};

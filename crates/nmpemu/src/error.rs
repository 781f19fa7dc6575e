//! Error types for the media library collaborators and the guest driver.

use thiserror::Error;

/// Result type for library operations.
pub type Result<T> = std::result::Result<T, NmpError>;

/// Errors raised while reading the host music library.
///
/// None of these reach the guest: the device absorbs them and falls back to
/// degraded defaults.
#[derive(Error, Debug)]
pub enum NmpError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The WAV decoder rejected the file.
    #[error("WAV decode error: {0}")]
    Wav(#[from] hound::Error),

    /// Sample format the loader cannot convert to 16-bit PCM.
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// Virtual path that does not resolve inside the library.
    #[error("Invalid library path: {0}")]
    InvalidPath(String),

    /// Inconsistent emulator configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The device did not answer a guest access sequence as expected.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

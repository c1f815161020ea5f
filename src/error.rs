//! Error types for the synthesis core
//!
//! Every fallible public operation returns [`SynthResult`]. Failures that happen on
//! the rendering thread never surface here: they degrade (drop a note, drop a
//! parameter change) and are logged instead.

use std::fmt;

/// Errors returned by synth operations
#[derive(Debug)]
pub enum SynthError {
    /// Channel, key, velocity or parameter out of range (rejected before any side effect)
    InvalidArgument(String),
    /// The calling thread's command queue is full; the requested change was dropped
    QueueFull,
    /// Every command queue slot is taken by another thread
    QueueLimit,
    /// No voice could be allocated or stolen for a note
    NoVoice,
    /// Unknown SoundFont id/name, preset or tuning slot
    NotFound(String),
    /// The channel has no preset assigned
    NoPreset(usize),
    /// No loader accepted the SoundFont file
    LoadFailed(String),
    /// A worker or background thread could not be started
    ThreadSpawn(String),
    /// Invalid settings file
    Config(String),
    /// IO error
    Io(std::io::Error),
}

impl fmt::Display for SynthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SynthError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            SynthError::QueueFull => write!(f, "Synthesis event queue full"),
            SynthError::QueueLimit => write!(f, "Maximum thread event queues exceeded"),
            SynthError::NoVoice => write!(f, "No voice available"),
            SynthError::NotFound(what) => write!(f, "Not found: {}", what),
            SynthError::NoPreset(chan) => write!(f, "Channel {} has no preset", chan),
            SynthError::LoadFailed(file) => write!(f, "Failed to load SoundFont \"{}\"", file),
            SynthError::ThreadSpawn(msg) => write!(f, "Failed to spawn thread: {}", msg),
            SynthError::Config(msg) => write!(f, "Configuration error: {}", msg),
            SynthError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for SynthError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SynthError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SynthError {
    fn from(e: std::io::Error) -> Self {
        SynthError::Io(e)
    }
}

impl From<toml::de::Error> for SynthError {
    fn from(e: toml::de::Error) -> Self {
        SynthError::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for SynthError {
    fn from(e: toml::ser::Error) -> Self {
        SynthError::Config(e.to_string())
    }
}

/// Result type for synth operations
pub type SynthResult<T> = Result<T, SynthError>;

/// Reject an argument unless `ok` holds
pub(crate) fn ensure(ok: bool, what: impl FnOnce() -> String) -> SynthResult<()> {
    if ok {
        Ok(())
    } else {
        Err(SynthError::InvalidArgument(what()))
    }
}

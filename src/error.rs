//! Error type shared by every governor component.

use std::io;
use std::time::Duration;

/// Result type alias using DvfsError
pub type Result<T> = std::result::Result<T, DvfsError>;

#[derive(thiserror::Error, Debug)]
pub enum DvfsError {
    // Hardware collaborators
    #[error("voltage regulator is not ready (use count is 0)")]
    RegulatorNotReady,

    #[error("failed to set clock: {0}")]
    Clock(String),

    #[error("failed to set voltage: {0}")]
    Voltage(String),

    #[error("performance floor request failed: {0}")]
    Coupling(String),

    #[error("hardware did not stabilize at level {level} within {timeout:?}")]
    HardwareNotStabilized { level: usize, timeout: Duration },

    // Governor state
    #[error("bottom lock state is not valid (depth {depth})")]
    InvalidBottomLockState { depth: i32 },

    #[error("level {level} has up threshold {up}% not above down threshold {down}%")]
    ThresholdMisconfigured { level: usize, down: u32, up: u32 },

    #[error("step {step} is out of range for a table of {levels} levels")]
    StepOutOfRange { step: usize, levels: usize },

    #[error("governor has been shut down")]
    ShutDown,

    // Configuration
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl DvfsError {
    /// Failures a caller may simply retry on the next sample.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RegulatorNotReady | Self::HardwareNotStabilized { .. }
        )
    }
}

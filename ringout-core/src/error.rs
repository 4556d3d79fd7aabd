use thiserror::Error;

/// All errors produced by ringout-core.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("failed to allocate {frames} frames of audio storage")]
    Allocation { frames: usize },

    #[error("invalid driver configuration: {0}")]
    InvalidConfig(String),

    #[error("drain thread is already running")]
    AlreadyRunning,

    #[error("drain thread is not running")]
    NotRunning,

    #[error("previous drain thread has not exited yet")]
    DrainStillActive,

    #[error("drain thread panicked")]
    DrainPanicked,

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("sink error: {0}")]
    Sink(String),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("config parse error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DriverError {
    /// True for errors that refuse a start/stop transition without changing state.
    pub fn is_refused_transition(&self) -> bool {
        matches!(
            self,
            DriverError::AlreadyRunning
                | DriverError::NotRunning
                | DriverError::DrainStillActive
                | DriverError::DrainPanicked
        )
    }
}

pub type Result<T> = std::result::Result<T, DriverError>;

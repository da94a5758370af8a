//! Error types for the dictation pipeline.

use thiserror::Error;

/// Result type alias for pipeline operations.
pub type DictationResult<T> = Result<T, DictationError>;

/// Session-lifecycle errors. Per-engine failures never appear here; they are
/// contained in [`crate::engine::EngineFailure`] result slots.
#[derive(Error, Debug)]
pub enum DictationError {
    /// Audio source unavailable or lost. Fatal to `start`, retryable on the next call.
    #[error("audio device error: {0}")]
    Device(String),

    /// Ambient-noise calibration failed; `start` aborts before capture begins.
    #[error("ambient calibration failed: {0}")]
    Calibration(String),

    #[error("audio stream error: {0}")]
    Stream(String),

    #[error("channel send error: {0}")]
    ChannelSend(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<cpal::DevicesError> for DictationError {
    fn from(err: cpal::DevicesError) -> Self {
        DictationError::Device(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for DictationError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        DictationError::Device(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for DictationError {
    fn from(err: cpal::BuildStreamError) -> Self {
        DictationError::Stream(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for DictationError {
    fn from(err: cpal::PlayStreamError) -> Self {
        DictationError::Stream(err.to_string())
    }
}

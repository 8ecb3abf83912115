use std::path::PathBuf;

/// Typed errors for capture, encoding, clip storage and playback.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),
    #[error("Capture could not start: {0}")]
    CaptureStartFailure(String),
    #[error("Another recording is already in progress")]
    CaptureUnavailable,
    #[error("No recording in progress")]
    NotRecording,
    #[error("Device not found: {0}")]
    DeviceNotFound(String),
    #[error("Invalid sensitivity config: {0}")]
    InvalidConfig(String),
    /// Zero samples were captured. Handled inside `stop_recording`, which
    /// reports it as `Ok(None)`.
    #[error("No audio captured")]
    EmptyRecording,
    #[error("WAV encode failed: {0}")]
    EncodeFailure(String),
    #[error("WAV decode failed: {0}")]
    DecodeFailure(String),
    #[error("File system error at {path:?}: {source}")]
    FileSystemFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Playback failed: {0}")]
    PlaybackFailure(String),
}

impl AudioError {
    /// Adapter for `map_err` on filesystem calls.
    pub fn fs(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> AudioError {
        let path = path.into();
        move |source| AudioError::FileSystemFailure { path, source }
    }
}

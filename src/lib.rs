//! Voice clip recording: microphone capture, live waveform, 16-bit WAV
//! encoding and a cache-directory clip store.

pub mod commands;
pub mod services;

pub use commands::playback::{is_playing, play_clip, stop_playback};
pub use commands::recording::{
    AudioError, CaptureBackend, CaptureStatus, Clip, ClipStore, CpalBackend, ExternalBackend,
    Recorder, RecordingState, SensitivityConfig, SensitivityPreset, SensitivitySetting,
};
pub use services::settings::RecorderSettings;

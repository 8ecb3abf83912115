use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::AudioError;

/// How metering readings are turned into waveform amplitudes.
/// Fixed for the lifetime of one recording.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "SensitivityConfigRepr")]
pub struct SensitivityConfig {
    sensitivity: f32,
    noise_floor: f32,
    smoothing_factor: f32,
    preserve_peaks: bool,
}

impl SensitivityConfig {
    /// Validating constructor. `sensitivity` must be positive, `noise_floor`
    /// at or below 0 dB and `smoothing_factor` within [0, 1].
    pub fn new(
        sensitivity: f32,
        noise_floor: f32,
        smoothing_factor: f32,
        preserve_peaks: bool,
    ) -> Result<Self, AudioError> {
        if !(sensitivity > 0.0 && sensitivity.is_finite()) {
            return Err(AudioError::InvalidConfig(format!(
                "sensitivity must be > 0, got {}",
                sensitivity
            )));
        }
        if !(noise_floor <= 0.0 && noise_floor.is_finite()) {
            return Err(AudioError::InvalidConfig(format!(
                "noise floor must be <= 0 dB, got {}",
                noise_floor
            )));
        }
        if !(0.0..=1.0).contains(&smoothing_factor) {
            return Err(AudioError::InvalidConfig(format!(
                "smoothing factor must be within [0, 1], got {}",
                smoothing_factor
            )));
        }
        Ok(Self {
            sensitivity,
            noise_floor,
            smoothing_factor,
            preserve_peaks,
        })
    }

    pub fn sensitivity(&self) -> f32 {
        self.sensitivity
    }

    pub fn noise_floor(&self) -> f32 {
        self.noise_floor
    }

    pub fn smoothing_factor(&self) -> f32 {
        self.smoothing_factor
    }

    pub fn preserve_peaks(&self) -> bool {
        self.preserve_peaks
    }
}

impl Default for SensitivityConfig {
    fn default() -> Self {
        SensitivityPreset::default().config()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SensitivityConfigRepr {
    sensitivity: f32,
    noise_floor: f32,
    smoothing_factor: f32,
    preserve_peaks: bool,
}

impl TryFrom<SensitivityConfigRepr> for SensitivityConfig {
    type Error = AudioError;

    fn try_from(r: SensitivityConfigRepr) -> Result<Self, Self::Error> {
        SensitivityConfig::new(r.sensitivity, r.noise_floor, r.smoothing_factor, r.preserve_peaks)
    }
}

/// Named sensitivity levels offered by the recording screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SensitivityPreset {
    Low,
    Medium,
    #[default]
    High,
    VeryHigh,
}

impl SensitivityPreset {
    pub const ALL: [SensitivityPreset; 4] = [
        SensitivityPreset::Low,
        SensitivityPreset::Medium,
        SensitivityPreset::High,
        SensitivityPreset::VeryHigh,
    ];

    pub fn config(self) -> SensitivityConfig {
        // Literal tables; all values satisfy the constructor's invariants.
        let (sensitivity, noise_floor, smoothing_factor) = match self {
            SensitivityPreset::Low => (1.5, -45.0, 0.5),
            SensitivityPreset::Medium => (2.5, -55.0, 0.4),
            SensitivityPreset::High => (3.5, -60.0, 0.3),
            SensitivityPreset::VeryHigh => (5.0, -70.0, 0.2),
        };
        SensitivityConfig {
            sensitivity,
            noise_floor,
            smoothing_factor,
            preserve_peaks: true,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SensitivityPreset::Low => "low",
            SensitivityPreset::Medium => "medium",
            SensitivityPreset::High => "high",
            SensitivityPreset::VeryHigh => "veryHigh",
        }
    }

    /// Case-insensitive lookup; accepts `very-high` and `very_high` as well.
    pub fn from_name(name: &str) -> Option<Self> {
        let key: String = name
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .flat_map(char::to_lowercase)
            .collect();
        Self::ALL.into_iter().find(|p| p.name().to_lowercase() == key)
    }
}

/// Either a named preset or a fully custom config.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum SensitivitySetting {
    Preset(SensitivityPreset),
    Custom(SensitivityConfig),
}

impl SensitivitySetting {
    pub fn config(&self) -> SensitivityConfig {
        match self {
            SensitivitySetting::Preset(p) => p.config(),
            SensitivitySetting::Custom(c) => *c,
        }
    }
}

impl Default for SensitivitySetting {
    fn default() -> Self {
        SensitivitySetting::Preset(SensitivityPreset::default())
    }
}

/// Periodic status reported by a capture backend (~every 50 ms).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureStatus {
    /// `false` while capture is paused or interrupted; such ticks are ignored.
    pub is_recording: bool,
    pub duration_millis: u64,
    /// Metering level in dB; absent when the backend had nothing to report.
    pub metering: Option<f32>,
}

/// One block of mono f32 samples as delivered by the backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioChunk {
    samples: Vec<f32>,
}

impl AudioChunk {
    pub fn new(samples: Vec<f32>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl From<Vec<f32>> for AudioChunk {
    fn from(samples: Vec<f32>) -> Self {
        Self::new(samples)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordingState {
    Idle,
    Recording,
    Stopping,
    Discarded,
    Finalized,
}

impl RecordingState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RecordingState::Discarded | RecordingState::Finalized)
    }
}

/// A persisted recording.
///
/// Clips rehydrated from the cache directory carry `duration_ms` and
/// `waveform` as `None` until `ClipStore::load_details` decodes the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Clip {
    pub id: String,
    pub uri: String,
    pub created_at: DateTime<Utc>,
    pub duration_ms: Option<u64>,
    pub file_size_bytes: u64,
    pub waveform: Option<Vec<f32>>,
}

impl Clip {
    pub fn path(&self) -> PathBuf {
        PathBuf::from(&self.uri)
    }
}

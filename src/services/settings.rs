//! Recorder settings persisted as JSON in the cache root.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::commands::recording::session::{DEFAULT_LIVE_WINDOW_FRAMES, DEFAULT_WAVEFORM_BARS};
use crate::commands::recording::SensitivitySetting;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to write settings to {path:?}: {source}")]
    Write {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecorderSettings {
    pub sensitivity: SensitivitySetting,
    /// Ask the backend for this rate; `None` keeps the device default.
    pub preferred_sample_rate: Option<u32>,
    pub waveform_bars: usize,
    pub live_window_frames: usize,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            sensitivity: SensitivitySetting::default(),
            preferred_sample_rate: None,
            waveform_bars: DEFAULT_WAVEFORM_BARS,
            live_window_frames: DEFAULT_LIVE_WINDOW_FRAMES,
        }
    }
}

impl RecorderSettings {
    /// Read settings, falling back to defaults when the file is missing or
    /// malformed.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<RecorderSettings>(&content) {
                Ok(settings) => settings,
                Err(e) => {
                    log::warn!("Failed to parse settings, using defaults: {}", e);
                    Self::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                log::warn!("Failed to read settings {:?}, using defaults: {}", path, e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| SettingsError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, content).map_err(|source| SettingsError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::recording::{SensitivityConfig, SensitivityPreset};
    use tempfile::tempdir;

    #[test]
    fn missing_file_gives_defaults() {
        let tmp = tempdir().unwrap();
        let settings = RecorderSettings::load(&tmp.path().join("settings.json"));
        assert_eq!(settings, RecorderSettings::default());
        assert_eq!(settings.sensitivity, SensitivitySetting::Preset(SensitivityPreset::High));
        assert_eq!(settings.waveform_bars, 40);
        assert_eq!(settings.live_window_frames, 200);
    }

    #[test]
    fn malformed_file_gives_defaults() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(RecorderSettings::load(&path), RecorderSettings::default());
    }

    #[test]
    fn invalid_custom_config_gives_defaults() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("settings.json");
        fs::write(
            &path,
            r#"{"sensitivity":{"kind":"custom","value":{"sensitivity":-1.0,"noiseFloor":-60.0,"smoothingFactor":0.3,"preservePeaks":true}}}"#,
        )
        .unwrap();
        assert_eq!(RecorderSettings::load(&path), RecorderSettings::default());
    }

    #[test]
    fn partial_file_fills_missing_fields() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("settings.json");
        fs::write(&path, r#"{"preferredSampleRate":16000}"#).unwrap();
        let settings = RecorderSettings::load(&path);
        assert_eq!(settings.preferred_sample_rate, Some(16_000));
        assert_eq!(settings.sensitivity, SensitivitySetting::default());
    }

    #[test]
    fn save_then_load_keeps_custom_sensitivity() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("nested").join("settings.json");
        let settings = RecorderSettings {
            sensitivity: SensitivitySetting::Custom(
                SensitivityConfig::new(2.0, -50.0, 0.6, false).unwrap(),
            ),
            preferred_sample_rate: Some(16_000),
            waveform_bars: 64,
            live_window_frames: 100,
        };
        settings.save(&path).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"kind\": \"custom\""), "{}", raw);
        assert_eq!(RecorderSettings::load(&path), settings);
    }
}

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{TimeZone, Utc};

use super::amplitude::{db_to_amplitude, downsample_amplitudes, rms_dbfs, smooth_amplitudes};
use super::error::AudioError;
use super::types::{Clip, SensitivityConfig};
use super::wav_writer::{check_wav_header_valid, decode_wav_file};

/// Subdirectory of the cache root holding finished clips.
pub const RECORDINGS_DIR: &str = "recordings";
const CLIP_EXT: &str = ".wav";
const PART_EXT: &str = ".part";
/// Window used to rebuild a waveform from stored PCM, matching the status cadence.
const DETAIL_WINDOW_MS: u32 = 50;

/// `{epochMillis}_{id}.wav`
pub fn clip_file_name(timestamp_ms: i64, id: &str) -> String {
    format!("{}_{}{}", timestamp_ms, id, CLIP_EXT)
}

/// Inverse of [`clip_file_name`]. `None` for anything that is not a clip.
pub fn parse_clip_file_name(name: &str) -> Option<(i64, String)> {
    let stem = name.strip_suffix(CLIP_EXT)?;
    let (ts, id) = stem.split_once('_')?;
    if ts.is_empty() || !ts.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return None;
    }
    let ts: i64 = ts.parse().ok()?;
    Some((ts, id.to_string()))
}

/// Finished clips on disk under `<cacheRoot>/recordings`.
#[derive(Debug, Clone)]
pub struct ClipStore {
    dir: PathBuf,
}

impl ClipStore {
    pub fn new(cache_root: &Path) -> Self {
        Self {
            dir: cache_root.join(RECORDINGS_DIR),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the recordings directory. Safe to call repeatedly and from
    /// racing callers.
    pub fn ensure_dir(&self) -> Result<(), AudioError> {
        match fs::create_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists && self.dir.is_dir() => Ok(()),
            Err(e) => Err(AudioError::FileSystemFailure {
                path: self.dir.clone(),
                source: e,
            }),
        }
    }

    /// Persist an encoded clip. The bytes land in a `.wav.part` file first and
    /// are renamed into place once fully written.
    pub fn save(
        &self,
        wav_bytes: &[u8],
        duration_ms: u64,
        waveform: Vec<f32>,
    ) -> Result<Clip, AudioError> {
        self.ensure_dir()?;

        let created_at = Utc::now();
        let id = uuid::Uuid::new_v4().simple().to_string();
        let path = self.dir.join(clip_file_name(created_at.timestamp_millis(), &id));
        let part = part_path(&path);

        if let Err(e) = fs::write(&part, wav_bytes) {
            let _ = fs::remove_file(&part);
            return Err(AudioError::FileSystemFailure { path: part, source: e });
        }
        if let Err(e) = fs::rename(&part, &path) {
            let _ = fs::remove_file(&part);
            return Err(AudioError::FileSystemFailure { path, source: e });
        }

        log::info!(
            "Saved clip {} ({} bytes, {} ms) to {:?}",
            id,
            wav_bytes.len(),
            duration_ms,
            path
        );

        Ok(Clip {
            id,
            uri: path.to_string_lossy().into_owned(),
            created_at,
            duration_ms: Some(duration_ms),
            file_size_bytes: wav_bytes.len() as u64,
            waveform: Some(waveform),
        })
    }

    /// Rehydrate clips from the directory, newest first. Duration and
    /// waveform are left unset. `.wav.part` files are skipped, not removed:
    /// one may belong to a save still in progress.
    pub fn scan(&self) -> Result<Vec<Clip>, AudioError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(AudioError::FileSystemFailure {
                    path: self.dir.clone(),
                    source: e,
                })
            }
        };

        let mut clips = Vec::new();
        for entry in entries {
            let entry = entry.map_err(AudioError::fs(&self.dir))?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            if name.ends_with(PART_EXT) {
                continue;
            }

            let Some((timestamp_ms, id)) = parse_clip_file_name(name) else {
                log::debug!("Skipping non-clip file {:?}", path);
                continue;
            };
            let Some(created_at) = Utc.timestamp_millis_opt(timestamp_ms).single() else {
                log::debug!("Skipping clip with out-of-range timestamp {:?}", path);
                continue;
            };
            let file_size_bytes = match entry.metadata() {
                Ok(m) if m.is_file() => m.len(),
                Ok(_) => continue,
                Err(e) => {
                    log::warn!("Failed to stat {:?}: {}", path, e);
                    continue;
                }
            };

            clips.push(Clip {
                id,
                uri: path.to_string_lossy().into_owned(),
                created_at,
                duration_ms: None,
                file_size_bytes,
                waveform: None,
            });
        }

        clips.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(clips)
    }

    pub fn find(&self, id: &str) -> Result<Option<Clip>, AudioError> {
        Ok(self.scan()?.into_iter().find(|c| c.id == id))
    }

    /// Decode the clip and fill in its duration and a waveform rebuilt from
    /// 50 ms RMS windows run through the amplitude pipeline.
    pub fn load_details(
        &self,
        clip: &mut Clip,
        config: &SensitivityConfig,
        bars: usize,
    ) -> Result<(), AudioError> {
        let path = clip.path();
        if !check_wav_header_valid(&path) {
            log::warn!("Clip {} header does not match its file size", clip.id);
        }
        let decoded = decode_wav_file(&path)?;
        let window = ((decoded.sample_rate as u64 * DETAIL_WINDOW_MS as u64 / 1000) as usize).max(1);

        let amplitudes: Vec<f32> = decoded
            .samples
            .chunks(window)
            .map(|w| db_to_amplitude(rms_dbfs(w), config.sensitivity(), config.noise_floor()))
            .collect();
        let smoothed = smooth_amplitudes(&amplitudes, config.smoothing_factor(), config.preserve_peaks());

        clip.duration_ms = Some(decoded.duration_ms());
        clip.waveform = Some(downsample_amplitudes(&smoothed, bars));
        if let Ok(meta) = fs::metadata(&path) {
            clip.file_size_bytes = meta.len();
        }
        Ok(())
    }

    /// Remove a clip's file. Returns `false` when there was nothing to delete.
    pub fn delete(&self, id: &str) -> Result<bool, AudioError> {
        let Some(clip) = self.find(id)? else {
            return Ok(false);
        };
        let path = clip.path();
        match fs::remove_file(&path) {
            Ok(()) => {
                log::info!("Deleted clip {}", id);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AudioError::FileSystemFailure { path, source: e }),
        }
    }

    /// Remove `.wav.part` files left behind by a crash. Only call this before
    /// any save can be running, i.e. at startup. Returns how many were removed.
    pub fn sweep_incomplete(&self) -> Result<usize, AudioError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(AudioError::FileSystemFailure {
                    path: self.dir.clone(),
                    source: e,
                })
            }
        };

        let mut removed = 0;
        for entry in entries {
            let path = entry.map_err(AudioError::fs(&self.dir))?.path();
            let is_part = path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.ends_with(PART_EXT));
            if !is_part {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    log::warn!("Removed incomplete clip {:?}", path);
                    removed += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => log::warn!("Failed to remove incomplete clip {:?}: {}", path, e),
            }
        }
        Ok(removed)
    }
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(PART_EXT);
    PathBuf::from(name)
}

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Overrides the platform cache directory when set.
pub const CACHE_DIR_ENV: &str = "VOICE_CLIP_CACHE_DIR";
const APP_DIR_NAME: &str = "voice-clip";
const SETTINGS_FILE: &str = "settings.json";

#[derive(Error, Debug)]
pub enum PathError {
    #[error("Cache directory not found")]
    CacheDirNotFound,
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// `$VOICE_CLIP_CACHE_DIR`, else `<platform cache dir>/voice-clip`.
pub fn resolve_cache_root() -> Result<PathBuf, PathError> {
    if let Some(dir) = std::env::var_os(CACHE_DIR_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    dirs::cache_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .ok_or(PathError::CacheDirNotFound)
}

/// Create the cache root. Safe to call repeatedly.
pub fn ensure_cache_root(root: &Path) -> Result<(), PathError> {
    std::fs::create_dir_all(root)?;
    log::info!("Cache root: {:?}", root);
    Ok(())
}

pub fn settings_path(root: &Path) -> PathBuf {
    root.join(SETTINGS_FILE)
}

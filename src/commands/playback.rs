use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::commands::recording::{decode_wav_file, AudioError};

// ── Clip player ──
// One clip plays at a time. Starting playback stops and releases the
// previous output stream first.

/// Global player slot. cpal::Stream is !Send so it is kept here rather than
/// in any caller-owned state.
static PLAYER: Mutex<Option<ActivePlayback>> = Mutex::new(None);

/// Wrapper to make cpal::Stream storable in a Mutex (it's !Send but we only
/// access it during setup/teardown)
struct StreamHolder(cpal::Stream);
unsafe impl Send for StreamHolder {}

struct ActivePlayback {
    stream: StreamHolder,
    finished: Arc<AtomicBool>,
}

/// Index of the source sample heard at output frame `out_frame`, for a
/// source at `src_rate` played through a device at `out_rate`.
fn source_index(out_frame: u64, src_rate: u32, out_rate: u32) -> usize {
    if out_rate == 0 {
        return usize::MAX;
    }
    (out_frame as u128 * src_rate as u128 / out_rate as u128).min(usize::MAX as u128) as usize
}

fn playback_error(context: &str, e: impl std::fmt::Display) -> AudioError {
    AudioError::PlaybackFailure(format!("{}: {}", context, e))
}

/// Play a clip on the default output device. Returns the clip duration.
pub fn play_clip(path: &Path) -> Result<u64, AudioError> {
    stop_playback();

    let decoded = decode_wav_file(path)
        .map_err(|e| AudioError::PlaybackFailure(format!("Failed to load {:?}: {}", path, e)))?;
    let duration_ms = decoded.duration_ms();
    let src_rate = decoded.sample_rate;
    let samples = Arc::new(decoded.samples);

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| AudioError::PlaybackFailure("No output device available".into()))?;
    let supported = device
        .default_output_config()
        .map_err(|e| playback_error("Failed to get output config", e))?;

    let out_rate = supported.sample_rate().0;
    let channels = supported.channels() as usize;
    let config: cpal::StreamConfig = supported.into();

    let finished = Arc::new(AtomicBool::new(false));
    let position = Arc::new(AtomicU64::new(0));
    let finished_ref = finished.clone();
    let samples_ref = samples.clone();

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut pos = position.load(Ordering::Relaxed);
                for frame in data.chunks_mut(channels.max(1)) {
                    let s = match samples_ref.get(source_index(pos, src_rate, out_rate)) {
                        Some(&s) => s,
                        None => {
                            finished_ref.store(true, Ordering::Relaxed);
                            0.0
                        }
                    };
                    for out in frame.iter_mut() {
                        *out = s;
                    }
                    pos += 1;
                }
                position.store(pos, Ordering::Relaxed);
            },
            |err| {
                log::error!("Playback output error: {}", err);
            },
            None,
        )
        .map_err(|e| playback_error("Failed to build output stream", e))?;

    stream
        .play()
        .map_err(|e| playback_error("Failed to start output", e))?;

    log::info!(
        "Playing {:?}: {} samples at {} Hz on {} Hz x{} output",
        path,
        samples.len(),
        src_rate,
        out_rate,
        channels
    );

    let mut guard = PLAYER
        .lock()
        .map_err(|_| AudioError::PlaybackFailure("player state poisoned".into()))?;
    *guard = Some(ActivePlayback {
        stream: StreamHolder(stream),
        finished,
    });
    Ok(duration_ms)
}

/// Stop and release the current player, if any.
pub fn stop_playback() {
    match PLAYER.lock() {
        Ok(mut guard) => {
            if let Some(active) = guard.take() {
                if let Err(e) = active.stream.0.pause() {
                    log::warn!("Failed to pause playback: {}", e);
                }
                log::info!("Playback stopped");
            }
        }
        Err(_) => log::error!("Player state poisoned, cannot stop playback"),
    }
}

/// Whether a clip is still playing (not yet past its last sample).
pub fn is_playing() -> bool {
    PLAYER
        .lock()
        .map(|g| {
            g.as_ref()
                .map(|a| !a.finished.load(Ordering::Relaxed))
                .unwrap_or(false)
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_rate_maps_frames_one_to_one() {
        for frame in [0u64, 1, 999, 48_000] {
            assert_eq!(source_index(frame, 48_000, 48_000), frame as usize);
        }
    }

    #[test]
    fn lower_source_rate_repeats_samples() {
        // 16 kHz clip on a 48 kHz device: each source sample spans 3 frames.
        let idx: Vec<usize> = (0..7).map(|f| source_index(f, 16_000, 48_000)).collect();
        assert_eq!(idx, vec![0, 0, 0, 1, 1, 1, 2]);
    }

    #[test]
    fn higher_source_rate_skips_samples() {
        assert_eq!(source_index(1, 48_000, 16_000), 3);
        assert_eq!(source_index(10, 44_100, 22_050), 20);
    }

    #[test]
    fn zero_output_rate_is_past_the_end() {
        assert_eq!(source_index(0, 16_000, 0), usize::MAX);
    }

    #[test]
    fn missing_clip_is_a_playback_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let err = play_clip(&tmp.path().join("nope.wav")).unwrap_err();
        assert!(matches!(err, AudioError::PlaybackFailure(_)));
        assert!(!is_playing());
    }
}

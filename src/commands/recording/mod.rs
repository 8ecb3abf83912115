pub mod aggregator;
pub mod amplitude;
pub mod backend;
pub mod clip_store;
pub mod cpal_backend;
pub mod error;
pub mod external_backend;
pub mod session;
pub mod types;
pub mod wav_writer;

pub use amplitude::{db_to_amplitude, downsample_amplitudes, smooth_amplitudes, TemporalSmoother};
pub use backend::{
    BackendKind, CaptureBackend, CaptureSink, InputHandle, NegotiatedConfig, StreamConfigRequest,
};
pub use clip_store::ClipStore;
pub use cpal_backend::CpalBackend;
pub use error::AudioError;
pub use external_backend::ExternalBackend;
pub use session::RecordingSession;
pub use types::*;
pub use wav_writer::{decode_wav, decode_wav_file, encode_wav};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::services::path_service;
use crate::services::settings::{RecorderSettings, SettingsError};

// ── Process-wide capture lease ──
// Only one recording may hold the microphone at a time, across every
// Recorder in the process. The lease is taken by `start_recording` and
// released when the capture stream has been closed.

static CAPTURE_ACTIVE: AtomicBool = AtomicBool::new(false);

struct CaptureLease(());

impl CaptureLease {
    fn acquire() -> Result<Self, AudioError> {
        CAPTURE_ACTIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| CaptureLease(()))
            .map_err(|_| AudioError::CaptureUnavailable)
    }
}

impl Drop for CaptureLease {
    fn drop(&mut self) {
        CAPTURE_ACTIVE.store(false, Ordering::Release);
    }
}

/// Whether any recorder in the process is currently capturing.
pub fn capture_in_progress() -> bool {
    CAPTURE_ACTIVE.load(Ordering::Acquire)
}

// ── Recorder ──

/// A live recording. Field order is drop order: the stream is closed before
/// the lease is released.
struct ActiveRecording {
    session: Arc<Mutex<RecordingSession>>,
    input: Box<dyn InputHandle>,
    lease: CaptureLease,
}

/// Entry point for the recording screen: owns the capture backend, the clip
/// store and the settings, and drives one `RecordingSession` at a time.
pub struct Recorder {
    backend: Box<dyn CaptureBackend>,
    store: ClipStore,
    settings: RecorderSettings,
    settings_path: Option<PathBuf>,
    active: Option<ActiveRecording>,
    last_state: RecordingState,
}

/// The session is plain data; a panic in a delivery callback does not leave
/// it in a state that later readers cannot handle.
fn lock_session(session: &Mutex<RecordingSession>) -> MutexGuard<'_, RecordingSession> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

fn start_failure(e: AudioError) -> AudioError {
    match e {
        AudioError::PermissionDenied(_)
        | AudioError::CaptureStartFailure(_)
        | AudioError::DeviceNotFound(_) => e,
        other => AudioError::CaptureStartFailure(other.to_string()),
    }
}

impl Recorder {
    pub fn new(backend: Box<dyn CaptureBackend>, store: ClipStore, settings: RecorderSettings) -> Self {
        Self {
            backend,
            store,
            settings,
            settings_path: None,
            active: None,
            last_state: RecordingState::Idle,
        }
    }

    /// Recorder rooted at `cache_root`: clips under `recordings/`, settings
    /// loaded from and saved to `settings.json`. Partial clips left by a
    /// crashed save are removed here, before any new save can start.
    pub fn open(cache_root: &Path, backend: Box<dyn CaptureBackend>) -> Result<Self, AudioError> {
        let settings_path = path_service::settings_path(cache_root);
        let settings = RecorderSettings::load(&settings_path);
        let store = ClipStore::new(cache_root);
        store.ensure_dir()?;
        match store.sweep_incomplete() {
            Ok(0) => {}
            Ok(n) => log::info!("Swept {} incomplete clip(s)", n),
            Err(e) => log::warn!("Failed to sweep incomplete clips: {}", e),
        }
        log::info!(
            "Recorder ready: {:?} backend, clips in {:?}",
            backend.kind(),
            store.dir()
        );
        Ok(Self {
            settings_path: Some(settings_path),
            ..Self::new(backend, store, settings)
        })
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn store(&self) -> &ClipStore {
        &self.store
    }

    pub fn settings(&self) -> &RecorderSettings {
        &self.settings
    }

    /// Begin capturing. Fails with `CaptureUnavailable` if any recording is
    /// already running in the process and with `PermissionDenied` or
    /// `CaptureStartFailure` if the backend refuses; no state changes then.
    pub fn start_recording(&mut self) -> Result<(), AudioError> {
        if self.active.is_some() {
            return Err(AudioError::CaptureUnavailable);
        }
        let lease = CaptureLease::acquire()?;

        if let Err(e) = self.backend.check_permission() {
            log::warn!("Recording not started: {}", e);
            return Err(e);
        }

        let session = Arc::new(Mutex::new(RecordingSession::new(
            self.settings.sensitivity.config(),
            self.settings.waveform_bars,
            self.settings.live_window_frames,
        )));
        let request = StreamConfigRequest {
            preferred_rate: self.settings.preferred_sample_rate,
        };

        let mut input = self
            .backend
            .open_input(request, CaptureSink::new(session.clone()))
            .map_err(|e| {
                log::error!("Failed to open input stream: {}", e);
                start_failure(e)
            })?;

        let rate = input.negotiated_config().rate;
        lock_session(&session).begin(rate)?;

        if let Err(e) = input.start() {
            log::error!("Failed to start input stream: {}", e);
            let _ = input.stop();
            return Err(start_failure(e));
        }

        log::info!("Recording started at {} Hz", rate);
        self.last_state = RecordingState::Recording;
        self.active = Some(ActiveRecording {
            session,
            input,
            lease,
        });
        Ok(())
    }

    /// Stop capturing and persist the clip.
    ///
    /// `Ok(None)` when nothing was captured. Encode or write failures are
    /// returned and the recording is discarded. Backend errors while stopping
    /// are logged and do not prevent finalization.
    pub fn stop_recording(&mut self) -> Result<Option<Clip>, AudioError> {
        let Some(active) = self.active.take() else {
            return Err(AudioError::NotRecording);
        };
        let ActiveRecording {
            session,
            mut input,
            lease,
        } = active;

        lock_session(&session).begin_stop();
        if let Err(e) = input.stop() {
            log::warn!("Capture stop reported an error, finalizing anyway: {}", e);
        }
        drop(input);
        drop(lease);

        let mut session = lock_session(&session);
        let outcome = self.persist(&mut session);
        let state = match &outcome {
            Ok(Some(_)) => RecordingState::Finalized,
            _ => RecordingState::Discarded,
        };
        session.finish(state);
        self.last_state = state;
        outcome
    }

    fn persist(&self, session: &mut RecordingSession) -> Result<Option<Clip>, AudioError> {
        let buffer = match session.take_buffer() {
            Ok(buffer) => buffer,
            Err(AudioError::EmptyRecording) => {
                log::info!("Recording {} captured no audio, discarding", session.id());
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let rate = session.sample_rate();
        let duration_ms = buffer.len() as u64 * 1000 / rate as u64;
        let result = encode_wav(&buffer, rate)
            .and_then(|bytes| self.store.save(&bytes, duration_ms, session.final_waveform()));

        match result {
            Ok(clip) => Ok(Some(clip)),
            Err(e) => {
                log::error!("Failed to persist recording {}: {}", session.id(), e);
                Err(e)
            }
        }
    }

    /// Current live waveform; empty when not recording.
    pub fn live_waveform(&self) -> Vec<f32> {
        match &self.active {
            Some(active) => lock_session(&active.session).live_waveform().to_vec(),
            None => Vec::new(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        match &self.active {
            Some(active) => lock_session(&active.session).elapsed_ms(),
            None => 0,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    /// State of the running session, or the outcome of the last one.
    pub fn state(&self) -> RecordingState {
        match &self.active {
            Some(active) => lock_session(&active.session).state(),
            None => self.last_state,
        }
    }

    pub fn sensitivity_config(&self) -> SensitivityConfig {
        self.settings.sensitivity.config()
    }

    /// Takes effect from the next recording. Persisted when the recorder was
    /// opened on a cache root.
    pub fn set_sensitivity(&mut self, setting: SensitivitySetting) -> Result<(), SettingsError> {
        self.settings.sensitivity = setting;
        if let Some(path) = &self.settings_path {
            self.settings.save(path)?;
        }
        Ok(())
    }

    pub fn list_clips(&self) -> Result<Vec<Clip>, AudioError> {
        self.store.scan()
    }

    /// Look up a clip and decode its duration and waveform.
    pub fn load_clip_details(&self, id: &str) -> Result<Option<Clip>, AudioError> {
        let Some(mut clip) = self.store.find(id)? else {
            return Ok(None);
        };
        self.store
            .load_details(&mut clip, &self.sensitivity_config(), self.settings.waveform_bars)?;
        Ok(Some(clip))
    }

    pub fn delete_clip(&self, id: &str) -> Result<bool, AudioError> {
        self.store.delete(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    // Recordings share the process-wide lease, so tests that start one run
    // one at a time.
    static SERIAL: Mutex<()> = Mutex::new(());

    fn serial() -> MutexGuard<'static, ()> {
        SERIAL.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn recorder(root: &Path, backend: impl CaptureBackend + 'static) -> Recorder {
        Recorder::new(Box::new(backend), ClipStore::new(root), RecorderSettings::default())
    }

    fn status(ms: u64, db: f32) -> CaptureStatus {
        CaptureStatus {
            is_recording: true,
            duration_millis: ms,
            metering: Some(db),
        }
    }

    /// Delivers a fixed script on `start` and can fail at any step.
    #[derive(Default)]
    struct ScriptedBackend {
        chunks: Vec<Vec<f32>>,
        fail_open: bool,
        fail_start: bool,
        fail_stop: bool,
    }

    struct ScriptedHandle {
        sink: CaptureSink,
        chunks: Vec<Vec<f32>>,
        fail_start: bool,
        fail_stop: bool,
        running: bool,
    }

    impl CaptureBackend for ScriptedBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::External
        }

        fn check_permission(&self) -> Result<(), AudioError> {
            Ok(())
        }

        fn open_input(
            &mut self,
            _config: StreamConfigRequest,
            sink: CaptureSink,
        ) -> Result<Box<dyn InputHandle>, AudioError> {
            if self.fail_open {
                return Err(AudioError::DeviceNotFound("scripted".into()));
            }
            Ok(Box::new(ScriptedHandle {
                sink,
                chunks: self.chunks.clone(),
                fail_start: self.fail_start,
                fail_stop: self.fail_stop,
                running: false,
            }))
        }
    }

    impl InputHandle for ScriptedHandle {
        fn negotiated_config(&self) -> NegotiatedConfig {
            NegotiatedConfig { rate: 16_000 }
        }

        fn start(&mut self) -> Result<(), AudioError> {
            if self.fail_start {
                return Err(AudioError::PlaybackFailure("scripted start failure".into()));
            }
            self.running = true;
            for (i, chunk) in self.chunks.iter().enumerate() {
                self.sink.deliver_chunk(chunk);
                self.sink.deliver_status(status(i as u64 * 50, -20.0));
            }
            Ok(())
        }

        fn stop(&mut self) -> Result<(), AudioError> {
            self.running = false;
            if self.fail_stop {
                return Err(AudioError::CaptureStartFailure("scripted stop failure".into()));
            }
            Ok(())
        }

        fn is_running(&self) -> bool {
            self.running
        }
    }

    #[test]
    fn stop_without_audio_returns_none() {
        let _guard = serial();
        let tmp = tempdir().unwrap();
        let mut rec = recorder(tmp.path(), ExternalBackend::new(16_000));

        rec.start_recording().unwrap();
        assert!(rec.is_recording());
        assert_eq!(rec.state(), RecordingState::Recording);

        assert!(rec.stop_recording().unwrap().is_none());
        assert_eq!(rec.state(), RecordingState::Discarded);
        assert!(!rec.is_recording());
        assert!(!capture_in_progress());
        assert!(rec.list_clips().unwrap().is_empty());
    }

    #[test]
    fn stop_persists_captured_samples() {
        let _guard = serial();
        let tmp = tempdir().unwrap();
        let ext = ExternalBackend::new(16_000);
        let mut rec = recorder(tmp.path(), ext.clone());

        rec.start_recording().unwrap();
        assert!(ext.push_chunk(&[0.1, 0.2, 0.3]));
        let clip = rec.stop_recording().unwrap().unwrap();
        assert_eq!(rec.state(), RecordingState::Finalized);

        let bytes = std::fs::read(clip.path()).unwrap();
        assert_eq!(bytes.len(), 44 + 6);
        assert_eq!(u32::from_le_bytes([bytes[40], bytes[41], bytes[42], bytes[43]]), 6);
        assert_eq!(u32::from_le_bytes([bytes[24], bytes[25], bytes[26], bytes[27]]), 16_000);
        assert_eq!(clip.file_size_bytes, 50);
        assert_eq!(clip.duration_ms, Some(0));

        let listed = rec.list_clips().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, clip.id);
    }

    #[test]
    fn deliveries_after_stop_are_dropped() {
        let _guard = serial();
        let tmp = tempdir().unwrap();
        let ext = ExternalBackend::new(16_000);
        let mut rec = recorder(tmp.path(), ext.clone());

        rec.start_recording().unwrap();
        ext.push_chunk(&[0.5; 160]);
        let clip = rec.stop_recording().unwrap().unwrap();

        assert!(!ext.is_running());
        assert!(!ext.push_chunk(&[0.9; 160]));
        assert!(!ext.push_status(status(100, 0.0)));
        assert_eq!(std::fs::metadata(clip.path()).unwrap().len(), 44 + 320);
    }

    #[test]
    fn second_start_is_rejected() {
        let _guard = serial();
        let tmp = tempdir().unwrap();
        let mut first = recorder(tmp.path(), ExternalBackend::new(16_000));
        let mut second = recorder(tmp.path(), ExternalBackend::new(16_000));

        first.start_recording().unwrap();
        assert!(matches!(first.start_recording(), Err(AudioError::CaptureUnavailable)));
        assert!(matches!(second.start_recording(), Err(AudioError::CaptureUnavailable)));
        assert!(!second.is_recording());

        first.stop_recording().unwrap();
        second.start_recording().unwrap();
        second.stop_recording().unwrap();
    }

    #[test]
    fn stop_when_idle_is_an_error() {
        let tmp = tempdir().unwrap();
        let mut rec = recorder(tmp.path(), ExternalBackend::new(16_000));
        assert!(matches!(rec.stop_recording(), Err(AudioError::NotRecording)));
        assert_eq!(rec.state(), RecordingState::Idle);
    }

    #[test]
    fn permission_denied_changes_nothing() {
        let _guard = serial();
        let tmp = tempdir().unwrap();
        let ext = ExternalBackend::new(16_000);
        ext.set_permission_granted(false);
        let mut rec = recorder(tmp.path(), ext.clone());

        assert!(matches!(rec.start_recording(), Err(AudioError::PermissionDenied(_))));
        assert!(!rec.is_recording());
        assert_eq!(rec.state(), RecordingState::Idle);
        assert!(!capture_in_progress());

        ext.set_permission_granted(true);
        rec.start_recording().unwrap();
        rec.stop_recording().unwrap();
    }

    #[test]
    fn backend_failures_surface_as_start_errors() {
        let _guard = serial();
        let tmp = tempdir().unwrap();

        let mut rec = recorder(
            tmp.path(),
            ScriptedBackend {
                fail_open: true,
                ..Default::default()
            },
        );
        assert!(matches!(rec.start_recording(), Err(AudioError::DeviceNotFound(_))));
        assert!(!capture_in_progress());

        let mut rec = recorder(
            tmp.path(),
            ScriptedBackend {
                fail_start: true,
                ..Default::default()
            },
        );
        assert!(matches!(rec.start_recording(), Err(AudioError::CaptureStartFailure(_))));
        assert!(!rec.is_recording());
        assert!(!capture_in_progress());
    }

    #[test]
    fn stop_error_is_best_effort() {
        let _guard = serial();
        let tmp = tempdir().unwrap();
        let mut rec = recorder(
            tmp.path(),
            ScriptedBackend {
                chunks: vec![vec![0.25; 100], vec![], vec![-0.25; 60]],
                fail_stop: true,
                ..Default::default()
            },
        );

        rec.start_recording().unwrap();
        let clip = rec.stop_recording().unwrap().unwrap();
        assert_eq!(clip.file_size_bytes, 44 + 320);
        assert_eq!(clip.duration_ms, Some(10));
        assert_eq!(rec.state(), RecordingState::Finalized);
        assert!(!capture_in_progress());
    }

    #[test]
    fn write_failure_discards_recording() {
        let _guard = serial();
        let tmp = tempdir().unwrap();
        // A file where the recordings directory should be.
        std::fs::write(tmp.path().join("recordings"), b"").unwrap();
        let ext = ExternalBackend::new(16_000);
        let mut rec = recorder(tmp.path(), ext.clone());

        rec.start_recording().unwrap();
        ext.push_chunk(&[0.1; 32]);
        assert!(matches!(
            rec.stop_recording(),
            Err(AudioError::FileSystemFailure { .. })
        ));
        assert_eq!(rec.state(), RecordingState::Discarded);
        assert!(!capture_in_progress());
    }

    #[test]
    fn metering_drives_live_waveform() {
        let _guard = serial();
        let tmp = tempdir().unwrap();
        let ext = ExternalBackend::new(16_000);
        let mut rec = recorder(tmp.path(), ext.clone());

        rec.start_recording().unwrap();
        assert!(rec.live_waveform().is_empty());
        for (i, db) in [-80.0f32, -65.0, -60.0, -30.0, -10.0, 0.0].into_iter().enumerate() {
            ext.push_status(status(i as u64 * 50, db));
            ext.push_chunk(&[0.0; 800]);
        }

        let live = rec.live_waveform();
        assert_eq!(live.len(), 6);
        assert!(live.iter().all(|&a| (0.05..=1.0).contains(&a)));
        assert!(live[..3].iter().all(|&a| (a - 0.05).abs() < 1e-6));
        assert!(live[5] > live[3]);
        assert_eq!(rec.elapsed_ms(), 250);

        let clip = rec.stop_recording().unwrap().unwrap();
        assert_eq!(clip.waveform.as_deref(), Some(live.as_slice()));
        assert_eq!(clip.duration_ms, Some(300));
        assert!(rec.live_waveform().is_empty());
        assert_eq!(rec.elapsed_ms(), 0);
    }

    #[test]
    fn preset_change_applies_to_next_recording_and_persists() {
        let tmp = tempdir().unwrap();
        let mut rec = Recorder::open(tmp.path(), Box::new(ExternalBackend::new(16_000))).unwrap();
        assert_eq!(rec.sensitivity_config(), SensitivityPreset::High.config());

        rec.set_sensitivity(SensitivitySetting::Preset(SensitivityPreset::Low))
            .unwrap();
        assert_eq!(rec.sensitivity_config(), SensitivityPreset::Low.config());

        let reopened = Recorder::open(tmp.path(), Box::new(ExternalBackend::new(16_000))).unwrap();
        assert_eq!(reopened.sensitivity_config(), SensitivityPreset::Low.config());
    }

    #[test]
    fn open_sweeps_partial_clips_but_listing_does_not() {
        let tmp = tempdir().unwrap();
        let dir = tmp.path().join(clip_store::RECORDINGS_DIR);
        std::fs::create_dir_all(&dir).unwrap();
        let stale = dir.join("1000_crashed.wav.part");
        std::fs::write(&stale, b"RIFF").unwrap();

        let rec = Recorder::open(tmp.path(), Box::new(ExternalBackend::new(16_000))).unwrap();
        assert!(!stale.exists());

        let fresh = dir.join("2000_saving.wav.part");
        std::fs::write(&fresh, b"RIFF").unwrap();
        assert!(rec.list_clips().unwrap().is_empty());
        assert!(!rec.delete_clip("saving").unwrap());
        assert!(fresh.exists());
    }

    #[test]
    fn clip_details_and_delete() {
        let _guard = serial();
        let tmp = tempdir().unwrap();
        let ext = ExternalBackend::new(8_000);
        let mut rec = recorder(tmp.path(), ext.clone());

        rec.start_recording().unwrap();
        for _ in 0..10 {
            ext.push_chunk(&[0.5; 800]);
        }
        let clip = rec.stop_recording().unwrap().unwrap();

        let details = rec.load_clip_details(&clip.id).unwrap().unwrap();
        assert_eq!(details.duration_ms, Some(1000));
        assert_eq!(details.waveform.as_ref().map(Vec::len), Some(20));
        assert!(rec.load_clip_details("missing").unwrap().is_none());

        assert!(rec.delete_clip(&clip.id).unwrap());
        assert!(!rec.delete_clip(&clip.id).unwrap());
        assert!(rec.list_clips().unwrap().is_empty());
    }
}

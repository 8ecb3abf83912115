use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use super::error::AudioError;
use super::session::RecordingSession;
use super::types::CaptureStatus;

// ── Backend kind ──

/// Which capture implementation produced a recording.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Cpal,
    /// Caller-driven backend (tests, imports, host platforms that push audio in).
    External,
}

// ── Stream configuration ──

/// What the caller would like (best-effort, backend negotiates).
#[derive(Clone, Debug, Default)]
pub struct StreamConfigRequest {
    pub preferred_rate: Option<u32>,
}

/// What the backend actually opened. Delivery is always mono.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NegotiatedConfig {
    pub rate: u32,
}

// ── CaptureSink: where backends push status and samples ──

/// Passed to `open_input`. The backend calls `deliver_status` roughly every
/// 50 ms and `deliver_chunk` for every block of mono f32 samples, both from
/// its own audio thread. Late deliveries after stop are ignored. A poisoned
/// session lock is recovered so capture keeps flowing into the session.
#[derive(Clone)]
pub struct CaptureSink {
    session: Arc<Mutex<RecordingSession>>,
}

impl CaptureSink {
    pub(crate) fn new(session: Arc<Mutex<RecordingSession>>) -> Self {
        Self { session }
    }

    pub fn deliver_status(&self, status: CaptureStatus) {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .on_status(&status);
    }

    pub fn deliver_chunk(&self, samples: &[f32]) {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .on_chunk(samples);
    }
}

// ── CaptureBackend trait ──

/// A microphone capture implementation. The recorder is agnostic to which
/// one is in use; backends only open streams that push into a [`CaptureSink`].
pub trait CaptureBackend: Send {
    /// Which backend this is.
    fn kind(&self) -> BackendKind;

    /// Fails with [`AudioError::PermissionDenied`] when the microphone may
    /// not be used.
    fn check_permission(&self) -> Result<(), AudioError>;

    /// Open an input stream. Call `InputHandle::start()` on the returned
    /// handle to begin capture.
    fn open_input(
        &mut self,
        config: StreamConfigRequest,
        sink: CaptureSink,
    ) -> Result<Box<dyn InputHandle>, AudioError>;
}

// ── InputHandle trait ──

/// Backend-owned handle to an open input stream.
/// Backends implement `Drop` for cleanup.
pub trait InputHandle: Send {
    /// The config that the backend actually negotiated.
    fn negotiated_config(&self) -> NegotiatedConfig;

    /// Begin capturing audio.
    fn start(&mut self) -> Result<(), AudioError>;

    /// Stop capturing (idempotent). After stop, the handle can be dropped.
    fn stop(&mut self) -> Result<(), AudioError>;

    /// Whether capture is currently active.
    fn is_running(&self) -> bool;
}

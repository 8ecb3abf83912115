use std::sync::{Arc, Mutex};

use super::backend::{
    BackendKind, CaptureBackend, CaptureSink, InputHandle, NegotiatedConfig, StreamConfigRequest,
};
use super::error::AudioError;
use super::types::CaptureStatus;

// ── ExternalBackend ──

/// Backend for hosts whose platform layer owns the microphone and pushes
/// status updates and mono PCM chunks into the recorder.
///
/// Clones share state: hand one clone to the `Recorder` and keep another on
/// the platform callback side to call `push_status` / `push_chunk`.
#[derive(Clone)]
pub struct ExternalBackend {
    shared: Arc<Mutex<ExternalState>>,
}

struct ExternalState {
    sample_rate: u32,
    permission_granted: bool,
    sink: Option<CaptureSink>,
    running: bool,
}

impl ExternalBackend {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            shared: Arc::new(Mutex::new(ExternalState {
                sample_rate,
                permission_granted: true,
                sink: None,
                running: false,
            })),
        }
    }

    /// Mirror the platform's microphone permission.
    pub fn set_permission_granted(&self, granted: bool) {
        if let Ok(mut state) = self.shared.lock() {
            state.permission_granted = granted;
        }
    }

    /// Sink of the running stream, if any. Cloned out so the lock is not held
    /// while the session processes the delivery.
    fn running_sink(&self) -> Option<CaptureSink> {
        let state = self.shared.lock().ok()?;
        if state.running {
            state.sink.clone()
        } else {
            None
        }
    }

    /// Forward a status tick. Dropped when no stream is running.
    pub fn push_status(&self, status: CaptureStatus) -> bool {
        match self.running_sink() {
            Some(sink) => {
                sink.deliver_status(status);
                true
            }
            None => false,
        }
    }

    /// Forward a block of mono samples. Dropped when no stream is running.
    pub fn push_chunk(&self, samples: &[f32]) -> bool {
        match self.running_sink() {
            Some(sink) => {
                sink.deliver_chunk(samples);
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().map(|s| s.running).unwrap_or(false)
    }
}

impl CaptureBackend for ExternalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::External
    }

    fn check_permission(&self) -> Result<(), AudioError> {
        let granted = self
            .shared
            .lock()
            .map(|s| s.permission_granted)
            .unwrap_or(false);
        if granted {
            Ok(())
        } else {
            Err(AudioError::PermissionDenied(
                "microphone access not granted by the platform".into(),
            ))
        }
    }

    fn open_input(
        &mut self,
        config: StreamConfigRequest,
        sink: CaptureSink,
    ) -> Result<Box<dyn InputHandle>, AudioError> {
        let mut state = self
            .shared
            .lock()
            .map_err(|_| AudioError::CaptureStartFailure("backend state poisoned".into()))?;
        if state.sink.is_some() {
            return Err(AudioError::CaptureStartFailure("external stream already open".into()));
        }
        if let Some(rate) = config.preferred_rate {
            if rate != state.sample_rate {
                log::info!(
                    "ExternalBackend: preferred rate {} Hz ignored, platform delivers {} Hz",
                    rate,
                    state.sample_rate
                );
            }
        }
        state.sink = Some(sink);
        state.running = false;
        Ok(Box::new(ExternalInputHandle {
            shared: self.shared.clone(),
            config: NegotiatedConfig {
                rate: state.sample_rate,
            },
        }))
    }
}

// ── ExternalInputHandle ──

struct ExternalInputHandle {
    shared: Arc<Mutex<ExternalState>>,
    config: NegotiatedConfig,
}

impl InputHandle for ExternalInputHandle {
    fn negotiated_config(&self) -> NegotiatedConfig {
        self.config.clone()
    }

    fn start(&mut self) -> Result<(), AudioError> {
        let mut state = self
            .shared
            .lock()
            .map_err(|_| AudioError::CaptureStartFailure("backend state poisoned".into()))?;
        state.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), AudioError> {
        if let Ok(mut state) = self.shared.lock() {
            state.running = false;
            state.sink = None;
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.shared.lock().map(|s| s.running).unwrap_or(false)
    }
}

impl Drop for ExternalInputHandle {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

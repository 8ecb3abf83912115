use super::aggregator::{combine_chunks, total_samples};
use super::amplitude::{db_to_amplitude, downsample_amplitudes, TemporalSmoother};
use super::error::AudioError;
use super::types::{AudioChunk, CaptureStatus, RecordingState, SensitivityConfig};

/// Bars in a finalized waveform.
pub const DEFAULT_WAVEFORM_BARS: usize = 40;
/// Trailing smoothed frames shown by the live waveform (10 s at 50 ms).
pub const DEFAULT_LIVE_WINDOW_FRAMES: usize = 200;
/// Initial amplitude history capacity (one minute of 50 ms frames).
const HISTORY_RESERVE: usize = 1200;
const CHUNK_RESERVE: usize = 256;

/// One recording, from `begin` to `finish`.
///
/// Mutated by the capture delivery path (`on_status`, `on_chunk`) while
/// `Recording` and by the recorder during stop. Deliveries in any other
/// state are ignored, so a late callback can never touch a stopped session.
#[derive(Debug)]
pub struct RecordingSession {
    id: String,
    state: RecordingState,
    sample_rate: u32,
    config: SensitivityConfig,
    chunks: Vec<AudioChunk>,
    elapsed_ms: u64,
    waveform_bars: usize,
    live_window: usize,
    /// Mapped amplitude per metering tick.
    raw_amplitudes: Vec<f32>,
    /// `raw_amplitudes` run through the smoother, kept in step.
    smoothed: Vec<f32>,
    smoother: TemporalSmoother,
    live_waveform: Vec<f32>,
}

impl RecordingSession {
    pub fn new(config: SensitivityConfig, waveform_bars: usize, live_window: usize) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            state: RecordingState::Idle,
            sample_rate: 0,
            config,
            chunks: Vec::new(),
            elapsed_ms: 0,
            waveform_bars,
            live_window: live_window.max(1),
            raw_amplitudes: Vec::new(),
            smoothed: Vec::new(),
            smoother: TemporalSmoother::new(config.smoothing_factor(), config.preserve_peaks()),
            live_waveform: Vec::new(),
        }
    }

    /// `Idle → Recording`. Resets chunks, elapsed time and amplitude history.
    pub fn begin(&mut self, sample_rate: u32) -> Result<(), AudioError> {
        if self.state != RecordingState::Idle {
            return Err(AudioError::CaptureUnavailable);
        }
        if sample_rate == 0 {
            return Err(AudioError::CaptureStartFailure("backend negotiated 0 Hz".into()));
        }
        self.sample_rate = sample_rate;
        self.chunks.clear();
        self.chunks.reserve(CHUNK_RESERVE);
        self.elapsed_ms = 0;
        self.raw_amplitudes.clear();
        self.raw_amplitudes.reserve(HISTORY_RESERVE);
        self.smoothed.clear();
        self.smoothed.reserve(HISTORY_RESERVE);
        self.smoother.reset();
        self.live_waveform.clear();
        self.state = RecordingState::Recording;
        log::info!("Session {} recording at {} Hz", self.id, sample_rate);
        Ok(())
    }

    /// Status tick from the backend. Runs the metering reading through the
    /// amplitude chain and republishes the live waveform. No I/O.
    /// Ticks from a backend that reports itself not recording are dropped.
    pub fn on_status(&mut self, status: &CaptureStatus) {
        if self.state != RecordingState::Recording || !status.is_recording {
            return;
        }
        self.elapsed_ms = status.duration_millis;

        let Some(db) = status.metering else {
            return;
        };
        let amplitude = db_to_amplitude(db, self.config.sensitivity(), self.config.noise_floor());
        self.raw_amplitudes.push(amplitude);
        self.smoothed.push(self.smoother.push(amplitude));

        let window_start = self.smoothed.len().saturating_sub(self.live_window);
        self.live_waveform = downsample_amplitudes(&self.smoothed[window_start..], self.waveform_bars);
    }

    /// Raw PCM block from the backend, kept in arrival order until stop.
    pub fn on_chunk(&mut self, samples: &[f32]) {
        if self.state != RecordingState::Recording {
            return;
        }
        self.chunks.push(AudioChunk::new(samples.to_vec()));
    }

    /// `Recording → Stopping`. From here on deliveries are ignored.
    pub fn begin_stop(&mut self) {
        if self.state == RecordingState::Recording {
            self.state = RecordingState::Stopping;
        }
    }

    /// Concatenate and release the buffered chunks.
    /// Fails with `EmptyRecording` when nothing was captured.
    pub fn take_buffer(&mut self) -> Result<Vec<f32>, AudioError> {
        let chunks = std::mem::take(&mut self.chunks);
        combine_chunks(&chunks)
    }

    /// `Stopping → Discarded | Finalized`.
    pub fn finish(&mut self, outcome: RecordingState) {
        debug_assert!(outcome.is_terminal());
        if outcome.is_terminal() {
            self.state = outcome;
        }
        self.chunks = Vec::new();
        log::info!("Session {} {:?} after {} ms", self.id, outcome, self.elapsed_ms);
    }

    /// The whole smoothed history reduced to the configured bar count.
    pub fn final_waveform(&self) -> Vec<f32> {
        downsample_amplitudes(&self.smoothed, self.waveform_bars)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn config(&self) -> &SensitivityConfig {
        &self.config
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn total_samples(&self) -> usize {
        total_samples(&self.chunks)
    }

    pub fn live_waveform(&self) -> &[f32] {
        &self.live_waveform
    }

    pub fn raw_amplitudes(&self) -> &[f32] {
        &self.raw_amplitudes
    }
}

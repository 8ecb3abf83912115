use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Sample, SampleFormat};
use std::panic;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use super::amplitude::linear_rms_to_dbfs;
use super::backend::{
    BackendKind, CaptureBackend, CaptureSink, InputHandle, NegotiatedConfig, StreamConfigRequest,
};
use super::error::AudioError;
use super::types::CaptureStatus;

/// Interval between status callbacks, in milliseconds of captured audio.
pub const STATUS_INTERVAL_MS: u32 = 50;

// ── StreamHolder ──

/// Wrapper to make cpal::Stream storable in a handle (it's !Send but we only
/// touch it from the thread that drives the recorder).
/// Includes thread affinity guard: logs a warning if dropped on a different thread.
pub(crate) struct StreamHolder {
    pub stream: cpal::Stream,
    creator_thread: std::thread::ThreadId,
}
unsafe impl Send for StreamHolder {}

impl StreamHolder {
    pub fn new(stream: cpal::Stream) -> Self {
        Self {
            stream,
            creator_thread: std::thread::current().id(),
        }
    }
}

impl Drop for StreamHolder {
    fn drop(&mut self) {
        if std::thread::current().id() != self.creator_thread {
            log::warn!(
                "StreamHolder dropped on different thread than created \
                 (created: {:?}, dropping: {:?})",
                self.creator_thread,
                std::thread::current().id()
            );
        }
    }
}

// ── MeterWindow ──

/// Accumulates mono samples into fixed windows and reports the RMS level of
/// each completed window in dBFS. Stands in for hardware metering, which
/// cpal does not expose.
#[derive(Debug)]
pub(crate) struct MeterWindow {
    window_len: usize,
    sum_sq: f64,
    count: usize,
    total_frames: u64,
    rate: u32,
}

impl MeterWindow {
    pub fn new(rate: u32, interval_ms: u32) -> Self {
        let window_len = ((rate as u64 * interval_ms as u64) / 1000).max(1) as usize;
        Self {
            window_len,
            sum_sq: 0.0,
            count: 0,
            total_frames: 0,
            rate,
        }
    }

    /// Feed one frame; returns the window level when a window completes.
    pub fn push(&mut self, sample: f32) -> Option<f32> {
        if sample.is_finite() {
            self.sum_sq += (sample as f64) * (sample as f64);
        }
        self.count += 1;
        self.total_frames += 1;
        if self.count < self.window_len {
            return None;
        }
        let rms = (self.sum_sq / self.count as f64).sqrt();
        self.sum_sq = 0.0;
        self.count = 0;
        Some(linear_rms_to_dbfs(rms))
    }

    pub fn elapsed_ms(&self) -> u64 {
        if self.rate == 0 {
            return 0;
        }
        self.total_frames * 1000 / self.rate as u64
    }
}

// ── config selection ──

/// Score a supported config for mono voice capture. Higher = better.
/// Prefers fewer channels (less downmixing) and F32.
fn config_score(cfg: &cpal::SupportedStreamConfigRange, target_rate: u32) -> i32 {
    let mut score = 0;
    match cfg.channels() {
        1 => score += 100,
        2 => score += 50,
        _ => {}
    }
    match cfg.sample_format() {
        SampleFormat::F32 => score += 50,
        SampleFormat::I16 => score += 40,
        SampleFormat::I32 => score += 30,
        SampleFormat::U16 => score += 20,
        SampleFormat::U8 => score += 10,
        _ => {}
    }
    let rate_range = cfg.min_sample_rate().0..=cfg.max_sample_rate().0;
    if rate_range.contains(&target_rate) {
        score += 200;
    }
    score
}

/// Pick the config to open. Without a preferred rate the device default is
/// used; otherwise the best config that supports the preferred rate.
fn select_config(
    device: &cpal::Device,
    preferred_rate: Option<u32>,
) -> Result<cpal::SupportedStreamConfig, AudioError> {
    let default_config = device
        .default_input_config()
        .map_err(|e| AudioError::CaptureStartFailure(format!("No input config: {}", e)))?;

    let Some(target) = preferred_rate else {
        return Ok(default_config);
    };
    if default_config.sample_rate().0 == target {
        return Ok(default_config);
    }

    let supported: Vec<_> = device
        .supported_input_configs()
        .map_err(|e| AudioError::CaptureStartFailure(format!("No supported configs: {}", e)))?
        .collect();

    let best = supported
        .iter()
        .filter(|c| (c.min_sample_rate().0..=c.max_sample_rate().0).contains(&target))
        .max_by_key(|c| config_score(c, target));

    match best {
        Some(best) => Ok(best.clone().with_sample_rate(cpal::SampleRate(target))),
        None => {
            log::warn!(
                "Preferred rate {} Hz unsupported by input device, using default {} Hz",
                target,
                default_config.sample_rate().0
            );
            Ok(default_config)
        }
    }
}

// ── build_input_stream ──

/// Build a cpal input stream that downmixes to mono, forwards every block to
/// the sink, and emits a status tick every `STATUS_INTERVAL_MS` of audio.
fn build_input_stream<T: Sample + cpal::SizedSample + Send + 'static>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sink: CaptureSink,
    active: Arc<AtomicBool>,
    debug_count: Arc<AtomicUsize>,
) -> Result<cpal::Stream, AudioError>
where
    f32: cpal::FromSample<T>,
{
    let channels = config.channels.max(1) as usize;
    let mut meter = MeterWindow::new(config.sample_rate.0, STATUS_INTERVAL_MS);
    let mut mono: Vec<f32> = Vec::with_capacity(4096);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if !active.load(Ordering::SeqCst) {
                    return;
                }

                // Wrap in catch_unwind to prevent ALSA timing panics from crashing
                let result = panic::catch_unwind(panic::AssertUnwindSafe(|| {
                    mono.clear();
                    for frame in data.chunks(channels) {
                        let sum: f32 = frame.iter().map(|s| f32::from_sample(*s)).sum();
                        mono.push(sum / frame.len() as f32);
                    }
                    sink.deliver_chunk(&mono);

                    for &s in mono.iter() {
                        if let Some(db) = meter.push(s) {
                            sink.deliver_status(CaptureStatus {
                                is_recording: true,
                                duration_millis: meter.elapsed_ms(),
                                metering: Some(db),
                            });
                        }
                    }

                    let count = debug_count.fetch_add(1, Ordering::Relaxed);
                    if count % 100 == 0 {
                        log::debug!(
                            "Capture callback #{}: {} frames, {} ms captured",
                            count,
                            mono.len(),
                            meter.elapsed_ms()
                        );
                    }
                }));

                if result.is_err() {
                    log::warn!("Audio callback panic caught (ALSA timing issue)");
                }
            },
            |err| log::error!("Recording stream error: {}", err),
            None,
        )
        .map_err(|e| AudioError::CaptureStartFailure(format!("Failed to build input stream: {}", e)))
}

/// Build an input stream that dispatches based on sample format.
fn build_input_stream_dispatch(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: SampleFormat,
    sink: CaptureSink,
    active: Arc<AtomicBool>,
    debug_count: Arc<AtomicUsize>,
) -> Result<cpal::Stream, AudioError> {
    match sample_format {
        SampleFormat::F32 => build_input_stream::<f32>(device, config, sink, active, debug_count),
        SampleFormat::I16 => build_input_stream::<i16>(device, config, sink, active, debug_count),
        SampleFormat::U16 => build_input_stream::<u16>(device, config, sink, active, debug_count),
        SampleFormat::I32 => build_input_stream::<i32>(device, config, sink, active, debug_count),
        SampleFormat::U8 => build_input_stream::<u8>(device, config, sink, active, debug_count),
        fmt => Err(AudioError::CaptureStartFailure(format!(
            "Unsupported sample format: {:?}",
            fmt
        ))),
    }
}

// ── CpalBackend ──

/// Microphone capture through cpal (ALSA on Linux, CoreAudio on macOS,
/// WASAPI on Windows) using the default input device.
#[derive(Default)]
pub struct CpalBackend;

impl CaptureBackend for CpalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cpal
    }

    fn check_permission(&self) -> Result<(), AudioError> {
        // Desktop hosts have no permission query; the OS prompts (or refuses)
        // when the stream is opened, which surfaces as CaptureStartFailure.
        Ok(())
    }

    fn open_input(
        &mut self,
        config_req: StreamConfigRequest,
        sink: CaptureSink,
    ) -> Result<Box<dyn InputHandle>, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| AudioError::DeviceNotFound("no default input device".into()))?;
        let device_name = device.name().unwrap_or_else(|_| "<unknown>".into());

        let chosen = select_config(&device, config_req.preferred_rate)?;
        let sample_format = chosen.sample_format();
        let rate = chosen.sample_rate().0;
        let channels = chosen.channels();
        let stream_config: cpal::StreamConfig = chosen.into();

        log::info!(
            "Opening input '{}': {} ch, {:?}, {} Hz (delivered as mono)",
            device_name,
            channels,
            sample_format,
            rate
        );

        let active = Arc::new(AtomicBool::new(false)); // start() sets to true
        let stream = build_input_stream_dispatch(
            &device,
            &stream_config,
            sample_format,
            sink,
            active.clone(),
            Arc::new(AtomicUsize::new(0)),
        )?;

        Ok(Box::new(CpalInputHandle {
            stream: Some(StreamHolder::new(stream)),
            active,
            config: NegotiatedConfig { rate },
        }))
    }
}

// ── CpalInputHandle ──

/// Handle to an open cpal input stream.
struct CpalInputHandle {
    stream: Option<StreamHolder>,
    active: Arc<AtomicBool>,
    config: NegotiatedConfig,
}

impl InputHandle for CpalInputHandle {
    fn negotiated_config(&self) -> NegotiatedConfig {
        self.config.clone()
    }

    fn start(&mut self) -> Result<(), AudioError> {
        self.active.store(true, Ordering::SeqCst);
        if let Some(ref holder) = self.stream {
            holder
                .stream
                .play()
                .map_err(|e| AudioError::CaptureStartFailure(format!("Failed to start stream: {}", e)))?;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), AudioError> {
        self.active.store(false, Ordering::SeqCst);
        if let Some(ref holder) = self.stream {
            if let Err(e) = holder.stream.pause() {
                log::warn!("Failed to pause input stream before release: {}", e);
            }
        }
        // Drop the stream to release OS audio resources
        self.stream = None;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.active.load(Ordering::SeqCst) && self.stream.is_some()
    }
}

impl Drop for CpalInputHandle {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

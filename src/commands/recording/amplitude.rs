// ── Metering → waveform amplitude ──
// Everything here runs inside the capture status callback: no I/O, no locks,
// and nothing that allocates in proportion to the recording length.

/// Lowest amplitude ever shown, so silent bars stay visible.
pub const MIN_AMPLITUDE: f32 = 0.05;
pub const MAX_AMPLITUDE: f32 = 1.0;

/// Metering range accepted from backends, in dB.
pub const METERING_MIN_DB: f32 = -80.0;
pub const METERING_MAX_DB: f32 = 0.0;

/// A rising frame this much louder than the previous output counts as a peak.
const PEAK_RATIO: f32 = 1.5;
/// Smoothing is cut to this fraction of its configured value on a peak.
const PEAK_SMOOTHING_SCALE: f32 = 0.3;

/// Level reported by `rms_dbfs` for digital silence.
pub const SILENCE_DBFS: f32 = -160.0;

/// Map one metering reading (dB) to a display amplitude in
/// [`MIN_AMPLITUDE`, `MAX_AMPLITUDE`].
///
/// Readings at or below `noise_floor` are a hard cutoff to the baseline.
/// Above it the level is normalized linearly and bent by `1 / sensitivity`,
/// so a higher sensitivity lifts quiet input towards full scale.
pub fn db_to_amplitude(metering_db: f32, sensitivity: f32, noise_floor: f32) -> f32 {
    if metering_db.is_nan() {
        return MIN_AMPLITUDE;
    }
    let clamped = metering_db.clamp(METERING_MIN_DB, METERING_MAX_DB);
    if clamped <= noise_floor {
        return MIN_AMPLITUDE;
    }

    let normalized = (clamped - noise_floor) / (METERING_MAX_DB - noise_floor);
    let curved = normalized.powf(1.0 / sensitivity);
    let amplitude = curved * (MAX_AMPLITUDE - MIN_AMPLITUDE) + MIN_AMPLITUDE;
    if amplitude.is_nan() {
        return MIN_AMPLITUDE;
    }
    amplitude.clamp(MIN_AMPLITUDE, MAX_AMPLITUDE)
}

/// RMS level of a block in dBFS. Empty or silent blocks report [`SILENCE_DBFS`].
pub fn rms_dbfs(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return SILENCE_DBFS;
    }
    let sum_sq: f64 = samples
        .iter()
        .filter(|s| s.is_finite())
        .map(|&s| (s as f64) * (s as f64))
        .sum();
    linear_rms_to_dbfs((sum_sq / samples.len() as f64).sqrt())
}

/// Linear RMS (full scale = 1.0) to dBFS, floored at [`SILENCE_DBFS`].
pub fn linear_rms_to_dbfs(rms: f64) -> f32 {
    if !rms.is_finite() || rms <= 0.0 {
        return SILENCE_DBFS;
    }
    ((20.0 * rms.log10()) as f32).max(SILENCE_DBFS)
}

/// Peak-adaptive exponential moving average over a whole series.
///
/// The first frame seeds the average. When `preserve_peaks` is set, a frame
/// more than 1.5x the previous output is blended with a reduced factor so
/// transients show up with less lag.
pub fn smooth_amplitudes(series: &[f32], smoothing_factor: f32, preserve_peaks: bool) -> Vec<f32> {
    let mut smoother = TemporalSmoother::new(smoothing_factor, preserve_peaks);
    series.iter().map(|&frame| smoother.push(frame)).collect()
}

/// Incremental form of [`smooth_amplitudes`]: feeding frames one by one
/// yields the same outputs as smoothing the accumulated series.
#[derive(Debug, Clone)]
pub struct TemporalSmoother {
    smoothing_factor: f32,
    preserve_peaks: bool,
    last: Option<f32>,
}

impl TemporalSmoother {
    pub fn new(smoothing_factor: f32, preserve_peaks: bool) -> Self {
        Self {
            smoothing_factor,
            preserve_peaks,
            last: None,
        }
    }

    pub fn push(&mut self, frame: f32) -> f32 {
        let out = match self.last {
            None => frame,
            Some(prev) => {
                let factor = if self.preserve_peaks && frame > prev * PEAK_RATIO {
                    self.smoothing_factor * PEAK_SMOOTHING_SCALE
                } else {
                    self.smoothing_factor
                };
                prev * factor + frame * (1.0 - factor)
            }
        };
        self.last = Some(out);
        out
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// Reduce a series to `target_length` bars by taking the maximum of each bin.
///
/// Series that already fit are returned as-is (no upsampling). Bin `i` covers
/// `floor(i * step)..floor((i + 1) * step)` with `step = len / target`.
pub fn downsample_amplitudes(series: &[f32], target_length: usize) -> Vec<f32> {
    if target_length == 0 {
        return Vec::new();
    }
    if series.len() <= target_length {
        return series.to_vec();
    }

    let step = series.len() as f64 / target_length as f64;
    (0..target_length)
        .map(|i| {
            let start = (i as f64 * step).floor() as usize;
            let end = (((i + 1) as f64 * step).floor() as usize).min(series.len());
            series[start..end.max(start + 1)]
                .iter()
                .copied()
                .fold(f32::NEG_INFINITY, f32::max)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    // ── db_to_amplitude ──

    #[test]
    fn at_or_below_floor_is_baseline() {
        for floor in [-90.0f32, -60.0, -45.0, -10.0] {
            for db in [-120.0f32, -80.0, floor - 5.0, floor] {
                assert_eq!(db_to_amplitude(db, 3.5, floor), MIN_AMPLITUDE, "db={} floor={}", db, floor);
            }
        }
    }

    #[test]
    fn full_scale_maps_to_one() {
        for s in [0.1f32, 1.0, 3.5, 20.0] {
            for floor in [-90.0f32, -60.0, -10.0] {
                let a = db_to_amplitude(0.0, s, floor);
                assert!((a - 1.0).abs() < 1e-5, "s={} floor={} -> {}", s, floor, a);
            }
        }
    }

    #[test]
    fn above_full_scale_is_clamped() {
        assert!((db_to_amplitude(12.0, 2.0, -50.0) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn non_finite_readings() {
        assert_eq!(db_to_amplitude(f32::NAN, 2.0, -50.0), MIN_AMPLITUDE);
        assert_eq!(db_to_amplitude(f32::NEG_INFINITY, 2.0, -50.0), MIN_AMPLITUDE);
        assert!((db_to_amplitude(f32::INFINITY, 2.0, -50.0) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn higher_sensitivity_lifts_quiet_input() {
        let quiet = -50.0;
        let low = db_to_amplitude(quiet, 1.0, -60.0);
        let high = db_to_amplitude(quiet, 5.0, -60.0);
        assert!(high > low, "high={} low={}", high, low);
    }

    #[test]
    fn output_always_in_range() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..20_000 {
            let db: f32 = rng.random_range(-100.0..=10.0);
            let s: f32 = rng.random_range(0.001..=20.0);
            let floor: f32 = rng.random_range(-90.0..=-10.0);
            let a = db_to_amplitude(db, s, floor);
            assert!(
                (MIN_AMPLITUDE..=MAX_AMPLITUDE).contains(&a),
                "db={} s={} floor={} -> {}",
                db,
                s,
                floor,
                a
            );
        }
    }

    #[test]
    fn metering_scenario_is_monotonic_after_floor() {
        let meter = [-80.0f32, -65.0, -60.0, -30.0, -10.0, 0.0];
        let amps: Vec<f32> = meter.iter().map(|&db| db_to_amplitude(db, 3.5, -60.0)).collect();

        assert_eq!(&amps[..3], &[MIN_AMPLITUDE; 3]);
        assert!(amps[3] > MIN_AMPLITUDE);
        assert!(amps[4] > amps[3]);
        assert!((amps[5] - 1.0).abs() < 1e-5);
        assert!(amps.windows(2).all(|w| w[1] >= w[0]));
    }

    #[test]
    fn deterministic() {
        assert_eq!(db_to_amplitude(-33.3, 2.2, -61.0), db_to_amplitude(-33.3, 2.2, -61.0));
    }

    // ── rms_dbfs ──

    #[test]
    fn rms_of_silence_is_floor() {
        assert_eq!(rms_dbfs(&[]), SILENCE_DBFS);
        assert_eq!(rms_dbfs(&[0.0; 64]), SILENCE_DBFS);
    }

    #[test]
    fn rms_of_full_scale_square_is_zero_db() {
        let square: Vec<f32> = (0..100).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        assert!(rms_dbfs(&square).abs() < 1e-4);
    }

    #[test]
    fn rms_of_half_scale_is_minus_six() {
        let db = rms_dbfs(&[0.5; 32]);
        assert!((db + 6.0206).abs() < 1e-3, "got {}", db);
    }

    #[test]
    fn linear_rms_conversion_floors_at_silence() {
        assert_eq!(linear_rms_to_dbfs(1.0), 0.0);
        assert!((linear_rms_to_dbfs(0.5) + 6.0206).abs() < 1e-3);
        assert!((linear_rms_to_dbfs(0.1) + 20.0).abs() < 1e-4);
        for rms in [0.0, -1.0, 1e-12, f64::NAN, f64::INFINITY] {
            assert_eq!(linear_rms_to_dbfs(rms), SILENCE_DBFS, "rms={}", rms);
        }
    }

    // ── smoothing ──

    #[test]
    fn smoothing_keeps_length_and_seed() {
        let series = [0.4f32, 0.9, 0.1, 0.3];
        let out = smooth_amplitudes(&series, 0.6, true);
        assert_eq!(out.len(), series.len());
        assert_eq!(out[0], series[0]);
        assert!(smooth_amplitudes(&[], 0.6, true).is_empty());
    }

    #[test]
    fn smoothing_seed_holds_for_random_series() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let len = rng.random_range(1..50);
            let series: Vec<f32> = (0..len).map(|_| rng.random_range(0.05..=1.0)).collect();
            let out = smooth_amplitudes(&series, rng.random_range(0.0..=1.0), rng.random());
            assert_eq!(out[0], series[0]);
            assert_eq!(out.len(), series.len());
        }
    }

    #[test]
    fn ema_formula_without_peaks() {
        let out = smooth_amplitudes(&[0.2, 0.8], 0.5, false);
        assert!((out[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn peak_reduces_factor_for_one_step() {
        // 0.8 > 0.2 * 1.5, so the factor drops to 0.5 * 0.3 = 0.15.
        let out = smooth_amplitudes(&[0.2, 0.8], 0.5, true);
        let expected = 0.2 * 0.15 + 0.8 * 0.85;
        assert!((out[1] - expected).abs() < 1e-6, "got {}", out[1]);

        // Next step is not a peak relative to the new output: full factor again.
        let out = smooth_amplitudes(&[0.2, 0.8, 0.7], 0.5, true);
        let expected_next = out[1] * 0.5 + 0.7 * 0.5;
        assert!((out[2] - expected_next).abs() < 1e-6);
    }

    #[test]
    fn zero_factor_passes_through() {
        let series = [0.3f32, 0.7, 0.1];
        assert_eq!(smooth_amplitudes(&series, 0.0, false), series.to_vec());
    }

    #[test]
    fn incremental_matches_batch() {
        let series = [0.05f32, 0.06, 0.5, 0.4, 0.9, 0.05, 0.05, 1.0];
        let batch = smooth_amplitudes(&series, 0.3, true);
        let mut smoother = TemporalSmoother::new(0.3, true);
        let incremental: Vec<f32> = series.iter().map(|&f| smoother.push(f)).collect();
        assert_eq!(batch, incremental);
    }

    // ── downsampling ──

    #[test]
    fn short_series_is_copied() {
        let series = [0.1f32, 0.2, 0.3];
        assert_eq!(downsample_amplitudes(&series, 40), series.to_vec());
        assert_eq!(downsample_amplitudes(&series, 3), series.to_vec());
        assert!(downsample_amplitudes(&[], 40).is_empty());
    }

    #[test]
    fn zero_target_is_empty() {
        assert!(downsample_amplitudes(&[0.5; 10], 0).is_empty());
    }

    #[test]
    fn long_series_hits_target_exactly() {
        for len in [41usize, 80, 97, 1000, 12_345] {
            let series: Vec<f32> = (0..len).map(|i| (i % 17) as f32 / 17.0).collect();
            assert_eq!(downsample_amplitudes(&series, 40).len(), 40, "len={}", len);
        }
    }

    #[test]
    fn bins_take_the_maximum() {
        let series = [0.1f32, 0.9, 0.2, 0.3, 0.05, 0.6];
        assert_eq!(downsample_amplitudes(&series, 3), vec![0.9, 0.3, 0.6]);
    }

    #[test]
    fn short_burst_survives_downsampling() {
        let mut series = vec![MIN_AMPLITUDE; 4000];
        series[2777] = 1.0;
        let out = downsample_amplitudes(&series, 40);
        assert!(out.contains(&1.0));
    }

    #[test]
    fn output_never_below_bin_max() {
        let mut rng = StdRng::seed_from_u64(99);
        for _ in 0..100 {
            let len = rng.random_range(41..2000);
            let target = rng.random_range(1..=40);
            let series: Vec<f32> = (0..len).map(|_| rng.random_range(0.05..=1.0)).collect();
            let out = downsample_amplitudes(&series, target);
            let step = len as f64 / target as f64;
            for (i, &v) in out.iter().enumerate() {
                let start = (i as f64 * step).floor() as usize;
                let end = ((i + 1) as f64 * step).floor() as usize;
                let true_max = series[start..end].iter().copied().fold(f32::MIN, f32::max);
                assert!(v >= true_max, "bin {} got {} below {}", i, v, true_max);
            }
        }
    }
}

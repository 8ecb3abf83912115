use std::io::{Cursor, Read, Write};
use std::path::Path;

use super::error::AudioError;

/// Size of the canonical RIFF/WAVE header written by [`encode_wav`].
pub const WAV_HEADER_LEN: usize = 44;

const CHANNELS: u16 = 1;
const BITS_PER_SAMPLE: u16 = 16;
const BLOCK_ALIGN: u16 = CHANNELS * BITS_PER_SAMPLE / 8;
const PCM_FORMAT: u16 = 1;

/// Quantize one float sample to PCM16.
///
/// Negative samples scale by 32768 and non-negative ones by 32767, so -1.0
/// and 1.0 land on `i16::MIN` and `i16::MAX`. NaN encodes as silence.
pub fn quantize_sample(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0).round() as i16
    } else {
        (s * 32767.0).round() as i16
    }
}

/// Inverse of [`quantize_sample`].
pub fn dequantize_sample(sample: i16) -> f32 {
    if sample < 0 {
        sample as f32 / 32768.0
    } else {
        sample as f32 / 32767.0
    }
}

/// Write the 44-byte header for a mono PCM16 stream of `data_bytes` bytes.
///
/// Layout (little-endian):
///   0  "RIFF"        4  u32 36 + data_bytes   8  "WAVE"
///  12  "fmt "       16  u32 16               20  u16 1 (PCM), u16 1 channel
///  24  u32 rate     28  u32 rate * 2         32  u16 2, u16 16
///  36  "data"       40  u32 data_bytes
fn write_header<W: Write>(w: &mut W, sample_rate: u32, data_bytes: u32) -> std::io::Result<()> {
    let byte_rate = sample_rate * BLOCK_ALIGN as u32;

    w.write_all(b"RIFF")?;
    w.write_all(&(36 + data_bytes).to_le_bytes())?;
    w.write_all(b"WAVE")?;

    w.write_all(b"fmt ")?;
    w.write_all(&16u32.to_le_bytes())?;
    w.write_all(&PCM_FORMAT.to_le_bytes())?;
    w.write_all(&CHANNELS.to_le_bytes())?;
    w.write_all(&sample_rate.to_le_bytes())?;
    w.write_all(&byte_rate.to_le_bytes())?;
    w.write_all(&BLOCK_ALIGN.to_le_bytes())?;
    w.write_all(&BITS_PER_SAMPLE.to_le_bytes())?;

    w.write_all(b"data")?;
    w.write_all(&data_bytes.to_le_bytes())?;
    Ok(())
}

/// Serialize a mono float buffer into a complete 16-bit PCM WAV file.
///
/// Output is byte-for-byte deterministic for a given buffer and rate.
pub fn encode_wav(buffer: &[f32], sample_rate: u32) -> Result<Vec<u8>, AudioError> {
    if sample_rate == 0 {
        return Err(AudioError::EncodeFailure("sample rate is 0".into()));
    }
    if sample_rate.checked_mul(BLOCK_ALIGN as u32).is_none() {
        return Err(AudioError::EncodeFailure(format!(
            "sample rate {} overflows the byte rate field",
            sample_rate
        )));
    }
    let data_bytes = buffer
        .len()
        .checked_mul(BLOCK_ALIGN as usize)
        .and_then(|n| u32::try_from(n).ok())
        .filter(|n| n.checked_add(36).is_some())
        .ok_or_else(|| {
            AudioError::EncodeFailure(format!(
                "{} samples exceed the 4 GiB RIFF limit",
                buffer.len()
            ))
        })?;

    let mut out = Vec::with_capacity(WAV_HEADER_LEN + data_bytes as usize);
    write_header(&mut out, sample_rate, data_bytes)
        .map_err(|e| AudioError::EncodeFailure(format!("header write: {}", e)))?;
    for &s in buffer {
        out.extend_from_slice(&quantize_sample(s).to_le_bytes());
    }

    debug_assert_eq!(out.len(), WAV_HEADER_LEN + data_bytes as usize);
    Ok(out)
}

/// Decoded contents of a mono PCM16 clip.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedWav {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedWav {
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }
}

fn decode_from<R: Read>(reader: R) -> Result<DecodedWav, AudioError> {
    let reader = hound::WavReader::new(reader)
        .map_err(|e| AudioError::DecodeFailure(format!("Failed to parse WAV header: {}", e)))?;
    let spec = reader.spec();

    if spec.channels != CHANNELS
        || spec.bits_per_sample != BITS_PER_SAMPLE
        || spec.sample_format != hound::SampleFormat::Int
    {
        return Err(AudioError::DecodeFailure(format!(
            "expected mono 16-bit PCM, got {} ch {}-bit {:?}",
            spec.channels, spec.bits_per_sample, spec.sample_format
        )));
    }

    let samples = reader
        .into_samples::<i16>()
        .map(|s| s.map(dequantize_sample))
        .collect::<Result<Vec<f32>, _>>()
        .map_err(|e| AudioError::DecodeFailure(format!("Error reading sample: {}", e)))?;

    Ok(DecodedWav {
        samples,
        sample_rate: spec.sample_rate,
    })
}

/// Decode bytes produced by [`encode_wav`].
pub fn decode_wav(bytes: &[u8]) -> Result<DecodedWav, AudioError> {
    decode_from(Cursor::new(bytes))
}

/// Decode a clip file from disk.
pub fn decode_wav_file(path: &Path) -> Result<DecodedWav, AudioError> {
    let file = std::fs::File::open(path).map_err(AudioError::fs(path))?;
    decode_from(std::io::BufReader::new(file))
}

/// Check that a file starts with a plausible RIFF/WAVE header whose data
/// size matches the file length.
pub fn check_wav_header_valid(path: &Path) -> bool {
    let mut header = [0u8; WAV_HEADER_LEN];
    let file_len = match std::fs::metadata(path) {
        Ok(m) => m.len(),
        Err(_) => return false,
    };
    let read = std::fs::File::open(path).and_then(|mut f| f.read_exact(&mut header));
    if read.is_err() {
        return false;
    }

    if &header[0..4] != b"RIFF" || &header[8..12] != b"WAVE" || &header[36..40] != b"data" {
        return false;
    }
    let data_size = u32::from_le_bytes([header[40], header[41], header[42], header[43]]);
    data_size as u64 + WAV_HEADER_LEN as u64 == file_len
}

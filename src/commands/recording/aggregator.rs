use super::error::AudioError;
use super::types::AudioChunk;

/// Total number of samples held by `chunks`.
pub fn total_samples(chunks: &[AudioChunk]) -> usize {
    chunks.iter().map(AudioChunk::len).sum()
}

/// Concatenate chunks into one contiguous buffer, preserving arrival order.
///
/// Pure concatenation: no resampling, no gain. Fails with
/// [`AudioError::EmptyRecording`] when the chunks hold no samples at all.
pub fn combine_chunks(chunks: &[AudioChunk]) -> Result<Vec<f32>, AudioError> {
    let total = total_samples(chunks);
    if total == 0 {
        return Err(AudioError::EmptyRecording);
    }

    let mut combined = vec![0.0f32; total];
    let mut offset = 0usize;
    for chunk in chunks {
        let end = offset + chunk.len();
        combined[offset..end].copy_from_slice(chunk.samples());
        offset = end;
    }
    debug_assert_eq!(offset, total);

    log::debug!("Combined {} chunks into {} samples", chunks.len(), total);
    Ok(combined)
}

//! Vector blob codec and similarity math.
//!
//! Embedding vectors are stored as little-endian IEEE-754 f32 blobs
//! (`4 * dimension` bytes). The codec round-trips bit-exactly; similarity
//! accumulates in f64 for precision on long vectors.

use std::borrow::Cow;

/// Encode a vector as a little-endian f32 blob (`4 * len` bytes).
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Decode a little-endian f32 blob back into a vector.
///
/// Returns `None` if the blob length is not a multiple of 4. A truncated
/// blob means a corrupted embedding row; callers skip it rather than panic.
pub fn decode_vector(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        tracing::trace!(len = bytes.len(), "Vector blob length not a multiple of 4, skipping");
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    )
}

/// Borrow a blob as an f32 slice without copying when possible.
///
/// The zero-copy path requires a little-endian target and 4-byte alignment;
/// otherwise falls back to [`decode_vector`]. Returns `None` on length
/// mismatch, same as the decoder.
pub fn vector_view(bytes: &[u8]) -> Option<Cow<'_, [f32]>> {
    #[cfg(target_endian = "little")]
    if let Ok(slice) = bytemuck::try_cast_slice::<u8, f32>(bytes) {
        return Some(Cow::Borrowed(slice));
    }
    decode_vector(bytes).map(Cow::Owned)
}

/// Cosine similarity in [-1, 1].
///
/// Returns 0.0 when the lengths differ or either vector has zero norm.
/// Accumulates in f64 so long low-magnitude vectors don't lose precision.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return 0.0;
    }
    let result = dot / denom;
    if result.is_finite() {
        result
    } else {
        0.0
    }
}

/// Map a cosine similarity onto [0, 1] so relevance thresholds compose
/// across vector and text search.
pub fn normalize_similarity(cosine: f64) -> f64 {
    ((cosine + 1.0) / 2.0).clamp(0.0, 1.0)
}

//! Vector utilities for the fixed-width index schema.
//!
//! The index stores every vector at one width (384 by default). Model
//! output is passed through [`fit_width`] before it is written.

/// Default vector width of the index schema.
pub const DEFAULT_VECTOR_WIDTH: usize = 384;

/// Brings a model vector to the index width.
///
/// Longer vectors are truncated. Shorter vectors are an error unless `pad`
/// is set, in which case they are zero-padded.
///
/// ```rust
/// use llm_index_core::embedding::fit_width;
///
/// assert_eq!(fit_width(vec![1.0, 2.0, 3.0], 2, false).unwrap(), vec![1.0, 2.0]);
/// assert!(fit_width(vec![1.0], 2, false).is_err());
/// assert_eq!(fit_width(vec![1.0], 2, true).unwrap(), vec![1.0, 0.0]);
/// ```
pub fn fit_width(mut vector: Vec<f32>, width: usize, pad: bool) -> Result<Vec<f32>, String> {
    if vector.len() >= width {
        vector.truncate(width);
        return Ok(vector);
    }
    if vector.is_empty() {
        return Err("model returned an empty vector".to_string());
    }
    if !pad {
        return Err(format!(
            "model returned {} dimensions, index expects {}",
            vector.len(),
            width
        ));
    }
    vector.resize(width, 0.0);
    Ok(vector)
}

/// Scales a vector to unit length in place. Zero vectors are left alone.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

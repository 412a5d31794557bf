//! Vector math shared by the index, the centroid service and the reranker.

use crate::error::{Error, Result};

/// Norms below this are treated as zero and cannot be normalized.
pub const NORM_EPSILON: f32 = 1e-10;

/// L2 norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Dot product. For unit vectors this is the cosine similarity.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Normalize to unit length, rejecting NaN/Inf components and near-zero norms.
pub fn normalized(v: &[f32]) -> Result<Vec<f32>> {
    if v.iter().any(|x| !x.is_finite()) {
        return Err(Error::validation("vector contains NaN or infinite values"));
    }
    let norm = l2_norm(v);
    if norm < NORM_EPSILON {
        return Err(Error::validation(format!(
            "vector has zero or near-zero norm ({norm}), cannot normalize"
        )));
    }
    Ok(v.iter().map(|x| x / norm).collect())
}

/// Validate an embedding at a component boundary and return its unit-length form.
pub fn validate_embedding(v: &[f32], dimension: usize) -> Result<Vec<f32>> {
    if v.is_empty() {
        return Err(Error::validation("embedding cannot be empty"));
    }
    if v.len() != dimension {
        return Err(Error::validation(format!(
            "embedding dimension mismatch: expected {dimension}, got {}",
            v.len()
        )));
    }
    normalized(v)
}

/// Encode an embedding as little-endian f32 bytes.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|x| x.to_le_bytes()).collect()
}

/// Decode little-endian f32 bytes produced by [`embedding_to_bytes`].
pub fn embedding_from_bytes(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(Error::validation(format!(
            "embedding blob length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

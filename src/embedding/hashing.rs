//! Deterministic feature-hashing embedder.
//!
//! Each lowercase alphanumeric token is hashed with SHA-256 into one of `dimension`
//! buckets with a signed unit weight, and the bucket counts are L2-normalized. Texts
//! that share vocabulary land close together, which is enough for local use and tests.

use sha2::{Digest, Sha256};

use super::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::vector::math::normalized;

#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(Error::validation("embedding dimension must be positive"));
        }
        Ok(Self { dimension })
    }

    fn bucket(&self, token: &str) -> (usize, f32) {
        let digest = Sha256::digest(token.as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        let index = (u64::from_le_bytes(head) % self.dimension as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        (index, sign)
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

impl EmbeddingProvider for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::validation("cannot embed empty or whitespace-only text"));
        }

        let mut out = vec![0.0f32; self.dimension];
        let mut seen = 0usize;
        for token in tokens(text) {
            let (index, sign) = self.bucket(&token);
            out[index] += sign;
            seen += 1;
        }
        // Punctuation-only input still gets a stable vector.
        if seen == 0 {
            let (index, sign) = self.bucket(text);
            out[index] += sign;
        }

        // Opposite-sign collisions can cancel out entirely.
        if out.iter().all(|x| *x == 0.0) {
            let (index, _) = self.bucket(text);
            out[index] = 1.0;
        }
        normalized(&out)
    }

    fn dimensions(&self) -> usize {
        self.dimension
    }
}

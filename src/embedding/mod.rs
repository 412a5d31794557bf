//! Text-to-vector embedding pipeline.
//!
//! Provides the [`EmbeddingProvider`] trait and a deterministic feature-hashing
//! implementation (384 dimensions, L2-normalized). The provider is created via
//! [`create_provider`] from configuration; a model-backed provider plugs in behind the
//! same trait.

pub mod hashing;

use crate::error::{Error, Result};
use crate::vector::math::validate_embedding;

/// Number of dimensions in the embedding vectors.
pub const EMBEDDING_DIM: usize = 384;

/// Trait for embedding text into vectors.
///
/// All methods are synchronous; callers in async contexts should use
/// `tokio::task::spawn_blocking`.
pub trait EmbeddingProvider: Send + Sync {
    /// Short identifier recorded in the database alongside stored vectors.
    fn name(&self) -> &str;

    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of text strings. Implementations may override for batched inference.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Return the number of dimensions this provider produces.
    fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }
}

/// Embed `text` and check the result at the boundary: non-empty input, exact
/// dimension, finite and re-normalized output.
pub fn embed_text(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>> {
    if text.trim().is_empty() {
        return Err(Error::validation("cannot embed empty or whitespace-only text"));
    }
    let raw = provider.embed(text)?;
    validate_embedding(&raw, provider.dimensions())
}

/// Create an embedding provider from config.
///
/// Currently only `"hashing"` is supported.
pub fn create_provider(
    config: &crate::config::EmbeddingConfig,
) -> anyhow::Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "hashing" => Ok(Box::new(hashing::HashingEmbedder::new(config.dimension)?)),
        other => anyhow::bail!("unknown embedding provider: {other}. Supported: hashing"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<f32>);

    impl EmbeddingProvider for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }
        fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(self.0.clone())
        }
        fn dimensions(&self) -> usize {
            4
        }
    }

    #[test]
    fn blank_text_rejected_before_provider() {
        let provider = Fixed(vec![1.0, 0.0, 0.0, 0.0]);
        assert!(embed_text(&provider, "  \n\t").unwrap_err().is_validation());
    }

    #[test]
    fn output_is_renormalized() {
        let provider = Fixed(vec![3.0, 4.0, 0.0, 0.0]);
        let v = embed_text(&provider, "hello").unwrap();
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn wrong_dimension_output_rejected() {
        let provider = Fixed(vec![1.0, 0.0]);
        assert!(embed_text(&provider, "hello").unwrap_err().is_validation());
    }

    #[test]
    fn unknown_provider_is_an_error() {
        let config = crate::config::EmbeddingConfig {
            provider: "onnx".into(),
            dimension: EMBEDDING_DIM,
        };
        assert!(create_provider(&config).is_err());
    }
}

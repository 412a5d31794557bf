#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use circles::blob::{BlobStore, FsBlobStore};
use circles::config::CirclesConfig;
use circles::db;
use circles::embedding::hashing::HashingEmbedder;
use circles::embedding::{EmbeddingProvider, EMBEDDING_DIM};
use circles::Engine;
use rusqlite::Connection;

/// Open a fresh in-memory database with schema and migrations applied.
pub fn test_db() -> Connection {
    db::open_memory_database().unwrap()
}

/// Generate a deterministic 384-dim embedding with a spike at position `seed`.
/// Distinct seeds give orthogonal vectors.
pub fn test_embedding(seed: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    v[seed % EMBEDDING_DIM] = 1.0;
    v
}

/// Unit vector with the given `(position, weight)` components.
pub fn mixed_embedding(parts: &[(usize, f32)]) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    for &(pos, weight) in parts {
        v[pos % EMBEDDING_DIM] += weight;
    }
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Embedder that returns fixed vectors for known texts and falls back to feature
/// hashing for everything else. Lets tests pin exact similarities.
pub struct TableEmbedder {
    table: HashMap<String, Vec<f32>>,
    fallback: HashingEmbedder,
}

impl TableEmbedder {
    pub fn new(entries: &[(&str, Vec<f32>)]) -> Self {
        Self {
            table: entries
                .iter()
                .map(|(text, v)| (text.to_string(), v.clone()))
                .collect(),
            fallback: HashingEmbedder::new(EMBEDDING_DIM).unwrap(),
        }
    }
}

impl EmbeddingProvider for TableEmbedder {
    fn name(&self) -> &str {
        "table"
    }

    fn embed(&self, text: &str) -> circles::Result<Vec<f32>> {
        match self.table.get(text) {
            Some(v) => Ok(v.clone()),
            None => self.fallback.embed(text),
        }
    }
}

/// Config pointing every path into `dir`.
pub fn test_config(dir: &Path) -> CirclesConfig {
    let mut config = CirclesConfig::default();
    config.storage.db_path = dir.join("circles.db").to_string_lossy().into_owned();
    config.storage.blob_dir = dir.join("blobs").to_string_lossy().into_owned();
    config
}

/// Engine over an in-memory database and a blob store rooted in `dir`.
pub fn test_engine(dir: &Path, embedder: Arc<dyn EmbeddingProvider>) -> Engine {
    let config = test_config(dir);
    let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(config.resolved_blob_dir()));
    Engine::with_parts(test_db(), blobs, embedder, config).unwrap()
}

/// Engine using the default hashing embedder.
pub fn hashing_engine(dir: &Path) -> Engine {
    test_engine(dir, Arc::new(HashingEmbedder::new(EMBEDDING_DIM).unwrap()))
}

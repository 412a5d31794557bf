//! Process-wide owner of the live [`VectorIndex`].
//!
//! Every operation, including snapshot upload and download, runs under the same
//! exclusive lock. A save therefore always captures a state that some sequence of
//! completed adds produced, never a half-applied batch.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::blob::BlobStore;
use crate::error::{Error, Result};
use crate::vector::VectorIndex;

pub struct VectorService {
    index: Mutex<VectorIndex>,
    blobs: Arc<dyn BlobStore>,
    /// Blob key of the vectors artifact; the id mapping lives at `<key>.ids`.
    key: String,
}

impl VectorService {
    pub fn new(dimension: usize, blobs: Arc<dyn BlobStore>, key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            index: Mutex::new(VectorIndex::new(dimension)?),
            blobs,
            key: key.into(),
        })
    }

    fn ids_key(&self) -> String {
        format!("{}.ids", self.key)
    }

    fn lock(&self) -> Result<MutexGuard<'_, VectorIndex>> {
        self.index
            .lock()
            .map_err(|e| Error::LockPoisoned(format!("vector index: {e}")))
    }

    /// Load the persisted snapshot, if any. Returns the number of vectors loaded.
    ///
    /// A missing, unreachable or unreadable snapshot leaves the index empty and logs a
    /// warning; startup never fails because of it.
    pub fn initialize(&self) -> Result<usize> {
        let mut index = self.lock()?;
        match self.download_snapshot() {
            Ok(Some((vectors, ids))) => match index.load_bytes(&vectors, &ids) {
                Ok(()) => {
                    tracing::info!(key = %self.key, vectors = index.len(), "loaded index snapshot");
                }
                Err(e) => {
                    tracing::warn!(key = %self.key, error = %e, "index snapshot unreadable, starting fresh");
                }
            },
            Ok(None) => {
                tracing::info!(key = %self.key, "no index snapshot found, starting fresh");
            }
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "index snapshot unavailable, starting fresh");
            }
        }
        Ok(index.len())
    }

    fn download_snapshot(&self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let Some(vectors) = self.blobs.download(&self.key)? else {
            return Ok(None);
        };
        let Some(ids) = self.blobs.download(&self.ids_key())? else {
            return Ok(None);
        };
        Ok(Some((vectors, ids)))
    }

    /// Upload the current index. Failures propagate so the caller can retry.
    pub fn save_to_storage(&self) -> Result<()> {
        let index = self.lock()?;
        let (vectors, ids) = index.to_bytes();
        self.blobs.upload(&self.key, &vectors)?;
        self.blobs.upload(&self.ids_key(), &ids)?;
        tracing::info!(key = %self.key, vectors = index.len(), "saved index snapshot");
        Ok(())
    }

    pub fn add(&self, id: i64, embedding: &[f32]) -> Result<()> {
        self.lock()?.add(id, embedding)
    }

    pub fn add_batch(&self, ids: &[i64], embeddings: &[Vec<f32>]) -> Result<()> {
        self.lock()?.add_batch(ids, embeddings)
    }

    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<(i64, f32)>> {
        self.lock()?.search(query, top_k)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.lock()?.is_empty())
    }

    /// Ids currently in the index, in insertion order.
    pub fn ids(&self) -> Result<Vec<i64>> {
        Ok(self.lock()?.ids().to_vec())
    }

    pub fn dimension(&self) -> Result<usize> {
        Ok(self.lock()?.dimension())
    }

    /// Drop every vector and load `ids`/`embeddings` in their place.
    ///
    /// The replacement is validated in full before the live index is swapped.
    pub fn rebuild(&self, ids: &[i64], embeddings: &[Vec<f32>]) -> Result<()> {
        let mut index = self.lock()?;
        let mut fresh = VectorIndex::new(index.dimension())?;
        if !ids.is_empty() {
            fresh.add_batch(ids, embeddings)?;
        }
        *index = fresh;
        tracing::info!(vectors = index.len(), "index rebuilt");
        Ok(())
    }
}

//! Exact cosine-similarity index over unit-length embeddings.
//!
//! Vectors are stored row-major in one contiguous buffer and scanned linearly at query
//! time. Every stored row is normalized on the way in, so similarity is a plain dot
//! product. Insertion position is the tie-breaker for equal scores, which keeps search
//! output deterministic.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::vector::math::{self, NORM_EPSILON};
use crate::vector::snapshot;

/// Allowed deviation from unit length for rows read back from a snapshot.
const UNIT_TOLERANCE: f32 = 1e-3;

pub struct VectorIndex {
    dimension: usize,
    /// Row-major `len() * dimension` values, every row unit-length.
    data: Vec<f32>,
    /// Insertion position -> item id. Append-only.
    ids: Vec<i64>,
}

impl VectorIndex {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(Error::validation("index dimension must be positive"));
        }
        tracing::debug!(dimension, "vector index initialized");
        Ok(Self {
            dimension,
            data: Vec::new(),
            ids: Vec::new(),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Item ids in insertion order.
    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    /// Add a single embedding under `id`.
    pub fn add(&mut self, id: i64, embedding: &[f32]) -> Result<()> {
        if id < 0 {
            return Err(Error::validation(format!(
                "item id must be non-negative, got {id}"
            )));
        }
        let row = math::validate_embedding(embedding, self.dimension)?;
        self.data.extend_from_slice(&row);
        self.ids.push(id);
        tracing::debug!(id, total = self.len(), "added embedding to index");
        Ok(())
    }

    /// Add many embeddings at once. Either every row is added or none is.
    ///
    /// Zero-norm rows are collected across the whole batch and reported together as
    /// [`Error::PartialBatch`], so the caller can repair all of them in one pass.
    pub fn add_batch(&mut self, ids: &[i64], embeddings: &[Vec<f32>]) -> Result<()> {
        if ids.len() != embeddings.len() {
            return Err(Error::validation(format!(
                "id count ({}) must match embedding count ({})",
                ids.len(),
                embeddings.len()
            )));
        }
        if ids.iter().any(|&id| id < 0) {
            return Err(Error::validation("all item ids must be non-negative"));
        }
        for (pos, embedding) in embeddings.iter().enumerate() {
            if embedding.len() != self.dimension {
                return Err(Error::validation(format!(
                    "embedding at position {pos} has dimension {}, expected {}",
                    embedding.len(),
                    self.dimension
                )));
            }
            if embedding.iter().any(|x| !x.is_finite()) {
                return Err(Error::validation(format!(
                    "embedding at position {pos} contains NaN or infinite values"
                )));
            }
        }

        let norms: Vec<f32> = embeddings.iter().map(|e| math::l2_norm(e)).collect();
        let zero_positions: Vec<usize> = norms
            .iter()
            .enumerate()
            .filter(|&(_, &n)| n < NORM_EPSILON)
            .map(|(pos, _)| pos)
            .collect();
        if !zero_positions.is_empty() {
            return Err(Error::PartialBatch {
                positions: zero_positions,
            });
        }

        self.data.reserve(embeddings.len() * self.dimension);
        for (embedding, norm) in embeddings.iter().zip(norms) {
            self.data.extend(embedding.iter().map(|x| x / norm));
        }
        self.ids.extend_from_slice(ids);
        tracing::debug!(batch = ids.len(), total = self.len(), "added embedding batch to index");
        Ok(())
    }

    /// Return up to `top_k` `(id, similarity)` pairs, most similar first.
    ///
    /// An empty index yields an empty result rather than an error.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<(i64, f32)>> {
        if top_k == 0 {
            return Err(Error::validation("top_k must be positive"));
        }
        if query.is_empty() {
            return Err(Error::validation("query embedding cannot be empty"));
        }
        if query.len() != self.dimension {
            return Err(Error::validation(format!(
                "query dimension mismatch: expected {}, got {}",
                self.dimension,
                query.len()
            )));
        }
        if self.is_empty() {
            tracing::warn!("searching empty index, returning no results");
            return Ok(Vec::new());
        }
        let query = math::normalized(query)?;

        let mut scored: Vec<(usize, f32)> = self
            .data
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(pos, row)| (pos, math::dot(&query, row)))
            .collect();

        // Similarity descending, then insertion position ascending.
        let by_rank = |a: &(usize, f32), b: &(usize, f32)| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then(a.0.cmp(&b.0))
        };
        if top_k < scored.len() {
            scored.select_nth_unstable_by(top_k - 1, by_rank);
            scored.truncate(top_k);
        }
        scored.sort_by(by_rank);

        let results: Vec<(i64, f32)> = scored
            .into_iter()
            .map(|(pos, sim)| (self.ids[pos], sim))
            .collect();
        tracing::debug!(returned = results.len(), top_k, "index search complete");
        Ok(results)
    }

    /// Serialize to the two snapshot artifacts `(vectors, ids)`.
    pub fn to_bytes(&self) -> (Vec<u8>, Vec<u8>) {
        (
            snapshot::encode_vectors(self.dimension, &self.data),
            snapshot::encode_ids(&self.ids),
        )
    }

    /// Replace the contents with a decoded snapshot. On error the index is untouched.
    pub fn load_bytes(&mut self, vectors: &[u8], ids: &[u8]) -> Result<()> {
        let (dimension, data) = snapshot::decode_vectors(vectors)?;
        let ids = snapshot::decode_ids(ids)?;
        if dimension != self.dimension {
            return Err(Error::CorruptSnapshot(format!(
                "snapshot dimension {dimension} does not match index dimension {}",
                self.dimension
            )));
        }
        if data.len() != ids.len() * dimension {
            return Err(Error::CorruptSnapshot(format!(
                "snapshot holds {} vectors but {} ids",
                data.len() / dimension,
                ids.len()
            )));
        }
        if let Some(id) = ids.iter().find(|id| **id < 0) {
            return Err(Error::CorruptSnapshot(format!("snapshot holds negative id {id}")));
        }
        for (pos, row) in data.chunks_exact(dimension).enumerate() {
            if row.iter().any(|x| !x.is_finite()) {
                return Err(Error::CorruptSnapshot(format!(
                    "snapshot row {pos} contains NaN or infinite values"
                )));
            }
            let norm = math::l2_norm(row);
            if (norm - 1.0).abs() > UNIT_TOLERANCE {
                return Err(Error::CorruptSnapshot(format!(
                    "snapshot row {pos} has norm {norm}, expected unit length"
                )));
            }
        }
        self.data = data;
        self.ids = ids;
        Ok(())
    }

    /// Write the snapshot to `path` and `path.ids`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let ids_path = ids_path(path);
        let (vectors, ids) = self.to_bytes();
        write_file(path, &vectors)?;
        write_file(&ids_path, &ids)?;
        tracing::info!(path = %path.display(), vectors = self.len(), "saved index");
        Ok(())
    }

    /// Load a snapshot written by [`save`](Self::save).
    ///
    /// Returns `Ok(false)` when either artifact does not exist, so callers can start
    /// from an empty index.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<bool> {
        let path = path.as_ref();
        let ids_path = ids_path(path);
        if !path.exists() || !ids_path.exists() {
            tracing::warn!(path = %path.display(), "index snapshot not found");
            return Ok(false);
        }
        let vectors = read_file(path)?;
        let ids = read_file(&ids_path)?;
        self.load_bytes(&vectors, &ids)?;
        tracing::info!(path = %path.display(), vectors = self.len(), "loaded index");
        Ok(true)
    }
}

/// Location of the id-mapping artifact that accompanies a vectors artifact.
pub fn ids_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".ids");
    PathBuf::from(name)
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIM: usize = 384;

    fn spike(pos: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; DIM];
        v[pos % DIM] = 1.0;
        v
    }

    /// Non-unit vector pointing mostly along `pos`, to exercise normalization.
    fn scaled_mix(pos: usize, other: usize, scale: f32) -> Vec<f32> {
        let mut v = vec![0.0f32; DIM];
        v[pos] = 3.0 * scale;
        v[other] = 1.0 * scale;
        v
    }

    fn index_with(ids: &[i64]) -> VectorIndex {
        let mut index = VectorIndex::new(DIM).unwrap();
        for &id in ids {
            index.add(id, &spike(id as usize * 7)).unwrap();
        }
        index
    }

    #[test]
    fn zero_dimension_rejected() {
        assert!(VectorIndex::new(0).is_err());
    }

    #[test]
    fn add_grows_index() {
        let mut index = VectorIndex::new(DIM).unwrap();
        assert!(index.is_empty());
        index.add(10, &spike(0)).unwrap();
        index.add(3, &spike(1)).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.ids(), &[10, 3]);
    }

    #[test]
    fn add_rejects_bad_input() {
        let mut index = VectorIndex::new(DIM).unwrap();
        assert!(index.add(-1, &spike(0)).unwrap_err().is_validation());
        assert!(index.add(1, &[]).unwrap_err().is_validation());
        assert!(index.add(1, &[1.0, 0.0]).unwrap_err().is_validation());
        assert!(index.add(1, &vec![0.0; DIM]).unwrap_err().is_validation());
        assert!(index.is_empty());
    }

    #[test]
    fn self_match_for_every_entry() {
        let ids = [1, 2, 3, 40, 41];
        let index = index_with(&ids);
        for &id in &ids {
            let results = index.search(&spike(id as usize * 7), 1).unwrap();
            assert_eq!(results[0].0, id);
            assert!(results[0].1 > 0.99);
        }
    }

    #[test]
    fn search_returns_requested_id_first() {
        let index = index_with(&[1, 2, 3]);
        let results = index.search(&spike(14), 3).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].0, 2);
        assert!(results[0].1 > 0.99);
    }

    #[test]
    fn search_normalizes_stored_and_query_vectors() {
        let mut index = VectorIndex::new(DIM).unwrap();
        index.add(1, &scaled_mix(0, 1, 10.0)).unwrap();
        index.add(2, &scaled_mix(1, 0, 0.5)).unwrap();
        let results = index.search(&scaled_mix(0, 1, 0.01), 2).unwrap();
        assert_eq!(results[0].0, 1);
        assert!((results[0].1 - 1.0).abs() < 1e-5);
        // cos between (3,1) and (1,3) is 6/10.
        assert!((results[1].1 - 0.6).abs() < 1e-5);
    }

    #[test]
    fn ties_keep_insertion_order() {
        let mut index = VectorIndex::new(DIM).unwrap();
        for id in [9, 4, 7] {
            index.add(id, &spike(5)).unwrap();
        }
        let results = index.search(&spike(5), 3).unwrap();
        let ids: Vec<i64> = results.iter().map(|r| r.0).collect();
        assert_eq!(ids, vec![9, 4, 7]);

        let top_two = index.search(&spike(5), 2).unwrap();
        assert_eq!(top_two.iter().map(|r| r.0).collect::<Vec<_>>(), vec![9, 4]);
    }

    #[test]
    fn top_k_larger_than_index() {
        let index = index_with(&[1, 2]);
        assert_eq!(index.search(&spike(7), 50).unwrap().len(), 2);
    }

    #[test]
    fn search_rejects_bad_query() {
        let index = index_with(&[1]);
        assert!(index.search(&spike(7), 0).is_err());
        assert!(index.search(&[], 1).is_err());
        assert!(index.search(&[1.0], 1).is_err());
        assert!(index.search(&vec![0.0; DIM], 1).is_err());
    }

    #[test]
    fn empty_index_search_is_empty() {
        let index = VectorIndex::new(DIM).unwrap();
        assert!(index.search(&spike(0), 5).unwrap().is_empty());
    }

    #[test]
    fn batch_add_reports_every_zero_norm_position() {
        let mut index = VectorIndex::new(DIM).unwrap();
        let embeddings = vec![spike(0), vec![0.0; DIM], spike(2), vec![0.0; DIM]];
        let err = index.add_batch(&[1, 2, 3, 4], &embeddings).unwrap_err();
        match err {
            Error::PartialBatch { positions } => assert_eq!(positions, vec![1, 3]),
            other => panic!("unexpected error: {other}"),
        }
        assert!(index.is_empty());
    }

    #[test]
    fn batch_add_validates_shape() {
        let mut index = VectorIndex::new(DIM).unwrap();
        assert!(index.add_batch(&[1, 2], &[spike(0)]).is_err());
        assert!(index.add_batch(&[-1], &[spike(0)]).is_err());
        assert!(index.add_batch(&[1], &[vec![1.0; 3]]).is_err());
        assert!(index.is_empty());
    }

    #[test]
    fn batch_add_matches_single_add() {
        let mut batch = VectorIndex::new(DIM).unwrap();
        batch
            .add_batch(&[5, 6], &[scaled_mix(0, 1, 2.0), scaled_mix(1, 0, 4.0)])
            .unwrap();
        let mut single = VectorIndex::new(DIM).unwrap();
        single.add(5, &scaled_mix(0, 1, 2.0)).unwrap();
        single.add(6, &scaled_mix(1, 0, 4.0)).unwrap();

        let q = scaled_mix(0, 1, 1.0);
        let a = batch.search(&q, 2).unwrap();
        let b = single.search(&q, 2).unwrap();
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.0, y.0);
            assert!((x.1 - y.1).abs() < 1e-6);
        }
    }

    #[test]
    fn save_and_load_round_trip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("items.index");

        let index = index_with(&[12, 3, 99, 4]);
        index.save(&path).unwrap();
        assert!(ids_path(&path).exists());

        let mut restored = VectorIndex::new(DIM).unwrap();
        assert!(restored.load(&path).unwrap());
        assert_eq!(restored.ids(), index.ids());

        let q = spike(3 * 7);
        let before = index.search(&q, 4).unwrap();
        let after = restored.search(&q, 4).unwrap();
        for (x, y) in before.iter().zip(after.iter()) {
            assert_eq!(x.0, y.0);
            assert!((x.1 - y.1).abs() < 1e-2);
        }
    }

    #[test]
    fn load_missing_snapshot_is_not_found() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut index = VectorIndex::new(DIM).unwrap();
        assert!(!index.load(tmp.path().join("missing.index")).unwrap());
        assert!(index.is_empty());
    }

    #[test]
    fn load_rejects_dimension_mismatch() {
        let small = {
            let mut i = VectorIndex::new(4).unwrap();
            i.add(1, &[1.0, 0.0, 0.0, 0.0]).unwrap();
            i
        };
        let (vectors, ids) = small.to_bytes();
        let mut index = index_with(&[7]);
        let err = index.load_bytes(&vectors, &ids).unwrap_err();
        assert!(matches!(err, Error::CorruptSnapshot(_)));
        assert_eq!(index.ids(), &[7]);
    }

    #[test]
    fn load_rejects_count_mismatch() {
        let index = index_with(&[1, 2]);
        let (vectors, _) = index.to_bytes();
        let ids = snapshot::encode_ids(&[1]);
        let mut restored = VectorIndex::new(DIM).unwrap();
        assert!(restored.load_bytes(&vectors, &ids).is_err());
    }

    fn rows_snapshot(rows: &[[f32; 2]], ids: &[i64]) -> (Vec<u8>, Vec<u8>) {
        let data: Vec<f32> = rows.iter().flatten().copied().collect();
        (snapshot::encode_vectors(2, &data), snapshot::encode_ids(ids))
    }

    #[test]
    fn load_accepts_unit_rows() {
        let (vectors, ids) = rows_snapshot(&[[1.0, 0.0], [0.6, 0.8]], &[1, 2]);
        let mut index = VectorIndex::new(2).unwrap();
        index.load_bytes(&vectors, &ids).unwrap();
        assert_eq!(index.ids(), &[1, 2]);
    }

    #[test]
    fn load_rejects_corrupt_rows_and_ids() {
        let cases = [
            rows_snapshot(&[[1.0, 0.0], [f32::NAN, 0.0]], &[1, 2]),
            rows_snapshot(&[[1.0, 0.0], [f32::INFINITY, 0.0]], &[1, 2]),
            rows_snapshot(&[[1.0, 0.0], [5.0, 0.0]], &[1, 2]),
            rows_snapshot(&[[1.0, 0.0], [0.0, 0.0]], &[1, 2]),
            rows_snapshot(&[[1.0, 0.0], [0.0, 1.0]], &[1, -7]),
        ];
        for (vectors, ids) in cases {
            let mut index = VectorIndex::new(2).unwrap();
            index.add(9, &[0.0, 1.0]).unwrap();
            let err = index.load_bytes(&vectors, &ids).unwrap_err();
            assert!(matches!(err, Error::CorruptSnapshot(_)));
            // Untouched on failure.
            assert_eq!(index.ids(), &[9]);
        }
    }
}

//! Personalized reranking of raw vector-search candidates.
//!
//! Each candidate's final score fuses four signals with fixed, public weights:
//!
//! | Signal | Weight |
//! |--------|--------|
//! | base similarity from the vector index | 0.40 |
//! | max similarity between the query and the centroids of the item's circles | 0.40 |
//! | boost when a person placed the item in any circle | +0.15 |
//! | penalty for a low-confidence system suggestion | -0.05 |
//!
//! - [`cache`]: bounded per-owner cache of centroid signals
//! - [`context`]: prompt-ready rendering of retrieved items

pub mod cache;
pub mod context;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::Connection;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::store::{circles, items, memberships, ItemId, Membership, OwnerId};
use crate::vector::math::{dot, validate_embedding};
use cache::{CentroidSignals, QueryDigest, SignalCache};

pub use context::format_rag_context;

pub const BASE_WEIGHT: f32 = 0.40;
pub const CENTROID_WEIGHT: f32 = 0.40;
pub const USER_ASSIGNED_BOOST: f32 = 0.15;
pub const LOW_CONFIDENCE_PENALTY: f32 = 0.05;
/// Suggestions scored below this confidence are penalized.
pub const LOW_CONFIDENCE_THRESHOLD: f32 = 0.5;

/// A reranked candidate with its score breakdown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedResult {
    pub item_id: ItemId,
    pub final_score: f32,
    pub base_similarity: f32,
    pub centroid_similarity: f32,
}

/// Learning signal derived from an item's memberships.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LearningSignal {
    pub is_user_assigned: bool,
    pub confidence_score: Option<f32>,
}

impl LearningSignal {
    /// Collapse an item's memberships into one signal: the first membership is the
    /// representative unless any membership is user-assigned.
    pub fn from_memberships(memberships: &[Membership]) -> Self {
        let representative = memberships
            .iter()
            .find(|m| m.is_user_assigned)
            .or_else(|| memberships.first());
        match representative {
            Some(m) => Self {
                is_user_assigned: m.is_user_assigned,
                confidence_score: m.confidence_score,
            },
            None => Self::default(),
        }
    }

    pub fn boost(&self) -> f32 {
        if self.is_user_assigned {
            USER_ASSIGNED_BOOST
        } else {
            0.0
        }
    }

    pub fn penalty(&self) -> f32 {
        match self.confidence_score {
            Some(c) if !self.is_user_assigned && c < LOW_CONFIDENCE_THRESHOLD => {
                LOW_CONFIDENCE_PENALTY
            }
            _ => 0.0,
        }
    }
}

/// `0.40·base + 0.40·centroid + boost − penalty`.
pub fn fuse_score(base: f32, centroid: f32, signal: LearningSignal) -> f32 {
    BASE_WEIGHT * base + CENTROID_WEIGHT * centroid + signal.boost() - signal.penalty()
}

pub struct PersonalizedRetrievalService {
    dimension: usize,
    cache: Mutex<SignalCache>,
}

impl PersonalizedRetrievalService {
    pub fn new(dimension: usize, cache_capacity: usize, cache_ttl: Duration) -> Self {
        Self {
            dimension,
            cache: Mutex::new(SignalCache::new(cache_capacity, cache_ttl)),
        }
    }

    fn cache(&self) -> Result<MutexGuard<'_, SignalCache>> {
        self.cache
            .lock()
            .map_err(|e| Error::LockPoisoned(format!("retrieval cache: {e}")))
    }

    /// Rerank raw `(item_id, base_similarity)` candidates for `owner`.
    ///
    /// Foreign items are dropped, the rest are scored with [`fuse_score`] and sorted
    /// best first. The sort is stable, so equal scores keep their candidate order.
    pub fn retrieve_and_rerank(
        &self,
        conn: &Connection,
        query: &[f32],
        owner: OwnerId,
        candidates: &[(ItemId, f32)],
        top_k: usize,
    ) -> Result<Vec<RankedResult>> {
        if top_k == 0 {
            return Err(Error::validation("top_k must be positive"));
        }
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let query = validate_embedding(query, self.dimension)?;

        let ids: Vec<ItemId> = candidates.iter().map(|(id, _)| *id).collect();
        let owned = items::owned_item_ids(conn, owner, &ids)?;
        let candidates: Vec<(ItemId, f32)> = candidates
            .iter()
            .copied()
            .filter(|(id, _)| owned.contains(id))
            .collect();
        if candidates.len() < ids.len() {
            tracing::debug!(dropped = ids.len() - candidates.len(), "filtered foreign candidates");
        }
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let centroid_sims = self.centroid_signals(conn, &query, owner)?;
        let owned_ids: Vec<ItemId> = candidates.iter().map(|(id, _)| *id).collect();
        let signals: HashMap<ItemId, LearningSignal> =
            memberships::memberships_for_items(conn, &owned_ids)?
                .into_iter()
                .map(|(id, ms)| (id, LearningSignal::from_memberships(&ms)))
                .collect();

        let mut ranked: Vec<RankedResult> = candidates
            .into_iter()
            .map(|(item_id, base_similarity)| {
                let centroid_similarity = centroid_sims.get(&item_id).copied().unwrap_or(0.0);
                let signal = signals.get(&item_id).copied().unwrap_or_default();
                RankedResult {
                    item_id,
                    final_score: fuse_score(base_similarity, centroid_similarity, signal),
                    base_similarity,
                    centroid_similarity,
                }
            })
            .collect();

        ranked.sort_by(|a, b| b.final_score.total_cmp(&a.final_score));
        ranked.truncate(top_k);
        Ok(ranked)
    }

    /// Item → max centroid similarity for every item in one of the owner's
    /// centroid-bearing circles, served from the cache when fresh.
    fn centroid_signals(
        &self,
        conn: &Connection,
        query: &[f32],
        owner: OwnerId,
    ) -> Result<Arc<CentroidSignals>> {
        let digest = QueryDigest::of(query);
        if let Some(hit) = self.cache()?.get(owner, digest) {
            tracing::debug!(%digest, "centroid signal cache hit");
            return Ok(hit);
        }

        let circle_sims: HashMap<_, f32> = circles::circles_with_centroid(conn, owner)?
            .into_iter()
            .filter(|(_, _, centroid)| centroid.len() == query.len())
            .map(|(id, _, centroid)| (id, dot(query, &centroid)))
            .collect();

        let mut item_max: CentroidSignals = HashMap::new();
        if !circle_sims.is_empty() {
            for (item_id, circle_id) in memberships::owner_centroid_links(conn, owner)? {
                let sim = circle_sims.get(&circle_id).copied().unwrap_or(0.0);
                let entry = item_max.entry(item_id).or_insert(0.0);
                *entry = entry.max(sim);
            }
        }

        let signals = Arc::new(item_max);
        self.cache()?.insert(owner, digest, signals.clone());
        Ok(signals)
    }

    /// Forget cached centroid signals for `owner`. Call after any of the owner's
    /// centroids change.
    pub fn invalidate_owner(&self, owner: OwnerId) -> Result<()> {
        let removed = self.cache()?.invalidate_owner(owner);
        if removed > 0 {
            tracing::debug!(%owner, removed, "invalidated centroid signal cache");
        }
        Ok(())
    }

    pub fn clear_cache(&self) -> Result<()> {
        self.cache()?.clear();
        Ok(())
    }

    /// `(hits, misses, entries)` of the centroid signal cache.
    pub fn cache_stats(&self) -> Result<(u64, u64, usize)> {
        let cache = self.cache()?;
        Ok((cache.stats().hits(), cache.stats().misses(), cache.len()))
    }

    /// See [`context::format_rag_context`].
    pub fn format_rag_context(
        &self,
        conn: &Connection,
        item_ids: &[ItemId],
        max_tokens: usize,
    ) -> Result<String> {
        format_rag_context(conn, item_ids, max_tokens)
    }
}

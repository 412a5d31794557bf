//! Incremental centroid learning for circles.
//!
//! A circle's centroid is the renormalized running mean of its members' embeddings.
//! With `k` the member count *after* the change:
//!
//! - add: `k == 1` gives `normalize(new)`, otherwise `normalize((k-1)*old + new)`
//! - remove: `k == 0` clears the centroid, otherwise `normalize((k+1)*old - removed)`
//!
//! The store-bound operations take the caller's [`Transaction`] so the count read, the
//! update and the centroid write commit or roll back together with the membership
//! write that triggered them.

use rusqlite::{Connection, Transaction};
use serde::Serialize;

use crate::embedding::{embed_text, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::store::{circles, items, memberships, CircleId, ItemId, OwnerId};
use crate::vector::math::{dot, normalized, validate_embedding};

/// Centroid after a member joins. `k` counts members including the new one.
pub fn centroid_after_add(old: Option<&[f32]>, new: &[f32], k: usize) -> Result<Vec<f32>> {
    match old {
        Some(old) if k > 1 => {
            if old.len() != new.len() {
                return Err(Error::validation(format!(
                    "centroid dimension {} does not match embedding dimension {}",
                    old.len(),
                    new.len()
                )));
            }
            let weight = (k - 1) as f32;
            let combined: Vec<f32> = old.iter().zip(new).map(|(c, e)| weight * c + e).collect();
            normalized(&combined)
        }
        _ => normalized(new),
    }
}

/// Centroid after a member leaves. `k` counts the members that remain; `None` once
/// the circle is empty.
pub fn centroid_after_remove(old: &[f32], removed: &[f32], k: usize) -> Result<Option<Vec<f32>>> {
    if k == 0 {
        return Ok(None);
    }
    if old.len() != removed.len() {
        return Err(Error::validation(format!(
            "centroid dimension {} does not match embedding dimension {}",
            old.len(),
            removed.len()
        )));
    }
    let weight = (k + 1) as f32;
    let combined: Vec<f32> = old.iter().zip(removed).map(|(c, e)| weight * c - e).collect();
    normalized(&combined).map(Some)
}

/// A circle scored against a query vector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircleMatch {
    pub circle_id: CircleId,
    pub name: String,
    /// Cosine similarity, rounded to two decimals for predictions.
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct CentroidService {
    dimension: usize,
}

impl CentroidService {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Set the centroid of a circle that just received its first member.
    pub fn initialize_centroid(
        &self,
        tx: &Transaction<'_>,
        circle_id: CircleId,
        first_embedding: &[f32],
    ) -> Result<Vec<f32>> {
        // NotFound for a missing circle before anything is written.
        circles::get_centroid(tx, circle_id)?;
        let centroid = validate_embedding(first_embedding, self.dimension)?;
        circles::set_centroid(tx, circle_id, Some(&centroid))?;
        tracing::debug!(circle_id, "centroid initialized");
        Ok(centroid)
    }

    /// Fold a newly added member into the centroid. The membership row must already be
    /// written in `tx`.
    pub fn update_centroid_add(
        &self,
        tx: &Transaction<'_>,
        circle_id: CircleId,
        new_embedding: &[f32],
    ) -> Result<Vec<f32>> {
        let new = validate_embedding(new_embedding, self.dimension)?;
        let old = circles::get_centroid(tx, circle_id)?;
        let k = memberships::membership_count(tx, circle_id)?;
        if k == 0 {
            return Err(Error::validation(format!(
                "circle {circle_id} has no members; write the membership before updating its centroid"
            )));
        }
        if k > 1 && old.is_none() {
            tracing::warn!(circle_id, members = k, "circle had members but no centroid, seeding from new member");
        }

        let centroid = centroid_after_add(old.as_deref(), &new, k)?;
        circles::set_centroid(tx, circle_id, Some(&centroid))?;
        tracing::debug!(circle_id, members = k, "centroid updated after add");
        Ok(centroid)
    }

    /// Take a removed member out of the centroid. The membership row must already be
    /// deleted in `tx`. Returns `None` once the circle is empty.
    pub fn update_centroid_remove(
        &self,
        tx: &Transaction<'_>,
        circle_id: CircleId,
        removed_embedding: &[f32],
    ) -> Result<Option<Vec<f32>>> {
        let removed = validate_embedding(removed_embedding, self.dimension)?;
        let old = circles::get_centroid(tx, circle_id)?;
        let k = memberships::membership_count(tx, circle_id)?;

        let centroid = match old {
            _ if k == 0 => None,
            Some(old) => centroid_after_remove(&old, &removed, k)?,
            None => {
                tracing::warn!(circle_id, members = k, "circle had members but no centroid, rebuilding");
                return self.rebuild_centroid(tx, circle_id);
            }
        };
        circles::set_centroid(tx, circle_id, centroid.as_deref())?;
        tracing::debug!(circle_id, members = k, cleared = centroid.is_none(), "centroid updated after remove");
        Ok(centroid)
    }

    /// Recompute a centroid from the stored embeddings of the current members by
    /// replaying the add formula in membership order.
    pub fn rebuild_centroid(&self, tx: &Transaction<'_>, circle_id: CircleId) -> Result<Option<Vec<f32>>> {
        circles::get_centroid(tx, circle_id)?;
        let mut centroid: Option<Vec<f32>> = None;
        for (i, embedding) in memberships::member_embeddings(tx, circle_id)?
            .iter()
            .enumerate()
        {
            let embedding = validate_embedding(embedding, self.dimension)?;
            centroid = Some(centroid_after_add(centroid.as_deref(), &embedding, i + 1)?);
        }
        circles::set_centroid(tx, circle_id, centroid.as_deref())?;
        tracing::debug!(circle_id, defined = centroid.is_some(), "centroid rebuilt");
        Ok(centroid)
    }

    /// The owner's circles most similar to `query`, best first.
    pub fn compute_circle_similarities(
        &self,
        conn: &Connection,
        query: &[f32],
        owner: OwnerId,
        top_k: usize,
    ) -> Result<Vec<CircleMatch>> {
        if top_k == 0 {
            return Err(Error::validation("top_k must be positive"));
        }
        let query = validate_embedding(query, self.dimension)?;

        let mut matches: Vec<CircleMatch> = circles::circles_with_centroid(conn, owner)?
            .into_iter()
            .filter(|(_, _, centroid)| centroid.len() == query.len())
            .map(|(circle_id, name, centroid)| CircleMatch {
                circle_id,
                name,
                score: dot(&query, &centroid),
            })
            .collect();
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(top_k);
        Ok(matches)
    }

    /// Suggest circles for an embedding: the top `top_k` circles whose similarity is at
    /// least `threshold`, with the score rounded to two decimals.
    pub fn predict_circles_for_embedding(
        &self,
        conn: &Connection,
        embedding: &[f32],
        owner: OwnerId,
        threshold: f32,
        top_k: usize,
    ) -> Result<Vec<CircleMatch>> {
        let predictions = self
            .compute_circle_similarities(conn, embedding, owner, top_k)?
            .into_iter()
            .filter(|m| m.score >= threshold)
            .map(|m| CircleMatch {
                score: (m.score * 100.0).round() / 100.0,
                ..m
            })
            .collect();
        Ok(predictions)
    }

    /// Suggest circles for a stored item, embedding its content if no vector is stored.
    /// Items the owner does not own yield no predictions.
    pub fn predict_circles_for_item(
        &self,
        conn: &Connection,
        embedder: &dyn EmbeddingProvider,
        item_id: ItemId,
        owner: OwnerId,
        threshold: f32,
        top_k: usize,
    ) -> Result<Vec<CircleMatch>> {
        let item = match items::get_owned_item(conn, item_id, owner) {
            Ok(item) => item,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let embedding = match item.embedding {
            Some(embedding) => embedding,
            None => embed_text(embedder, &item.content)?,
        };
        self.predict_circles_for_embedding(conn, &embedding, owner, threshold, top_k)
    }
}

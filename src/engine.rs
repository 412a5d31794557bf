//! Orchestration of the retrieval engine.
//!
//! [`Engine`] owns the shared database handle, the [`VectorService`], the embedding
//! provider and the centroid/retrieval services, and exposes the user-level operations
//! (capture an item, organize it into circles, search) in terms of them. Membership
//! changes and their centroid updates always commit in one transaction.
//!
//! Lock order: the database mutex may be held while the vector index lock is taken,
//! never the other way round.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Context;
use rusqlite::{Connection, Transaction};
use serde::Serialize;

use crate::blob::{BlobStore, FsBlobStore};
use crate::centroid::{CentroidService, CircleMatch};
use crate::config::CirclesConfig;
use crate::db::{self, migrations::EmbeddingSignature};
use crate::embedding::{self, embed_text, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::retrieval::{PersonalizedRetrievalService, RankedResult};
use crate::store::{circles, items, memberships};
use crate::store::{Circle, CircleId, Item, ItemId, MembershipSource, OwnerId};
use crate::vector::VectorService;

/// Upper bound on suggestions returned for a circle.
pub const MAX_SUGGESTIONS: usize = 50;
/// Upper bound on raw candidates fetched from the index when suggesting items.
const MAX_SUGGESTION_CANDIDATES: usize = 150;

/// Result of placing an item in a circle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignOutcome {
    Assigned,
    /// The item was already in the circle; nothing changed.
    AlreadyAssigned,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedItem {
    pub item: Item,
    /// Circles the new item likely belongs to, best first.
    pub predictions: Vec<CircleMatch>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CircleSummary {
    #[serde(flatten)]
    pub circle: Circle,
    pub member_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub ranked: RankedResult,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meaning: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemSuggestion {
    pub item_id: ItemId,
    pub content: String,
    /// Similarity to the circle centroid, rounded to three decimals.
    pub similarity: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReindexReport {
    pub embedded: usize,
    pub indexed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub items: u64,
    pub circles: u64,
    pub memberships: u64,
    pub indexed_vectors: usize,
    pub dimension: usize,
    pub embedding_provider: String,
    pub cache_entries: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

pub struct Engine {
    db: Arc<Mutex<Connection>>,
    vectors: Arc<VectorService>,
    embedder: Arc<dyn EmbeddingProvider>,
    centroids: CentroidService,
    retrieval: PersonalizedRetrievalService,
    config: Arc<CirclesConfig>,
    unsaved: AtomicUsize,
}

impl Engine {
    /// Open the database and blob store named by `config`, load the index snapshot and
    /// bring it in line with the stored embeddings.
    pub fn open(config: CirclesConfig) -> anyhow::Result<Self> {
        let conn = db::open_database(config.resolved_db_path())?;
        let embedder: Arc<dyn EmbeddingProvider> = Arc::from(
            embedding::create_provider(&config.embedding)
                .context("failed to create embedding provider")?,
        );
        let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(config.resolved_blob_dir()));
        Self::with_parts(conn, blobs, embedder, config)
    }

    /// Assemble an engine from already-opened parts.
    pub fn with_parts(
        conn: Connection,
        blobs: Arc<dyn BlobStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: CirclesConfig,
    ) -> anyhow::Result<Self> {
        let dimension = embedder.dimensions();
        check_embedding_signature(&conn, embedder.as_ref())?;

        let vectors = Arc::new(VectorService::new(
            dimension,
            blobs,
            config.storage.index_key.clone(),
        )?);
        let loaded = vectors.initialize()?;

        let retrieval = PersonalizedRetrievalService::new(
            dimension,
            config.retrieval.cache_capacity,
            Duration::from_secs(config.retrieval.cache_ttl_secs),
        );

        let engine = Self {
            db: Arc::new(Mutex::new(conn)),
            vectors,
            embedder,
            centroids: CentroidService::new(dimension),
            retrieval,
            config: Arc::new(config),
            unsaved: AtomicUsize::new(0),
        };

        // The index must hold exactly the ids that have a stored embedding.
        let mut stored: Vec<ItemId> = engine.with_conn(|conn| {
            Ok(items::all_embeddings(conn)?.into_iter().map(|(id, _)| id).collect())
        })?;
        let mut indexed = engine.vectors.ids()?;
        stored.sort_unstable();
        indexed.sort_unstable();
        if stored != indexed {
            tracing::warn!(
                loaded,
                stored = stored.len(),
                "index snapshot out of date, rebuilding from database"
            );
            if let Err(e) = engine.rebuild_index() {
                tracing::warn!(error = %e, "index rebuild failed, run `circles reindex`");
            }
        }
        Ok(engine)
    }

    pub fn config(&self) -> &CirclesConfig {
        &self.config
    }

    pub fn vectors(&self) -> &Arc<VectorService> {
        &self.vectors
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|e| Error::LockPoisoned(format!("database: {e}")))
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn()?;
        f(&conn)
    }

    fn with_tx<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        embed_text(self.embedder.as_ref(), text)
    }

    // ── Items ────────────────────────────────────────────────────────────────

    /// Store a new item, index it, and predict which circles it belongs to.
    pub fn create_item(&self, owner: OwnerId, content: &str, meaning: Option<&str>) -> Result<CreatedItem> {
        let embedding = self.embed(content)?;
        let prediction = &self.config.prediction;

        let (item, predictions) = self.with_tx(|tx| {
            let id = items::insert_item(tx, owner, content, meaning)?;
            items::set_item_embedding(tx, id, &embedding)?;
            let predictions = self.centroids.predict_circles_for_embedding(
                tx,
                &embedding,
                owner,
                prediction.threshold,
                prediction.top_k,
            )?;
            Ok((items::get_item(tx, id)?, predictions))
        })?;

        self.vectors.add(item.id, &embedding)?;
        tracing::info!(item_id = item.id, predictions = predictions.len(), "item created");
        self.note_unsaved();

        Ok(CreatedItem { item, predictions })
    }

    /// Snapshot the index every `index.save_every` new items. A failed save is logged
    /// and retried at the next threshold.
    fn note_unsaved(&self) {
        let pending = self.unsaved.fetch_add(1, Ordering::SeqCst) + 1;
        if pending < self.config.index.save_every {
            return;
        }
        match self.vectors.save_to_storage() {
            Ok(()) => self.unsaved.store(0, Ordering::SeqCst),
            Err(e) => tracing::warn!(error = %e, pending, "debounced index save failed"),
        }
    }

    /// Persist the index now, regardless of the debounce counter.
    pub fn save_index(&self) -> Result<()> {
        self.vectors.save_to_storage()?;
        self.unsaved.store(0, Ordering::SeqCst);
        Ok(())
    }

    pub fn get_item(&self, owner: OwnerId, item_id: ItemId) -> Result<Item> {
        self.with_conn(|conn| items::get_owned_item(conn, item_id, owner))
    }

    pub fn list_items(&self, owner: OwnerId) -> Result<Vec<Item>> {
        self.with_conn(|conn| items::list_items(conn, owner))
    }

    pub fn update_meaning(&self, owner: OwnerId, item_id: ItemId, meaning: Option<&str>) -> Result<()> {
        self.with_conn(|conn| items::set_item_meaning(conn, item_id, owner, meaning))
    }

    /// Delete an item. Every circle it belonged to has its centroid updated as if the
    /// item had been removed, before the memberships cascade away. The index entry
    /// stays until the next rebuild; reranking drops it because the item is gone.
    pub fn delete_item(&self, owner: OwnerId, item_id: ItemId) -> Result<()> {
        let touched = self.with_tx(|tx| {
            let item = items::get_owned_item(tx, item_id, owner)?;
            let circle_ids = memberships::circle_ids_for_item(tx, item_id)?;
            for circle_id in &circle_ids {
                memberships::delete_membership(tx, item_id, *circle_id)?;
                self.centroid_after_removal(tx, *circle_id, item.embedding.as_deref())?;
            }
            items::delete_item(tx, item_id)?;
            Ok(circle_ids.len())
        })?;

        if touched > 0 {
            self.retrieval.invalidate_owner(owner)?;
        }
        tracing::info!(item_id, circles = touched, "item deleted");
        Ok(())
    }

    /// Predict circles for an existing item using the configured threshold and limit.
    pub fn predict_circles(&self, owner: OwnerId, item_id: ItemId) -> Result<Vec<CircleMatch>> {
        let prediction = &self.config.prediction;
        self.with_conn(|conn| {
            // Surface a missing item instead of an empty prediction list.
            items::get_owned_item(conn, item_id, owner)?;
            self.centroids.predict_circles_for_item(
                conn,
                self.embedder.as_ref(),
                item_id,
                owner,
                prediction.threshold,
                prediction.top_k,
            )
        })
    }

    // ── Circles ──────────────────────────────────────────────────────────────

    pub fn create_circle(&self, owner: OwnerId, name: &str, description: Option<&str>) -> Result<Circle> {
        let circle = self.with_conn(|conn| {
            let id = circles::insert_circle(conn, owner, name, description)?;
            circles::get_circle(conn, id)
        })?;
        tracing::info!(circle_id = circle.id, name = %circle.name, "circle created");
        Ok(circle)
    }

    pub fn list_circles(&self, owner: OwnerId) -> Result<Vec<CircleSummary>> {
        self.with_conn(|conn| {
            circles::list_circles(conn, owner)?
                .into_iter()
                .map(|circle| {
                    let member_count = memberships::membership_count(conn, circle.id)?;
                    Ok(CircleSummary {
                        circle,
                        member_count,
                    })
                })
                .collect()
        })
    }

    /// Delete a circle. Its memberships go with it; the items stay.
    pub fn delete_circle(&self, owner: OwnerId, circle_id: CircleId) -> Result<()> {
        self.with_tx(|tx| {
            circles::get_owned_circle(tx, circle_id, owner)?;
            circles::delete_circle(tx, circle_id)?;
            Ok(())
        })?;
        self.retrieval.invalidate_owner(owner)?;
        tracing::info!(circle_id, "circle deleted");
        Ok(())
    }

    /// Place an item in a circle on the owner's behalf. Idempotent.
    pub fn assign_item(&self, owner: OwnerId, item_id: ItemId, circle_id: CircleId) -> Result<AssignOutcome> {
        self.add_membership(owner, item_id, circle_id, MembershipSource::User)
    }

    /// Accept a system prediction, recording its confidence. Idempotent.
    pub fn accept_suggestion(
        &self,
        owner: OwnerId,
        item_id: ItemId,
        circle_id: CircleId,
        confidence: f32,
    ) -> Result<AssignOutcome> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(Error::validation(format!(
                "confidence must be within [0, 1], got {confidence}"
            )));
        }
        self.add_membership(owner, item_id, circle_id, MembershipSource::Suggested { confidence })
    }

    fn add_membership(
        &self,
        owner: OwnerId,
        item_id: ItemId,
        circle_id: CircleId,
        source: MembershipSource,
    ) -> Result<AssignOutcome> {
        let outcome = self.with_tx(|tx| {
            let item = items::get_owned_item(tx, item_id, owner)?;
            circles::get_owned_circle(tx, circle_id, owner)?;

            if !memberships::insert_membership(tx, item_id, circle_id, source)? {
                return Ok(AssignOutcome::AlreadyAssigned);
            }
            let embedding = match item.embedding {
                Some(embedding) => embedding,
                None => {
                    let embedding = self.embed(&item.content)?;
                    items::set_item_embedding(tx, item_id, &embedding)?;
                    embedding
                }
            };
            self.centroids.update_centroid_add(tx, circle_id, &embedding)?;
            Ok(AssignOutcome::Assigned)
        })?;

        if outcome == AssignOutcome::Assigned {
            self.retrieval.invalidate_owner(owner)?;
        }
        tracing::info!(item_id, circle_id, ?outcome, user = source.is_user_assigned(), "membership added");
        Ok(outcome)
    }

    /// Take an item out of a circle and update the circle's centroid.
    pub fn remove_item_from_circle(&self, owner: OwnerId, item_id: ItemId, circle_id: CircleId) -> Result<()> {
        self.with_tx(|tx| {
            let item = items::get_owned_item(tx, item_id, owner)?;
            circles::get_owned_circle(tx, circle_id, owner)?;
            if !memberships::delete_membership(tx, item_id, circle_id)? {
                return Err(Error::not_found("membership", format!("{item_id}:{circle_id}")));
            }
            self.centroid_after_removal(tx, circle_id, item.embedding.as_deref())?;
            Ok(())
        })?;
        self.retrieval.invalidate_owner(owner)?;
        tracing::info!(item_id, circle_id, "membership removed");
        Ok(())
    }

    fn centroid_after_removal(
        &self,
        tx: &Transaction<'_>,
        circle_id: CircleId,
        removed: Option<&[f32]>,
    ) -> Result<Option<Vec<f32>>> {
        match removed {
            Some(embedding) => self.centroids.update_centroid_remove(tx, circle_id, embedding),
            None => self.centroids.rebuild_centroid(tx, circle_id),
        }
    }

    /// Items similar to a circle's centroid that are not yet in it.
    pub fn suggest_items_for_circle(
        &self,
        owner: OwnerId,
        circle_id: CircleId,
        top_k: usize,
    ) -> Result<Vec<ItemSuggestion>> {
        let top_k = top_k.clamp(1, MAX_SUGGESTIONS);
        let (centroid, members) = self.with_conn(|conn| {
            let circle = circles::get_owned_circle(conn, circle_id, owner)?;
            let members = memberships::members_of_circle(conn, circle_id)?;
            Ok((circle.centroid, members))
        })?;
        let Some(centroid) = centroid else {
            tracing::debug!(circle_id, "circle has no centroid, nothing to suggest");
            return Ok(Vec::new());
        };

        let limit = (top_k * 3).min(MAX_SUGGESTION_CANDIDATES);
        let candidates: Vec<(ItemId, f32)> = self
            .vectors
            .search(&centroid, limit)?
            .into_iter()
            .filter(|(id, _)| !members.contains(id))
            .collect();
        let ids: Vec<ItemId> = candidates.iter().map(|(id, _)| *id).collect();

        let found = self.with_conn(|conn| items::fetch_items(conn, &ids))?;
        let suggestions = candidates
            .into_iter()
            .filter_map(|(id, similarity)| {
                let item = found.get(&id).filter(|item| item.owner_id == owner)?;
                Some(ItemSuggestion {
                    item_id: id,
                    content: item.content.clone(),
                    similarity: (similarity * 1000.0).round() / 1000.0,
                })
            })
            .take(top_k)
            .collect();
        Ok(suggestions)
    }

    // ── Search ───────────────────────────────────────────────────────────────

    /// Personalized search: raw index candidates reranked with circle signals.
    pub fn search(&self, owner: OwnerId, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        if top_k == 0 {
            return Err(Error::validation("top_k must be positive"));
        }
        let query_embedding = self.embed(query)?;
        let fetch = top_k.saturating_mul(self.config.retrieval.candidate_multiplier);
        let candidates = self.vectors.search(&query_embedding, fetch)?;

        self.with_conn(|conn| {
            let ranked = self
                .retrieval
                .retrieve_and_rerank(conn, &query_embedding, owner, &candidates, top_k)?;
            let ids: Vec<ItemId> = ranked.iter().map(|r| r.item_id).collect();
            let found = items::fetch_items(conn, &ids)?;
            let hits = ranked
                .into_iter()
                .filter_map(|ranked| {
                    let item = found.get(&ranked.item_id)?;
                    Some(SearchHit {
                        content: item.content.clone(),
                        meaning: item.meaning.clone(),
                        ranked,
                    })
                })
                .collect();
            Ok(hits)
        })
    }

    /// Search and render the hits as a prompt context block.
    pub fn context_for_query(
        &self,
        owner: OwnerId,
        query: &str,
        top_k: usize,
        max_tokens: Option<usize>,
    ) -> Result<String> {
        let hits = self.search(owner, query, top_k)?;
        let ids: Vec<ItemId> = hits.iter().map(|h| h.ranked.item_id).collect();
        let max_tokens = max_tokens.unwrap_or(self.config.retrieval.context_max_tokens);
        self.with_conn(|conn| self.retrieval.format_rag_context(conn, &ids, max_tokens))
    }

    // ── Maintenance ──────────────────────────────────────────────────────────

    fn rebuild_index(&self) -> Result<usize> {
        let rows = self.with_conn(items::all_embeddings)?;
        let (ids, embeddings): (Vec<ItemId>, Vec<Vec<f32>>) = rows.into_iter().unzip();
        self.vectors.rebuild(&ids, &embeddings)?;
        self.save_index()?;
        Ok(ids.len())
    }

    /// Embed items that lack a vector (every item with `reembed_all`), rebuild the
    /// index from the database and snapshot it. `on_progress` is called once per item
    /// embedded with the running count and the total.
    pub fn reindex(&self, reembed_all: bool, on_progress: &dyn Fn(usize, usize)) -> Result<ReindexReport> {
        let pending = self.with_conn(|conn| items::items_to_embed(conn, reembed_all))?;
        let total = pending.len();

        for (done, (item_id, content)) in pending.iter().enumerate() {
            let embedding = self.embed(content)?;
            self.with_conn(|conn| items::set_item_embedding(conn, *item_id, &embedding))?;
            on_progress(done + 1, total);
        }

        if reembed_all {
            self.with_tx(|tx| {
                let circle_ids: Vec<CircleId> = tx
                    .prepare("SELECT id FROM circles ORDER BY id")?
                    .query_map([], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                for circle_id in circle_ids {
                    self.centroids.rebuild_centroid(tx, circle_id)?;
                }
                db::migrations::set_embedding_signature(tx, &signature_of(self.embedder.as_ref()))?;
                Ok(())
            })?;
            self.retrieval.clear_cache()?;
        }

        let indexed = self.rebuild_index()?;
        tracing::info!(embedded = total, indexed, "reindex complete");
        Ok(ReindexReport {
            embedded: total,
            indexed,
        })
    }

    pub fn stats(&self, owner: Option<OwnerId>) -> Result<EngineStats> {
        let (items, circles, memberships) = self.with_conn(|conn| {
            Ok((
                items::count_items(conn, owner)?,
                circles::count_circles(conn, owner)?,
                memberships::count_memberships(conn)?,
            ))
        })?;
        let (cache_hits, cache_misses, cache_entries) = self.retrieval.cache_stats()?;
        Ok(EngineStats {
            items,
            circles,
            memberships,
            indexed_vectors: self.vectors.len()?,
            dimension: self.vectors.dimension()?,
            embedding_provider: self.embedder.name().to_string(),
            cache_entries,
            cache_hits,
            cache_misses,
        })
    }
}

fn signature_of(embedder: &dyn EmbeddingProvider) -> EmbeddingSignature {
    EmbeddingSignature {
        provider: embedder.name().to_string(),
        dimension: embedder.dimensions(),
    }
}

/// Record the provider on first use; warn when the stored vectors came from a
/// different one.
fn check_embedding_signature(conn: &Connection, embedder: &dyn EmbeddingProvider) -> Result<()> {
    let current = signature_of(embedder);
    match db::migrations::get_embedding_signature(conn)? {
        Some(stored) if stored != current => {
            tracing::warn!(
                stored_provider = %stored.provider,
                stored_dimension = stored.dimension,
                provider = %current.provider,
                dimension = current.dimension,
                "embedding provider changed, run `circles reindex --reembed`"
            );
        }
        Some(_) => {}
        None => db::migrations::set_embedding_signature(conn, &current)?,
    }
    Ok(())
}

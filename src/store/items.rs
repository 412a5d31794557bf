use std::collections::{HashMap, HashSet};

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{
    now, parse_owner, parse_vector, placeholders, placeholders_from, Item, ItemId, OwnerId,
};
use crate::error::{Error, Result};
use crate::vector::math::embedding_to_bytes;

const ITEM_COLUMNS: &str =
    "id, owner_id, content, meaning, embedding, created_at, updated_at";

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<Item> {
    let owner: String = row.get(1)?;
    Ok(Item {
        id: row.get(0)?,
        owner_id: parse_owner(1, &owner)?,
        content: row.get(2)?,
        meaning: row.get(3)?,
        embedding: parse_vector(4, row.get(4)?)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

/// Insert a new item. Content must contain non-whitespace text.
pub fn insert_item(
    conn: &Connection,
    owner: OwnerId,
    content: &str,
    meaning: Option<&str>,
) -> Result<ItemId> {
    if content.trim().is_empty() {
        return Err(Error::validation("item content must not be empty"));
    }
    let now = now();
    conn.execute(
        "INSERT INTO items (owner_id, content, meaning, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?4)",
        params![owner.to_string(), content, meaning, now],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn set_item_embedding(conn: &Connection, id: ItemId, embedding: &[f32]) -> Result<()> {
    let rows = conn.execute(
        "UPDATE items SET embedding = ?1, updated_at = ?2 WHERE id = ?3",
        params![embedding_to_bytes(embedding), now(), id],
    )?;
    if rows == 0 {
        return Err(Error::not_found("item", id));
    }
    Ok(())
}

pub fn set_item_meaning(
    conn: &Connection,
    id: ItemId,
    owner: OwnerId,
    meaning: Option<&str>,
) -> Result<()> {
    let rows = conn.execute(
        "UPDATE items SET meaning = ?1, updated_at = ?2 WHERE id = ?3 AND owner_id = ?4",
        params![meaning, now(), id, owner.to_string()],
    )?;
    if rows == 0 {
        return Err(Error::not_found("item", id));
    }
    Ok(())
}

pub fn get_item(conn: &Connection, id: ItemId) -> Result<Item> {
    conn.query_row(
        &format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?1"),
        params![id],
        item_from_row,
    )
    .optional()?
    .ok_or_else(|| Error::not_found("item", id))
}

/// Fetch an item only if `owner` owns it. Foreign items are reported as not found.
pub fn get_owned_item(conn: &Connection, id: ItemId, owner: OwnerId) -> Result<Item> {
    conn.query_row(
        &format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?1 AND owner_id = ?2"),
        params![id, owner.to_string()],
        item_from_row,
    )
    .optional()?
    .ok_or_else(|| Error::not_found("item", id))
}

/// The subset of `ids` owned by `owner`.
pub fn owned_item_ids(conn: &Connection, owner: OwnerId, ids: &[ItemId]) -> Result<HashSet<ItemId>> {
    if ids.is_empty() {
        return Ok(HashSet::new());
    }
    let sql = format!(
        "SELECT id FROM items WHERE owner_id = ?1 AND id IN ({})",
        placeholders_from(2, ids.len())
    );

    let owner = owner.to_string();
    let mut params: Vec<&dyn rusqlite::types::ToSql> = Vec::with_capacity(ids.len() + 1);
    params.push(&owner);
    params.extend(ids.iter().map(|id| id as &dyn rusqlite::types::ToSql));

    let mut stmt = conn.prepare(&sql)?;
    let owned = stmt
        .query_map(params.as_slice(), |row| row.get::<_, ItemId>(0))?
        .collect::<rusqlite::Result<HashSet<_>>>()?;
    Ok(owned)
}

/// Batch-fetch items by id. Missing ids are simply absent from the map.
pub fn fetch_items(conn: &Connection, ids: &[ItemId]) -> Result<HashMap<ItemId, Item>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let sql = format!(
        "SELECT {ITEM_COLUMNS} FROM items WHERE id IN ({})",
        placeholders(ids.len())
    );
    let params: Vec<&dyn rusqlite::types::ToSql> =
        ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params.as_slice(), item_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows.into_iter().map(|item| (item.id, item)).collect())
}

pub fn list_items(conn: &Connection, owner: OwnerId) -> Result<Vec<Item>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ITEM_COLUMNS} FROM items WHERE owner_id = ?1 ORDER BY id"
    ))?;
    let items = stmt
        .query_map(params![owner.to_string()], item_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(items)
}

/// Every stored embedding in id order, for rebuilding the vector index.
pub fn all_embeddings(conn: &Connection) -> Result<Vec<(ItemId, Vec<f32>)>> {
    let mut stmt =
        conn.prepare("SELECT id, embedding FROM items WHERE embedding IS NOT NULL ORDER BY id")?;
    let rows = stmt
        .query_map([], |row| {
            let id: ItemId = row.get(0)?;
            let embedding = parse_vector(1, row.get(1)?)?.unwrap_or_default();
            Ok((id, embedding))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// `(id, content)` of items that need embedding. With `all`, every item.
pub fn items_to_embed(conn: &Connection, all: bool) -> Result<Vec<(ItemId, String)>> {
    let sql = if all {
        "SELECT id, content FROM items ORDER BY id"
    } else {
        "SELECT id, content FROM items WHERE embedding IS NULL ORDER BY id"
    };
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Delete an item. Its memberships cascade; callers that care about centroids must
/// update them first.
pub fn delete_item(conn: &Connection, id: ItemId) -> Result<bool> {
    let rows = conn.execute("DELETE FROM items WHERE id = ?1", params![id])?;
    Ok(rows > 0)
}

pub fn count_items(conn: &Connection, owner: Option<OwnerId>) -> Result<u64> {
    let count: i64 = match owner {
        Some(owner) => conn.query_row(
            "SELECT COUNT(*) FROM items WHERE owner_id = ?1",
            params![owner.to_string()],
            |row| row.get(0),
        )?,
        None => conn.query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?,
    };
    Ok(count as u64)
}

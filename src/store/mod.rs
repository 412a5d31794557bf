//! Relational store: items, circles and memberships in SQLite.
//!
//! Every function takes a `&Connection`; pass a `&Transaction` (it derefs to one) when
//! the call must be atomic with other writes, as the centroid updates require.

pub mod circles;
pub mod items;
pub mod memberships;
pub mod types;

use rusqlite::types::Type;
use uuid::Uuid;

pub use types::{Circle, CircleId, Item, ItemId, Membership, MembershipSource, OwnerId};

/// Build a `?1, ?2, ...` placeholder list for an `IN (...)` clause.
pub(crate) fn placeholders(n: usize) -> String {
    placeholders_from(1, n)
}

/// Like [`placeholders`], numbering from `start` so leading parameters keep their slots.
pub(crate) fn placeholders_from(start: usize, n: usize) -> String {
    (start..start + n)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse an owner UUID stored as TEXT.
pub(crate) fn parse_owner(col: usize, raw: &str) -> rusqlite::Result<OwnerId> {
    Uuid::parse_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(col, Type::Text, Box::new(e)))
}

/// Decode an optional little-endian f32 blob column.
pub(crate) fn parse_vector(col: usize, raw: Option<Vec<u8>>) -> rusqlite::Result<Option<Vec<f32>>> {
    raw.map(|bytes| {
        crate::vector::math::embedding_from_bytes(&bytes).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(col, Type::Blob, Box::new(e))
        })
    })
    .transpose()
}

pub(crate) fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

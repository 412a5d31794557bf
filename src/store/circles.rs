use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{now, parse_owner, parse_vector, Circle, CircleId, OwnerId};
use crate::error::{Error, Result};
use crate::vector::math::embedding_to_bytes;

const CIRCLE_COLUMNS: &str =
    "id, owner_id, name, description, centroid, created_at, updated_at";

fn circle_from_row(row: &Row<'_>) -> rusqlite::Result<Circle> {
    let owner: String = row.get(1)?;
    Ok(Circle {
        id: row.get(0)?,
        owner_id: parse_owner(1, &owner)?,
        name: row.get(2)?,
        description: row.get(3)?,
        centroid: parse_vector(4, row.get(4)?)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

/// Create an empty circle. New circles have no centroid until their first member.
pub fn insert_circle(
    conn: &Connection,
    owner: OwnerId,
    name: &str,
    description: Option<&str>,
) -> Result<CircleId> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::validation("circle name must not be empty"));
    }
    let now = now();
    conn.execute(
        "INSERT INTO circles (owner_id, name, description, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?4)",
        params![owner.to_string(), name, description, now],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_circle(conn: &Connection, id: CircleId) -> Result<Circle> {
    conn.query_row(
        &format!("SELECT {CIRCLE_COLUMNS} FROM circles WHERE id = ?1"),
        params![id],
        circle_from_row,
    )
    .optional()?
    .ok_or_else(|| Error::not_found("circle", id))
}

/// Fetch a circle only if `owner` owns it.
pub fn get_owned_circle(conn: &Connection, id: CircleId, owner: OwnerId) -> Result<Circle> {
    conn.query_row(
        &format!("SELECT {CIRCLE_COLUMNS} FROM circles WHERE id = ?1 AND owner_id = ?2"),
        params![id, owner.to_string()],
        circle_from_row,
    )
    .optional()?
    .ok_or_else(|| Error::not_found("circle", id))
}

pub fn list_circles(conn: &Connection, owner: OwnerId) -> Result<Vec<Circle>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CIRCLE_COLUMNS} FROM circles WHERE owner_id = ?1 ORDER BY id"
    ))?;
    let circles = stmt
        .query_map(params![owner.to_string()], circle_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(circles)
}

/// The owner's circles that currently have a centroid, as `(id, name, centroid)`.
pub fn circles_with_centroid(
    conn: &Connection,
    owner: OwnerId,
) -> Result<Vec<(CircleId, String, Vec<f32>)>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, centroid FROM circles \
         WHERE owner_id = ?1 AND centroid IS NOT NULL ORDER BY id",
    )?;
    let rows = stmt
        .query_map(params![owner.to_string()], |row| {
            let centroid = parse_vector(2, row.get(2)?)?.unwrap_or_default();
            Ok((row.get(0)?, row.get(1)?, centroid))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// The circle's stored centroid. `Ok(None)` for an empty circle, `NotFound` for a
/// missing one.
pub fn get_centroid(conn: &Connection, id: CircleId) -> Result<Option<Vec<f32>>> {
    let raw: Option<Option<Vec<u8>>> = conn
        .query_row(
            "SELECT centroid FROM circles WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    match raw {
        Some(blob) => Ok(parse_vector(0, blob)?),
        None => Err(Error::not_found("circle", id)),
    }
}

pub fn set_centroid(conn: &Connection, id: CircleId, centroid: Option<&[f32]>) -> Result<()> {
    let blob = centroid.map(embedding_to_bytes);
    let rows = conn.execute(
        "UPDATE circles SET centroid = ?1, updated_at = ?2 WHERE id = ?3",
        params![blob, now(), id],
    )?;
    if rows == 0 {
        return Err(Error::not_found("circle", id));
    }
    Ok(())
}

/// Delete a circle; its memberships cascade, items are untouched.
pub fn delete_circle(conn: &Connection, id: CircleId) -> Result<bool> {
    let rows = conn.execute("DELETE FROM circles WHERE id = ?1", params![id])?;
    Ok(rows > 0)
}

pub fn count_circles(conn: &Connection, owner: Option<OwnerId>) -> Result<u64> {
    let count: i64 = match owner {
        Some(owner) => conn.query_row(
            "SELECT COUNT(*) FROM circles WHERE owner_id = ?1",
            params![owner.to_string()],
            |row| row.get(0),
        )?,
        None => conn.query_row("SELECT COUNT(*) FROM circles", [], |row| row.get(0))?,
    };
    Ok(count as u64)
}

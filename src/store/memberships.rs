use std::collections::HashMap;

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{
    now, parse_vector, placeholders, CircleId, ItemId, Membership, MembershipSource, OwnerId,
};
use crate::error::Result;

fn membership_from_row(row: &Row<'_>) -> rusqlite::Result<Membership> {
    let flag: i64 = row.get(2)?;
    let confidence: Option<f64> = row.get(3)?;
    Ok(Membership {
        item_id: row.get(0)?,
        circle_id: row.get(1)?,
        is_user_assigned: flag != 0,
        confidence_score: confidence.map(|c| c as f32),
        created_at: row.get(4)?,
    })
}

/// Link an item to a circle. Returns `false` when the link already existed, in which
/// case nothing is written.
pub fn insert_membership(
    conn: &Connection,
    item_id: ItemId,
    circle_id: CircleId,
    source: MembershipSource,
) -> Result<bool> {
    let confidence = source.confidence().map(|c| c.clamp(0.0, 1.0) as f64);
    let rows = conn.execute(
        "INSERT OR IGNORE INTO memberships \
         (item_id, circle_id, is_user_assigned, confidence_score, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            item_id,
            circle_id,
            source.is_user_assigned() as i64,
            confidence,
            now()
        ],
    )?;
    Ok(rows > 0)
}

pub fn get_membership(
    conn: &Connection,
    item_id: ItemId,
    circle_id: CircleId,
) -> Result<Option<Membership>> {
    let membership = conn
        .query_row(
            "SELECT item_id, circle_id, is_user_assigned, confidence_score, created_at \
             FROM memberships WHERE item_id = ?1 AND circle_id = ?2",
            params![item_id, circle_id],
            membership_from_row,
        )
        .optional()?;
    Ok(membership)
}

/// Remove a link. Returns `false` when there was nothing to remove.
pub fn delete_membership(conn: &Connection, item_id: ItemId, circle_id: CircleId) -> Result<bool> {
    let rows = conn.execute(
        "DELETE FROM memberships WHERE item_id = ?1 AND circle_id = ?2",
        params![item_id, circle_id],
    )?;
    Ok(rows > 0)
}

pub fn membership_count(conn: &Connection, circle_id: CircleId) -> Result<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM memberships WHERE circle_id = ?1",
        params![circle_id],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

pub fn count_memberships(conn: &Connection) -> Result<u64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM memberships", [], |row| row.get(0))?;
    Ok(count as u64)
}

/// All memberships of the given items, grouped by item id.
pub fn memberships_for_items(
    conn: &Connection,
    item_ids: &[ItemId],
) -> Result<HashMap<ItemId, Vec<Membership>>> {
    let mut grouped: HashMap<ItemId, Vec<Membership>> = HashMap::new();
    if item_ids.is_empty() {
        return Ok(grouped);
    }
    let sql = format!(
        "SELECT item_id, circle_id, is_user_assigned, confidence_score, created_at \
         FROM memberships WHERE item_id IN ({}) ORDER BY id",
        placeholders(item_ids.len())
    );
    let params: Vec<&dyn rusqlite::types::ToSql> = item_ids
        .iter()
        .map(|id| id as &dyn rusqlite::types::ToSql)
        .collect();

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params.as_slice(), membership_from_row)?;
    for row in rows {
        let membership = row?;
        grouped.entry(membership.item_id).or_default().push(membership);
    }
    Ok(grouped)
}

pub fn circle_ids_for_item(conn: &Connection, item_id: ItemId) -> Result<Vec<CircleId>> {
    let mut stmt =
        conn.prepare("SELECT circle_id FROM memberships WHERE item_id = ?1 ORDER BY id")?;
    let ids = stmt
        .query_map(params![item_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}

pub fn members_of_circle(conn: &Connection, circle_id: CircleId) -> Result<Vec<ItemId>> {
    let mut stmt =
        conn.prepare("SELECT item_id FROM memberships WHERE circle_id = ?1 ORDER BY id")?;
    let ids = stmt
        .query_map(params![circle_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}

/// `(item_id, circle_id)` links for every centroid-bearing circle of `owner`.
pub fn owner_centroid_links(conn: &Connection, owner: OwnerId) -> Result<Vec<(ItemId, CircleId)>> {
    let mut stmt = conn.prepare(
        "SELECT m.item_id, m.circle_id FROM memberships m \
         JOIN circles c ON c.id = m.circle_id \
         WHERE c.owner_id = ?1 AND c.centroid IS NOT NULL \
         ORDER BY m.id",
    )?;
    let links = stmt
        .query_map(params![owner.to_string()], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(links)
}

/// Stored embeddings of a circle's members, in the order they joined. Members
/// without an embedding are skipped.
pub fn member_embeddings(conn: &Connection, circle_id: CircleId) -> Result<Vec<Vec<f32>>> {
    let mut stmt = conn.prepare(
        "SELECT i.embedding FROM memberships m \
         JOIN items i ON i.id = m.item_id \
         WHERE m.circle_id = ?1 AND i.embedding IS NOT NULL \
         ORDER BY m.id",
    )?;
    let rows = stmt
        .query_map(params![circle_id], |row| {
            Ok(parse_vector(0, row.get(0)?)?.unwrap_or_default())
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Names of the circles each item belongs to, grouped by item id.
pub fn circle_names_for_items(
    conn: &Connection,
    item_ids: &[ItemId],
) -> Result<HashMap<ItemId, Vec<String>>> {
    let mut grouped: HashMap<ItemId, Vec<String>> = HashMap::new();
    if item_ids.is_empty() {
        return Ok(grouped);
    }
    let sql = format!(
        "SELECT m.item_id, c.name FROM memberships m \
         JOIN circles c ON c.id = m.circle_id \
         WHERE m.item_id IN ({}) ORDER BY m.id",
        placeholders(item_ids.len())
    );
    let params: Vec<&dyn rusqlite::types::ToSql> = item_ids
        .iter()
        .map(|id| id as &dyn rusqlite::types::ToSql)
        .collect();

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params.as_slice(), |row| {
        Ok((row.get::<_, ItemId>(0)?, row.get::<_, String>(1)?))
    })?;
    for row in rows {
        let (item_id, name) = row?;
        grouped.entry(item_id).or_default().push(name);
    }
    Ok(grouped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{circles, items};
    use uuid::Uuid;

    fn setup() -> (Connection, ItemId, CircleId) {
        let conn = crate::db::open_memory_database().unwrap();
        let owner = Uuid::now_v7();
        let item = items::insert_item(&conn, owner, "Read a chapter", None).unwrap();
        let circle = circles::insert_circle(&conn, owner, "Reading", None).unwrap();
        (conn, item, circle)
    }

    #[test]
    fn user_assignment_has_no_confidence() {
        let (conn, item, circle) = setup();
        assert!(insert_membership(&conn, item, circle, MembershipSource::User).unwrap());

        let m = get_membership(&conn, item, circle).unwrap().unwrap();
        assert!(m.is_user_assigned);
        assert_eq!(m.confidence_score, None);
    }

    #[test]
    fn suggestion_keeps_confidence() {
        let (conn, item, circle) = setup();
        let source = MembershipSource::Suggested { confidence: 0.82 };
        insert_membership(&conn, item, circle, source).unwrap();

        let m = get_membership(&conn, item, circle).unwrap().unwrap();
        assert!(!m.is_user_assigned);
        assert!((m.confidence_score.unwrap() - 0.82).abs() < 1e-6);
    }

    #[test]
    fn duplicate_insert_is_a_no_op() {
        let (conn, item, circle) = setup();
        assert!(insert_membership(&conn, item, circle, MembershipSource::User).unwrap());
        let again = MembershipSource::Suggested { confidence: 0.4 };
        assert!(!insert_membership(&conn, item, circle, again).unwrap());
        assert_eq!(membership_count(&conn, circle).unwrap(), 1);

        // The first write wins.
        let m = get_membership(&conn, item, circle).unwrap().unwrap();
        assert!(m.is_user_assigned);
    }

    #[test]
    fn delete_reports_presence() {
        let (conn, item, circle) = setup();
        assert!(!delete_membership(&conn, item, circle).unwrap());
        insert_membership(&conn, item, circle, MembershipSource::User).unwrap();
        assert!(delete_membership(&conn, item, circle).unwrap());
        assert_eq!(membership_count(&conn, circle).unwrap(), 0);
    }

    #[test]
    fn member_embeddings_follow_join_order() {
        let (conn, first, circle) = setup();
        let owner = items::get_item(&conn, first).unwrap().owner_id;
        let second = items::insert_item(&conn, owner, "Finish the book", None).unwrap();
        let bare = items::insert_item(&conn, owner, "No vector yet", None).unwrap();
        items::set_item_embedding(&conn, first, &[1.0, 0.0]).unwrap();
        items::set_item_embedding(&conn, second, &[0.0, 1.0]).unwrap();

        insert_membership(&conn, second, circle, MembershipSource::User).unwrap();
        insert_membership(&conn, bare, circle, MembershipSource::User).unwrap();
        insert_membership(&conn, first, circle, MembershipSource::User).unwrap();

        let embeddings = member_embeddings(&conn, circle).unwrap();
        assert_eq!(embeddings, vec![vec![0.0, 1.0], vec![1.0, 0.0]]);
        assert_eq!(members_of_circle(&conn, circle).unwrap(), vec![second, bare, first]);
    }

    #[test]
    fn grouped_lookups() {
        let (conn, item, circle) = setup();
        let owner = items::get_item(&conn, item).unwrap().owner_id;
        let other = circles::insert_circle(&conn, owner, "Learning", None).unwrap();
        insert_membership(&conn, item, circle, MembershipSource::User).unwrap();
        insert_membership(&conn, item, other, MembershipSource::Suggested { confidence: 0.9 })
            .unwrap();

        let grouped = memberships_for_items(&conn, &[item, 999]).unwrap();
        assert_eq!(grouped[&item].len(), 2);
        assert!(!grouped.contains_key(&999));

        let names = circle_names_for_items(&conn, &[item]).unwrap();
        assert_eq!(names[&item], vec!["Reading", "Learning"]);
        assert_eq!(circle_ids_for_item(&conn, item).unwrap(), vec![circle, other]);
    }

    #[test]
    fn deleting_an_item_cascades_to_memberships_only() {
        let (conn, item, circle) = setup();
        insert_membership(&conn, item, circle, MembershipSource::User).unwrap();
        items::delete_item(&conn, item).unwrap();
        assert_eq!(membership_count(&conn, circle).unwrap(), 0);
        assert!(circles::get_circle(&conn, circle).is_ok());
    }
}

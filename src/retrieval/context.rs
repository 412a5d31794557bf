//! Render retrieved items as a bounded text block for a language model prompt.

use std::collections::{BTreeSet, HashSet};

use rusqlite::Connection;

use crate::error::Result;
use crate::store::{items, memberships, ItemId};

const HEADER: &str = "From your saved items:\n";

/// Token cost charged for the header.
const HEADER_TOKENS: usize = 10;

/// Rough token estimate: ~4 characters per token.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

/// Format `item_ids` (in the given order) as numbered context lines, stopping before
/// the estimated token count would exceed `max_tokens`. Unknown ids are skipped.
/// Returns an empty string when no listed item exists.
pub fn format_rag_context(conn: &Connection, item_ids: &[ItemId], max_tokens: usize) -> Result<String> {
    let mut seen = HashSet::new();
    let ordered: Vec<ItemId> = item_ids.iter().copied().filter(|id| seen.insert(*id)).collect();

    let found = items::fetch_items(conn, &ordered)?;
    if found.is_empty() {
        return Ok(String::new());
    }
    let circle_names = memberships::circle_names_for_items(conn, &ordered)?;

    let mut lines = vec![HEADER.to_string()];
    let mut token_count = HEADER_TOKENS;
    let mut all_circles = BTreeSet::new();
    let mut truncated = false;

    for (n, item) in ordered.iter().filter_map(|id| found.get(id)).enumerate() {
        let names = circle_names.get(&item.id);
        if let Some(names) = names {
            all_circles.extend(names.iter().map(String::as_str));
        }
        if truncated {
            continue;
        }

        let circle_str = match names {
            Some(names) if !names.is_empty() => names.join(", "),
            _ => "Uncategorized".to_string(),
        };
        let meaning_str = match item.meaning.as_deref() {
            Some(m) if !m.is_empty() => format!(" (meaning: {m})"),
            _ => String::new(),
        };
        let entry = format!(
            "{}. \"{}\"{} [Circle: {}]",
            n + 1,
            item.content,
            meaning_str,
            circle_str
        );

        let entry_tokens = estimate_tokens(&entry);
        if token_count + entry_tokens > max_tokens {
            tracing::debug!(included = n, token_count, max_tokens, "context budget reached");
            truncated = true;
            continue;
        }
        token_count += entry_tokens;
        lines.push(entry);
    }

    if !all_circles.is_empty() {
        let circles_list = all_circles.into_iter().collect::<Vec<_>>().join(", ");
        lines.push(format!("\nBased on your circles, you care about {circles_list}."));
    }

    Ok(lines.join("\n"))
}

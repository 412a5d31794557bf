use std::sync::Arc;

use anyhow::Result;
use uuid::Uuid;

use circles::Engine;

use super::{blocking, preview, Output};

/// Run a personalized search from the terminal.
pub async fn search(engine: &Arc<Engine>, out: Output, owner: Uuid, query: String, top_k: usize) -> Result<()> {
    let hits = blocking(engine, move |e| e.search(owner, &query, top_k)).await?;
    if out.emit_json(&hits)? {
        return Ok(());
    }

    if hits.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    println!("Found {} result(s)\n", hits.len());
    for (i, hit) in hits.iter().enumerate() {
        println!(
            "  {}. [{}] score: {:.4} (base: {:.4}, circles: {:.4})",
            i + 1,
            hit.ranked.item_id,
            hit.ranked.final_score,
            hit.ranked.base_similarity,
            hit.ranked.centroid_similarity,
        );
        println!("     {}", preview(&hit.content, 120));
        if let Some(ref meaning) = hit.meaning {
            println!("     meaning: {}", preview(meaning, 120));
        }
        println!();
    }
    Ok(())
}

/// Print the prompt context block for a query.
pub async fn context(
    engine: &Arc<Engine>,
    owner: Uuid,
    query: String,
    top_k: usize,
    max_tokens: Option<usize>,
) -> Result<()> {
    let block = blocking(engine, move |e| e.context_for_query(owner, &query, top_k, max_tokens)).await?;
    if block.is_empty() {
        println!("No saved items match.");
    } else {
        println!("{block}");
    }
    Ok(())
}

pub async fn suggest(engine: &Arc<Engine>, out: Output, owner: Uuid, circle_id: i64, top_k: usize) -> Result<()> {
    let suggestions = blocking(engine, move |e| e.suggest_items_for_circle(owner, circle_id, top_k)).await?;
    if out.emit_json(&suggestions)? {
        return Ok(());
    }
    if suggestions.is_empty() {
        println!("No suggestions.");
        return Ok(());
    }
    for s in &suggestions {
        println!("  [{}] {:.3}  {}", s.item_id, s.similarity, preview(&s.content, 100));
    }
    Ok(())
}

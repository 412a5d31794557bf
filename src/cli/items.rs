use std::sync::Arc;

use anyhow::Result;
use uuid::Uuid;

use circles::Engine;

use super::{blocking, preview, Output};

pub async fn add(
    engine: &Arc<Engine>,
    out: Output,
    owner: Uuid,
    content: String,
    meaning: Option<String>,
) -> Result<()> {
    let created = blocking(engine, move |e| e.create_item(owner, &content, meaning.as_deref())).await?;
    if out.emit_json(&created)? {
        return Ok(());
    }

    println!("Added item {}", created.item.id);
    if created.predictions.is_empty() {
        println!("No matching circles.");
    } else {
        println!("Likely circles:");
        for p in &created.predictions {
            println!("  [{}] {} ({:.2})", p.circle_id, p.name, p.score);
        }
    }
    Ok(())
}

pub async fn list(engine: &Arc<Engine>, out: Output, owner: Uuid) -> Result<()> {
    let items = blocking(engine, move |e| e.list_items(owner)).await?;
    if out.emit_json(&items)? {
        return Ok(());
    }
    if items.is_empty() {
        println!("No items.");
        return Ok(());
    }
    for item in &items {
        println!("  [{}] {}", item.id, preview(&item.content, 80));
        if let Some(ref meaning) = item.meaning {
            println!("       meaning: {meaning}");
        }
    }
    Ok(())
}

pub async fn set_meaning(
    engine: &Arc<Engine>,
    owner: Uuid,
    item_id: i64,
    meaning: Option<String>,
) -> Result<()> {
    let cleared = meaning.is_none();
    blocking(engine, move |e| e.update_meaning(owner, item_id, meaning.as_deref())).await?;
    if cleared {
        println!("Cleared meaning of item {item_id}");
    } else {
        println!("Updated meaning of item {item_id}");
    }
    Ok(())
}

pub async fn delete(engine: &Arc<Engine>, owner: Uuid, item_id: i64) -> Result<()> {
    blocking(engine, move |e| e.delete_item(owner, item_id)).await?;
    println!("Deleted item {item_id}");
    Ok(())
}

pub async fn predict(engine: &Arc<Engine>, out: Output, owner: Uuid, item_id: i64) -> Result<()> {
    let predictions = blocking(engine, move |e| e.predict_circles(owner, item_id)).await?;
    if out.emit_json(&predictions)? {
        return Ok(());
    }
    if predictions.is_empty() {
        println!("No circle passes the prediction threshold.");
        return Ok(());
    }
    for p in &predictions {
        println!("  [{}] {} ({:.2})", p.circle_id, p.name, p.score);
    }
    Ok(())
}

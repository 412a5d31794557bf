use std::sync::Arc;

use anyhow::Result;
use uuid::Uuid;

use circles::engine::AssignOutcome;
use circles::Engine;

use super::{blocking, Output};

pub async fn create(
    engine: &Arc<Engine>,
    out: Output,
    owner: Uuid,
    name: String,
    description: Option<String>,
) -> Result<()> {
    let circle = blocking(engine, move |e| e.create_circle(owner, &name, description.as_deref())).await?;
    if !out.emit_json(&circle)? {
        println!("Created circle {} ({})", circle.id, circle.name);
    }
    Ok(())
}

pub async fn list(engine: &Arc<Engine>, out: Output, owner: Uuid) -> Result<()> {
    let circles = blocking(engine, move |e| e.list_circles(owner)).await?;
    if out.emit_json(&circles)? {
        return Ok(());
    }
    if circles.is_empty() {
        println!("No circles.");
        return Ok(());
    }
    for c in &circles {
        println!("  [{}] {:<24} {} item(s)", c.circle.id, c.circle.name, c.member_count);
    }
    Ok(())
}

pub async fn delete(engine: &Arc<Engine>, owner: Uuid, circle_id: i64) -> Result<()> {
    blocking(engine, move |e| e.delete_circle(owner, circle_id)).await?;
    println!("Deleted circle {circle_id}");
    Ok(())
}

pub async fn assign(engine: &Arc<Engine>, out: Output, owner: Uuid, item_id: i64, circle_id: i64) -> Result<()> {
    let outcome = blocking(engine, move |e| e.assign_item(owner, item_id, circle_id)).await?;
    report(out, outcome, item_id, circle_id)
}

pub async fn accept(
    engine: &Arc<Engine>,
    out: Output,
    owner: Uuid,
    item_id: i64,
    circle_id: i64,
    confidence: f32,
) -> Result<()> {
    let outcome = blocking(engine, move |e| {
        e.accept_suggestion(owner, item_id, circle_id, confidence)
    })
    .await?;
    report(out, outcome, item_id, circle_id)
}

pub async fn unassign(engine: &Arc<Engine>, owner: Uuid, item_id: i64, circle_id: i64) -> Result<()> {
    blocking(engine, move |e| e.remove_item_from_circle(owner, item_id, circle_id)).await?;
    println!("Removed item {item_id} from circle {circle_id}");
    Ok(())
}

fn report(out: Output, outcome: AssignOutcome, item_id: i64, circle_id: i64) -> Result<()> {
    if out.emit_json(&outcome)? {
        return Ok(());
    }
    match outcome {
        AssignOutcome::Assigned => println!("Added item {item_id} to circle {circle_id}"),
        AssignOutcome::AlreadyAssigned => {
            println!("Item {item_id} is already in circle {circle_id}")
        }
    }
    Ok(())
}

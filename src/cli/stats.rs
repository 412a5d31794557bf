use std::sync::Arc;

use anyhow::Result;
use uuid::Uuid;

use circles::Engine;

use super::{blocking, Output};

/// Display store and index statistics in the terminal.
pub async fn stats(engine: &Arc<Engine>, out: Output, owner: Option<Uuid>) -> Result<()> {
    let stats = blocking(engine, move |e| e.stats(owner)).await?;
    if out.emit_json(&stats)? {
        return Ok(());
    }

    println!("Circles Statistics");
    println!("{}", "=".repeat(40));
    println!("  Items:               {}", stats.items);
    println!("  Circles:             {}", stats.circles);
    println!("  Memberships:         {}", stats.memberships);
    println!();

    println!("Vector Index:");
    println!("  Indexed vectors:     {}", stats.indexed_vectors);
    println!("  Dimension:           {}", stats.dimension);
    println!("  Provider:            {}", stats.embedding_provider);
    println!();

    println!("Signal Cache:");
    println!("  Entries:             {}", stats.cache_entries);
    println!("  Hits:                {}", stats.cache_hits);
    println!("  Misses:              {}", stats.cache_misses);

    Ok(())
}

//! CLI `reindex` command: embed missing items and rebuild the vector index.

use std::sync::Arc;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

use circles::Engine;

pub async fn reindex(engine: &Arc<Engine>, reembed: bool) -> Result<()> {
    if reembed {
        println!("Re-embedding all items and rebuilding circle centroids...");
    } else {
        println!("Embedding items without vectors and rebuilding the index...");
    }

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {bar:40.cyan/blue} {pos}/{len} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
    );

    let engine = Arc::clone(engine);
    let bar = pb.clone();
    let report = tokio::task::spawn_blocking(move || {
        engine.reindex(reembed, &|done, total| {
            bar.set_length(total as u64);
            bar.set_position(done as u64);
        })
    })
    .await?
    .context("reindex failed")?;

    pb.finish_and_clear();

    println!(
        "Embedded {} item(s); index now holds {} vector(s).",
        report.embedded, report.indexed
    );
    Ok(())
}

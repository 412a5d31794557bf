pub mod circle;
pub mod items;
pub mod reindex;
pub mod search;
pub mod stats;

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use uuid::Uuid;

use circles::config::CirclesConfig;
use circles::Engine;

/// Owner used when neither `--owner` nor `CIRCLES_OWNER` is given.
pub const LOCAL_OWNER: Uuid = Uuid::nil();

#[derive(Debug, Clone, Copy)]
pub struct Output {
    pub json: bool,
}

impl Output {
    /// Print `value` as pretty JSON if `--json` was given. Returns whether it printed.
    pub fn emit_json<T: Serialize>(self, value: &T) -> Result<bool> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        Ok(self.json)
    }
}

pub fn resolve_owner(flag: Option<Uuid>) -> Result<Uuid> {
    if let Some(owner) = flag {
        return Ok(owner);
    }
    match std::env::var("CIRCLES_OWNER") {
        Ok(val) => Uuid::parse_str(val.trim())
            .with_context(|| format!("CIRCLES_OWNER is not a UUID: {val}")),
        Err(_) => Ok(LOCAL_OWNER),
    }
}

pub async fn open_engine(config: CirclesConfig) -> Result<Arc<Engine>> {
    let engine = tokio::task::spawn_blocking(move || Engine::open(config)).await??;
    Ok(Arc::new(engine))
}

/// Snapshot the index before exit so items added by this run are not re-derived on
/// the next start.
pub async fn close_engine(engine: &Arc<Engine>) -> Result<()> {
    blocking(engine, |engine| engine.save_index())
        .await
        .context("failed to save vector index")
}

/// Run an engine call on the blocking pool.
pub async fn blocking<T, F>(engine: &Arc<Engine>, f: F) -> Result<T>
where
    F: FnOnce(&Engine) -> circles::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let engine = Arc::clone(engine);
    Ok(tokio::task::spawn_blocking(move || f(&engine)).await??)
}

/// First `max` characters of `text`, with an ellipsis when cut.
pub fn preview(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let cut: String = text.chars().take(max).collect();
        format!("{cut}...")
    } else {
        text.to_string()
    }
}

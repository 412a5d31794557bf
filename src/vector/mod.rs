//! Exact vector search over item embeddings.
//!
//! - [`VectorIndex`]: the in-memory index with binary save/load
//! - [`VectorService`]: the lock-guarded, blob-backed owner of the live index
//! - [`math`]: normalization and similarity helpers shared with the other services

pub mod math;
mod index;
mod service;
pub mod snapshot;

pub use index::{ids_path, VectorIndex};
pub use service::VectorService;

//! Personalized semantic retrieval over user-defined circles.
//!
//! Users capture short notes (items) and group them into named circles. Every circle
//! keeps a centroid: the normalized running mean of its members' embeddings. Search
//! fetches raw nearest neighbours from an in-memory vector index and reranks them with
//! how close each item's circles sit to the query, plus a boost for items the user
//! placed by hand.
//!
//! # Architecture
//!
//! - **Storage**: SQLite for items, circles, memberships and centroids
//! - **Vectors**: exact inner-product index, snapshotted to a [`blob::BlobStore`]
//! - **Embeddings**: pluggable [`embedding::EmbeddingProvider`], feature hashing by default
//! - **Ranking**: `0.4 * base + 0.4 * centroid + boost - penalty`
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from TOML files and environment variables
//! - [`db`]: SQLite database initialization, schema and migrations
//! - [`store`]: Item, circle and membership records
//! - [`vector`]: Vector index, its snapshot format and the shared [`vector::VectorService`]
//! - [`centroid`]: Incremental centroid maintenance and circle prediction
//! - [`retrieval`]: Personalized reranking and prompt context formatting
//! - [`engine`]: The operations the CLI exposes, wired over all of the above

pub mod blob;
pub mod centroid;
pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod retrieval;
pub mod store;
pub mod vector;

pub use engine::Engine;
pub use error::{Error, Result};

//! Search index over entry descriptions.
//!
//! Descriptions are embedded with a [`TextEmbedder`] and stored in a sqlite-vec table keyed
//! by entry id. Queries embed the query text the same way and rank by cosine distance.

pub mod clip;
pub mod vector_index;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

pub use clip::ClipTextEmbedder;
pub use vector_index::VectorIndex;

pub type IndexMetadata = Map<String, Value>;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Index database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Embedding failed: {0}")]
    Embedding(String),
    #[error("Embedding has {actual} dimensions, index expects {expected}")]
    Dimensions { expected: usize, actual: usize },
    #[error("Metadata serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Index task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Stores `text` and `metadata` for `id`, replacing whatever was stored for it before.
    async fn upsert(&self, id: i64, text: &str, metadata: &IndexMetadata) -> Result<(), IndexError>;

    /// Ids of the `k` documents closest to `text`, nearest first.
    async fn query(&self, text: &str, k: usize) -> Result<Vec<i64>, IndexError>;
}

/// Turns text into a fixed-length vector. Implementations may block.
pub trait TextEmbedder: Send + Sync {
    fn dimensions(&self) -> usize;
    fn embed(&self, text: &str) -> Result<Vec<f32>, IndexError>;
}

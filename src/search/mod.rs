//! Semantic search over agent descriptions.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌───────────────────┐
//! │   Agent Store   │────▶│ EmbeddingProvider │
//! │ (dirty records) │     │ (hashing/FastEmbed)│
//! └─────────────────┘     └─────────┬─────────┘
//!                                   │  embed outside the lock,
//!                                   │  timeout + backoff retries
//!                                   ▼
//!                          ┌────────────────┐
//!                          │ EmbeddingIndex │◀── query cache (moka)
//!                          └───────┬────────┘
//!                                  │ RwLock
//!                                  ▼
//!                          ┌────────────────┐
//!                          │  VectorStore   │
//!                          │ exact  │  LSH  │
//!                          └────────────────┘
//! ```
//!
//! Below `approximate_threshold` vectors every query is an exact cosine scan.
//! Above it, random-hyperplane LSH gathers a candidate set that is re-ranked
//! exactly.

mod embedding;
mod index;
mod registry;
mod vector_store;

#[cfg(feature = "fastembed")]
pub use embedding::FastEmbedProvider;
pub use embedding::{
    Embedding, EmbeddingProvider, HashingEmbedder, ProviderHealth, ProviderMetadata,
    ProviderStats, TrackedProvider,
};
pub use index::{backoff_delay, EmbeddingIndex};
pub use registry::{ProviderFactory, ProviderRegistration, ProviderRegistry};
pub use vector_store::{cosine_distance, SearchStrategy, VectorStore};

/// Default FastEmbed model (all-MiniLM-L6-v2 - 384 dimensions, good balance of speed/quality)
pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";

/// Embedding dimension for the default model
pub const EMBEDDING_DIM: usize = 384;

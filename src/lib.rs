//! # agentmesh-selector
//!
//! Routes natural-language tasks to the best agents in a growing pool.
//!
//! Each task is embedded and matched against agent descriptions through an
//! [`EmbeddingIndex`](search::EmbeddingIndex); the nearest shortlist is then
//! re-ranked by a cold-start-smoothed [`QualityScorer`](ranking::QualityScorer)
//! and a [`FusionRanker`](ranking::FusionRanker). The
//! [`Benchmark`](benchmark::Benchmark) harness measures any
//! [`SelectionAlgorithm`](selection::SelectionAlgorithm) against labeled
//! queries.
//!
//! ```rust,ignore
//! let engine = SelectionEngine::from_registry(
//!     agents,
//!     &ProviderRegistry::with_builtin(),
//!     EngineConfig::default(),
//! )
//! .await?;
//! let selection = engine.select(&Query::new("Plan a trip to Japan"), 3).await?;
//! ```

pub mod agent;
pub mod benchmark;
pub mod config;
pub mod error;
pub mod ranking;
pub mod search;
pub mod selection;

pub use agent::{Agent, AgentStore, Query, QueryConstraints, TaskOutcome, UpsertOutcome};
pub use benchmark::{Benchmark, BenchmarkReport, LabeledQuery, ValidateOptions};
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use ranking::{Candidate, FusionRanker, QualityScorer};
pub use search::{EmbeddingIndex, EmbeddingProvider, HashingEmbedder, ProviderRegistry};
pub use selection::{
    NearestNeighborSelector, RankedAgent, Selection, SelectionAlgorithm, SelectionEngine,
};

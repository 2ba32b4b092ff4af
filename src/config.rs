//! Engine configuration.
//!
//! Loaded from a TOML file; every section falls back to its defaults so a
//! partial file (or none at all) is valid.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};
use crate::ranking::{DistanceNormalization, FusionStrategy};

/// Top-level configuration for the selection engine and benchmark.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub embedder: EmbedderConfig,
    pub index: IndexConfig,
    pub quality: QualityConfig,
    pub fusion: FusionConfig,
    pub selection: SelectionConfig,
    pub benchmark: BenchmarkConfig,
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let raw = toml::to_string_pretty(self)?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    /// Check value ranges across all sections.
    pub fn validate(&self) -> Result<()> {
        if self.embedder.dimension == 0 {
            return Err(Error::Config("embedder.dimension must be > 0".into()));
        }
        self.index.validate()?;
        self.quality.validate()?;
        self.fusion.validate()?;
        if self.selection.shortlist_size == 0 {
            return Err(Error::Config("selection.shortlist_size must be > 0".into()));
        }
        if self.benchmark.k == 0 {
            return Err(Error::Config("benchmark.k must be > 0".into()));
        }
        Ok(())
    }
}

/// Which embedding provider to construct and its shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedderConfig {
    /// Registered provider name ("hashing", or "fastembed" with the feature on)
    pub provider: String,
    /// Vector dimension for the hashing embedder
    pub dimension: usize,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            provider: "hashing".to_string(),
            dimension: 256,
        }
    }
}

/// Embedding index tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Pool size at which queries switch from exact scan to LSH
    pub approximate_threshold: usize,
    /// Number of LSH hash tables
    pub lsh_tables: usize,
    /// Hyperplanes (bits) per table
    pub lsh_bits: usize,
    /// Hamming radius probed around the query bucket
    pub probe_radius: usize,
    /// Fewer gathered candidates than this triggers an exact scan
    pub min_candidates: usize,
    /// Seed for hyperplane generation
    pub seed: u64,
    /// Timeout for a single provider call
    pub embed_timeout_ms: u64,
    /// Retries after the first failed provider call
    pub max_retries: u32,
    /// Base delay for exponential backoff
    pub retry_base_delay_ms: u64,
    /// Cap for exponential backoff
    pub retry_max_delay_ms: u64,
    /// Cached query embeddings (0 disables the cache)
    pub query_cache_capacity: u64,
    /// Concurrent provider calls during batch re-embedding
    pub reembed_concurrency: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            approximate_threshold: 2048,
            lsh_tables: 8,
            lsh_bits: 12,
            probe_radius: 1,
            min_candidates: 64,
            seed: 0x5EED_A6E7,
            embed_timeout_ms: 5_000,
            max_retries: 3,
            retry_base_delay_ms: 50,
            retry_max_delay_ms: 2_000,
            query_cache_capacity: 1_024,
            reembed_concurrency: 4,
        }
    }
}

impl IndexConfig {
    fn validate(&self) -> Result<()> {
        if self.lsh_tables == 0 {
            return Err(Error::Config("index.lsh_tables must be > 0".into()));
        }
        if self.lsh_bits == 0 || self.lsh_bits > 63 {
            return Err(Error::Config("index.lsh_bits must be in 1..=63".into()));
        }
        if self.probe_radius > 2 {
            return Err(Error::Config("index.probe_radius must be <= 2".into()));
        }
        if self.reembed_concurrency == 0 {
            return Err(Error::Config("index.reembed_concurrency must be > 0".into()));
        }
        if self.embed_timeout_ms == 0 {
            return Err(Error::Config("index.embed_timeout_ms must be > 0".into()));
        }
        Ok(())
    }
}

/// Quality scorer tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Neutral prior a cold-start agent receives
    pub prior: f64,
    /// Pseudo-count of prior observations
    pub prior_weight: f64,
    /// Exponent of the over-budget cost penalty
    pub cost_sharpness: f64,
    /// Exponent of the over-budget latency penalty
    pub latency_sharpness: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            prior: 0.5,
            prior_weight: 5.0,
            cost_sharpness: 1.0,
            latency_sharpness: 1.0,
        }
    }
}

impl QualityConfig {
    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.prior) {
            return Err(Error::Config("quality.prior must be in [0, 1]".into()));
        }
        if !(self.prior_weight > 0.0 && self.prior_weight.is_finite()) {
            return Err(Error::Config("quality.prior_weight must be > 0".into()));
        }
        if self.cost_sharpness < 0.0 || self.latency_sharpness < 0.0 {
            return Err(Error::Config("quality sharpness must be >= 0".into()));
        }
        Ok(())
    }
}

/// Fusion ranker tuning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub normalization: DistanceNormalization,
    pub strategy: FusionStrategy,
}

impl FusionConfig {
    fn validate(&self) -> Result<()> {
        if let DistanceNormalization::Saturating { scale } = self.normalization {
            if !(scale > 0.0 && scale.is_finite()) {
                return Err(Error::Config("fusion saturating scale must be > 0".into()));
            }
        }
        if let FusionStrategy::Linear { alpha } = self.strategy {
            if !(0.0..=1.0).contains(&alpha) {
                return Err(Error::Config("fusion linear alpha must be in [0, 1]".into()));
            }
        }
        Ok(())
    }
}

/// Query-path tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Nearest agents pulled from the index before fusion
    pub shortlist_size: usize,
    /// Deadline applied when a query carries none (0 = no deadline)
    pub default_timeout_ms: u64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            shortlist_size: 32,
            default_timeout_ms: 2_000,
        }
    }
}

/// Benchmark harness defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    /// Depth used for top-k accuracy
    pub k: usize,
    /// Declared p95 latency objective
    pub latency_slo_ms: f64,
    /// Report per-query detail
    pub verbose: bool,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            k: 3,
            latency_slo_ms: 250.0,
            verbose: false,
        }
    }
}

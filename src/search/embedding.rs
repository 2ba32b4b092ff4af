//! Embedding provider boundary.
//!
//! The index depends on a single capability: turn text into a fixed-length
//! vector. Any backend implementing [`EmbeddingProvider`] can be plugged in
//! at construction time.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::error::{Error, Result};

/// A dense embedding vector.
pub type Embedding = Vec<f32>;

/// Provider metadata for discovery and sizing the index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Unique provider name (e.g., "hashing", "fastembed")
    pub name: String,
    /// Model identifier
    pub model: String,
    /// Length of every vector this provider returns
    pub dimension: usize,
    /// Human-readable description
    pub description: String,
}

/// Provider health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealth {
    /// Whether the provider is available
    pub available: bool,
    /// Response latency in milliseconds
    pub latency_ms: Option<u64>,
    /// Last error message if any
    pub last_error: Option<String>,
}

/// The embedding capability.
///
/// # Example
///
/// ```rust,ignore
/// struct RemoteEmbedder { client: HttpClient }
///
/// #[async_trait]
/// impl EmbeddingProvider for RemoteEmbedder {
///     fn metadata(&self) -> ProviderMetadata {
///         ProviderMetadata {
///             name: "remote".to_string(),
///             model: "text-embedding-3-small".to_string(),
///             dimension: 1536,
///             description: "Hosted embedding endpoint".to_string(),
///         }
///     }
///
///     async fn embed(&self, text: &str) -> Result<Embedding> {
///         self.client.embed(text).await.map_err(|e| Error::Provider {
///             provider: "remote".to_string(),
///             reason: e.to_string(),
///         })
///     }
/// }
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Get provider metadata
    fn metadata(&self) -> ProviderMetadata;

    /// Embed one text.
    ///
    /// Transient failures should be reported as [`Error::Provider`] so the
    /// index retries them.
    async fn embed(&self, text: &str) -> Result<Embedding>;

    /// Check if the provider is available
    async fn is_available(&self) -> bool {
        true
    }

    /// Get the provider's current status
    async fn health_check(&self) -> ProviderHealth {
        ProviderHealth {
            available: self.is_available().await,
            latency_ms: None,
            last_error: None,
        }
    }
}

/// Words that carry no routing signal.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "can", "do", "for", "from", "how", "i",
    "in", "is", "it", "me", "my", "of", "on", "or", "that", "the", "this", "to", "what", "with",
    "you", "your", "we", "will", "should", "would", "which", "using", "use",
];

/// Weight of a character trigram relative to a whole word.
const TRIGRAM_WEIGHT: f32 = 0.35;

/// Deterministic local embedder based on the signed hashing trick.
///
/// Words (lower-cased, stopwords removed, a plural `s` stripped) and their
/// character trigrams are hashed into `dimension` buckets. Needs no model
/// download and always returns the same vector for the same text, which makes
/// it the default provider for tests and offline benchmarks.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(|w| w.to_lowercase())
            .filter(|w| !STOPWORDS.contains(&w.as_str()))
            .map(|w| {
                if w.len() > 3 && w.ends_with('s') && !w.ends_with("ss") {
                    w[..w.len() - 1].to_string()
                } else {
                    w
                }
            })
    }

    fn accumulate(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let hash = fnv1a(feature.as_bytes());
        let bucket = (hash % self.dimension as u64) as usize;
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }

    /// Embed synchronously. Returns an all-zero vector for text with no
    /// indexable tokens.
    pub fn embed_sync(&self, text: &str) -> Embedding {
        let mut vector = vec![0.0f32; self.dimension];
        for token in Self::tokens(text) {
            self.accumulate(&mut vector, &token, 1.0);
            let padded: Vec<char> = format!("#{}#", token).chars().collect();
            for gram in padded.windows(3) {
                let gram: String = gram.iter().collect();
                self.accumulate(&mut vector, &gram, TRIGRAM_WEIGHT);
            }
        }
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            name: "hashing".to_string(),
            model: "fnv1a-words-trigrams".to_string(),
            dimension: self.dimension,
            description: "Deterministic feature-hashing embedder".to_string(),
        }
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        let vector = self.embed_sync(text);
        if vector.iter().all(|v| *v == 0.0) {
            return Err(Error::InvalidEmbedding(
                "text has no indexable tokens".to_string(),
            ));
        }
        Ok(vector)
    }
}

/// 64-bit FNV-1a; stable across platforms and releases.
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes.iter().fold(OFFSET, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(PRIME)
    })
}

/// Local ONNX embeddings via FastEmbed (all-MiniLM-L6-v2).
#[cfg(feature = "fastembed")]
pub struct FastEmbedProvider {
    model: Arc<fastembed::TextEmbedding>,
}

#[cfg(feature = "fastembed")]
impl FastEmbedProvider {
    /// Load the default model, downloading it on first use.
    pub fn new() -> Result<Self> {
        let options =
            fastembed::InitOptions::new(fastembed::EmbeddingModel::AllMiniLML6V2);
        let model = fastembed::TextEmbedding::try_new(options).map_err(|e| Error::Provider {
            provider: "fastembed".to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            model: Arc::new(model),
        })
    }
}

#[cfg(feature = "fastembed")]
#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            name: "fastembed".to_string(),
            model: super::DEFAULT_MODEL.to_string(),
            dimension: super::EMBEDDING_DIM,
            description: "FastEmbed ONNX sentence embeddings".to_string(),
        }
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        let model = self.model.clone();
        let text = text.to_string();
        let provider_error = |reason: String| Error::Provider {
            provider: "fastembed".to_string(),
            reason,
        };

        let mut vectors = tokio::task::spawn_blocking(move || model.embed(vec![text], None))
            .await
            .map_err(|e| provider_error(e.to_string()))?
            .map_err(|e| provider_error(e.to_string()))?;

        vectors
            .pop()
            .ok_or_else(|| provider_error("model returned no vectors".to_string()))
    }
}

/// Embedding call statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderStats {
    /// Total number of provider calls
    pub call_count: u64,
    /// Average call duration in microseconds
    pub average_duration_us: u64,
    /// Number of failed calls
    pub error_count: u64,
    /// Success rate percentage (0-100)
    pub success_rate: f64,
}

/// Wrapper for a provider with usage statistics
pub struct TrackedProvider {
    inner: Arc<dyn EmbeddingProvider>,
    call_count: AtomicU64,
    total_duration_us: AtomicU64,
    error_count: AtomicU64,
}

impl TrackedProvider {
    /// Create a new tracked provider
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            inner: provider,
            call_count: AtomicU64::new(0),
            total_duration_us: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
        }
    }

    /// Get the underlying provider
    pub fn inner(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.inner
    }

    /// Embed with tracking
    pub async fn embed_tracked(&self, text: &str) -> Result<Embedding> {
        let start = Instant::now();
        let result = self.inner.embed(text).await;
        let duration = start.elapsed().as_micros() as u64;

        self.call_count.fetch_add(1, Ordering::Relaxed);
        self.total_duration_us.fetch_add(duration, Ordering::Relaxed);
        if result.is_err() {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Get call statistics
    pub fn stats(&self) -> ProviderStats {
        let call_count = self.call_count.load(Ordering::Relaxed);
        let total_duration_us = self.total_duration_us.load(Ordering::Relaxed);
        let error_count = self.error_count.load(Ordering::Relaxed);

        ProviderStats {
            call_count,
            average_duration_us: if call_count > 0 {
                total_duration_us / call_count
            } else {
                0
            },
            error_count,
            success_rate: if call_count > 0 {
                ((call_count - error_count) as f64 / call_count as f64) * 100.0
            } else {
                100.0
            },
        }
    }
}

//! Embedding index.
//!
//! Owns one [`VectorStore`] behind a read-write lock. Provider calls happen
//! before the lock is taken, so a slow or failing provider never blocks
//! concurrent queries, and the write lock is held only for the in-memory
//! insert or delete.

use futures::stream::{self, StreamExt};
use moka::future::Cache;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::vector_store::{SearchStrategy, VectorStore};
use super::{Embedding, EmbeddingProvider, ProviderStats, TrackedProvider};
use crate::config::IndexConfig;
use crate::error::{Error, Result};

/// Delay before retry number `attempt` (1-based): exponential from
/// `base`, capped at `max`.
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let multiplier = 2u32.saturating_pow(attempt - 1);
    std::cmp::min(base.saturating_mul(multiplier), max)
}

/// Nearest-neighbor index over agent description embeddings.
pub struct EmbeddingIndex {
    provider: TrackedProvider,
    store: RwLock<VectorStore>,
    query_cache: Option<Cache<String, Arc<Embedding>>>,
    config: IndexConfig,
}

impl EmbeddingIndex {
    /// Create an empty index sized by the provider's dimension.
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: IndexConfig) -> Self {
        let dimension = provider.metadata().dimension;
        let query_cache = (config.query_cache_capacity > 0)
            .then(|| Cache::new(config.query_cache_capacity));
        Self {
            store: RwLock::new(VectorStore::new(dimension, &config)),
            provider: TrackedProvider::new(provider),
            query_cache,
            config,
        }
    }

    /// Embed `description` and insert or replace the vector for `agent_id`.
    ///
    /// Transient provider failures are retried with exponential backoff; once
    /// retries run out the call fails with [`Error::EmbeddingUnavailable`]
    /// and the previously stored vector (if any) is kept.
    pub async fn upsert(&self, agent_id: &str, description: &str) -> Result<()> {
        self.upsert_if(agent_id, description, || true).await.map(|_| ())
    }

    /// Like [`Self::upsert`], but the vector is stored only if `is_current`
    /// still holds once the write lock is taken.
    ///
    /// Returns `Ok(false)` when the vector was discarded. Writers are
    /// serialized by the lock, so a vector that passes the check cannot be
    /// overwritten by one computed for an older description.
    pub async fn upsert_if<F>(
        &self,
        agent_id: &str,
        description: &str,
        is_current: F,
    ) -> Result<bool>
    where
        F: FnOnce() -> bool,
    {
        let vector = self.embed_with_retry(agent_id, description).await?;

        let mut store = self.store.write().await;
        if !is_current() {
            debug!(agent_id = %agent_id, "Embedding superseded, discarded");
            return Ok(false);
        }
        store.insert(agent_id, vector)?;
        debug!(agent_id = %agent_id, pool_size = store.len(), "Embedding stored");
        Ok(true)
    }

    /// Re-embed many agents on a bounded worker pool.
    ///
    /// Each vector is stored only if `is_current(agent_id, description)`
    /// holds under the write lock. Each agent succeeds or fails on its own;
    /// results come back in input order.
    pub async fn upsert_many<F>(
        &self,
        items: Vec<(String, String)>,
        is_current: F,
    ) -> Vec<(String, Result<bool>)>
    where
        F: Fn(&str, &str) -> bool + Sync,
    {
        let total = items.len();
        let is_current = &is_current;
        let mut results: Vec<(usize, String, Result<bool>)> =
            stream::iter(items.into_iter().enumerate())
                .map(|(position, (agent_id, description))| async move {
                    let result = self
                        .upsert_if(&agent_id, &description, || {
                            is_current(&agent_id, &description)
                        })
                        .await;
                    (position, agent_id, result)
                })
                .buffer_unordered(self.config.reembed_concurrency)
                .collect()
                .await;
        results.sort_by_key(|(position, _, _)| *position);

        let failed = results.iter().filter(|(_, _, r)| r.is_err()).count();
        info!(total, failed, "Batch re-embedding finished");
        results
            .into_iter()
            .map(|(_, agent_id, result)| (agent_id, result))
            .collect()
    }

    /// Delete the vector for `agent_id`.
    pub async fn remove(&self, agent_id: &str) -> Result<()> {
        let mut store = self.store.write().await;
        if store.remove(agent_id) {
            debug!(agent_id = %agent_id, pool_size = store.len(), "Embedding removed");
            Ok(())
        } else {
            Err(Error::NotFound(agent_id.to_string()))
        }
    }

    /// `k` nearest agents to `text` as `(agent_id, distance)`, nearest first.
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<(String, f32)>> {
        let vector = self.embed_query(text).await?;
        let store = self.store.read().await;
        let query = store.normalize(vector.as_ref().clone())?;
        Ok(store.search(&query, k))
    }

    /// Embed query text once, serving repeats from the cache.
    async fn embed_query(&self, text: &str) -> Result<Arc<Embedding>> {
        if let Some(cache) = &self.query_cache {
            if let Some(hit) = cache.get(text).await {
                return Ok(hit);
            }
        }

        let vector = Arc::new(self.embed_once(text).await?);
        if let Some(cache) = &self.query_cache {
            cache.insert(text.to_string(), vector.clone()).await;
        }
        Ok(vector)
    }

    async fn embed_once(&self, text: &str) -> Result<Embedding> {
        let timeout = Duration::from_millis(self.config.embed_timeout_ms);
        match tokio::time::timeout(timeout, self.provider.embed_tracked(text)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                operation: "embed".to_string(),
                duration_ms: self.config.embed_timeout_ms,
            }),
        }
    }

    async fn embed_with_retry(&self, agent_id: &str, text: &str) -> Result<Embedding> {
        let base = Duration::from_millis(self.config.retry_base_delay_ms);
        let max = Duration::from_millis(self.config.retry_max_delay_ms);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.embed_once(text).await {
                Ok(vector) => return Ok(vector),
                Err(err) if err.is_transient() && attempt <= self.config.max_retries => {
                    let delay = backoff_delay(attempt, base, max);
                    warn!(
                        agent_id = %agent_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Embedding failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) if err.is_transient() => {
                    metrics::counter!("agentsel_embed_failures_total").increment(1);
                    return Err(Error::EmbeddingUnavailable {
                        agent_id: agent_id.to_string(),
                        attempts: attempt,
                        reason: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Stored vector for `agent_id`.
    pub async fn vector(&self, agent_id: &str) -> Option<Embedding> {
        self.store.read().await.vector(agent_id).cloned()
    }

    /// Copy of every stored vector.
    pub async fn snapshot(&self) -> HashMap<String, Embedding> {
        self.store.read().await.snapshot()
    }

    pub async fn contains(&self, agent_id: &str) -> bool {
        self.store.read().await.contains(agent_id)
    }

    pub async fn len(&self) -> usize {
        self.store.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.store.read().await.is_empty()
    }

    /// Search path a query would take at the current pool size.
    pub async fn strategy(&self) -> SearchStrategy {
        self.store.read().await.strategy()
    }

    pub fn dimension(&self) -> usize {
        self.provider.inner().metadata().dimension
    }

    /// Provider call statistics.
    pub fn provider_stats(&self) -> ProviderStats {
        self.provider.stats()
    }
}

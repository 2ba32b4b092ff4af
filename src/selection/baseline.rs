//! Distance-only baseline.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

use super::{check_pool_ids, check_request, RankedAgent, Selection, SelectionAlgorithm};
use crate::agent::{Agent, Query};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::search::{EmbeddingIndex, EmbeddingProvider};

/// Picks the agents whose descriptions are nearest to the query and ignores
/// quality signals entirely. Used as the reference point in benchmarks.
pub struct NearestNeighborSelector {
    index: EmbeddingIndex,
}

impl NearestNeighborSelector {
    pub async fn from_pool(
        agents: Vec<Agent>,
        ids: Vec<String>,
        provider: Arc<dyn EmbeddingProvider>,
        config: EngineConfig,
    ) -> Result<Self> {
        check_pool_ids(&agents, &ids)?;
        for agent in &agents {
            agent.validate()?;
        }

        let index = EmbeddingIndex::new(provider, config.index);
        let items = agents
            .into_iter()
            .map(|a| (a.id, a.description))
            .collect();
        for (_, result) in index.upsert_many(items, |_, _| true).await {
            result?;
        }
        Ok(Self { index })
    }
}

#[async_trait]
impl SelectionAlgorithm for NearestNeighborSelector {
    fn name(&self) -> &str {
        "nearest_neighbor"
    }

    async fn select(&self, query: &Query, k: usize) -> Result<Selection> {
        check_request(query, k)?;
        if self.index.is_empty().await {
            return Err(Error::EmptyPool);
        }

        let start = Instant::now();
        let search = self.index.query(&query.text, k);
        let hits = match query.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, search)
                .await
                .map_err(|_| Error::Timeout {
                    operation: "select".to_string(),
                    duration_ms: start.elapsed().as_millis() as u64,
                })??,
            None => search.await?,
        };

        Ok(Selection {
            ranked: hits
                .into_iter()
                .map(|(agent_id, distance)| RankedAgent {
                    agent_id,
                    score: 1.0 - f64::from(distance),
                })
                .collect(),
            cost_usd: None,
        })
    }
}

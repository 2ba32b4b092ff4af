//! Fused semantic + quality selection engine.
//!
//! Query path: embed the task, pull a shortlist of `max(k, shortlist_size)`
//! nearest agents from the index, score each against the store snapshot,
//! fuse, truncate to `k`. Registration path: store first, then the index
//! for any record whose description changed.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{check_pool_ids, check_request, RankedAgent, Selection, SelectionAlgorithm};
use crate::agent::{Agent, AgentStore, Query, TaskOutcome, UpsertOutcome};
use crate::config::{EngineConfig, SelectionConfig};
use crate::error::{Error, Result};
use crate::ranking::{Candidate, FusionRanker, QualityScorer};
use crate::search::{EmbeddingIndex, EmbeddingProvider, ProviderRegistry};

/// An agent whose embedding could not be refreshed. It stays flagged for the
/// next [`SelectionEngine::sync_dirty`].
#[derive(Debug)]
pub struct SyncFailure {
    pub agent_id: String,
    pub error: Error,
}

/// Selection engine over a live agent pool.
pub struct SelectionEngine {
    store: AgentStore,
    index: EmbeddingIndex,
    scorer: QualityScorer,
    ranker: FusionRanker,
    config: SelectionConfig,
}

impl SelectionEngine {
    /// Create an engine with an empty pool.
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: &EngineConfig) -> Self {
        Self {
            store: AgentStore::new(),
            index: EmbeddingIndex::new(provider, config.index.clone()),
            scorer: QualityScorer::new(config.quality.clone()),
            ranker: FusionRanker::new(config.fusion.clone()),
            config: config.selection.clone(),
        }
    }

    /// Create an engine and embed the initial pool.
    ///
    /// `ids` must name exactly the ids of `agents`. Any agent that cannot be
    /// validated or embedded fails construction.
    pub async fn from_pool(
        agents: Vec<Agent>,
        ids: Vec<String>,
        provider: Arc<dyn EmbeddingProvider>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        check_pool_ids(&agents, &ids)?;

        let engine = Self::new(provider, &config);
        for agent in agents {
            engine.store.upsert(agent)?;
        }
        if let Some(failure) = engine.sync_dirty().await.into_iter().next() {
            return Err(failure.error);
        }

        info!(pool_size = engine.store.len(), "Selection engine ready");
        Ok(engine)
    }

    /// Like [`Self::from_pool`], building the provider named in the config.
    pub async fn from_registry(
        agents: Vec<Agent>,
        registry: &ProviderRegistry,
        config: EngineConfig,
    ) -> Result<Self> {
        let provider = registry.build(&config.embedder)?;
        let ids = agents.iter().map(|a| a.id.clone()).collect();
        Self::from_pool(agents, ids, provider, config).await
    }

    /// Register a new agent or merge into an existing one.
    ///
    /// Returns the agent's id (generated when the record had none). If the
    /// embedding cannot be computed the record is kept, stays flagged for
    /// re-embedding and is not selectable until a later sync succeeds.
    pub async fn register(&self, agent: Agent) -> Result<String> {
        let description = agent.description.clone();
        let (id, outcome) = self.store.upsert(agent)?;
        self.embed_if_needed(&id, &description, outcome).await?;
        Ok(id)
    }

    /// Update an already registered agent.
    pub async fn update(&self, agent: Agent) -> Result<UpsertOutcome> {
        if !self.store.contains(&agent.id) {
            return Err(Error::NotFound(agent.id));
        }
        let description = agent.description.clone();
        let (id, outcome) = self.store.upsert(agent)?;
        self.embed_if_needed(&id, &description, outcome).await?;
        Ok(outcome)
    }

    /// Embed exactly the description this upsert stored.
    ///
    /// A vector computed for a description that has since been replaced or
    /// removed is discarded; the newer upsert embeds its own.
    async fn embed_if_needed(
        &self,
        id: &str,
        description: &str,
        outcome: UpsertOutcome,
    ) -> Result<()> {
        if !outcome.needs_embedding() {
            return Ok(());
        }
        let stored = self
            .index
            .upsert_if(id, description, || self.store.has_description(id, description))
            .await?;
        if stored {
            self.store.clear_dirty(id, description);
        }
        Ok(())
    }

    /// Fold a completed task into the agent's quality signals.
    pub fn record_outcome(&self, id: &str, outcome: TaskOutcome) -> Result<Agent> {
        self.store.record_outcome(id, outcome)
    }

    /// Remove an agent from the store and the index.
    pub async fn deregister(&self, id: &str) -> Result<Agent> {
        let agent = self.store.remove(id)?;
        match self.index.remove(id).await {
            Ok(()) | Err(Error::NotFound(_)) => {}
            Err(err) => return Err(err),
        }
        info!(agent_id = %id, "Agent deregistered");
        Ok(agent)
    }

    /// Retry the embedding of every agent still flagged dirty.
    pub async fn sync_dirty(&self) -> Vec<SyncFailure> {
        let pending = self.store.pending_embeddings();
        if pending.is_empty() {
            return Vec::new();
        }

        let results = self
            .index
            .upsert_many(pending.clone(), |id, description| {
                self.store.has_description(id, description)
            })
            .await;

        let mut failures = Vec::new();
        for ((_, description), (agent_id, result)) in pending.iter().zip(results) {
            match result {
                Ok(true) => {
                    self.store.clear_dirty(&agent_id, description);
                }
                Ok(false) => {}
                Err(error) => {
                    warn!(agent_id = %agent_id, error = %error, "Embedding refresh failed");
                    failures.push(SyncFailure { agent_id, error });
                }
            }
        }
        failures
    }

    /// Fused candidates for `query`, best first, at most `k`.
    ///
    /// Runs under the query deadline, or the configured default when the
    /// query carries none.
    pub async fn candidates(&self, query: &Query, k: usize) -> Result<Vec<Candidate>> {
        let start = Instant::now();
        let result = match self.deadline_for(query) {
            Some(deadline) => tokio::time::timeout_at(deadline, self.rank_candidates(query, k))
                .await
                .unwrap_or_else(|_| {
                    Err(Error::Timeout {
                        operation: "select".to_string(),
                        duration_ms: start.elapsed().as_millis() as u64,
                    })
                }),
            None => self.rank_candidates(query, k).await,
        };
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        let outcome = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!("agentsel_select_total", "outcome" => outcome).increment(1);
        metrics::histogram!("agentsel_select_latency_ms").record(elapsed_ms);

        let candidates = result?;
        debug!(
            k,
            returned = candidates.len(),
            elapsed_ms,
            top = candidates.first().map(|c| c.agent_id.as_str()).unwrap_or(""),
            "Selection complete"
        );
        Ok(candidates)
    }

    async fn rank_candidates(&self, query: &Query, k: usize) -> Result<Vec<Candidate>> {
        check_request(query, k)?;
        // Agents whose embedding never succeeded are registered but not
        // selectable.
        if self.store.is_empty() || self.index.is_empty().await {
            return Err(Error::EmptyPool);
        }

        let shortlist_size = k.max(self.config.shortlist_size);
        let hits = self.index.query(&query.text, shortlist_size).await?;
        let agents = self.store.get_many(hits.iter().map(|(id, _)| id.as_str()));

        let scored = hits.into_iter().filter_map(|(id, distance)| {
            let agent = agents.get(&id)?;
            let quality = self.scorer.score(agent, &query.constraints);
            Some((id, f64::from(distance), quality))
        });

        let mut ranked = self.ranker.rank(scored);
        if ranked.is_empty() {
            return Err(Error::EmptyPool);
        }
        ranked.truncate(k);
        Ok(ranked)
    }

    fn deadline_for(&self, query: &Query) -> Option<tokio::time::Instant> {
        query.deadline.or_else(|| {
            (self.config.default_timeout_ms > 0).then(|| {
                tokio::time::Instant::now() + Duration::from_millis(self.config.default_timeout_ms)
            })
        })
    }

    pub fn store(&self) -> &AgentStore {
        &self.store
    }

    pub fn index(&self) -> &EmbeddingIndex {
        &self.index
    }

    pub fn scorer(&self) -> &QualityScorer {
        &self.scorer
    }

    pub fn ranker(&self) -> &FusionRanker {
        &self.ranker
    }

    /// Number of registered agents.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

#[async_trait]
impl SelectionAlgorithm for SelectionEngine {
    fn name(&self) -> &str {
        "fused"
    }

    async fn select(&self, query: &Query, k: usize) -> Result<Selection> {
        let candidates = self.candidates(query, k).await?;
        Ok(Selection {
            ranked: candidates
                .into_iter()
                .map(|c| RankedAgent {
                    agent_id: c.agent_id,
                    score: c.fused_score,
                })
                .collect(),
            cost_usd: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{Embedding, HashingEmbedder, ProviderMetadata};

    fn pool() -> Vec<Agent> {
        vec![
            Agent::new(
                "travel",
                "Travel Planner",
                "Plans trips, itineraries, flights and hotels for travel in Japan",
            )
            .with_ratings(20, Some(9.0)),
            Agent::new(
                "python",
                "Python Developer",
                "Python programmer writing scripts, data pipelines and REST APIs",
            ),
            Agent::new(
                "chef",
                "Chef",
                "Cooking recipes, meal planning and baking advice",
            )
            .with_ratings(5, Some(6.0)),
        ]
    }

    async fn engine() -> SelectionEngine {
        let agents = pool();
        let ids = agents.iter().map(|a| a.id.clone()).collect();
        SelectionEngine::from_pool(
            agents,
            ids,
            Arc::new(HashingEmbedder::default()),
            EngineConfig::default(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_select_returns_relevant_agent() {
        let engine = engine().await;
        let selection = engine
            .select(&Query::new("plan my travel itinerary to Japan"), 1)
            .await
            .unwrap();
        assert_eq!(selection.agent_ids(), vec!["travel"]);
    }

    #[tokio::test]
    async fn test_select_subset_unique_and_bounded() {
        let engine = engine().await;
        for k in 1..=5 {
            let selection = engine.select(&Query::new("write a recipe"), k).await.unwrap();
            let ids = selection.agent_ids();
            assert_eq!(ids.len(), k.min(3));
            let unique: std::collections::HashSet<&str> = ids.iter().copied().collect();
            assert_eq!(unique.len(), ids.len());
            assert!(ids.iter().all(|id| engine.store().contains(id)));
        }
    }

    #[tokio::test]
    async fn test_invalid_requests() {
        let engine = engine().await;
        assert!(matches!(
            engine.select(&Query::new(""), 1).await,
            Err(Error::InvalidQuery(_))
        ));
        assert!(matches!(
            engine.select(&Query::new("cook"), 0).await,
            Err(Error::InvalidQuery(_))
        ));

        let empty = SelectionEngine::new(
            Arc::new(HashingEmbedder::default()),
            &EngineConfig::default(),
        );
        assert!(matches!(
            empty.select(&Query::new("cook"), 1).await,
            Err(Error::EmptyPool)
        ));
    }

    #[tokio::test]
    async fn test_from_pool_rejects_mismatched_ids() {
        let result = SelectionEngine::from_pool(
            pool(),
            vec!["travel".into(), "python".into()],
            Arc::new(HashingEmbedder::default()),
            EngineConfig::default(),
        )
        .await;
        assert!(matches!(result, Err(Error::InvalidAgent { .. })));
    }

    #[tokio::test]
    async fn test_deregistered_agent_never_selected() {
        let engine = engine().await;
        engine.deregister("travel").await.unwrap();

        let selection = engine
            .select(&Query::new("plan my travel itinerary to Japan"), 10)
            .await
            .unwrap();
        assert!(!selection.agent_ids().contains(&"travel"));
        assert_eq!(selection.len(), 2);
        assert!(matches!(
            engine.deregister("travel").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_register_embeds_only_new_agent() {
        let engine = engine().await;
        let before = engine.index().snapshot().await;

        let id = engine
            .register(Agent::new("", "Poet", "Writes poems and song lyrics"))
            .await
            .unwrap();

        let after = engine.index().snapshot().await;
        assert_eq!(after.len(), before.len() + 1);
        for (agent_id, vector) in &before {
            assert_eq!(after.get(agent_id), Some(vector));
        }
        assert!(after.contains_key(&id));
    }

    #[tokio::test]
    async fn test_quality_update_does_not_reembed() {
        let engine = engine().await;
        let calls = engine.index().provider_stats().call_count;

        let mut chef = engine.store().get("chef").unwrap();
        chef = chef.with_ratings(6, Some(7.0));
        let outcome = engine.update(chef).await.unwrap();

        assert_eq!(outcome, UpsertOutcome::QualityUpdated);
        assert_eq!(engine.index().provider_stats().call_count, calls);
    }

    #[tokio::test]
    async fn test_update_unknown_agent() {
        let engine = engine().await;
        let result = engine.update(Agent::new("ghost", "Ghost", "haunts")).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_record_outcome_changes_ranking_inputs() {
        let engine = engine().await;
        let before = engine.scorer().score(
            &engine.store().get("python").unwrap(),
            &Default::default(),
        );
        engine
            .record_outcome("python", TaskOutcome::rated(1.0, 10.0))
            .unwrap();
        let after = engine.scorer().score(
            &engine.store().get("python").unwrap(),
            &Default::default(),
        );
        assert!(after > before);
    }

    #[tokio::test]
    async fn test_selection_is_deterministic() {
        let engine = engine().await;
        let query = Query::new("build a python REST API");
        let first = engine.select(&query, 3).await.unwrap();
        let second = engine.select(&query, 3).await.unwrap();
        assert_eq!(first, second);
    }

    /// Hashing embedder whose behavior depends on keywords in the text.
    struct ScriptedEmbedder;

    #[async_trait]
    impl EmbeddingProvider for ScriptedEmbedder {
        fn metadata(&self) -> ProviderMetadata {
            HashingEmbedder::new(16).metadata()
        }

        async fn embed(&self, text: &str) -> Result<Embedding> {
            if text.contains("stall") {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            if text.contains("slow") {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            if text.contains("unembeddable") {
                return Err(Error::InvalidEmbedding("rejected".into()));
            }
            if text.contains("outage") {
                return Err(Error::Provider {
                    provider: "scripted".into(),
                    reason: "service down".into(),
                });
            }
            HashingEmbedder::new(16).embed(text).await
        }
    }

    fn scripted_engine(config: EngineConfig) -> SelectionEngine {
        SelectionEngine::new(Arc::new(ScriptedEmbedder), &config)
    }

    fn fast_retry() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.index.max_retries = 2;
        config.index.retry_base_delay_ms = 1;
        config.index.retry_max_delay_ms = 2;
        config
    }

    async fn hashed(description: &str) -> Embedding {
        let reference = EmbeddingIndex::new(
            Arc::new(HashingEmbedder::new(16)),
            Default::default(),
        );
        reference.upsert("x", description).await.unwrap();
        reference.vector("x").await.unwrap()
    }

    #[tokio::test]
    async fn test_expired_deadline_times_out() {
        let engine = scripted_engine(EngineConfig::default());
        engine
            .register(Agent::new("a", "A", "writes poems"))
            .await
            .unwrap();

        let query = Query::new("stall please").with_timeout(Duration::from_millis(20));
        assert!(matches!(
            engine.select(&query, 1).await,
            Err(Error::Timeout { .. })
        ));
        assert!(matches!(
            engine.candidates(&query, 1).await,
            Err(Error::Timeout { .. })
        ));
    }

    #[tokio::test]
    async fn test_candidates_apply_default_deadline() {
        let mut config = EngineConfig::default();
        config.selection.default_timeout_ms = 20;
        let engine = scripted_engine(config);
        engine
            .register(Agent::new("a", "A", "writes poems"))
            .await
            .unwrap();

        assert!(matches!(
            engine.candidates(&Query::new("stall please"), 1).await,
            Err(Error::Timeout { .. })
        ));
        assert_eq!(
            engine.candidates(&Query::new("poems"), 1).await.unwrap()[0].agent_id,
            "a"
        );
    }

    #[tokio::test]
    async fn test_failed_embedding_stays_dirty() {
        let engine = scripted_engine(EngineConfig::default());
        engine
            .register(Agent::new("ok", "Ok", "writes poems"))
            .await
            .unwrap();
        let result = engine
            .register(Agent::new("bad", "Bad", "unembeddable text"))
            .await;

        assert!(matches!(result, Err(Error::InvalidEmbedding(_))));
        assert!(engine.store().contains("bad"));
        assert_eq!(engine.store().dirty_ids(), vec!["bad".to_string()]);

        let selection = engine.select(&Query::new("poems"), 5).await.unwrap();
        assert_eq!(selection.agent_ids(), vec!["ok"]);

        let failures = engine.sync_dirty().await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].agent_id, "bad");
        assert_eq!(engine.store().dirty_ids(), vec!["bad".to_string()]);
    }

    #[tokio::test]
    async fn test_unembedded_pool_is_empty() {
        let engine = scripted_engine(fast_retry());
        let result = engine
            .register(Agent::new("a", "A", "outage everywhere"))
            .await;
        assert!(matches!(
            result,
            Err(Error::EmbeddingUnavailable { attempts: 3, .. })
        ));
        assert_eq!(engine.len(), 1);
        assert!(engine.index().is_empty().await);

        assert!(matches!(
            engine.select(&Query::new("anything"), 1).await,
            Err(Error::EmptyPool)
        ));
    }

    #[tokio::test]
    async fn test_index_without_live_agents_is_empty() {
        let engine = scripted_engine(EngineConfig::default());
        let _ = engine
            .register(Agent::new("bad", "Bad", "unembeddable text"))
            .await;
        // A vector left behind for an id the store no longer knows.
        engine.index().upsert("ghost", "writes poems").await.unwrap();

        assert!(!engine.store().contains("ghost"));
        assert!(matches!(
            engine.select(&Query::new("poems"), 3).await,
            Err(Error::EmptyPool)
        ));
    }

    #[tokio::test]
    async fn test_overlapping_updates_keep_latest_vector() {
        let engine = scripted_engine(EngineConfig::default());

        let (registered, updated) = tokio::join!(
            engine.register(Agent::new("a", "A", "slowpoems verses")),
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                engine
                    .update(Agent::new("a", "A", "cooking recipes baking"))
                    .await
            }
        );
        assert_eq!(registered.unwrap(), "a");
        assert_eq!(updated.unwrap(), UpsertOutcome::DescriptionChanged);

        assert_eq!(
            engine.store().get("a").unwrap().description,
            "cooking recipes baking"
        );
        assert!(engine.store().dirty_ids().is_empty());
        assert_eq!(
            engine.index().vector("a").await.unwrap(),
            hashed("cooking recipes baking").await
        );
    }

    #[tokio::test]
    async fn test_sync_discards_superseded_vector() {
        let engine = scripted_engine(EngineConfig::default());
        engine
            .store()
            .upsert(Agent::new("a", "A", "slow poems"))
            .unwrap();

        let (failures, updated) = tokio::join!(engine.sync_dirty(), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            engine.update(Agent::new("a", "A", "bakes bread")).await
        });
        assert!(failures.is_empty());
        assert_eq!(updated.unwrap(), UpsertOutcome::DescriptionChanged);

        assert!(engine.store().dirty_ids().is_empty());
        assert_eq!(
            engine.index().vector("a").await.unwrap(),
            hashed("bakes bread").await
        );
    }

    #[tokio::test]
    async fn test_register_reports_only_its_own_failure() {
        let engine = scripted_engine(EngineConfig::default());

        let (bad, good) = tokio::join!(
            engine.register(Agent::new("bad", "Bad", "unembeddable slow text")),
            engine.register(Agent::new("good", "Good", "writes poems")),
        );
        assert!(matches!(bad, Err(Error::InvalidEmbedding(_))));
        assert_eq!(good.unwrap(), "good");

        assert_eq!(engine.store().dirty_ids(), vec!["bad".to_string()]);
        assert!(engine.index().contains("good").await);
        assert!(!engine.index().contains("bad").await);
    }
}

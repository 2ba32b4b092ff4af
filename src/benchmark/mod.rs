//! Benchmark harness.
//!
//! Runs a [`SelectionAlgorithm`] over labeled queries and reports accuracy,
//! latency and declared cost. Per-query failures are counted as misses and
//! attributed to their query; the harness never mutates the agent pool, so
//! repeated runs on the same snapshot agree on everything except timings.

mod stats;

pub use stats::{percentile, LatencySummary};

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

use crate::agent::{load_agents, Agent, Query, QueryConstraints};
use crate::config::BenchmarkConfig;
use crate::error::{Error, Result};
use crate::selection::SelectionAlgorithm;

/// A task with the agent(s) that should handle it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledQuery {
    /// Task text
    pub query: String,
    /// Acceptable agents; `object_id` with a single id is also accepted
    #[serde(alias = "object_id", deserialize_with = "one_or_many")]
    pub expected_ids: Vec<String>,
    /// Expected agent's display name, informational only
    #[serde(alias = "agent", default, skip_serializing_if = "Option::is_none")]
    pub expected_name: Option<String>,
    #[serde(default)]
    pub constraints: QueryConstraints,
}

impl LabeledQuery {
    pub fn new(query: impl Into<String>, expected_id: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            expected_ids: vec![expected_id.into()],
            expected_name: None,
            constraints: QueryConstraints::default(),
        }
    }

    /// Accept another agent as a correct answer
    pub fn or_expect(mut self, expected_id: impl Into<String>) -> Self {
        self.expected_ids.push(expected_id.into());
        self
    }

    /// Set constraints
    pub fn with_constraints(mut self, constraints: QueryConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    fn is_expected(&self, agent_id: &str) -> bool {
        self.expected_ids.iter().any(|id| id == agent_id)
    }
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(id) => vec![id],
        OneOrMany::Many(ids) => ids,
    })
}

/// Knobs for one benchmark run.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidateOptions {
    /// Depth for top-k accuracy
    pub k: usize,
    /// Keep and log per-query details
    pub verbose: bool,
    /// p95 latency objective in milliseconds
    pub latency_slo_ms: f64,
}

impl Default for ValidateOptions {
    fn default() -> Self {
        Self::from(&BenchmarkConfig::default())
    }
}

impl From<&BenchmarkConfig> for ValidateOptions {
    fn from(config: &BenchmarkConfig) -> Self {
        Self {
            k: config.k,
            verbose: config.verbose,
            latency_slo_ms: config.latency_slo_ms,
        }
    }
}

/// What happened for one labeled query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub query: String,
    pub expected_ids: Vec<String>,
    /// Returned agents, best first (empty on error)
    pub chosen_ids: Vec<String>,
    pub top_score: Option<f64>,
    pub latency_ms: f64,
    pub top1_hit: bool,
    pub topk_hit: bool,
    pub error: Option<String>,
}

/// Result of a benchmark run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkReport {
    /// Name of the algorithm under test
    pub algorithm: String,
    pub total_queries: usize,
    pub k: usize,
    pub top1_hits: usize,
    pub topk_hits: usize,
    /// Fraction of queries whose first pick was expected
    pub top1_accuracy: f64,
    /// Fraction of queries with an expected agent in the first `k`
    pub topk_accuracy: f64,
    /// Queries whose `select` returned an error
    pub failures: usize,
    pub latency: LatencySummary,
    /// Sum of costs declared by the algorithm
    pub total_cost_usd: f64,
    pub latency_slo_ms: f64,
    /// `latency.p95_ms <= latency_slo_ms`
    pub slo_met: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub per_query: Vec<QueryOutcome>,
}

impl fmt::Display for BenchmarkReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Algorithm:      {}", self.algorithm)?;
        writeln!(f, "Queries:        {}", self.total_queries)?;
        writeln!(
            f,
            "Top-1 accuracy: {:.3} ({}/{})",
            self.top1_accuracy, self.top1_hits, self.total_queries
        )?;
        writeln!(
            f,
            "Top-{} accuracy: {:.3} ({}/{})",
            self.k, self.topk_accuracy, self.topk_hits, self.total_queries
        )?;
        writeln!(f, "Failures:       {}", self.failures)?;
        writeln!(
            f,
            "Latency (ms):   mean {:.2}  p50 {:.2}  p90 {:.2}  p95 {:.2}  p99 {:.2}  max {:.2}",
            self.latency.mean_ms,
            self.latency.p50_ms,
            self.latency.p90_ms,
            self.latency.p95_ms,
            self.latency.p99_ms,
            self.latency.max_ms
        )?;
        writeln!(f, "Cost (USD):     {:.4}", self.total_cost_usd)?;
        write!(
            f,
            "SLO p95 <= {:.1}ms: {}",
            self.latency_slo_ms,
            if self.slo_met { "met" } else { "MISSED" }
        )
    }
}

/// An agent pool with labeled queries.
#[derive(Debug, Clone)]
pub struct Benchmark {
    agents: Vec<Agent>,
    queries: Vec<LabeledQuery>,
}

impl Benchmark {
    /// Build a benchmark, checking that every query is answerable.
    pub fn new(agents: Vec<Agent>, queries: Vec<LabeledQuery>) -> Result<Self> {
        let mut known = HashSet::with_capacity(agents.len());
        for agent in &agents {
            agent.validate()?;
            if !known.insert(agent.id.as_str()) {
                return Err(Error::invalid_agent(&agent.id, "duplicate id in benchmark pool"));
            }
        }

        for (position, labeled) in queries.iter().enumerate() {
            if labeled.query.trim().is_empty() {
                return Err(Error::InvalidQuery(format!("query #{} is blank", position)));
            }
            if labeled.expected_ids.is_empty() {
                return Err(Error::InvalidQuery(format!(
                    "query #{} has no expected agent",
                    position
                )));
            }
            if let Some(unknown) = labeled
                .expected_ids
                .iter()
                .find(|id| !known.contains(id.as_str()))
            {
                return Err(Error::InvalidQuery(format!(
                    "query #{} expects unknown agent '{}'",
                    position, unknown
                )));
            }
        }

        Ok(Self { agents, queries })
    }

    /// Load agents and labeled queries from JSON array files.
    pub fn from_files(agents: impl AsRef<Path>, queries: impl AsRef<Path>) -> Result<Self> {
        let agents = load_agents(agents)?;
        let raw = std::fs::read_to_string(queries)?;
        let queries: Vec<LabeledQuery> = serde_json::from_str(&raw)?;
        Self::new(agents, queries)
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    /// Agent ids in pool order, as passed to `from_pool` constructors.
    pub fn agent_ids(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.id.clone()).collect()
    }

    pub fn queries(&self) -> &[LabeledQuery] {
        &self.queries
    }

    /// Run every labeled query through `algorithm`.
    pub async fn validate(
        &self,
        algorithm: &dyn SelectionAlgorithm,
        options: ValidateOptions,
    ) -> BenchmarkReport {
        let k = options.k.max(1);
        let mut latencies = Vec::with_capacity(self.queries.len());
        let mut outcomes = Vec::with_capacity(self.queries.len());
        let mut total_cost_usd = 0.0;

        for labeled in &self.queries {
            let query = Query::new(labeled.query.clone()).with_constraints(labeled.constraints);
            let start = Instant::now();
            let result = algorithm.select(&query, k).await;
            let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
            latencies.push(latency_ms);

            let outcome = match result {
                Ok(selection) => {
                    total_cost_usd += selection.cost_usd.unwrap_or(0.0);
                    let chosen_ids: Vec<String> = selection
                        .ranked
                        .iter()
                        .take(k)
                        .map(|r| r.agent_id.clone())
                        .collect();
                    QueryOutcome {
                        query: labeled.query.clone(),
                        expected_ids: labeled.expected_ids.clone(),
                        top1_hit: chosen_ids.first().is_some_and(|id| labeled.is_expected(id)),
                        topk_hit: chosen_ids.iter().any(|id| labeled.is_expected(id)),
                        top_score: selection.top().map(|r| r.score),
                        chosen_ids,
                        latency_ms,
                        error: None,
                    }
                }
                Err(err) => {
                    warn!(query = %labeled.query, error = %err, "Selection failed");
                    QueryOutcome {
                        query: labeled.query.clone(),
                        expected_ids: labeled.expected_ids.clone(),
                        chosen_ids: Vec::new(),
                        top_score: None,
                        latency_ms,
                        top1_hit: false,
                        topk_hit: false,
                        error: Some(err.to_string()),
                    }
                }
            };

            if options.verbose {
                info!(
                    query = %outcome.query,
                    chosen = ?outcome.chosen_ids,
                    expected = ?outcome.expected_ids,
                    top1_hit = outcome.top1_hit,
                    latency_ms = outcome.latency_ms,
                    "Benchmark query"
                );
            }
            outcomes.push(outcome);
        }

        let total_queries = outcomes.len();
        let top1_hits = outcomes.iter().filter(|o| o.top1_hit).count();
        let topk_hits = outcomes.iter().filter(|o| o.topk_hit).count();
        let failures = outcomes.iter().filter(|o| o.error.is_some()).count();
        let accuracy = |hits: usize| {
            if total_queries == 0 {
                0.0
            } else {
                hits as f64 / total_queries as f64
            }
        };
        let latency = LatencySummary::from_samples(&latencies);

        let report = BenchmarkReport {
            algorithm: algorithm.name().to_string(),
            total_queries,
            k,
            top1_hits,
            topk_hits,
            top1_accuracy: accuracy(top1_hits),
            topk_accuracy: accuracy(topk_hits),
            failures,
            slo_met: latency.p95_ms <= options.latency_slo_ms,
            latency,
            total_cost_usd,
            latency_slo_ms: options.latency_slo_ms,
            per_query: if options.verbose { outcomes } else { Vec::new() },
        };

        info!(
            algorithm = %report.algorithm,
            queries = report.total_queries,
            top1_accuracy = report.top1_accuracy,
            failures = report.failures,
            p95_ms = report.latency.p95_ms,
            "Benchmark complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::{check_request, RankedAgent, Selection};
    use async_trait::async_trait;

    /// Always returns the same ranking and declares a fixed cost.
    struct FixedSelector {
        ranking: Vec<&'static str>,
    }

    #[async_trait]
    impl SelectionAlgorithm for FixedSelector {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn select(&self, query: &Query, k: usize) -> Result<Selection> {
            check_request(query, k)?;
            if query.text.contains("explode") {
                return Err(Error::Provider {
                    provider: "fixed".into(),
                    reason: "boom".into(),
                });
            }
            Ok(Selection {
                ranked: self
                    .ranking
                    .iter()
                    .take(k)
                    .enumerate()
                    .map(|(i, id)| RankedAgent {
                        agent_id: id.to_string(),
                        score: 1.0 / (i + 1) as f64,
                    })
                    .collect(),
                cost_usd: Some(0.01),
            })
        }
    }

    fn agents() -> Vec<Agent> {
        ["a", "b", "c"]
            .iter()
            .map(|id| Agent::new(*id, id.to_uppercase(), format!("agent {id}")))
            .collect()
    }

    fn benchmark() -> Benchmark {
        Benchmark::new(
            agents(),
            vec![
                LabeledQuery::new("first task", "a"),
                LabeledQuery::new("second task", "b"),
                LabeledQuery::new("please explode", "a"),
                LabeledQuery::new("fourth task", "c").or_expect("a"),
            ],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_accuracy_and_failures() {
        let selector = FixedSelector {
            ranking: vec!["a", "b", "c"],
        };
        let options = ValidateOptions {
            k: 2,
            verbose: true,
            latency_slo_ms: 1_000.0,
        };
        let report = benchmark().validate(&selector, options).await;

        assert_eq!(report.algorithm, "fixed");
        assert_eq!(report.total_queries, 4);
        assert_eq!(report.top1_hits, 2);
        assert_eq!(report.topk_hits, 3);
        assert_eq!(report.failures, 1);
        assert_eq!(report.top1_accuracy, 0.5);
        assert_eq!(report.topk_accuracy, 0.75);
        assert!((report.total_cost_usd - 0.03).abs() < 1e-12);
        assert!(report.slo_met);

        let failed = &report.per_query[2];
        assert_eq!(failed.query, "please explode");
        assert!(failed.error.as_deref().is_some_and(|e| e.contains("boom")));
        assert!(!failed.top1_hit);
    }

    #[tokio::test]
    async fn test_non_verbose_omits_details() {
        let selector = FixedSelector {
            ranking: vec!["a"],
        };
        let report = benchmark()
            .validate(&selector, ValidateOptions::default())
            .await;
        assert!(report.per_query.is_empty());
        assert_eq!(report.latency.samples, 4);
    }

    #[tokio::test]
    async fn test_slo_miss_reported() {
        let selector = FixedSelector {
            ranking: vec!["a"],
        };
        let options = ValidateOptions {
            latency_slo_ms: -1.0,
            ..Default::default()
        };
        let report = benchmark().validate(&selector, options).await;
        assert!(!report.slo_met);
    }

    #[test]
    fn test_rejects_unknown_expected_agent() {
        let result = Benchmark::new(agents(), vec![LabeledQuery::new("task", "zzz")]);
        assert!(matches!(result, Err(Error::InvalidQuery(_))));
    }

    #[test]
    fn test_labeled_query_accepts_single_object_id() {
        let json = r#"[
            {"query": "Plan a trip to Japan", "object_id": "a", "agent": "A"},
            {"query": "Cook dinner", "expected_ids": ["b", "c"],
             "constraints": {"max_cost": 2.0}}
        ]"#;
        let queries: Vec<LabeledQuery> = serde_json::from_str(json).unwrap();
        assert_eq!(queries[0].expected_ids, vec!["a"]);
        assert_eq!(queries[0].expected_name.as_deref(), Some("A"));
        assert_eq!(queries[1].expected_ids, vec!["b", "c"]);
        assert_eq!(queries[1].constraints.max_cost, Some(2.0));
    }

    #[test]
    fn test_from_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let agents_path = dir.path().join("agents.json");
        let queries_path = dir.path().join("queries.json");
        std::fs::write(&agents_path, serde_json::to_string(&agents()).unwrap()).unwrap();
        std::fs::write(
            &queries_path,
            r#"[{"query": "do the thing", "object_id": "b"}]"#,
        )
        .unwrap();

        let benchmark = Benchmark::from_files(&agents_path, &queries_path).unwrap();
        assert_eq!(benchmark.agent_ids(), vec!["a", "b", "c"]);
        assert_eq!(benchmark.queries().len(), 1);
    }
}

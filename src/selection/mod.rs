//! Selection algorithm interface.
//!
//! Every routing strategy, including the fused engine and the distance-only
//! baseline, implements [`SelectionAlgorithm`] so the benchmark harness can
//! drive any of them the same way.

mod baseline;
mod engine;

pub use baseline::NearestNeighborSelector;
pub use engine::{SelectionEngine, SyncFailure};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::agent::{Agent, Query};
use crate::error::{Error, Result};

/// One agent in a selection, best first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedAgent {
    pub agent_id: String,
    /// Algorithm-specific score, higher is better
    pub score: f64,
}

/// Result of one `select` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    /// Distinct agents, best first, at most `k`
    pub ranked: Vec<RankedAgent>,
    /// Cost the algorithm itself incurred, if it declares one
    pub cost_usd: Option<f64>,
}

impl Selection {
    /// Ranked agent ids, best first.
    pub fn agent_ids(&self) -> Vec<&str> {
        self.ranked.iter().map(|r| r.agent_id.as_str()).collect()
    }

    /// Best agent, if any.
    pub fn top(&self) -> Option<&RankedAgent> {
        self.ranked.first()
    }

    pub fn len(&self) -> usize {
        self.ranked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranked.is_empty()
    }
}

/// A pluggable routing strategy.
///
/// # Example
///
/// ```rust,ignore
/// struct AlwaysFirst { id: String }
///
/// #[async_trait]
/// impl SelectionAlgorithm for AlwaysFirst {
///     fn name(&self) -> &str {
///         "always_first"
///     }
///
///     async fn select(&self, query: &Query, k: usize) -> Result<Selection> {
///         check_request(query, k)?;
///         Ok(Selection {
///             ranked: vec![RankedAgent { agent_id: self.id.clone(), score: 1.0 }],
///             cost_usd: None,
///         })
///     }
/// }
/// ```
#[async_trait]
pub trait SelectionAlgorithm: Send + Sync {
    /// Short name used in reports and logs
    fn name(&self) -> &str;

    /// Up to `k` distinct agents for `query`, best first.
    ///
    /// Fails with [`Error::InvalidQuery`] for blank text or `k == 0` and
    /// with [`Error::EmptyPool`] when no registered agent has an embedding.
    async fn select(&self, query: &Query, k: usize) -> Result<Selection>;
}

/// Reject blank query text and `k == 0`.
pub fn check_request(query: &Query, k: usize) -> Result<()> {
    query.validate()?;
    if k == 0 {
        return Err(Error::InvalidQuery("k must be at least 1".into()));
    }
    Ok(())
}

/// Check that `ids` names exactly the agents in `agents`, each once.
pub(crate) fn check_pool_ids(agents: &[Agent], ids: &[String]) -> Result<()> {
    if agents.len() != ids.len() {
        return Err(Error::invalid_agent(
            "",
            format!("{} agents but {} ids", agents.len(), ids.len()),
        ));
    }

    let mut expected = HashSet::with_capacity(ids.len());
    for id in ids {
        if !expected.insert(id.as_str()) {
            return Err(Error::invalid_agent(id, "duplicate id in pool"));
        }
    }
    for agent in agents {
        if !expected.remove(agent.id.as_str()) {
            return Err(Error::invalid_agent(&agent.id, "agent id missing from id list"));
        }
    }
    Ok(())
}

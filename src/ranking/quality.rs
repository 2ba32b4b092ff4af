//! Cold-start-smoothed quality score.

use crate::agent::{Agent, QueryConstraints, MAX_RATING, MIN_RATING};
use crate::config::QualityConfig;

/// Maps agent signals to a quality score in [0, 1].
///
/// The mean rating is rescaled to [0, 1] and blended with a neutral prior,
/// weighted by the number of rated responses:
///
/// ```text
/// base    = (average_rating - 1) / 9
/// blended = (n * base + w * prior) / (n + w)
/// ```
///
/// An agent with no ratings scores exactly `prior`. Declared cost and
/// latency budgets then scale the score by `min(1, budget / actual)^sharpness`.
#[derive(Debug, Clone)]
pub struct QualityScorer {
    config: QualityConfig,
}

impl QualityScorer {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    /// Rating component blended with the prior.
    pub fn blended_rating(&self, agent: &Agent) -> f64 {
        let n = agent.rated_responses as f64;
        let base = match agent.average_rating {
            Some(rating) if agent.rated_responses > 0 => {
                ((rating - MIN_RATING) / (MAX_RATING - MIN_RATING)).clamp(0.0, 1.0)
            }
            _ => return self.config.prior,
        };
        let w = self.config.prior_weight;
        (n * base + w * self.config.prior) / (n + w)
    }

    /// Full score for `agent` under `constraints`.
    pub fn score(&self, agent: &Agent, constraints: &QueryConstraints) -> f64 {
        let mut q = self.blended_rating(agent);
        if let Some(max_cost) = constraints.max_cost {
            q *= budget_factor(agent.total_cost(), max_cost, self.config.cost_sharpness);
        }
        if let Some(max_latency) = constraints.max_latency {
            q *= budget_factor(agent.response_time, max_latency, self.config.latency_sharpness);
        }
        q.clamp(0.0, 1.0)
    }
}

impl Default for QualityScorer {
    fn default() -> Self {
        Self::new(QualityConfig::default())
    }
}

/// `min(1, budget / actual)^sharpness`; free or instant agents are never penalized.
fn budget_factor(actual: f64, budget: f64, sharpness: f64) -> f64 {
    if actual <= 0.0 {
        return 1.0;
    }
    (budget.max(0.0) / actual).min(1.0).powf(sharpness)
}

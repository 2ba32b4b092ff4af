//! Agent records and queries.
//!
//! An [`Agent`] carries immutable identity (`id`), the free-text description
//! the index embeds, and mutable quality signals. A [`Query`] is the
//! ephemeral task text plus optional cost/latency constraints.

mod store;

pub use store::{AgentStore, UpsertOutcome};

use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::time::Instant;

use crate::error::{Error, Result};

/// Lowest rating an agent can receive.
pub const MIN_RATING: f64 = 1.0;

/// Highest rating an agent can receive.
pub const MAX_RATING: f64 = 10.0;

/// A registered task-performing agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    /// Unique, stable id (`object_id` in benchmark files)
    #[serde(alias = "object_id", default)]
    pub id: String,
    pub name: String,
    /// Free text used for semantic matching
    pub description: String,
    /// Passed through, never read by the engine
    #[serde(default)]
    pub system_prompt: String,
    /// Mean response time in seconds
    #[serde(default)]
    pub response_time: f64,
    /// USD per 1M input tokens
    #[serde(default)]
    pub input_cost: f64,
    /// USD per 1M output tokens
    #[serde(default)]
    pub output_cost: f64,
    /// Number of queries received
    #[serde(default)]
    pub popularity: u64,
    /// Number of rated responses
    #[serde(default)]
    pub rated_responses: u64,
    /// Mean rating in [1, 10]; absent while `rated_responses == 0`
    #[serde(default)]
    pub average_rating: Option<f64>,
}

impl Agent {
    /// Create a cold-start agent with zeroed signals.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            system_prompt: String::new(),
            response_time: 0.0,
            input_cost: 0.0,
            output_cost: 0.0,
            popularity: 0,
            rated_responses: 0,
            average_rating: None,
        }
    }

    /// Set the system prompt
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Set per-1M-token costs
    pub fn with_costs(mut self, input_cost: f64, output_cost: f64) -> Self {
        self.input_cost = input_cost;
        self.output_cost = output_cost;
        self
    }

    /// Set mean response time in seconds
    pub fn with_response_time(mut self, seconds: f64) -> Self {
        self.response_time = seconds;
        self
    }

    /// Set rating history. `popularity` is raised to `rated_responses` if lower.
    pub fn with_ratings(mut self, rated_responses: u64, average_rating: Option<f64>) -> Self {
        self.rated_responses = rated_responses;
        self.average_rating = average_rating;
        self.popularity = self.popularity.max(rated_responses);
        self
    }

    /// Set popularity
    pub fn with_popularity(mut self, popularity: u64) -> Self {
        self.popularity = popularity;
        self
    }

    /// Combined input + output cost per 1M tokens.
    pub fn total_cost(&self) -> f64 {
        self.input_cost + self.output_cost
    }

    /// Check the data model invariants.
    pub fn validate(&self) -> Result<()> {
        if self.description.trim().is_empty() {
            return Err(Error::invalid_agent(&self.id, "description is blank"));
        }

        let non_negative = [
            ("response_time", self.response_time),
            ("input_cost", self.input_cost),
            ("output_cost", self.output_cost),
        ];
        for (field, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::invalid_agent(
                    &self.id,
                    format!("{} must be a finite value >= 0, got {}", field, value),
                ));
            }
        }

        if self.rated_responses > self.popularity {
            return Err(Error::invalid_agent(
                &self.id,
                format!(
                    "rated_responses ({}) exceeds popularity ({})",
                    self.rated_responses, self.popularity
                ),
            ));
        }

        match (self.rated_responses, self.average_rating) {
            (0, Some(_)) => Err(Error::invalid_agent(
                &self.id,
                "average_rating must be absent when rated_responses is 0",
            )),
            (n, None) if n > 0 => Err(Error::invalid_agent(
                &self.id,
                "average_rating is required when rated_responses > 0",
            )),
            (_, Some(rating)) if !(MIN_RATING..=MAX_RATING).contains(&rating) => {
                Err(Error::invalid_agent(
                    &self.id,
                    format!("average_rating {} outside [1, 10]", rating),
                ))
            }
            _ => Ok(()),
        }
    }
}

/// Load agent records from a JSON array file.
pub fn load_agents(path: impl AsRef<Path>) -> Result<Vec<Agent>> {
    let raw = std::fs::read_to_string(path)?;
    let agents: Vec<Agent> = serde_json::from_str(&raw)?;
    Ok(agents)
}

/// Outcome of one completed task, folded into an agent's signals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    /// Wall-clock response time in seconds
    pub response_time: f64,
    /// User rating in [1, 10], if the response was rated
    pub rating: Option<f64>,
}

impl TaskOutcome {
    /// An unrated task
    pub fn unrated(response_time: f64) -> Self {
        Self {
            response_time,
            rating: None,
        }
    }

    /// A rated task
    pub fn rated(response_time: f64, rating: f64) -> Self {
        Self {
            response_time,
            rating: Some(rating),
        }
    }
}

/// Declared budget for a query. Unset fields impose no penalty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryConstraints {
    /// Maximum acceptable input + output cost per 1M tokens
    #[serde(default)]
    pub max_cost: Option<f64>,
    /// Maximum acceptable response time in seconds
    #[serde(default)]
    pub max_latency: Option<f64>,
}

impl QueryConstraints {
    pub fn is_empty(&self) -> bool {
        self.max_cost.is_none() && self.max_latency.is_none()
    }
}

/// A natural-language task to route.
#[derive(Debug, Clone)]
pub struct Query {
    pub text: String,
    pub constraints: QueryConstraints,
    /// Abort selection at this instant
    pub deadline: Option<Instant>,
}

impl Query {
    /// Create a query without constraints or deadline
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            constraints: QueryConstraints::default(),
            deadline: None,
        }
    }

    /// Set constraints
    pub fn with_constraints(mut self, constraints: QueryConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    /// Set a maximum acceptable cost
    pub fn with_max_cost(mut self, max_cost: f64) -> Self {
        self.constraints.max_cost = Some(max_cost);
        self
    }

    /// Set a maximum acceptable latency
    pub fn with_max_latency(mut self, max_latency: f64) -> Self {
        self.constraints.max_latency = Some(max_latency);
        self
    }

    /// Set an absolute deadline
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set a deadline relative to now
    pub fn with_timeout(self, timeout: std::time::Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Reject empty or whitespace-only text.
    pub fn validate(&self) -> Result<()> {
        if self.text.trim().is_empty() {
            return Err(Error::InvalidQuery("query text is blank".into()));
        }
        Ok(())
    }
}

impl From<&str> for Query {
    fn from(text: &str) -> Self {
        Query::new(text)
    }
}

//! In-memory agent record store.
//!
//! The store is the source of truth for identity and quality signals. It
//! never embeds or scores anything; a description change only raises a
//! dirty flag. The flag is cleared by [`AgentStore::clear_dirty`] once a
//! vector for that exact description is stored, so an embedding computed for
//! a superseded description can never clear it.

use std::collections::{BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use super::{Agent, TaskOutcome, MAX_RATING, MIN_RATING};
use crate::error::{Error, Result};

/// What an upsert changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// New id; needs an embedding
    Created,
    /// Description changed; needs re-embedding
    DescriptionChanged,
    /// Only signals or pass-through fields changed
    QualityUpdated,
    /// Identical record
    Unchanged,
}

impl UpsertOutcome {
    /// Whether the index must (re)compute the agent's embedding.
    pub fn needs_embedding(&self) -> bool {
        matches!(self, Self::Created | Self::DescriptionChanged)
    }
}

#[derive(Debug, Default)]
struct StoreState {
    agents: HashMap<String, Agent>,
    dirty: BTreeSet<String>,
}

/// Thread-safe agent record store.
#[derive(Debug, Default)]
pub struct AgentStore {
    state: RwLock<StoreState>,
}

impl AgentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        // A poisoned lock still holds consistent records: every write below
        // validates before mutating.
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert a new agent or merge into an existing one.
    ///
    /// Assigns a UUID when `agent.id` is empty; the assigned id is returned
    /// alongside the outcome.
    pub fn upsert(&self, mut agent: Agent) -> Result<(String, UpsertOutcome)> {
        if agent.id.trim().is_empty() {
            agent.id = uuid::Uuid::new_v4().to_string();
        }
        agent.validate()?;

        let mut state = self.write();
        let id = agent.id.clone();

        let outcome = match state.agents.get(&id) {
            None => UpsertOutcome::Created,
            Some(existing) => {
                if agent.popularity < existing.popularity {
                    return Err(Error::invalid_agent(
                        &id,
                        format!(
                            "popularity cannot decrease ({} -> {})",
                            existing.popularity, agent.popularity
                        ),
                    ));
                }
                if existing.description != agent.description {
                    UpsertOutcome::DescriptionChanged
                } else if *existing == agent {
                    UpsertOutcome::Unchanged
                } else {
                    UpsertOutcome::QualityUpdated
                }
            }
        };

        if outcome.needs_embedding() {
            state.dirty.insert(id.clone());
        }
        if outcome != UpsertOutcome::Unchanged {
            state.agents.insert(id.clone(), agent);
        }

        debug!(agent_id = %id, ?outcome, "Agent upserted");
        Ok((id, outcome))
    }

    /// Get a snapshot of one agent.
    pub fn get(&self, id: &str) -> Result<Agent> {
        self.read()
            .agents
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Remove an agent and any pending dirty flag.
    pub fn remove(&self, id: &str) -> Result<Agent> {
        let mut state = self.write();
        state.dirty.remove(id);
        state
            .agents
            .remove(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Snapshot of all agents, sorted by id.
    pub fn list(&self) -> Vec<Agent> {
        let mut agents: Vec<Agent> = self.read().agents.values().cloned().collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }

    /// Snapshot of the requested agents. Unknown ids are skipped.
    pub fn get_many<'a>(&self, ids: impl IntoIterator<Item = &'a str>) -> HashMap<String, Agent> {
        let state = self.read();
        ids.into_iter()
            .filter_map(|id| state.agents.get(id).map(|a| (id.to_string(), a.clone())))
            .collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().agents.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.read().agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().agents.is_empty()
    }

    /// Dirty agents as `(id, description)` pairs in id order. Flags stay set
    /// until [`Self::clear_dirty`].
    pub fn pending_embeddings(&self) -> Vec<(String, String)> {
        let state = self.read();
        state
            .dirty
            .iter()
            .filter_map(|id| {
                let description = state.agents.get(id)?.description.clone();
                Some((id.clone(), description))
            })
            .collect()
    }

    /// Whether `id` is registered with exactly `description`.
    pub fn has_description(&self, id: &str, description: &str) -> bool {
        self.read()
            .agents
            .get(id)
            .is_some_and(|a| a.description == description)
    }

    /// Clear the dirty flag of `id` if its description is still
    /// `description`. Returns whether the flag was cleared.
    pub fn clear_dirty(&self, id: &str, description: &str) -> bool {
        let mut state = self.write();
        let current = state
            .agents
            .get(id)
            .is_some_and(|a| a.description == description);
        current && state.dirty.remove(id)
    }

    /// Ids currently awaiting an embedding.
    pub fn dirty_ids(&self) -> Vec<String> {
        self.read().dirty.iter().cloned().collect()
    }

    /// Fold a completed task into the agent's signals.
    ///
    /// Popularity grows by one, response time becomes the running mean over
    /// all tasks and a rating updates the incremental mean rating.
    pub fn record_outcome(&self, id: &str, outcome: TaskOutcome) -> Result<Agent> {
        if !outcome.response_time.is_finite() || outcome.response_time < 0.0 {
            return Err(Error::invalid_agent(
                id,
                format!("response_time {} must be >= 0", outcome.response_time),
            ));
        }
        if let Some(rating) = outcome.rating {
            if !(MIN_RATING..=MAX_RATING).contains(&rating) {
                return Err(Error::invalid_agent(
                    id,
                    format!("rating {} outside [1, 10]", rating),
                ));
            }
        }

        let mut state = self.write();
        let agent = state
            .agents
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        let previous = agent.popularity as f64;
        agent.popularity += 1;
        agent.response_time =
            (agent.response_time * previous + outcome.response_time) / agent.popularity as f64;

        if let Some(rating) = outcome.rating {
            let rated = agent.rated_responses as f64;
            let mean = agent.average_rating.unwrap_or(0.0);
            agent.rated_responses += 1;
            agent.average_rating = Some((mean * rated + rating) / agent.rated_responses as f64);
        }

        debug!(
            agent_id = %id,
            popularity = agent.popularity,
            rated_responses = agent.rated_responses,
            "Task outcome recorded"
        );
        Ok(agent.clone())
    }
}

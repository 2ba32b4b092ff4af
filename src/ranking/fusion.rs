//! Fusion of semantic distance with quality.
//!
//! Distances are first normalized across the shortlist so they share the
//! [0, 1] scale of quality scores, then combined by the configured strategy.
//! With the default (min–max + multiplicative) the nearest agent keeps its
//! full quality score and the farthest shortlisted agent scores zero.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::config::FusionConfig;

/// How shortlist distances are mapped to [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DistanceNormalization {
    /// `(d - min) / (max - min)` over the shortlist; all-equal distances map to 0
    #[default]
    MinMax,
    /// `d / (d + scale)`, independent of the other candidates
    Saturating { scale: f64 },
}

/// How normalized distance and quality are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FusionStrategy {
    /// `(1 - nd) * q`
    #[default]
    Multiplicative,
    /// `alpha * (1 - nd) + (1 - alpha) * q`
    Linear { alpha: f64 },
}

/// A shortlisted agent with its ranking inputs and output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub agent_id: String,
    /// Cosine distance to the query
    pub distance: f64,
    /// Quality score in [0, 1]
    pub quality_score: f64,
    /// Final ranking score
    pub fused_score: f64,
}

/// Stateless re-ranker.
#[derive(Debug, Clone, Default)]
pub struct FusionRanker {
    config: FusionConfig,
}

impl FusionRanker {
    pub fn new(config: FusionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Rank `(agent_id, distance, quality_score)` triples by fused score,
    /// highest first, ties by agent id.
    pub fn rank<I>(&self, shortlist: I) -> Vec<Candidate>
    where
        I: IntoIterator<Item = (String, f64, f64)>,
    {
        let shortlist: Vec<(String, f64, f64)> = shortlist.into_iter().collect();
        let bounds = shortlist
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), (_, d, _)| {
                (lo.min(*d), hi.max(*d))
            });

        let mut candidates: Vec<Candidate> = shortlist
            .into_iter()
            .map(|(agent_id, distance, quality_score)| {
                let closeness = 1.0 - self.normalize(distance, bounds);
                let fused_score = match self.config.strategy {
                    FusionStrategy::Multiplicative => closeness * quality_score,
                    FusionStrategy::Linear { alpha } => {
                        alpha * closeness + (1.0 - alpha) * quality_score
                    }
                };
                Candidate {
                    agent_id,
                    distance,
                    quality_score,
                    fused_score,
                }
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.fused_score
                .total_cmp(&a.fused_score)
                .then_with(|| a.agent_id.cmp(&b.agent_id))
        });
        candidates
    }

    /// Plain nearest-neighbor order: distance ascending, ties by agent id.
    ///
    /// `fused_score` is set to `1 - distance` so callers have a
    /// higher-is-better score either way.
    pub fn rank_by_distance<I>(shortlist: I) -> Vec<Candidate>
    where
        I: IntoIterator<Item = (String, f64, f64)>,
    {
        let mut candidates: Vec<Candidate> = shortlist
            .into_iter()
            .map(|(agent_id, distance, quality_score)| Candidate {
                agent_id,
                distance,
                quality_score,
                fused_score: 1.0 - distance,
            })
            .collect();
        candidates.sort_by(by_distance_then_id);
        candidates
    }

    fn normalize(&self, d: f64, (min, max): (f64, f64)) -> f64 {
        match self.config.normalization {
            DistanceNormalization::MinMax => {
                let range = max - min;
                if range > 0.0 {
                    ((d - min) / range).clamp(0.0, 1.0)
                } else {
                    0.0
                }
            }
            DistanceNormalization::Saturating { scale } => {
                let d = d.max(0.0);
                d / (d + scale)
            }
        }
    }
}

fn by_distance_then_id(a: &Candidate, b: &Candidate) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then_with(|| a.agent_id.cmp(&b.agent_id))
}

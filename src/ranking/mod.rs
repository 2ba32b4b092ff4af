//! Quality scoring and fusion re-ranking.
//!
//! The index answers "who is semantically close"; this module answers "who
//! is close *and* good". [`QualityScorer`] turns an agent's signals into a
//! score in [0, 1], and [`FusionRanker`] combines that score with the
//! shortlist distances into the final order.

mod fusion;
mod quality;

pub use fusion::{Candidate, DistanceNormalization, FusionRanker, FusionStrategy};
pub use quality::QualityScorer;

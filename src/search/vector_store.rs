//! In-memory vector store with exact and approximate nearest-neighbor search.
//!
//! Distance is cosine distance `1 - cos(a, b)` over L2-normalized vectors,
//! in `[0, 2]`. Results are ordered by distance, ties by agent id.
//!
//! Below `approximate_threshold` vectors every query is an exact linear scan.
//! Above it, random-hyperplane LSH gathers a candidate set (multi-probe up to
//! `probe_radius` flipped bits per table) that is then re-ranked exactly. A
//! candidate set smaller than `max(k, min_candidates)` falls back to the
//! exact scan, so the approximate path never returns fewer results than the
//! exact one.
//!
//! Recall bound: with the default parameters (8 tables × 12 bits, radius 1)
//! a stored vector with cosine similarity ≥ 0.9 to the query is missed with
//! probability of roughly 1% (per-bit agreement ≈ 1 - θ/π ≈ 0.856, per-table
//! probe hit ≈ 0.47, eight tables). On clustered pools recall@10 stays ≥ 0.9 against
//! the exact scan; `test_lsh_recall_on_clustered_pool` enforces this.
//!
//! Inserting or removing a vector touches only that vector's buckets; no
//! other stored vector is read or rewritten.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use super::Embedding;
use crate::config::IndexConfig;
use crate::error::{Error, Result};

/// Cosine distance between two L2-normalized vectors.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    (1.0 - dot).clamp(0.0, 2.0)
}

/// Random-hyperplane hash tables.
#[derive(Debug, Clone)]
struct LshTables {
    dimension: usize,
    bits: usize,
    /// Per table: `bits` hyperplanes laid out row-major (`bits * dimension`).
    planes: Vec<Vec<f32>>,
    buckets: Vec<HashMap<u64, HashSet<String>>>,
    /// Bucket key per table for each stored id.
    keys: HashMap<String, Vec<u64>>,
}

impl LshTables {
    fn new(dimension: usize, tables: usize, bits: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let planes = (0..tables)
            .map(|_| {
                (0..bits * dimension)
                    .map(|_| rng.gen_range(-1.0f32..1.0))
                    .collect()
            })
            .collect();
        Self {
            dimension,
            bits,
            planes,
            buckets: vec![HashMap::new(); tables],
            keys: HashMap::new(),
        }
    }

    fn hash(&self, table: usize, vector: &[f32]) -> u64 {
        let planes = &self.planes[table];
        let mut key = 0u64;
        for bit in 0..self.bits {
            let plane = &planes[bit * self.dimension..(bit + 1) * self.dimension];
            let side: f32 = plane.iter().zip(vector).map(|(p, v)| p * v).sum();
            if side >= 0.0 {
                key |= 1 << bit;
            }
        }
        key
    }

    fn insert(&mut self, id: &str, vector: &[f32]) {
        let keys: Vec<u64> = (0..self.planes.len())
            .map(|table| self.hash(table, vector))
            .collect();
        for (table, key) in keys.iter().enumerate() {
            self.buckets[table]
                .entry(*key)
                .or_default()
                .insert(id.to_string());
        }
        self.keys.insert(id.to_string(), keys);
    }

    fn remove(&mut self, id: &str) {
        let Some(keys) = self.keys.remove(id) else {
            return;
        };
        for (table, key) in keys.into_iter().enumerate() {
            if let Some(bucket) = self.buckets[table].get_mut(&key) {
                bucket.remove(id);
                if bucket.is_empty() {
                    self.buckets[table].remove(&key);
                }
            }
        }
    }

    /// Bucket keys within Hamming distance `radius` of `key`.
    fn probes(&self, key: u64, radius: usize) -> Vec<u64> {
        let mut probes = vec![key];
        if radius >= 1 {
            for i in 0..self.bits {
                probes.push(key ^ (1 << i));
            }
        }
        if radius >= 2 {
            for i in 0..self.bits {
                for j in (i + 1)..self.bits {
                    probes.push(key ^ (1 << i) ^ (1 << j));
                }
            }
        }
        probes
    }

    fn candidates(&self, vector: &[f32], radius: usize) -> HashSet<&str> {
        let mut found = HashSet::new();
        for table in 0..self.planes.len() {
            let key = self.hash(table, vector);
            for probe in self.probes(key, radius) {
                if let Some(bucket) = self.buckets[table].get(&probe) {
                    found.extend(bucket.iter().map(String::as_str));
                }
            }
        }
        found
    }
}

/// Which search path served a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStrategy {
    Exact,
    Approximate,
}

/// Keyed store of normalized embeddings.
#[derive(Debug, Clone)]
pub struct VectorStore {
    dimension: usize,
    vectors: HashMap<String, Embedding>,
    lsh: LshTables,
    approximate_threshold: usize,
    min_candidates: usize,
    probe_radius: usize,
}

impl VectorStore {
    /// Create an empty store for vectors of `dimension`.
    pub fn new(dimension: usize, config: &IndexConfig) -> Self {
        Self {
            dimension,
            vectors: HashMap::new(),
            lsh: LshTables::new(dimension, config.lsh_tables, config.lsh_bits, config.seed),
            approximate_threshold: config.approximate_threshold,
            min_candidates: config.min_candidates,
            probe_radius: config.probe_radius,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.vectors.contains_key(id)
    }

    /// Validate shape and L2-normalize.
    pub fn normalize(&self, mut vector: Embedding) -> Result<Embedding> {
        if vector.len() != self.dimension {
            return Err(Error::InvalidEmbedding(format!(
                "expected dimension {}, got {}",
                self.dimension,
                vector.len()
            )));
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidEmbedding("vector has non-finite components".into()));
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm == 0.0 {
            return Err(Error::InvalidEmbedding("zero vector".into()));
        }
        vector.iter_mut().for_each(|v| *v /= norm);
        Ok(vector)
    }

    /// Insert or replace the vector for `id`.
    pub fn insert(&mut self, id: &str, vector: Embedding) -> Result<()> {
        let vector = self.normalize(vector)?;
        self.lsh.remove(id);
        self.lsh.insert(id, &vector);
        self.vectors.insert(id.to_string(), vector);
        Ok(())
    }

    /// Remove the vector for `id`. Returns whether it existed.
    pub fn remove(&mut self, id: &str) -> bool {
        self.lsh.remove(id);
        self.vectors.remove(id).is_some()
    }

    /// Stored (normalized) vector for `id`.
    pub fn vector(&self, id: &str) -> Option<&Embedding> {
        self.vectors.get(id)
    }

    /// Copy of every stored vector.
    pub fn snapshot(&self) -> HashMap<String, Embedding> {
        self.vectors.clone()
    }

    /// The strategy a query for `k` results would use at the current size.
    pub fn strategy(&self) -> SearchStrategy {
        if self.vectors.len() < self.approximate_threshold {
            SearchStrategy::Exact
        } else {
            SearchStrategy::Approximate
        }
    }

    /// `k` nearest stored vectors to an already normalized `query`.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(String, f32)> {
        if k == 0 || self.vectors.is_empty() {
            return Vec::new();
        }
        match self.strategy() {
            SearchStrategy::Exact => self.search_exact(query, k),
            SearchStrategy::Approximate => {
                let candidates = self.lsh.candidates(query, self.probe_radius);
                if candidates.len() < k.max(self.min_candidates) {
                    return self.search_exact(query, k);
                }
                let scored = candidates.into_iter().filter_map(|id| {
                    self.vectors
                        .get(id)
                        .map(|v| (id, cosine_distance(query, v)))
                });
                top_k(scored, k)
            }
        }
    }

    /// Exact linear scan.
    pub fn search_exact(&self, query: &[f32], k: usize) -> Vec<(String, f32)> {
        let scored = self
            .vectors
            .iter()
            .map(|(id, v)| (id.as_str(), cosine_distance(query, v)));
        top_k(scored, k)
    }
}

fn by_distance_then_id(a: &(&str, f32), b: &(&str, f32)) -> Ordering {
    a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0))
}

fn top_k<'a>(scored: impl Iterator<Item = (&'a str, f32)>, k: usize) -> Vec<(String, f32)> {
    let mut scored: Vec<(&str, f32)> = scored.collect();
    if scored.len() > k {
        scored.select_nth_unstable_by(k - 1, by_distance_then_id);
        scored.truncate(k);
    }
    scored.sort_by(by_distance_then_id);
    scored
        .into_iter()
        .map(|(id, d)| (id.to_string(), d))
        .collect()
}

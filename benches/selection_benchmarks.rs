//! Selection latency across pool sizes, exact and approximate paths.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

use agentmesh_selector::ranking::FusionRanker;
use agentmesh_selector::{
    Agent, EngineConfig, HashingEmbedder, Query, SelectionAlgorithm, SelectionEngine,
};

const VOCABULARY: &[&str] = &[
    "travel", "itinerary", "python", "pipeline", "recipe", "baking", "kubernetes", "metrics",
    "quantum", "lecture", "marketing", "campaign", "contract", "compliance", "fitness",
    "nutrition", "blockchain", "finance", "translation", "mobile", "database", "security",
    "research", "genetics", "astronomy", "music", "poetry", "design", "accessibility", "legal",
];

fn synthetic_pool(size: usize) -> Vec<Agent> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..size)
        .map(|i| {
            let words: Vec<&str> = (0..6)
                .map(|_| VOCABULARY[rng.gen_range(0..VOCABULARY.len())])
                .collect();
            let rated = rng.gen_range(0..40u64);
            let rating = (rated > 0).then(|| rng.gen_range(1.0..=10.0));
            Agent::new(
                format!("agent-{i}"),
                format!("Agent {i}"),
                format!("{} specialist{}", words.join(" "), i % 97),
            )
            .with_ratings(rated, rating)
        })
        .collect()
}

fn bench_select(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("runtime");
    let mut group = c.benchmark_group("select");

    for size in [256usize, 2_048, 10_000] {
        let agents = synthetic_pool(size);
        let ids = agents.iter().map(|a| a.id.clone()).collect();
        let engine = runtime
            .block_on(SelectionEngine::from_pool(
                agents,
                ids,
                Arc::new(HashingEmbedder::default()),
                EngineConfig::default(),
            ))
            .expect("engine");
        let query = Query::new("python data pipeline with metrics and security");

        group.bench_with_input(BenchmarkId::new("top3", size), &size, |b, _| {
            b.to_async(&runtime)
                .iter(|| async { engine.select(&query, 3).await.expect("select") });
        });
    }
    group.finish();
}

fn bench_fusion(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(7);
    let shortlist: Vec<(String, f64, f64)> = (0..64)
        .map(|i| (format!("agent-{i}"), rng.gen_range(0.0..2.0), rng.gen_range(0.0..1.0)))
        .collect();
    let ranker = FusionRanker::default();

    c.bench_function("fusion_rank_64", |b| {
        b.iter(|| ranker.rank(shortlist.clone()));
    });
}

criterion_group!(benches, bench_select, bench_fusion);
criterion_main!(benches);

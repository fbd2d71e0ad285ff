//! chorus benchmark suite
//!
//! Synchronous hot paths on every character turn:
//!   directive_resolution_mixed ...... all directive kinds in one reply
//!   directive_resolution_plain ...... fast path, no brackets
//!   clock_cycle_one_week ............ 35 advances
//!   short_term_churn_100 ............ 100 pushes through a 20-entry buffer
//!   embedding_hash_sentence ......... one feature-hashed embedding
//!   vector_query_top2_from_200 ...... cosine top-2 over 200 summaries

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use rand::SeedableRng;
use rand::rngs::StdRng;

use chorus_bench::{directive_heavy_reply, plain_reply, summaries, user_entry};
use chorus_core::embedding::{EmbeddingProvider, HashingEmbeddingProvider, cosine_similarity};
use chorus_core::memory::ShortTermBuffer;
use chorus_core::{Clock, resolve_directives};

fn bench_directives(c: &mut Criterion) {
    let mixed = directive_heavy_reply(7);
    let plain = plain_reply(7);
    let mut rng = StdRng::seed_from_u64(1);

    c.bench_function("directive_resolution_mixed", |b| {
        b.iter(|| {
            let mut clock = Clock::default();
            black_box(resolve_directives(black_box(&mixed), &mut clock, &mut rng));
        });
    });

    c.bench_function("directive_resolution_plain", |b| {
        b.iter(|| {
            let mut clock = Clock::default();
            black_box(resolve_directives(black_box(&plain), &mut clock, &mut rng));
        });
    });
}

fn bench_clock(c: &mut Criterion) {
    c.bench_function("clock_cycle_one_week", |b| {
        b.iter(|| {
            let mut clock = Clock::default();
            for _ in 0..35 {
                clock.advance();
            }
            black_box(clock);
        });
    });
}

fn bench_short_term(c: &mut Criterion) {
    let clock = Clock::default();
    let entries: Vec<_> = (0..100).map(|i| user_entry(i, &clock)).collect();

    c.bench_function("short_term_churn_100", |b| {
        b.iter(|| {
            let mut buffer = ShortTermBuffer::with_capacity(20);
            for entry in &entries {
                black_box(buffer.push(entry.clone()));
            }
            black_box(buffer.len());
        });
    });
}

fn bench_embedding(c: &mut Criterion) {
    let provider = HashingEmbeddingProvider::default();
    let sentence = "The guest asked Lyra about the storm rolling in over the harbor.";
    let Ok(query) = provider.embed(sentence) else {
        return;
    };
    let corpus: Vec<_> = summaries(200)
        .iter()
        .filter_map(|s| provider.embed(s).ok())
        .collect();

    c.bench_function("embedding_hash_sentence", |b| {
        b.iter(|| black_box(provider.embed(black_box(sentence))));
    });

    c.bench_function("vector_query_top2_from_200", |b| {
        b.iter(|| {
            let mut scored: Vec<(usize, f32)> = corpus
                .iter()
                .enumerate()
                .map(|(i, e)| (i, cosine_similarity(&query, e)))
                .collect();
            scored.sort_by(|a, b| b.1.total_cmp(&a.1));
            scored.truncate(2);
            black_box(scored);
        });
    });
}

criterion_group!(
    benches,
    bench_directives,
    bench_clock,
    bench_short_term,
    bench_embedding
);
criterion_main!(benches);

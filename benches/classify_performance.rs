//! Performance benchmarks for event classification and batch ordering

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use killfeed_relay::filter::classify;
use killfeed_relay::sequencer::{order_batch, HighWaterMark};
use killfeed_relay::types::{CommunityConfig, Participant, RawEvent, TrackedEntity};
use std::sync::Arc;

fn participant(id: &str, guild_id: &str, alliance_id: &str) -> Participant {
    Participant {
        id: id.to_string(),
        name: id.to_string(),
        guild_id: guild_id.to_string(),
        alliance_id: alliance_id.to_string(),
        ..Participant::default()
    }
}

fn bench_event(event_id: u64) -> RawEvent {
    RawEvent {
        event_id,
        time_stamp: None,
        total_victim_kill_fame: 1000,
        killer: participant("killer", "G-5", "A-1"),
        victim: participant("victim", "G-900", "A-900"),
        extra: Default::default(),
    }
}

fn large_config() -> CommunityConfig {
    let entities = |prefix: &str| {
        (0..100)
            .map(|i| TrackedEntity::new(format!("{}-{}", prefix, i), format!("{} {}", prefix, i)))
            .collect::<Vec<_>>()
    };

    CommunityConfig {
        guild: "bench".to_string(),
        tracked_players: entities("P"),
        tracked_guilds: entities("G"),
        tracked_alliances: entities("A"),
        ..CommunityConfig::default()
    }
}

fn bench_classify_match(c: &mut Criterion) {
    let config = large_config();
    let event = Arc::new(bench_event(1));

    c.bench_function("classify_match_300_tracked", |b| {
        b.iter(|| black_box(classify(black_box(&event), black_box(&config))));
    });
}

fn bench_classify_miss(c: &mut Criterion) {
    let config = large_config();
    let mut raw = bench_event(1);
    raw.killer = participant("nobody", "G-999", "A-999");
    let event = Arc::new(raw);

    c.bench_function("classify_miss_300_tracked", |b| {
        b.iter(|| black_box(classify(black_box(&event), black_box(&config))));
    });
}

fn bench_order_batch(c: &mut Criterion) {
    let batch: Vec<RawEvent> = (1..=1000).rev().map(bench_event).collect();
    let marker = HighWaterMark::at(500);

    c.bench_function("order_batch_1000", |b| {
        b.iter(|| black_box(order_batch(batch.clone(), &marker)));
    });
}

criterion_group!(
    benches,
    bench_classify_match,
    bench_classify_miss,
    bench_order_batch
);
criterion_main!(benches);

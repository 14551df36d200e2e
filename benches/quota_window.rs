use criterion::{black_box, criterion_group, criterion_main, Criterion};
use relayguard::{LocalWindow, ManualClock, Policy, QuotaTracker};
use std::time::Duration;

const POLICY: Policy = Policy::new("bench", Duration::from_secs(60), 1_000);

// One hot key: prune, compare and append against a log at steady state.
fn bench_single_key(c: &mut Criterion) {
    let window = LocalWindow::new();
    let mut now = 0u64;
    c.bench_function("local_window_single_key", |b| {
        b.iter(|| {
            now += 1;
            black_box(window.record("chat:user-1", &POLICY, now))
        })
    });
}

// Many identities spread across shards.
fn bench_many_keys(c: &mut Criterion) {
    let window = LocalWindow::new();
    let keys: Vec<String> = (0..10_000).map(|i| POLICY.key_for(&format!("user-{i}"))).collect();
    let mut i = 0usize;
    c.bench_function("local_window_many_keys", |b| {
        b.iter(|| {
            i = (i + 1) % keys.len();
            black_box(window.record(&keys[i], &POLICY, i as u64))
        })
    });
}

// Full tracker path including key formatting and telemetry dispatch.
fn bench_tracker(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let clock = ManualClock::new(0);
    let tracker = QuotaTracker::builder().clock(clock.clone()).build();
    c.bench_function("tracker_check_and_record", |b| {
        b.to_async(&rt).iter(|| {
            clock.advance(Duration::from_millis(1));
            let tracker = tracker.clone();
            async move { black_box(tracker.check_and_record("user-1", &POLICY).await) }
        })
    });
}

criterion_group!(benches, bench_single_key, bench_many_keys, bench_tracker);
criterion_main!(benches);

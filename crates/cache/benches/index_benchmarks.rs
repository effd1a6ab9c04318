#![allow(clippy::expect_used)]

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use gateway_common_cache::{ApiKeyIndex, SubscriptionIndex, api_key::md5_hex, testutil};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn populated_subscriptions(count: usize) -> SubscriptionIndex {
    let index = SubscriptionIndex::new();
    for i in 0..count {
        let plan = format!("plan-{}", i % 4);
        index.register(testutil::client_id_subscription(
            &format!("sub-{i:08}"),
            "api-bench",
            &format!("client-{i:08}"),
            Some(plan.as_str()),
        ));
    }
    index
}

fn populated_keys(count: usize) -> ApiKeyIndex {
    let index = ApiKeyIndex::new();
    for i in 0..count {
        index.register(testutil::api_key("api-bench", &format!("key-{i:08}"), "sub-bench"));
    }
    index
}

// ---------------------------------------------------------------------------
// 1. subscription lookups
// ---------------------------------------------------------------------------

fn subscription_lookups(c: &mut Criterion) {
    let mut group = c.benchmark_group("subscription_lookups");

    for &size in &[100, 10_000] {
        let index = populated_subscriptions(size);
        let client = format!("client-{:08}", size / 2);
        let plan = format!("plan-{}", (size / 2) % 4);

        group.bench_with_input(BenchmarkId::new("client_id_and_plan", size), &size, |b, _| {
            b.iter(|| index.get_by_api_and_client_id_and_plan("api-bench", &client, &plan));
        });
        group.bench_with_input(BenchmarkId::new("client_id", size), &size, |b, _| {
            b.iter(|| index.get_by_api_and_client_id("api-bench", &client));
        });
        group.bench_with_input(BenchmarkId::new("missing", size), &size, |b, _| {
            b.iter(|| index.get_by_api_and_client_id("api-bench", "no-such-client"));
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// 2. api key lookups
// ---------------------------------------------------------------------------

fn api_key_lookups(c: &mut Criterion) {
    let mut group = c.benchmark_group("api_key_lookups");

    for &size in &[100, 10_000] {
        let index = populated_keys(size);
        let key = format!("key-{:08}", size / 2);
        let digest = md5_hex(&key).to_uppercase();

        group.bench_with_input(BenchmarkId::new("plain", size), &size, |b, _| {
            b.iter(|| index.get_by_api_and_key("api-bench", &key));
        });
        // Linear scan over the API's keys.
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("md5", size), &size, |b, _| {
            b.iter(|| index.get_by_api_and_md5_key("api-bench", &digest));
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// 3. writes
// ---------------------------------------------------------------------------

fn rotations(c: &mut Criterion) {
    let mut group = c.benchmark_group("rotations");
    let index = populated_subscriptions(1_000);
    let mut flip = false;

    group.bench_function("client_id_rotation", |b| {
        b.iter(|| {
            flip = !flip;
            let client = if flip { "rotating-a" } else { "rotating-b" };
            index.register(testutil::client_id_subscription(
                "sub-rotating",
                "api-bench",
                client,
                Some("plan-0"),
            ));
        });
    });

    group.bench_function("api_teardown", |b| {
        b.iter_batched(
            || populated_subscriptions(100),
            |index| index.unregister_by_api("api-bench"),
            criterion::BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(benches, subscription_lookups, api_key_lookups, rotations);
criterion_main!(benches);

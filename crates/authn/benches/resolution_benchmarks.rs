#![allow(clippy::expect_used)]

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use gateway_common_authn::{SecurityToken, SecurityTokenResolver};
use gateway_common_cache::{
    ApiKeyIndex, SubscriptionIndex,
    api_key::md5_hex,
    testutil::{api_key, client_id_subscription},
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn populated_resolver(count: usize) -> SecurityTokenResolver {
    let subscriptions = Arc::new(SubscriptionIndex::new());
    let api_keys = Arc::new(ApiKeyIndex::new());
    for i in 0..count {
        let id = format!("sub-{i:08}");
        subscriptions.register(client_id_subscription(
            &id,
            "api-bench",
            &format!("client-{i:08}"),
            Some("gold"),
        ));
        api_keys.register(api_key("api-bench", &format!("key-{i:08}"), &id));
    }
    SecurityTokenResolver::builder().subscriptions(subscriptions).api_keys(api_keys).build()
}

// ---------------------------------------------------------------------------
// resolve
// ---------------------------------------------------------------------------

fn resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve");

    for &size in &[100, 10_000] {
        let resolver = populated_resolver(size);
        let client = format!("client-{:08}", size / 2);
        let key = format!("key-{:08}", size / 2);
        let tokens = [
            ("client_id", SecurityToken::for_client_id(client), Some("gold")),
            ("api_key", SecurityToken::for_api_key(key.clone()), None),
            ("md5_api_key", SecurityToken::for_md5_api_key(md5_hex(&key)), None),
            ("miss", SecurityToken::for_client_id("nobody"), None),
        ];

        for (name, token, plan) in &tokens {
            group.bench_with_input(BenchmarkId::new(*name, size), &size, |b, _| {
                b.iter(|| resolver.resolve("api-bench", token, *plan));
            });
        }
    }

    group.finish();
}

criterion_group!(benches, resolve);
criterion_main!(benches);

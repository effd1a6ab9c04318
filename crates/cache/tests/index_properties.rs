//! Behavioural tests for the indices: the documented scenarios, status-driven
//! eviction, plan disambiguation, and property tests for idempotent
//! registration and API-scoped teardown.

#![allow(clippy::expect_used, clippy::panic)]

use std::collections::BTreeMap;

use gateway_common_cache::{
    ApiKeyIndex, SubscriptionIndex, SubscriptionStatus, api_key::md5_hex, assert_resolves_to,
    assert_unresolved,
    testutil::{accepted_subscription, api_key, client_id_subscription, with_status},
};
use proptest::prelude::*;
use rstest::rstest;

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn scenario_register_and_lookup_by_every_index() {
    let index = SubscriptionIndex::new();
    index.register(client_id_subscription("sub-1", "api-1", "client-A", Some("plan-1")));

    assert_resolves_to!(index.get_by_id("sub-1"), "sub-1");
    assert_resolves_to!(
        index.get_by_api_and_client_id_and_plan("api-1", "client-A", "plan-1"),
        "sub-1"
    );
    assert!(index.get_by_api_id("api-1").contains("sub-1"));
}

#[test]
fn scenario_unregister_one_of_five_api_keys() {
    let index = ApiKeyIndex::new();
    for i in 0..5 {
        index.register(api_key("my-api", &format!("key-{i}"), "sub-1"));
    }

    index.unregister(&api_key("my-api", "key-1", "sub-1"));

    assert_unresolved!(index.get_by_api_and_key("my-api", "key-1"));
    assert_eq!(index.api_key_count("my-api"), 4);
}

#[test]
fn scenario_client_id_rotation() {
    let index = SubscriptionIndex::new();
    index.register(client_id_subscription("sub-1", "api", "old", None));
    index.register(client_id_subscription("sub-1", "api", "new", None));

    assert_unresolved!(index.get_by_api_and_client_id("api", "old"));
    assert_resolves_to!(index.get_by_api_and_client_id("api", "new"), "sub-1");
    let current = index.get_by_id("sub-1").expect("still cached");
    assert_eq!(current.client_id.as_deref(), Some("new"));
}

// ---------------------------------------------------------------------------
// Status-driven eviction
// ---------------------------------------------------------------------------

#[rstest]
#[case::closed(SubscriptionStatus::Closed)]
#[case::rejected(SubscriptionStatus::Rejected)]
#[case::paused(SubscriptionStatus::Paused)]
#[case::pending(SubscriptionStatus::Pending)]
fn non_accepted_status_evicts(#[case] status: SubscriptionStatus) {
    let index = SubscriptionIndex::new();
    let sub = client_id_subscription("sub-1", "api-1", "client", Some("plan"));
    index.register(sub.clone());

    index.register(with_status(&sub, status));

    assert_unresolved!(index.get_by_id("sub-1"));
    assert_unresolved!(index.get_by_api_and_client_id_and_plan("api-1", "client", "plan"));
    assert_unresolved!(index.get_by_api_and_client_id("api-1", "client"));
    assert!(index.get_by_api_id("api-1").is_empty());
    assert_eq!(index.metrics().snapshot().evictions, 1);
}

#[test]
fn never_accepted_subscription_is_not_cached() {
    let index = SubscriptionIndex::new();
    let sub = accepted_subscription("sub-1", "api-1");
    index.register(with_status(&sub, SubscriptionStatus::Pending));

    assert!(index.is_empty());
    assert_eq!(index.metrics().snapshot().evictions, 0);
}

// ---------------------------------------------------------------------------
// Plan disambiguation
// ---------------------------------------------------------------------------

#[test]
fn plans_resolve_independently_and_planless_lookup_takes_last_write() {
    let index = SubscriptionIndex::new();
    index.register(client_id_subscription("sub-gold", "api-1", "client", Some("gold")));
    index.register(client_id_subscription("sub-silver", "api-1", "client", Some("silver")));

    assert_resolves_to!(
        index.get_by_api_and_client_id_and_plan("api-1", "client", "gold"),
        "sub-gold"
    );
    assert_resolves_to!(
        index.get_by_api_and_client_id_and_plan("api-1", "client", "silver"),
        "sub-silver"
    );
    assert_resolves_to!(index.get_by_api_and_client_id("api-1", "client"), "sub-silver");

    index.register(client_id_subscription("sub-gold", "api-1", "client", Some("gold")));
    assert_resolves_to!(index.get_by_api_and_client_id("api-1", "client"), "sub-gold");
}

// ---------------------------------------------------------------------------
// API-key linkage at index level
// ---------------------------------------------------------------------------

#[test]
fn deactivated_key_disappears_from_both_lookups() {
    let index = ApiKeyIndex::new();
    index.register(api_key("api-1", "secret", "sub-1"));
    assert!(index.get_by_api_and_md5_key("api-1", &md5_hex("secret")).is_some());

    let mut inactive = api_key("api-1", "secret", "sub-1");
    inactive.active = false;
    index.register(inactive);

    assert_unresolved!(index.get_by_api_and_key("api-1", "secret"));
    assert_unresolved!(index.get_by_api_and_md5_key("api-1", &md5_hex("secret")));
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

/// (id index, api index, client index, plan index)
fn registrations() -> impl Strategy<Value = Vec<(u8, u8, u8, u8)>> {
    prop::collection::vec((0u8..12, 0u8..3, 0u8..4, 0u8..2), 1..40)
}

fn build_index(ops: &[(u8, u8, u8, u8)]) -> SubscriptionIndex {
    let index = SubscriptionIndex::new();
    for (id, api, client, plan) in ops {
        index.register(client_id_subscription(
            &format!("sub-{id}"),
            &format!("api-{api}"),
            &format!("client-{client}"),
            Some(format!("plan-{plan}").as_str()),
        ));
    }
    index
}

/// Everything observable through the public lookups, in a comparable form.
fn observe(index: &SubscriptionIndex) -> BTreeMap<String, String> {
    let mut seen = BTreeMap::new();
    for api in 0..3 {
        let api = format!("api-{api}");
        for sub in index.subscriptions_for_api(&api) {
            seen.insert(format!("id/{}", sub.id), format!("{sub:?}"));
        }
        for client in 0..4 {
            let client = format!("client-{client}");
            if let Some(sub) = index.get_by_api_and_client_id(&api, &client) {
                seen.insert(format!("b/{api}/{client}"), sub.id.to_string());
            }
            for plan in 0..2 {
                let plan = format!("plan-{plan}");
                if let Some(sub) = index.get_by_api_and_client_id_and_plan(&api, &client, &plan) {
                    seen.insert(format!("a/{api}/{client}/{plan}"), sub.id.to_string());
                }
            }
        }
    }
    seen
}

proptest! {
    #[test]
    fn registering_last_subscription_again_changes_nothing(ops in registrations()) {
        let index = build_index(&ops);
        let before = observe(&index);

        let (id, api, client, plan) = ops[ops.len() - 1];
        index.register(client_id_subscription(
            &format!("sub-{id}"),
            &format!("api-{api}"),
            &format!("client-{client}"),
            Some(format!("plan-{plan}").as_str()),
        ));

        prop_assert_eq!(observe(&index), before);
        prop_assert!(index.check_consistency().is_ok());
    }

    #[test]
    fn api_teardown_leaves_other_apis_untouched(ops in registrations(), target in 0u8..3) {
        let index = build_index(&ops);
        let target = format!("api-{target}");
        let others: BTreeMap<_, _> = observe(&index)
            .into_iter()
            .filter(|(key, value)| !key.contains(&target) && !value.contains(&target))
            .collect();

        index.unregister_by_api(&target);

        prop_assert!(index.get_by_api_id(&target).is_empty());
        prop_assert!(index.subscriptions_for_api(&target).is_empty());
        let after = observe(&index);
        prop_assert!(after.keys().all(|key| !key.contains(&target)));
        prop_assert_eq!(after, others);
        prop_assert!(index.check_consistency().is_ok());
    }

    #[test]
    fn api_key_teardown_leaves_other_apis_untouched(
        keys in prop::collection::vec((0u8..3, 0u8..20), 1..60),
        target in 0u8..3,
    ) {
        let index = ApiKeyIndex::new();
        for (api, key) in &keys {
            index.register(api_key(&format!("api-{api}"), &format!("key-{key}"), "sub-1"));
        }
        let target = format!("api-{target}");
        let untouched: Vec<_> = (0..3)
            .map(|api| format!("api-{api}"))
            .filter(|api| *api != target)
            .map(|api| index.get_by_api(&api))
            .collect();

        index.unregister_by_api(&target);

        prop_assert_eq!(index.api_key_count(&target), 0);
        let after: Vec<_> = (0..3)
            .map(|api| format!("api-{api}"))
            .filter(|api| *api != target)
            .map(|api| index.get_by_api(&api))
            .collect();
        prop_assert_eq!(after, untouched);
        prop_assert!(index.check_consistency().is_ok());
    }
}

//! Score ledger tests: profile creation, atomic deltas, clamping, history.

mod common;

use bnpl_credit_core::{
    error::CreditError,
    types::{ScoreEventType, Tier},
};
use common::{harness, register};
use rust_decimal::Decimal;
use serde_json::json;

/// A brand-new user opens at 300 / TIER_1 / 200000.
#[test]
fn new_user_gets_initial_profile() {
    let h = harness();
    let user = register(&h.engine, "Amina");

    let profile = h.engine.get_or_create_profile(user).unwrap();
    assert_eq!(profile.score, 300);
    assert_eq!(profile.tier, Tier::Tier1);
    assert_eq!(profile.max_limit, Decimal::new(200_000, 0));
    assert_eq!(profile.last_recalculated_at, None);
}

#[test]
fn get_or_create_is_idempotent() {
    let h = harness();
    let user = register(&h.engine, "Brian");

    let first = h.engine.get_or_create_profile(user).unwrap();
    let second = h.engine.get_or_create_profile(user).unwrap();
    assert_eq!(first, second);
    assert_eq!(h.engine.store().event_count(user).unwrap(), 0);
}

#[test]
fn unknown_and_invalid_users_are_rejected() {
    let h = harness();

    let err = h.engine.get_or_create_profile(999).unwrap_err();
    assert!(matches!(err, CreditError::NotFound { entity: "customer", id: 999 }), "{err}");
    assert!(err.is_client_error());

    let err = h.engine.get_or_create_profile(0).unwrap_err();
    assert!(matches!(err, CreditError::Validation(_)), "{err}");
}

#[test]
fn delta_writes_one_event_and_rederives_tier() {
    let h = harness();
    let user = register(&h.engine, "Chloe");

    let profile = h
        .engine
        .apply_score_change(user, 150, ScoreEventType::ManualAdjustment, json!({"reason": "review"}))
        .unwrap();
    assert_eq!(profile.score, 450);
    assert_eq!(profile.tier, Tier::Tier2);
    assert_eq!(profile.max_limit, Decimal::new(800_000, 0));

    let events = h.engine.store().events_for_user(user).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].score_before, 300);
    assert_eq!(events[0].score_after, 450);
    assert_eq!(events[0].metadata["reason"], "review");
    assert_eq!(events[0].created_at, common::t0());
}

#[test]
fn score_is_clamped_at_both_ends() {
    let h = harness();
    let user = register(&h.engine, "Dembe");

    let low = h
        .engine
        .apply_score_change(user, -5_000, ScoreEventType::ManualAdjustment, json!({}))
        .unwrap();
    assert_eq!(low.score, 0);
    assert_eq!(low.tier, Tier::Tier0);
    assert_eq!(low.max_limit, Decimal::ZERO);

    let high = h
        .engine
        .apply_score_change(user, 5_000, ScoreEventType::ManualAdjustment, json!({}))
        .unwrap();
    assert_eq!(high.score, 1000);
    assert_eq!(high.tier, Tier::Tier4);

    let events = h.engine.store().events_for_user(user).unwrap();
    assert_eq!(events[0].delta, -5_000);
    assert_eq!(events[0].score_after, 0);
    assert_eq!(events[1].score_before, 0);
}

#[test]
fn chain_stays_continuous_and_tier_stays_derived() {
    let h = harness();
    let user = register(&h.engine, "Esther");

    for delta in [70, -10, 25, -60, 400, -900, 15] {
        let profile = h
            .engine
            .apply_score_change(user, delta, ScoreEventType::ManualAdjustment, json!({}))
            .unwrap();
        let (tier, limit) = h.engine.policy().derive(profile.score);
        assert_eq!(profile.tier, tier);
        assert_eq!(profile.max_limit, limit);
        assert!((0..=1000).contains(&profile.score));
    }
    assert_eq!(h.engine.verify_ledger_chain(user).unwrap(), None);

    let events = h.engine.store().events_for_user(user).unwrap();
    for pair in events.windows(2) {
        assert_eq!(pair[0].score_after, pair[1].score_before);
    }
    let last = events.last().unwrap();
    assert_eq!(h.engine.get_or_create_profile(user).unwrap().score, last.score_after);
}

#[test]
fn history_pages_newest_first() {
    let h = harness();
    let user = register(&h.engine, "Farid");
    for delta in 1..=5 {
        h.engine
            .apply_score_change(user, delta, ScoreEventType::ManualAdjustment, json!({}))
            .unwrap();
    }

    let page = h.engine.score_history(user, 1, 2).unwrap();
    assert_eq!(page.total, 5);
    assert_eq!(page.events.iter().map(|e| e.delta).collect::<Vec<_>>(), vec![5, 4]);

    let last = h.engine.score_history(user, 3, 2).unwrap();
    assert_eq!(last.events.len(), 1);
    assert_eq!(last.events[0].delta, 1);

    assert!(matches!(
        h.engine.score_history(user, 0, 10).unwrap_err(),
        CreditError::Validation(_)
    ));
    assert!(matches!(
        h.engine.score_history(user, 1, 500).unwrap_err(),
        CreditError::Validation(_)
    ));
}

#[test]
fn registration_validates_input() {
    let h = harness();
    assert!(matches!(
        h.engine.register_customer("  ", "+256700000001").unwrap_err(),
        CreditError::Validation(_)
    ));
    assert!(matches!(
        h.engine.register_customer("Grace", "12").unwrap_err(),
        CreditError::Validation(_)
    ));
}

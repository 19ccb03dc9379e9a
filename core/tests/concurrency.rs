//! Concurrent writers on separate connections to one database file.
//! No update may be lost and the chain must stay continuous.

mod common;

use bnpl_credit_core::{
    clock::SystemClock,
    config::CreditConfig,
    engine::CreditEngine,
    notification::LogNotifier,
    store::CreditStore,
    types::ScoreEventType,
};
use chrono::Utc;
use common::{remove_db, temp_db_path};
use serde_json::json;
use std::thread;

const WRITERS: usize = 6;
const DELTAS_PER_WRITER: i32 = 10;

fn engine_over(store: CreditStore) -> CreditEngine {
    CreditEngine::new(CreditConfig::standard(), store, Box::new(SystemClock), Box::new(LogNotifier))
        .expect("build engine")
}

fn engine_on(path: &str) -> CreditEngine {
    engine_over(CreditStore::open(path).expect("open store"))
}

#[test]
fn concurrent_deltas_for_one_user_are_all_applied() {
    let path = temp_db_path("deltas");
    let setup = CreditEngine::build(CreditConfig::standard(), CreditStore::open(&path).unwrap()).unwrap();
    let (customer, _) = setup.register_customer("Amina", "+256700000001").unwrap();
    let user = customer.customer_id;

    let handles: Vec<_> = (0..WRITERS)
        .map(|w| {
            let store = setup.store().reopen().expect("second connection");
            thread::spawn(move || {
                let engine = engine_over(store);
                for i in 0..DELTAS_PER_WRITER {
                    engine
                        .apply_score_change(user, 1, ScoreEventType::ManualAdjustment, json!({"writer": w, "n": i}))
                        .expect("delta applied");
                }
            })
        })
        .collect();
    for h in handles {
        h.join().expect("writer thread");
    }

    let expected = 300 + WRITERS as i32 * DELTAS_PER_WRITER;
    assert_eq!(setup.get_or_create_profile(user).unwrap().score, expected);
    assert_eq!(setup.store().event_count(user).unwrap(), (WRITERS as i32 * DELTAS_PER_WRITER) as i64);
    assert_eq!(setup.verify_ledger_chain(user).unwrap(), None);

    drop(setup);
    remove_db(&path);
}

#[test]
fn concurrent_first_touch_creates_one_profile() {
    let path = temp_db_path("profile");
    let setup = CreditEngine::build(CreditConfig::standard(), CreditStore::open(&path).unwrap()).unwrap();
    let customer = setup.store().insert_customer("Brian", "+256700000002", Utc::now()).unwrap();
    let user = customer.customer_id;

    let handles: Vec<_> = (0..WRITERS)
        .map(|_| {
            let path = path.clone();
            thread::spawn(move || engine_on(&path).get_or_create_profile(user).expect("profile"))
        })
        .collect();
    let profiles: Vec<_> = handles.into_iter().map(|h| h.join().expect("thread")).collect();

    let first = &profiles[0];
    assert!(profiles.iter().all(|p| p.profile_id == first.profile_id));
    assert!(profiles.iter().all(|p| p.score == 300));

    drop(setup);
    remove_db(&path);
}

#[test]
fn different_users_do_not_interfere() {
    let path = temp_db_path("users");
    let setup = CreditEngine::build(CreditConfig::standard(), CreditStore::open(&path).unwrap()).unwrap();
    let users: Vec<_> = (0..WRITERS)
        .map(|i| {
            setup
                .register_customer(&format!("Customer {i}"), "+256700000003")
                .unwrap()
                .0
                .customer_id
        })
        .collect();

    let handles: Vec<_> = users
        .iter()
        .map(|&user| {
            let path = path.clone();
            thread::spawn(move || {
                let engine = engine_on(&path);
                for _ in 0..DELTAS_PER_WRITER {
                    engine
                        .apply_score_change(user, -2, ScoreEventType::ManualAdjustment, json!({}))
                        .expect("delta applied");
                }
            })
        })
        .collect();
    for h in handles {
        h.join().expect("writer thread");
    }

    for user in users {
        assert_eq!(setup.get_or_create_profile(user).unwrap().score, 300 - 2 * DELTAS_PER_WRITER);
    }

    drop(setup);
    remove_db(&path);
}

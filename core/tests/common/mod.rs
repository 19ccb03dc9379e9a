//! Shared builders for the integration tests.
#![allow(dead_code)]

use bnpl_credit_core::{
    clock::FixedClock,
    config::CreditConfig,
    customer::Customer,
    engine::CreditEngine,
    loans::{Installment, Loan, NewLoan, OriginatedLoan},
    notification::{NotificationError, Notifier},
    store::CreditStore,
    types::UserId,
};
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};

/// Start of every test timeline.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Reminder { installment_id: i64 },
    Overdue { installment_id: i64, days: i64 },
    SevereOverdue { installment_id: i64, days: i64 },
}

/// Remembers every notice; optionally refuses to deliver.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    pub notices: Mutex<Vec<Notice>>,
    pub failing: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self { notices: Mutex::new(Vec::new()), failing: true }
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }

    fn record(&self, notice: Notice) -> Result<(), NotificationError> {
        if self.failing {
            return Err(NotificationError::Unavailable("sms gateway down".into()));
        }
        self.notices.lock().unwrap().push(notice);
        Ok(())
    }
}

impl Notifier for RecordingNotifier {
    fn upcoming_reminder(&self, _: &Customer, installment: &Installment, _: &Loan) -> Result<(), NotificationError> {
        self.record(Notice::Reminder { installment_id: installment.installment_id })
    }

    fn overdue(&self, _: &Customer, installment: &Installment, _: &Loan, days: i64) -> Result<(), NotificationError> {
        self.record(Notice::Overdue { installment_id: installment.installment_id, days })
    }

    fn severe_overdue(&self, _: &Customer, installment: &Installment, _: &Loan, days: i64) -> Result<(), NotificationError> {
        self.record(Notice::SevereOverdue { installment_id: installment.installment_id, days })
    }
}

pub struct Harness {
    pub engine:   CreditEngine,
    pub clock:    Arc<FixedClock>,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn harness() -> Harness {
    harness_with(CreditConfig::standard(), RecordingNotifier::default())
}

pub fn harness_with(config: CreditConfig, notifier: RecordingNotifier) -> Harness {
    let store = CreditStore::in_memory().expect("open in-memory store");
    harness_over(config, store, notifier)
}

/// Harness over a database file, so a second connection can reach it.
pub fn harness_at(path: &str) -> Harness {
    let store = CreditStore::open(path).expect("open store file");
    harness_over(CreditConfig::standard(), store, RecordingNotifier::default())
}

fn harness_over(config: CreditConfig, store: CreditStore, notifier: RecordingNotifier) -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();
    let clock = Arc::new(FixedClock::new(t0()));
    let notifier = Arc::new(notifier);
    store.migrate().expect("migrate");
    let engine = CreditEngine::new(config, store, Box::new(clock.clone()), Box::new(notifier.clone()))
        .expect("build engine");
    Harness { engine, clock, notifier }
}

pub fn register(engine: &CreditEngine, name: &str) -> UserId {
    let (customer, _) = engine
        .register_customer(name, "+256 700 000 001")
        .expect("register customer");
    customer.customer_id
}

pub fn new_loan(customer_id: UserId, principal: i64, total: i64, installments: u32, start: DateTime<Utc>) -> NewLoan {
    NewLoan {
        customer_id,
        lender_id: 1,
        product_id: 1,
        principal_amount: Decimal::new(principal, 0),
        deposit_amount: Decimal::ZERO,
        total_amount: Decimal::new(total, 0),
        installment_count: installments,
        start_date: start,
    }
}

/// Originate a loan starting at `t0()`; installment k falls due at
/// `t0() + 30k days`.
pub fn open_loan(engine: &CreditEngine, customer_id: UserId, total: i64, installments: u32) -> OriginatedLoan {
    let principal = total.min(200_000);
    engine
        .create_loan(&new_loan(customer_id, principal, total, installments, t0()))
        .expect("create loan")
}

/// A unique scratch database file under the system temp dir.
pub fn temp_db_path(tag: &str) -> String {
    let name = format!("bnpl-credit-{tag}-{}.db", uuid::Uuid::new_v4());
    std::env::temp_dir().join(name).to_string_lossy().into_owned()
}

/// Install a trigger from a side connection that aborts every write it
/// matches, e.g. `BEFORE INSERT ON credit_score_event WHEN NEW.user_id = 2`.
pub fn reject_writes(path: &str, name: &str, condition: &str) {
    let conn = rusqlite::Connection::open(path).expect("side connection");
    conn.execute_batch(&format!(
        "CREATE TRIGGER {name} {condition} BEGIN SELECT RAISE(ABORT, 'write rejected'); END;"
    ))
    .expect("install trigger");
}

pub fn allow_writes(path: &str, name: &str) {
    let conn = rusqlite::Connection::open(path).expect("side connection");
    conn.execute_batch(&format!("DROP TRIGGER {name};")).expect("drop trigger");
}

/// Reject every ledger row for one user.
pub fn reject_ledger_rows(path: &str, user_id: UserId) {
    reject_writes(
        path,
        "reject_ledger_rows",
        &format!("BEFORE INSERT ON credit_score_event WHEN NEW.user_id = {user_id}"),
    );
}

pub fn remove_db(path: &str) {
    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{path}{suffix}"));
    }
}

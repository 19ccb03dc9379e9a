pub mod clock;
pub mod collections;
pub mod config;
pub mod customer;
pub mod documents;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod loans;
pub mod notification;
pub mod policy;
pub mod recalculation;
pub mod repayment;
pub mod store;
pub mod types;

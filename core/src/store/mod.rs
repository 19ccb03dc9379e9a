//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Scoring and collections code calls store methods; it never executes SQL.

mod customer;
mod document;
pub(crate) mod ledger;
mod loan;

pub use ledger::ScoreWrite;
pub use loan::CollectionCandidate;

use crate::error::{CreditError, CreditResult};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{
    types::{FromSql, FromSqlError, ValueRef},
    Connection, Row, Transaction, TransactionBehavior,
};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;

/// How long a writer waits for another connection's write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct CreditStore {
    conn: Connection,
    /// Database file; `None` when the store lives in memory.
    path: Option<String>,
}

impl CreditStore {
    /// Open or create a database file. File stores journal in WAL mode and
    /// wait up to `BUSY_TIMEOUT` for a competing writer.
    pub fn open(path: &str) -> CreditResult<Self> {
        use rusqlite::OpenFlags;
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE | OpenFlags::SQLITE_OPEN_URI;
        let conn = Connection::open_with_flags(path, flags)?;
        // A URI naming a memory database keeps its own journal mode.
        if let Err(e) = conn.execute_batch("PRAGMA journal_mode=WAL;") {
            log::debug!("{path}: WAL not enabled: {e}");
        }
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Self::with_connection(conn, Some(path.to_string()))
    }

    /// Private scratch database, gone when the store drops.
    pub fn in_memory() -> CreditResult<Self> {
        Self::with_connection(Connection::open_in_memory()?, None)
    }

    fn with_connection(conn: Connection, path: Option<String>) -> CreditResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path })
    }

    /// Another connection to the same file, for a second writer. A memory
    /// store has nothing to share, so it gets a fresh empty database.
    pub fn reopen(&self) -> CreditResult<Self> {
        self.path.as_deref().map_or_else(Self::in_memory, Self::open)
    }

    /// Run `work` inside one IMMEDIATE transaction. Every store call made
    /// by `work`, ledger writes included, commits or rolls back with it.
    pub fn in_transaction<T>(&self, work: impl FnOnce() -> CreditResult<T>) -> CreditResult<T> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let value = work()?;
        tx.commit()?;
        Ok(value)
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> CreditResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_credit_ledger.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_loans_collections.sql"))?;
        Ok(())
    }
}

// ── Column helpers ────────────────────────────────────────────────────

/// Timestamps are stored in one fixed-width RFC 3339 form so that text
/// comparison in SQL agrees with chronological order.
pub(crate) fn ts(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn money(value: Decimal) -> String {
    value.normalize().to_string()
}

/// Read a TEXT column through `FromStr`, reporting parse failures as
/// column conversion errors.
fn parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    text.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    row.get::<_, Stamp>(idx).map(|s| s.0)
}

fn opt_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<Stamp>>(idx).map(|s| s.map(|s| s.0))
}

struct Stamp(DateTime<Utc>);

impl FromSql for Stamp {
    fn column_result(value: ValueRef<'_>) -> Result<Self, FromSqlError> {
        let text = value.as_str()?;
        DateTime::parse_from_rfc3339(text)
            .map(|dt| Stamp(dt.with_timezone(&Utc)))
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// Map "no row" from a keyed lookup onto the domain NotFound error.
fn require<T>(found: Option<T>, entity: &'static str, id: i64) -> CreditResult<T> {
    found.ok_or(CreditError::NotFound { entity, id })
}

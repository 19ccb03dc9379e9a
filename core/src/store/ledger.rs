//! Store methods for credit profiles and the append-only score ledger.

use super::{money, opt_timestamp, parsed, require, timestamp, ts, CreditStore};
use crate::{
    error::{CreditError, CreditResult},
    ledger::{CreditProfile, CreditScoreEvent},
    types::{ScoreEventType, Tier, UserId},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use rust_decimal::Decimal;

const PROFILE_COLUMNS: &str = "profile_id, user_id, score, tier, max_limit,
     last_recalculated_at, created_at, updated_at";

const EVENT_COLUMNS: &str = "event_id, user_id, event_type, delta, score_before,
     score_after, metadata, created_at";

/// The new state a score change resolves to, computed from the profile
/// as it stood inside the write transaction.
#[derive(Debug, Clone)]
pub struct ScoreWrite {
    pub event_type:  ScoreEventType,
    pub delta:       i32,
    pub score_after: i32,
    pub tier:        Tier,
    pub max_limit:   Decimal,
    pub metadata:    serde_json::Value,
}

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<CreditProfile> {
    Ok(CreditProfile {
        profile_id:           row.get(0)?,
        user_id:              row.get(1)?,
        score:                row.get(2)?,
        tier:                 parsed(row, 3)?,
        max_limit:            parsed(row, 4)?,
        last_recalculated_at: opt_timestamp(row, 5)?,
        created_at:           timestamp(row, 6)?,
        updated_at:           timestamp(row, 7)?,
    })
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<CreditScoreEvent> {
    let metadata: String = row.get(6)?;
    Ok(CreditScoreEvent {
        event_id:     row.get(0)?,
        user_id:      row.get(1)?,
        event_type:   parsed(row, 2)?,
        delta:        row.get(3)?,
        score_before: row.get(4)?,
        score_after:  row.get(5)?,
        metadata:     serde_json::from_str(&metadata).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })?,
        created_at:   timestamp(row, 7)?,
    })
}

impl CreditStore {
    // ── Profile ───────────────────────────────────────────────────

    pub fn find_profile(&self, user_id: UserId) -> CreditResult<Option<CreditProfile>> {
        let sql = format!("SELECT {PROFILE_COLUMNS} FROM credit_profile WHERE user_id = ?1");
        let found = self
            .conn
            .query_row(&sql, params![user_id], profile_from_row)
            .optional()?;
        Ok(found)
    }

    /// Insert a profile unless one exists; either way return the stored row.
    /// The UNIQUE(user_id) constraint makes concurrent callers converge on
    /// the same profile.
    pub fn insert_profile_if_absent(
        &self,
        user_id: UserId,
        score: i32,
        tier: Tier,
        max_limit: Decimal,
        now: DateTime<Utc>,
    ) -> CreditResult<(CreditProfile, bool)> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO credit_profile
                (user_id, score, tier, max_limit, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![user_id, score, tier.as_str(), money(max_limit), ts(now)],
        )?;
        let profile = require(self.find_profile(user_id)?, "credit profile", user_id)?;
        Ok((profile, inserted == 1))
    }

    /// Overwrite the projection without touching the ledger. Used only by
    /// the from-scratch recalculation.
    pub fn overwrite_profile_score(
        &self,
        user_id: UserId,
        score: i32,
        tier: Tier,
        max_limit: Decimal,
        now: DateTime<Utc>,
    ) -> CreditResult<CreditProfile> {
        let changed = self.conn.execute(
            "UPDATE credit_profile
             SET score = ?1, tier = ?2, max_limit = ?3,
                 last_recalculated_at = ?4, updated_at = ?4
             WHERE user_id = ?5",
            params![score, tier.as_str(), money(max_limit), ts(now), user_id],
        )?;
        if changed == 0 {
            return Err(CreditError::not_found("credit profile", user_id));
        }
        require(self.find_profile(user_id)?, "credit profile", user_id)
    }

    /// Append one ledger row and move the profile in a single IMMEDIATE
    /// transaction. `plan` sees the profile as read under the write lock.
    /// Returns `Ok(None)` without writing when `plan` declines. Inside
    /// `in_transaction` the caller's transaction is joined instead.
    pub fn commit_score_change<F>(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
        plan: F,
    ) -> CreditResult<Option<(CreditProfile, CreditScoreEvent)>>
    where
        F: FnOnce(&Connection, &CreditProfile) -> CreditResult<Option<ScoreWrite>>,
    {
        let own_tx = if self.conn.is_autocommit() {
            Some(Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?)
        } else {
            None
        };
        let tx: &Connection = &self.conn;

        let sql = format!("SELECT {PROFILE_COLUMNS} FROM credit_profile WHERE user_id = ?1");
        let before = tx
            .query_row(&sql, params![user_id], profile_from_row)
            .optional()?;
        let before = require(before, "credit profile", user_id)?;

        let Some(write) = plan(tx, &before)? else {
            return Ok(None);
        };

        tx.execute(
            "INSERT INTO credit_score_event
                (user_id, event_type, delta, score_before, score_after, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                user_id,
                write.event_type.as_str(),
                write.delta,
                before.score,
                write.score_after,
                serde_json::to_string(&write.metadata)?,
                ts(now),
            ],
        )?;
        let event_id = tx.last_insert_rowid();

        let changed = tx.execute(
            "UPDATE credit_profile
             SET score = ?1, tier = ?2, max_limit = ?3, updated_at = ?4
             WHERE user_id = ?5 AND score = ?6",
            params![
                write.score_after,
                write.tier.as_str(),
                money(write.max_limit),
                ts(now),
                user_id,
                before.score,
            ],
        )?;
        if changed != 1 {
            // Rolled back with the event insert when the transaction drops.
            return Err(CreditError::ConcurrentUpdate { user_id });
        }

        let after = tx.query_row(&sql, params![user_id], profile_from_row)?;
        let event_sql = format!("SELECT {EVENT_COLUMNS} FROM credit_score_event WHERE event_id = ?1");
        let event = tx.query_row(&event_sql, params![event_id], event_from_row)?;
        if let Some(own_tx) = own_tx {
            own_tx.commit()?;
        }
        Ok(Some((after, event)))
    }

    // ── Ledger reads ──────────────────────────────────────────────

    /// All rows for a user in creation order.
    pub fn events_for_user(&self, user_id: UserId) -> CreditResult<Vec<CreditScoreEvent>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM credit_score_event
             WHERE user_id = ?1 ORDER BY event_id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![user_id], event_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Newest-first page of a user's rows.
    pub fn events_page(
        &self,
        user_id: UserId,
        limit: u32,
        offset: u32,
    ) -> CreditResult<Vec<CreditScoreEvent>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM credit_score_event
             WHERE user_id = ?1 ORDER BY event_id DESC LIMIT ?2 OFFSET ?3"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![user_id, limit, offset], event_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn event_count(&self, user_id: UserId) -> CreditResult<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM credit_score_event WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Number of rows whose type is any of `types`.
    pub fn count_events_of_types(
        &self,
        user_id: UserId,
        types: &[ScoreEventType],
    ) -> CreditResult<i64> {
        count_events_of_types(&self.conn, user_id, types)
    }

    pub fn sum_deltas_of_type(
        &self,
        user_id: UserId,
        event_type: ScoreEventType,
    ) -> CreditResult<i64> {
        sum_deltas_of_type(&self.conn, user_id, event_type)
    }

    /// True when a row of `event_type` already carries `key = value` in its
    /// metadata. Backs the one-event-per-fact guarantees.
    pub fn has_event_with(
        &self,
        user_id: UserId,
        event_type: ScoreEventType,
        key: &str,
        value: i64,
    ) -> CreditResult<bool> {
        has_event_with(&self.conn, user_id, event_type, key, value)
    }
}

// Transaction-scoped variants, used from inside `commit_score_change`
// plans so the checks observe the same snapshot as the write.

pub(crate) fn count_events_of_types(
    conn: &rusqlite::Connection,
    user_id: UserId,
    types: &[ScoreEventType],
) -> CreditResult<i64> {
    if types.is_empty() {
        return Ok(0);
    }
    let placeholders = vec!["?"; types.len()].join(", ");
    let sql = format!(
        "SELECT COUNT(*) FROM credit_score_event
         WHERE user_id = ? AND event_type IN ({placeholders})"
    );
    let mut values: Vec<rusqlite::types::Value> = vec![user_id.into()];
    values.extend(types.iter().map(|t| t.as_str().to_string().into()));
    let count: i64 = conn.query_row(&sql, params_from_iter(values), |row| row.get(0))?;
    Ok(count)
}

pub(crate) fn sum_deltas_of_type(
    conn: &rusqlite::Connection,
    user_id: UserId,
    event_type: ScoreEventType,
) -> CreditResult<i64> {
    let sum: i64 = conn.query_row(
        "SELECT COALESCE(SUM(delta), 0) FROM credit_score_event
         WHERE user_id = ?1 AND event_type = ?2",
        params![user_id, event_type.as_str()],
        |row| row.get(0),
    )?;
    Ok(sum)
}

pub(crate) fn has_event_with(
    conn: &rusqlite::Connection,
    user_id: UserId,
    event_type: ScoreEventType,
    key: &str,
    value: i64,
) -> CreditResult<bool> {
    let path = format!("$.{key}");
    let found: i64 = conn.query_row(
        "SELECT EXISTS (
             SELECT 1 FROM credit_score_event
             WHERE user_id = ?1 AND event_type = ?2
               AND json_extract(metadata, ?3) = ?4)",
        params![user_id, event_type.as_str(), path, value],
        |row| row.get(0),
    )?;
    Ok(found != 0)
}

/// Cumulative credit already granted for approvals of one document type.
pub(crate) fn document_points_granted(
    conn: &rusqlite::Connection,
    user_id: UserId,
    document_type: &str,
) -> CreditResult<i64> {
    let sum: i64 = conn.query_row(
        "SELECT COALESCE(SUM(delta), 0) FROM credit_score_event
         WHERE user_id = ?1 AND event_type = ?2
           AND json_extract(metadata, '$.document_type') = ?3",
        params![user_id, ScoreEventType::DocumentApproved.as_str(), document_type],
        |row| row.get(0),
    )?;
    Ok(sum)
}

/// How many of the user's rows of `event_type` exist, looking at no more
/// than the newest `limit`.
pub(crate) fn recent_event_count(
    conn: &rusqlite::Connection,
    user_id: UserId,
    event_type: ScoreEventType,
    limit: u32,
) -> CreditResult<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM (
             SELECT event_id FROM credit_score_event
             WHERE user_id = ?1 AND event_type = ?2
             ORDER BY event_id DESC LIMIT ?3)",
        params![user_id, event_type.as_str(), limit],
        |row| row.get(0),
    )?;
    Ok(count)
}

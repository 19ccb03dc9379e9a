//! Score ledger: the only path through which a score ever changes.
//!
//! RULE: every score mutation is one `credit_score_event` row plus the
//! matching `credit_profile` update, committed together. The ledger is
//! the source of truth; the profile is a cached projection of it.
//!
//! Writers for the same user are serialised by SQLite's write lock
//! (IMMEDIATE transactions) and the profile update is additionally
//! guarded on the score read inside that transaction.

use crate::{
    clock::Clock,
    config::CreditConfig,
    customer::validate_id,
    error::{CreditError, CreditResult},
    policy::TierPolicy,
    store::{CreditStore, ScoreWrite},
    types::{clamp_score, EventId, ScoreEventType, Tier, UserId},
};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreditProfile {
    pub profile_id:           i64,
    pub user_id:              UserId,
    pub score:                i32,
    pub tier:                 Tier,
    pub max_limit:            Decimal,
    pub last_recalculated_at: Option<DateTime<Utc>>,
    pub created_at:           DateTime<Utc>,
    pub updated_at:           DateTime<Utc>,
}

/// One immutable ledger row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreditScoreEvent {
    pub event_id:     EventId,
    pub user_id:      UserId,
    pub event_type:   ScoreEventType,
    pub delta:        i32,
    pub score_before: i32,
    pub score_after:  i32,
    pub metadata:     serde_json::Value,
    pub created_at:   DateTime<Utc>,
}

/// Result of a classifier run: the profile as it now stands, plus the
/// ledger row if one was written.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreOutcome {
    pub profile: CreditProfile,
    pub event:   Option<CreditScoreEvent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoreHistory {
    pub events:    Vec<CreditScoreEvent>,
    pub total:     i64,
    pub page:      u32,
    pub page_size: u32,
}

/// Where a user's event chain stops being self-consistent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ChainBreak {
    /// `score_after` is not `clamp(score_before + delta)`.
    BadArithmetic { event_id: EventId },
    /// `score_after` of one row differs from `score_before` of the next.
    Discontinuity { event_id: EventId, next_event_id: EventId },
}

#[derive(Clone, Copy)]
pub struct ScoreLedger<'a> {
    store:  &'a CreditStore,
    policy: &'a TierPolicy,
    config: &'a CreditConfig,
    clock:  &'a dyn Clock,
}

impl<'a> ScoreLedger<'a> {
    pub fn new(
        store: &'a CreditStore,
        policy: &'a TierPolicy,
        config: &'a CreditConfig,
        clock: &'a dyn Clock,
    ) -> Self {
        Self { store, policy, config, clock }
    }

    pub fn store(&self) -> &'a CreditStore {
        self.store
    }

    pub fn policy(&self) -> &'a TierPolicy {
        self.policy
    }

    pub fn config(&self) -> &'a CreditConfig {
        self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Return the user's profile, creating it at the initial score the
    /// first time. Safe to call concurrently for a never-seen user.
    pub fn get_or_create_profile(&self, user_id: UserId) -> CreditResult<CreditProfile> {
        validate_id("user", user_id)?;
        if let Some(profile) = self.store.find_profile(user_id)? {
            return Ok(profile);
        }
        self.store.customer(user_id)?;

        let score = self.config.initial_score;
        let (tier, max_limit) = self.policy.derive(score);
        let (profile, created) =
            self.store
                .insert_profile_if_absent(user_id, score, tier, max_limit, self.clock.now())?;
        if created {
            log::info!("user={user_id} credit profile opened at score={score} tier={tier}");
        }
        Ok(profile)
    }

    /// Apply a signed delta: clamp, re-derive tier and limit, write the
    /// event and the profile atomically.
    pub fn apply_delta(
        &self,
        user_id: UserId,
        delta: i32,
        event_type: ScoreEventType,
        metadata: serde_json::Value,
    ) -> CreditResult<CreditProfile> {
        self.apply_planned(user_id, event_type, metadata, |_, _| Ok(Some(delta)))
            .map(|outcome| outcome.profile)
    }

    /// Like `apply_delta`, but the delta is decided inside the write
    /// transaction. `decide` sees the connection and the locked profile and
    /// may return `None` to write nothing.
    pub(crate) fn apply_planned<F>(
        &self,
        user_id: UserId,
        event_type: ScoreEventType,
        metadata: serde_json::Value,
        decide: F,
    ) -> CreditResult<ScoreOutcome>
    where
        F: FnOnce(&Connection, &CreditProfile) -> CreditResult<Option<i32>>,
    {
        self.get_or_create_profile(user_id)?;
        let policy = self.policy;
        let outcome = self
            .store
            .commit_score_change(user_id, self.clock.now(), |conn, before| {
                let Some(delta) = decide(conn, before)? else {
                    return Ok(None);
                };
                let score_after = clamp_score(before.score as i64 + delta as i64);
                let (tier, max_limit) = policy.derive(score_after);
                Ok(Some(ScoreWrite {
                    event_type,
                    delta,
                    score_after,
                    tier,
                    max_limit,
                    metadata,
                }))
            });

        match &outcome {
            Ok(Some((profile, event))) => {
                log::info!(
                    "user={user_id} {} delta={:+} score {} -> {} tier={}",
                    event.event_type,
                    event.delta,
                    event.score_before,
                    event.score_after,
                    profile.tier
                );
            }
            Ok(None) => {
                log::debug!("user={user_id} {event_type} produced no ledger event");
            }
            Err(e) => {
                log::error!("user={user_id} {event_type} score write failed: {e}");
            }
        }
        match outcome? {
            Some((profile, event)) => Ok(ScoreOutcome { profile, event: Some(event) }),
            None => Ok(ScoreOutcome { profile: self.get_or_create_profile(user_id)?, event: None }),
        }
    }

    /// Newest-first page of the user's history. Pages are 1-based.
    pub fn history(&self, user_id: UserId, page: u32, page_size: u32) -> CreditResult<ScoreHistory> {
        validate_id("user", user_id)?;
        if page == 0 || page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(CreditError::Validation(format!(
                "page must be >= 1 and page size in 1..={MAX_PAGE_SIZE}, got page={page} size={page_size}"
            )));
        }
        self.store.customer(user_id)?;
        let offset = (page - 1).saturating_mul(page_size);
        Ok(ScoreHistory {
            events: self.store.events_page(user_id, page_size, offset)?,
            total: self.store.event_count(user_id)?,
            page,
            page_size,
        })
    }

    /// Audit the user's rows in creation order. `None` means the chain is
    /// intact.
    pub fn verify_chain(&self, user_id: UserId) -> CreditResult<Option<ChainBreak>> {
        let events = self.store.events_for_user(user_id)?;
        Ok(find_chain_break(&events))
    }
}

pub fn find_chain_break(events: &[CreditScoreEvent]) -> Option<ChainBreak> {
    for (i, e) in events.iter().enumerate() {
        if e.score_after != clamp_score(e.score_before as i64 + e.delta as i64) {
            return Some(ChainBreak::BadArithmetic { event_id: e.event_id });
        }
        if let Some(next) = events.get(i + 1) {
            if next.score_before != e.score_after {
                return Some(ChainBreak::Discontinuity {
                    event_id:      e.event_id,
                    next_event_id: next.event_id,
                });
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn row(id: i64, delta: i32, before: i32, after: i32) -> CreditScoreEvent {
        CreditScoreEvent {
            event_id: id,
            user_id: 1,
            event_type: ScoreEventType::ManualAdjustment,
            delta,
            score_before: before,
            score_after: after,
            metadata: json!({}),
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn intact_chain_has_no_break() {
        let events = vec![row(1, 70, 300, 370), row(2, -60, 370, 310), row(3, 900, 310, 1000)];
        assert_eq!(find_chain_break(&events), None);
    }

    #[test]
    fn clamped_rows_are_consistent() {
        assert_eq!(find_chain_break(&[row(1, -500, 300, 0)]), None);
    }

    #[test]
    fn discontinuity_is_reported() {
        let events = vec![row(1, 70, 300, 370), row(2, 5, 360, 365)];
        assert_eq!(
            find_chain_break(&events),
            Some(ChainBreak::Discontinuity { event_id: 1, next_event_id: 2 })
        );
    }

    #[test]
    fn bad_arithmetic_is_reported() {
        assert_eq!(
            find_chain_break(&[row(7, 10, 300, 320)]),
            Some(ChainBreak::BadArithmetic { event_id: 7 })
        );
    }
}

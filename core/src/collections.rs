//! Daily delinquency sweep.
//!
//! EXECUTION ORDER (one synchronous pass, no fan-out):
//!   1. Upcoming: PENDING installments due within the reminder window
//!      move to REMINDER_DUE and get a reminder.
//!   2. Overdue: unpaid installments past due move to OVERDUE. Newly
//!      overdue ones are counted per user, split severe/regular.
//!   3. Penalties: one OVERDUE_BATCH ledger row per user with new counts.
//!
//! RULES:
//!   - An installment already OVERDUE is never counted again, so a rerun
//!     with no new data applies no penalty.
//!   - A failure on one installment or one user is recorded in the summary
//!     and the pass continues.
//!   - Notification failures are counted, never fatal.

use crate::{
    config::CollectionsConfig,
    error::CreditResult,
    ledger::ScoreLedger,
    notification::Notifier,
    store::CollectionCandidate,
    types::{InstallmentId, InstallmentStatus, ScoreEventType, UserId},
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepStatus {
    Success,
    /// Some items failed; the rest were processed.
    Partial,
    /// A scan could not run at all.
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepStage {
    Upcoming,
    Overdue,
    Penalty,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepFailure {
    pub stage:   SweepStage,
    pub subject: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepSummary {
    pub status:               SweepStatus,
    pub upcoming_marked:      u32,
    pub overdue_marked:       u32,
    pub penalties_applied:    u32,
    pub notifications_failed: u32,
    pub failures:             Vec<SweepFailure>,
    pub timestamp:            DateTime<Utc>,
    pub error:                Option<String>,
}

impl SweepSummary {
    fn started(timestamp: DateTime<Utc>) -> Self {
        Self {
            status: SweepStatus::Success,
            upcoming_marked: 0,
            overdue_marked: 0,
            penalties_applied: 0,
            notifications_failed: 0,
            failures: Vec::new(),
            timestamp,
            error: None,
        }
    }

    fn item_failed(&mut self, stage: SweepStage, subject: String, message: String) {
        log::error!("sweep {stage:?} failed for {subject}: {message}");
        if self.status == SweepStatus::Success {
            self.status = SweepStatus::Partial;
        }
        self.failures.push(SweepFailure { stage, subject, message });
    }

    fn scan_failed(&mut self, stage: SweepStage, message: String) {
        log::error!("sweep {stage:?} scan failed: {message}");
        self.status = SweepStatus::Error;
        self.error.get_or_insert_with(|| message.clone());
        self.failures.push(SweepFailure { stage, subject: "scan".into(), message });
    }

    fn finish(&mut self) {
        if self.status == SweepStatus::Partial && self.error.is_none() {
            self.error = Some(format!("{} item(s) failed", self.failures.len()));
        }
    }
}

/// Newly overdue installments for one user.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct OverdueBucket {
    severe:  Vec<InstallmentId>,
    regular: Vec<InstallmentId>,
}

/// Aggregated penalty for a user's newly overdue installments. Severe ones
/// carry both the regular and the severe deduction.
pub fn batch_penalty(severe_count: i64, regular_count: i64, cfg: &CollectionsConfig) -> i32 {
    let regular = cfg.overdue_penalty as i64;
    let severe = cfg.severe_overdue_penalty as i64;
    let total = severe_count * (severe + regular) + regular_count * regular;
    -(total.min(i32::MAX as i64) as i32)
}

pub struct DelinquencySweep<'a> {
    ledger:   ScoreLedger<'a>,
    notifier: &'a dyn Notifier,
}

impl<'a> DelinquencySweep<'a> {
    pub fn new(ledger: ScoreLedger<'a>, notifier: &'a dyn Notifier) -> Self {
        Self { ledger, notifier }
    }

    fn cfg(&self) -> &'a CollectionsConfig {
        &self.ledger.config().collections
    }

    /// One full pass as of `now`. Never fails; the outcome is in the summary.
    pub fn run(&self, now: DateTime<Utc>) -> SweepSummary {
        let mut summary = SweepSummary::started(now);

        self.mark_upcoming(now, &mut summary);
        let buckets = self.mark_overdue(now, &mut summary);
        self.apply_penalties(buckets, &mut summary);
        summary.finish();

        log::info!(
            "collections sweep {:?}: upcoming={} overdue={} penalties={} notify_failed={} failures={}",
            summary.status,
            summary.upcoming_marked,
            summary.overdue_marked,
            summary.penalties_applied,
            summary.notifications_failed,
            summary.failures.len()
        );
        summary
    }

    fn mark_upcoming(&self, now: DateTime<Utc>, summary: &mut SweepSummary) {
        let horizon = now + Duration::days(self.cfg().reminder_days);
        let candidates = match self.ledger.store().collection_candidates(
            &[InstallmentStatus::Pending, InstallmentStatus::ReminderDue],
            Some(now),
            Some(horizon),
            true,
        ) {
            Ok(c) => c,
            Err(e) => return summary.scan_failed(SweepStage::Upcoming, e.to_string()),
        };

        for candidate in &candidates {
            if let Err(e) = self.remind(candidate, now, summary) {
                summary.item_failed(
                    SweepStage::Upcoming,
                    format!("installment {}", candidate.installment.installment_id),
                    e.to_string(),
                );
            }
        }
    }

    fn remind(&self, candidate: &CollectionCandidate, now: DateTime<Utc>, summary: &mut SweepSummary) -> CreditResult<()> {
        let inst = &candidate.installment;
        if inst.status == InstallmentStatus::ReminderDue {
            return Ok(());
        }
        let store = self.ledger.store();
        if !store.transition_installment(inst.installment_id, inst.status, InstallmentStatus::ReminderDue, now)? {
            return Ok(());
        }
        summary.upcoming_marked += 1;

        let customer = store.customer(candidate.customer_id)?;
        let loan = store.loan(inst.loan_id)?;
        if let Err(e) = self.notifier.upcoming_reminder(&customer, inst, &loan) {
            summary.notifications_failed += 1;
            log::warn!("reminder for installment={} not delivered: {e}", inst.installment_id);
        }
        Ok(())
    }

    fn mark_overdue(&self, now: DateTime<Utc>, summary: &mut SweepSummary) -> BTreeMap<UserId, OverdueBucket> {
        let mut buckets = BTreeMap::new();
        let candidates = match self.ledger.store().collection_candidates(
            &[
                InstallmentStatus::Pending,
                InstallmentStatus::ReminderDue,
                InstallmentStatus::Overdue,
            ],
            None,
            Some(now),
            false,
        ) {
            Ok(c) => c,
            Err(e) => {
                summary.scan_failed(SweepStage::Overdue, e.to_string());
                return buckets;
            }
        };

        for candidate in &candidates {
            if let Err(e) = self.escalate(candidate, now, summary, &mut buckets) {
                summary.item_failed(
                    SweepStage::Overdue,
                    format!("installment {}", candidate.installment.installment_id),
                    e.to_string(),
                );
            }
        }
        buckets
    }

    fn escalate(
        &self,
        candidate: &CollectionCandidate,
        now: DateTime<Utc>,
        summary: &mut SweepSummary,
        buckets: &mut BTreeMap<UserId, OverdueBucket>,
    ) -> CreditResult<()> {
        let inst = &candidate.installment;
        let store = self.ledger.store();
        let days_overdue = (now - inst.due_date).num_days();
        let severe = days_overdue >= self.cfg().severe_overdue_days;

        let newly_overdue = inst.status != InstallmentStatus::Overdue;
        if newly_overdue {
            if !store.transition_installment(inst.installment_id, inst.status, InstallmentStatus::Overdue, now)? {
                return Ok(());
            }
            summary.overdue_marked += 1;
            let bucket = buckets.entry(candidate.customer_id).or_default();
            if severe {
                bucket.severe.push(inst.installment_id);
            } else {
                bucket.regular.push(inst.installment_id);
            }
        }

        if !newly_overdue && !(severe && !inst.severe_notified) {
            return Ok(());
        }

        let customer = store.customer(candidate.customer_id)?;
        let loan = store.loan(inst.loan_id)?;
        let delivered = if severe {
            self.notifier.severe_overdue(&customer, inst, &loan, days_overdue)
        } else {
            self.notifier.overdue(&customer, inst, &loan, days_overdue)
        };
        match delivered {
            Ok(()) if severe => store.mark_severe_notified(inst.installment_id, now)?,
            Ok(()) => {}
            Err(e) => {
                summary.notifications_failed += 1;
                log::warn!("overdue notice for installment={} not delivered: {e}", inst.installment_id);
            }
        }
        log::debug!(
            "installment={} user={} {days_overdue} day(s) overdue severe={severe} new={newly_overdue}",
            inst.installment_id,
            candidate.customer_id
        );
        Ok(())
    }

    fn apply_penalties(&self, buckets: BTreeMap<UserId, OverdueBucket>, summary: &mut SweepSummary) {
        for (user_id, bucket) in buckets {
            let severe_count = bucket.severe.len() as i64;
            let regular_count = bucket.regular.len() as i64;
            let delta = batch_penalty(severe_count, regular_count, self.cfg());
            if delta == 0 {
                continue;
            }
            let installment_ids: Vec<InstallmentId> =
                bucket.severe.iter().chain(bucket.regular.iter()).copied().collect();
            let metadata = json!({
                "severe_count": severe_count,
                "regular_count": regular_count,
                "installment_ids": installment_ids,
            });
            match self.ledger.apply_delta(user_id, delta, ScoreEventType::OverdueBatch, metadata) {
                Ok(_) => summary.penalties_applied += 1,
                Err(e) => summary.item_failed(SweepStage::Penalty, format!("user {user_id}"), e.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CreditConfig;

    fn cfg() -> CollectionsConfig {
        CreditConfig::standard().collections
    }

    #[test]
    fn one_severe_installment_costs_sixty() {
        assert_eq!(batch_penalty(1, 0, &cfg()), -60);
    }

    #[test]
    fn mixed_batch_adds_both_buckets() {
        assert_eq!(batch_penalty(2, 3, &cfg()), -(2 * 60 + 3 * 10));
    }

    #[test]
    fn empty_batch_costs_nothing() {
        assert_eq!(batch_penalty(0, 0, &cfg()), 0);
    }

    #[test]
    fn partial_summary_reports_item_count() {
        let mut s = SweepSummary::started(Utc::now());
        s.item_failed(SweepStage::Penalty, "user 4".into(), "locked".into());
        s.finish();
        assert_eq!(s.status, SweepStatus::Partial);
        assert_eq!(s.error.as_deref(), Some("1 item(s) failed"));
    }

    #[test]
    fn scan_failure_wins_over_partial() {
        let mut s = SweepSummary::started(Utc::now());
        s.item_failed(SweepStage::Upcoming, "installment 1".into(), "x".into());
        s.scan_failed(SweepStage::Overdue, "no such table".into());
        s.finish();
        assert_eq!(s.status, SweepStatus::Error);
        assert_eq!(s.error.as_deref(), Some("no such table"));
    }
}

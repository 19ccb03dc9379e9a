//! From-scratch score rebuild.
//!
//! The rebuild works from aggregates (approved documents, counts of each
//! repayment event type, paid loans) rather than replaying the ledger row
//! by row, so once caps interact over a long history the result can
//! differ from the ledger's running score. Late and severely late rows are
//! both charged at the late penalty here, so a history holding severe
//! payments rebuilds higher than its ledger. It writes the profile only and
//! never appends a ledger row of its own; running it twice with no new
//! facts gives the same score.

use crate::{
    config::CreditConfig,
    customer::validate_id,
    error::CreditResult,
    ledger::{CreditProfile, ScoreLedger},
    types::{clamp_score, DocumentType, LoanStatus, ScoreEventType, UserId},
};
use serde::Serialize;

/// Facts the rebuild reads, gathered from storage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScoringFacts {
    pub approved_documents: Vec<DocumentType>,
    pub on_time_payments:   i64,
    pub late_payments:      i64,
    pub severe_payments:    i64,
    pub defaults:           i64,
    pub early_repayment_points: i64,
    pub paid_loans:         i64,
}

/// Component totals of a rebuilt score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScoreBreakdown {
    pub base:      i64,
    pub documents: i64,
    pub repayment: i64,
    pub usage:     i64,
    /// Clamped sum of the components.
    pub score:     i32,
}

pub fn compute_breakdown(facts: &ScoringFacts, config: &CreditConfig) -> ScoreBreakdown {
    let weights = &config.documents;
    let (other, regular): (Vec<&DocumentType>, Vec<&DocumentType>) = facts
        .approved_documents
        .iter()
        .partition(|t| **t == DocumentType::Other);
    let regular_points: i64 = regular.iter().map(|t| weights.weight(**t) as i64).sum();
    let other_points: i64 = other.iter().map(|t| weights.weight(**t) as i64).sum();
    let documents = regular_points + other_points.min(weights.max_other_points as i64);

    let r = &config.repayment;
    let on_time = (facts.on_time_payments * r.on_time_points as i64).min(r.max_on_time_points as i64);
    let repayment = on_time
        + (facts.late_payments + facts.severe_payments) * r.late_penalty as i64
        + facts.defaults * r.default_penalty as i64
        + facts.early_repayment_points;

    let usage = (facts.paid_loans * r.usage_bonus_per_loan as i64).min(r.max_usage_points as i64);
    let base = config.initial_score as i64;

    ScoreBreakdown {
        base,
        documents,
        repayment,
        usage,
        score: clamp_score(base + documents + repayment + usage),
    }
}

pub struct Recalculator<'a> {
    ledger: ScoreLedger<'a>,
}

impl<'a> Recalculator<'a> {
    pub fn new(ledger: ScoreLedger<'a>) -> Self {
        Self { ledger }
    }

    pub fn gather_facts(&self, user_id: UserId) -> CreditResult<ScoringFacts> {
        let store = self.ledger.store();
        let count = |t: ScoreEventType| store.count_events_of_types(user_id, &[t]);
        Ok(ScoringFacts {
            approved_documents: store
                .approved_documents(user_id)?
                .into_iter()
                .map(|d| d.document_type)
                .collect(),
            on_time_payments: count(ScoreEventType::OnTimePayment)?,
            late_payments: count(ScoreEventType::LatePayment)?,
            severe_payments: count(ScoreEventType::SeverelyLatePayment)?,
            defaults: count(ScoreEventType::LoanDefault)?,
            early_repayment_points: store.sum_deltas_of_type(user_id, ScoreEventType::EarlyLoanRepayment)?,
            paid_loans: store.loan_count(user_id, LoanStatus::Paid)?,
        })
    }

    /// Rebuild and persist the user's profile.
    pub fn recalculate_full_score(&self, user_id: UserId) -> CreditResult<(CreditProfile, ScoreBreakdown)> {
        validate_id("user", user_id)?;
        let before = self.ledger.get_or_create_profile(user_id)?;
        let facts = self.gather_facts(user_id)?;
        let breakdown = compute_breakdown(&facts, self.ledger.config());
        let (tier, max_limit) = self.ledger.policy().derive(breakdown.score);

        let profile = self.ledger.store().overwrite_profile_score(
            user_id,
            breakdown.score,
            tier,
            max_limit,
            self.ledger.now(),
        )?;
        if before.score != profile.score {
            log::info!(
                "user={user_id} recalculated {} -> {} tier={tier}",
                before.score,
                profile.score
            );
        } else {
            log::debug!("user={user_id} recalculated, score unchanged at {}", profile.score);
        }
        Ok((profile, breakdown))
    }
}

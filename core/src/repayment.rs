//! Repayment scoring.
//!
//! Classification is pure: a due date, a payment instant and the
//! configured grace/severe windows decide the bucket. The scorer then
//! turns each bucket into at most one ledger row per installment, and a
//! loan completion or default into at most one row per loan.

use crate::{
    config::RepaymentConfig,
    customer::validate_id,
    error::{CreditError, CreditResult},
    ledger::{ScoreLedger, ScoreOutcome},
    loans::{Installment, Loan},
    store::ledger::{has_event_with, recent_event_count, sum_deltas_of_type},
    types::{InstallmentId, LoanId, LoanStatus, ScoreEventType},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PaymentClass {
    /// Paid on or before the due day.
    OnTime,
    /// Late, but inside the grace window. Scores nothing.
    Grace,
    Late,
    SeverelyLate,
}

impl PaymentClass {
    pub fn event_type(self) -> Option<ScoreEventType> {
        match self {
            PaymentClass::OnTime => Some(ScoreEventType::OnTimePayment),
            PaymentClass::Grace => None,
            PaymentClass::Late => Some(ScoreEventType::LatePayment),
            PaymentClass::SeverelyLate => Some(ScoreEventType::SeverelyLatePayment),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub class:     PaymentClass,
    /// Calendar days between due day and payment day; zero or negative is
    /// on time.
    pub days_late: i64,
}

pub fn classify(due_date: DateTime<Utc>, paid_at: DateTime<Utc>, cfg: &RepaymentConfig) -> Classification {
    let days_late = (paid_at.date_naive() - due_date.date_naive()).num_days();
    let class = if days_late <= 0 {
        PaymentClass::OnTime
    } else if days_late <= cfg.grace_days {
        PaymentClass::Grace
    } else if days_late <= cfg.severe_days {
        PaymentClass::Late
    } else {
        PaymentClass::SeverelyLate
    };
    Classification { class, days_late }
}

/// Bonus for a loan completed with every installment on time, tiered by
/// the loan's total amount.
pub fn early_repayment_bonus(total_amount: Decimal, cfg: &RepaymentConfig) -> i32 {
    if total_amount < cfg.early_threshold_small {
        cfg.early_bonus_small
    } else if total_amount < cfg.early_threshold_large {
        cfg.early_bonus_medium
    } else {
        cfg.early_bonus_large
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentReceipt {
    pub installment:    Installment,
    pub classification: Classification,
    pub score:          ScoreOutcome,
    /// Present when this payment settled the loan.
    pub loan_completed: Option<ScoreOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoanTransition {
    pub loan:  Loan,
    pub score: ScoreOutcome,
}

pub struct RepaymentScorer<'a> {
    ledger: ScoreLedger<'a>,
}

impl<'a> RepaymentScorer<'a> {
    pub fn new(ledger: ScoreLedger<'a>) -> Self {
        Self { ledger }
    }

    fn cfg(&self) -> &'a RepaymentConfig {
        &self.ledger.config().repayment
    }

    /// Score a paid installment. `paid_at` overrides the stored payment
    /// instant when given.
    pub fn handle_installment_payment(
        &self,
        installment: &Installment,
        paid_at: Option<DateTime<Utc>>,
    ) -> CreditResult<(Classification, ScoreOutcome)> {
        if !installment.paid {
            return Err(CreditError::Validation(format!(
                "installment {} is not paid",
                installment.installment_id
            )));
        }
        let paid_at = paid_at
            .or(installment.paid_at)
            .unwrap_or_else(|| self.ledger.now());
        let loan = self.ledger.store().loan(installment.loan_id)?;
        let user_id = loan.customer_id;
        let cfg = self.cfg();
        let classification = classify(installment.due_date, paid_at, cfg);

        let Some(event_type) = classification.class.event_type() else {
            log::debug!(
                "installment={} paid {} day(s) late, inside grace",
                installment.installment_id,
                classification.days_late
            );
            let profile = self.ledger.get_or_create_profile(user_id)?;
            return Ok((classification, ScoreOutcome { profile, event: None }));
        };

        let installment_id = installment.installment_id;
        let metadata = json!({
            "installment_id": installment_id,
            "loan_id": installment.loan_id,
            "days_late": classification.days_late,
        });

        let outcome = self.ledger.apply_planned(user_id, event_type, metadata, |conn, _| {
            for t in [
                ScoreEventType::OnTimePayment,
                ScoreEventType::LatePayment,
                ScoreEventType::SeverelyLatePayment,
            ] {
                if has_event_with(conn, user_id, t, "installment_id", installment_id)? {
                    log::warn!("installment={installment_id} already scored as {t}");
                    return Ok(None);
                }
            }
            match classification.class {
                PaymentClass::OnTime => {
                    let mut delta = cfg.on_time_points;
                    let needed = cfg.streak_threshold.saturating_sub(1);
                    if recent_event_count(conn, user_id, ScoreEventType::OnTimePayment, needed)? >= needed as i64 {
                        delta += cfg.streak_bonus;
                    }
                    let granted = sum_deltas_of_type(conn, user_id, ScoreEventType::OnTimePayment)?;
                    let room = (cfg.max_on_time_points as i64 - granted).max(0);
                    let delta = (delta as i64).min(room) as i32;
                    if delta <= 0 {
                        log::debug!("user={user_id} on-time credit capped at {}", cfg.max_on_time_points);
                        return Ok(None);
                    }
                    Ok(Some(delta))
                }
                PaymentClass::Late => Ok(Some(cfg.late_penalty)),
                PaymentClass::SeverelyLate => Ok(Some(cfg.severe_late_penalty)),
                PaymentClass::Grace => Ok(None),
            }
        })?;
        Ok((classification, outcome))
    }

    /// Score a loan status move. Only ACTIVE -> PAID with every installment
    /// on time, and any move into DEFAULTED, write to the ledger.
    pub fn handle_loan_status_change(
        &self,
        loan: &Loan,
        previous: LoanStatus,
        new: LoanStatus,
    ) -> CreditResult<ScoreOutcome> {
        let user_id = loan.customer_id;
        let loan_id = loan.loan_id;
        let cfg = self.cfg();

        let (event_type, delta) = match (previous, new) {
            (LoanStatus::Active, LoanStatus::Paid) => {
                let installments = self.ledger.store().installments_for_loan(loan_id)?;
                if installments.is_empty() || !installments.iter().all(Installment::paid_on_time) {
                    log::debug!("loan={loan_id} completed, not every installment on time");
                    return self.unchanged(user_id);
                }
                (ScoreEventType::EarlyLoanRepayment, early_repayment_bonus(loan.total_amount, cfg))
            }
            (_, LoanStatus::Defaulted) => (ScoreEventType::LoanDefault, cfg.default_penalty),
            _ => return self.unchanged(user_id),
        };

        let metadata = json!({
            "loan_id": loan_id,
            "loan_amount": loan.total_amount.to_string(),
        });
        self.ledger.apply_planned(user_id, event_type, metadata, |conn, _| {
            if has_event_with(conn, user_id, event_type, "loan_id", loan_id)? {
                log::warn!("loan={loan_id} already has {event_type}");
                return Ok(None);
            }
            Ok(Some(delta))
        })
    }

    /// Record a payment against an installment, score it, and settle the
    /// loan when this was the last unpaid installment. All of it commits
    /// as one transaction.
    pub fn record_installment_payment(
        &self,
        installment_id: InstallmentId,
        paid_at: DateTime<Utc>,
    ) -> CreditResult<PaymentReceipt> {
        validate_id("installment", installment_id)?;
        let store = self.ledger.store();
        store.in_transaction(|| {
            let before = store.installment(installment_id)?;
            if before.paid {
                return Err(CreditError::transition("installment", installment_id, "PAID", "PAID"));
            }
            let loan = store.loan(before.loan_id)?;
            if loan.status != LoanStatus::Active {
                return Err(CreditError::Validation(format!(
                    "loan {} is {}, payments are only accepted on ACTIVE loans",
                    loan.loan_id, loan.status
                )));
            }
            if !store.mark_installment_paid(installment_id, paid_at, self.ledger.now())? {
                return Err(CreditError::transition("installment", installment_id, "PAID", "PAID"));
            }

            let installment = store.installment(installment_id)?;
            let (classification, score) = self.handle_installment_payment(&installment, Some(paid_at))?;

            let settled = store.installments_for_loan(loan.loan_id)?.iter().all(|i| i.paid);
            let loan_completed = if settled
                && store.transition_loan(loan.loan_id, LoanStatus::Active, LoanStatus::Paid, self.ledger.now())?
            {
                log::info!("loan={} fully repaid", loan.loan_id);
                let loan = store.loan(loan.loan_id)?;
                Some(self.handle_loan_status_change(&loan, LoanStatus::Active, LoanStatus::Paid)?)
            } else {
                None
            };

            Ok(PaymentReceipt { installment, classification, score, loan_completed })
        })
    }

    /// Move a loan along its lifecycle and score the move.
    pub fn transition_loan_status(&self, loan_id: LoanId, new: LoanStatus) -> CreditResult<LoanTransition> {
        validate_id("loan", loan_id)?;
        let store = self.ledger.store();
        store.in_transaction(|| {
            let current = store.loan(loan_id)?;
            let previous = current.status;
            if !previous.can_transition_to(new) {
                return Err(CreditError::transition("loan", loan_id, previous, new));
            }
            if !store.transition_loan(loan_id, previous, new, self.ledger.now())? {
                let status = store.loan(loan_id)?.status;
                return Err(CreditError::transition("loan", loan_id, status, new));
            }
            let loan = store.loan(loan_id)?;
            log::info!("loan={loan_id} {previous} -> {new}");
            let score = self.handle_loan_status_change(&loan, previous, new)?;
            Ok(LoanTransition { loan, score })
        })
    }

    fn unchanged(&self, user_id: i64) -> CreditResult<ScoreOutcome> {
        Ok(ScoreOutcome { profile: self.ledger.get_or_create_profile(user_id)?, event: None })
    }
}

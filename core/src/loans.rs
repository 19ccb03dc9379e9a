//! Loans and their installment schedules.

use crate::{
    customer::validate_id,
    error::{CreditError, CreditResult},
    ledger::ScoreLedger,
    types::{InstallmentId, InstallmentStatus, LoanId, LoanStatus, Tier, UserId},
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Days between consecutive installments.
pub const INSTALLMENT_INTERVAL_DAYS: i64 = 30;

/// Upper bound on schedule length accepted at origination.
pub const MAX_INSTALLMENTS: u32 = 36;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Loan {
    pub loan_id:          LoanId,
    pub customer_id:      UserId,
    pub lender_id:        i64,
    pub product_id:       i64,
    pub principal_amount: Decimal,
    pub deposit_amount:   Decimal,
    /// Principal plus interest; the sum of the installment amounts.
    pub total_amount:     Decimal,
    pub status:           LoanStatus,
    pub created_at:       DateTime<Utc>,
    pub updated_at:       DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Installment {
    pub installment_id:  InstallmentId,
    pub loan_id:         LoanId,
    /// 1-based position in the schedule.
    pub sequence:        i64,
    pub due_date:        DateTime<Utc>,
    pub amount:          Decimal,
    pub paid:            bool,
    pub paid_at:         Option<DateTime<Utc>>,
    pub status:          InstallmentStatus,
    /// Set once the severe-overdue notice has gone out.
    pub severe_notified: bool,
}

impl Installment {
    /// Paid on or before the due calendar day.
    pub fn paid_on_time(&self) -> bool {
        match (self.paid, self.paid_at) {
            (true, Some(paid_at)) => paid_at.date_naive() <= self.due_date.date_naive(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLoan {
    pub customer_id:       UserId,
    pub lender_id:         i64,
    pub product_id:        i64,
    pub principal_amount:  Decimal,
    pub deposit_amount:    Decimal,
    pub total_amount:      Decimal,
    pub installment_count: u32,
    /// The first installment falls due one interval after this instant.
    pub start_date:        DateTime<Utc>,
}

impl NewLoan {
    pub fn validate(&self) -> CreditResult<()> {
        validate_id("customer", self.customer_id)?;
        validate_id("lender", self.lender_id)?;
        validate_id("product", self.product_id)?;
        if self.principal_amount.is_sign_negative() || self.deposit_amount.is_sign_negative() {
            return Err(CreditError::Validation("loan amounts must not be negative".into()));
        }
        if self.total_amount <= Decimal::ZERO {
            return Err(CreditError::Validation(format!(
                "total amount must be positive, got {}",
                self.total_amount
            )));
        }
        if self.total_amount < self.principal_amount {
            return Err(CreditError::Validation(format!(
                "total amount {} is below principal {}",
                self.total_amount, self.principal_amount
            )));
        }
        if self.installment_count == 0 || self.installment_count > MAX_INSTALLMENTS {
            return Err(CreditError::Validation(format!(
                "installment count must be in 1..={MAX_INSTALLMENTS}, got {}",
                self.installment_count
            )));
        }
        Ok(())
    }

    /// Equal installments every interval, rounded to cents. The rounding
    /// remainder lands on the last installment so the schedule sums to
    /// the total exactly.
    pub fn schedule(&self) -> Vec<(DateTime<Utc>, Decimal)> {
        let n = self.installment_count.max(1);
        let base = (self.total_amount / Decimal::from(n))
            .round_dp_with_strategy(2, RoundingStrategy::ToZero);
        let last = self.total_amount - base * Decimal::from(n - 1);

        (1..=n)
            .map(|i| {
                let due = self.start_date + Duration::days(INSTALLMENT_INTERVAL_DAYS * i as i64);
                let amount = if i == n { last } else { base };
                (due, amount)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OriginatedLoan {
    pub loan:         Loan,
    pub installments: Vec<Installment>,
}

/// Originates loans against the borrower's current limit.
pub struct LoanBook<'a> {
    ledger: ScoreLedger<'a>,
}

impl<'a> LoanBook<'a> {
    pub fn new(ledger: ScoreLedger<'a>) -> Self {
        Self { ledger }
    }

    /// Validate, check eligibility, then write an ACTIVE loan and its
    /// schedule in one transaction.
    pub fn create_loan(&self, new: &NewLoan) -> CreditResult<OriginatedLoan> {
        new.validate()?;
        let store = self.ledger.store();
        store.customer(new.customer_id)?;

        let profile = self.ledger.get_or_create_profile(new.customer_id)?;
        if profile.tier == Tier::Tier0 {
            return Err(CreditError::Validation(format!(
                "customer {} is {} and cannot take BNPL credit",
                new.customer_id, profile.tier
            )));
        }
        if new.principal_amount > profile.max_limit {
            return Err(CreditError::Validation(format!(
                "principal {} exceeds the {} limit of {}",
                new.principal_amount, profile.tier, profile.max_limit
            )));
        }

        let loan_id = store.insert_loan_with_schedule(
            new,
            LoanStatus::Active,
            &new.schedule(),
            self.ledger.now(),
        )?;
        log::info!(
            "loan={loan_id} opened for customer={} total={} over {} installments",
            new.customer_id,
            new.total_amount,
            new.installment_count
        );
        Ok(OriginatedLoan {
            loan:         store.loan(loan_id)?,
            installments: store.installments_for_loan(loan_id)?,
        })
    }
}

//! Store methods for loans, installment schedules and collections state.

use super::{money, opt_timestamp, parsed, require, timestamp, ts, CreditStore};
use crate::{
    error::CreditResult,
    loans::{Installment, Loan, NewLoan},
    types::{InstallmentId, InstallmentStatus, LoanId, LoanStatus, UserId},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row, Transaction, TransactionBehavior};
use rust_decimal::Decimal;

const LOAN_COLUMNS: &str = "loan_id, customer_id, lender_id, product_id, principal_amount,
     deposit_amount, total_amount, status, created_at, updated_at";

const INSTALLMENT_COLUMNS: &str = "i.installment_id, i.loan_id, i.sequence, i.due_date,
     i.amount, i.paid, i.paid_at, i.sweep_status, i.severe_notified";

/// An unpaid installment on an active loan, as selected by the sweep.
#[derive(Debug, Clone)]
pub struct CollectionCandidate {
    pub installment: Installment,
    pub customer_id: UserId,
}

fn loan_from_row(row: &Row<'_>) -> rusqlite::Result<Loan> {
    Ok(Loan {
        loan_id:          row.get(0)?,
        customer_id:      row.get(1)?,
        lender_id:        row.get(2)?,
        product_id:       row.get(3)?,
        principal_amount: parsed(row, 4)?,
        deposit_amount:   parsed(row, 5)?,
        total_amount:     parsed(row, 6)?,
        status:           parsed(row, 7)?,
        created_at:       timestamp(row, 8)?,
        updated_at:       timestamp(row, 9)?,
    })
}

fn installment_from_row(row: &Row<'_>) -> rusqlite::Result<Installment> {
    Ok(Installment {
        installment_id:  row.get(0)?,
        loan_id:         row.get(1)?,
        sequence:        row.get(2)?,
        due_date:        timestamp(row, 3)?,
        amount:          parsed(row, 4)?,
        paid:            row.get::<_, i32>(5)? != 0,
        paid_at:         opt_timestamp(row, 6)?,
        status:          parsed(row, 7)?,
        severe_notified: row.get::<_, i32>(8)? != 0,
    })
}

fn candidate_from_row(row: &Row<'_>) -> rusqlite::Result<CollectionCandidate> {
    Ok(CollectionCandidate {
        installment: installment_from_row(row)?,
        customer_id: row.get(9)?,
    })
}

impl CreditStore {
    // ── Loan ──────────────────────────────────────────────────────

    /// Insert a loan and its full schedule atomically.
    pub fn insert_loan_with_schedule(
        &self,
        loan: &NewLoan,
        status: LoanStatus,
        schedule: &[(DateTime<Utc>, Decimal)],
        now: DateTime<Utc>,
    ) -> CreditResult<LoanId> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO loan (
                customer_id, lender_id, product_id, principal_amount,
                deposit_amount, total_amount, status, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                loan.customer_id,
                loan.lender_id,
                loan.product_id,
                money(loan.principal_amount),
                money(loan.deposit_amount),
                money(loan.total_amount),
                status.as_str(),
                ts(now),
            ],
        )?;
        let loan_id = tx.last_insert_rowid();
        for (idx, (due_date, amount)) in schedule.iter().enumerate() {
            tx.execute(
                "INSERT INTO installment (
                    loan_id, sequence, due_date, amount, paid, sweep_status, updated_at
                ) VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6)",
                params![
                    loan_id,
                    (idx + 1) as i64,
                    ts(*due_date),
                    money(*amount),
                    InstallmentStatus::Pending.as_str(),
                    ts(now),
                ],
            )?;
        }
        tx.commit()?;
        Ok(loan_id)
    }

    pub fn find_loan(&self, loan_id: LoanId) -> CreditResult<Option<Loan>> {
        let sql = format!("SELECT {LOAN_COLUMNS} FROM loan WHERE loan_id = ?1");
        let found = self
            .conn
            .query_row(&sql, params![loan_id], loan_from_row)
            .optional()?;
        Ok(found)
    }

    pub fn loan(&self, loan_id: LoanId) -> CreditResult<Loan> {
        require(self.find_loan(loan_id)?, "loan", loan_id)
    }

    pub fn loans_for_customer(&self, customer_id: UserId) -> CreditResult<Vec<Loan>> {
        let sql = format!(
            "SELECT {LOAN_COLUMNS} FROM loan WHERE customer_id = ?1 ORDER BY loan_id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![customer_id], loan_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn loan_count(&self, customer_id: UserId, status: LoanStatus) -> CreditResult<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM loan WHERE customer_id = ?1 AND status = ?2",
            params![customer_id, status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Guarded status move. Returns false if the loan was not in `from`.
    pub fn transition_loan(
        &self,
        loan_id: LoanId,
        from: LoanStatus,
        to: LoanStatus,
        now: DateTime<Utc>,
    ) -> CreditResult<bool> {
        let changed = self.conn.execute(
            "UPDATE loan SET status = ?1, updated_at = ?2 WHERE loan_id = ?3 AND status = ?4",
            params![to.as_str(), ts(now), loan_id, from.as_str()],
        )?;
        Ok(changed == 1)
    }

    // ── Installment ───────────────────────────────────────────────

    pub fn find_installment(
        &self,
        installment_id: InstallmentId,
    ) -> CreditResult<Option<Installment>> {
        let sql = format!(
            "SELECT {INSTALLMENT_COLUMNS} FROM installment i WHERE i.installment_id = ?1"
        );
        let found = self
            .conn
            .query_row(&sql, params![installment_id], installment_from_row)
            .optional()?;
        Ok(found)
    }

    pub fn installment(&self, installment_id: InstallmentId) -> CreditResult<Installment> {
        require(self.find_installment(installment_id)?, "installment", installment_id)
    }

    pub fn installments_for_loan(&self, loan_id: LoanId) -> CreditResult<Vec<Installment>> {
        let sql = format!(
            "SELECT {INSTALLMENT_COLUMNS} FROM installment i
             WHERE i.loan_id = ?1 ORDER BY i.sequence ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![loan_id], installment_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Set `paid` once. Returns false if it was already paid.
    pub fn mark_installment_paid(
        &self,
        installment_id: InstallmentId,
        paid_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> CreditResult<bool> {
        let changed = self.conn.execute(
            "UPDATE installment
             SET paid = 1, paid_at = ?1, sweep_status = ?2, updated_at = ?3
             WHERE installment_id = ?4 AND paid = 0",
            params![
                ts(paid_at),
                InstallmentStatus::Paid.as_str(),
                ts(now),
                installment_id
            ],
        )?;
        Ok(changed == 1)
    }

    // ── Collections ───────────────────────────────────────────────

    /// Unpaid installments on active loans, in `statuses`, with
    /// `after < due_date <= until`. Either bound may be open.
    pub fn collection_candidates(
        &self,
        statuses: &[InstallmentStatus],
        after: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
        until_inclusive: bool,
    ) -> CreditResult<Vec<CollectionCandidate>> {
        let labels: Vec<String> = statuses.iter().map(|s| format!("'{}'", s.as_str())).collect();
        let upper = if until_inclusive { "<=" } else { "<" };
        let sql = format!(
            "SELECT {INSTALLMENT_COLUMNS}, l.customer_id
             FROM installment i JOIN loan l ON l.loan_id = i.loan_id
             WHERE i.paid = 0
               AND l.status = ?1
               AND i.sweep_status IN ({})
               AND (?2 IS NULL OR i.due_date > ?2)
               AND (?3 IS NULL OR i.due_date {upper} ?3)
             ORDER BY l.customer_id ASC, i.due_date ASC, i.installment_id ASC",
            labels.join(", ")
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![LoanStatus::Active.as_str(), after.map(ts), until.map(ts)],
            candidate_from_row,
        )?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Guarded sweep-status move on an unpaid installment.
    pub fn transition_installment(
        &self,
        installment_id: InstallmentId,
        from: InstallmentStatus,
        to: InstallmentStatus,
        now: DateTime<Utc>,
    ) -> CreditResult<bool> {
        let changed = self.conn.execute(
            "UPDATE installment SET sweep_status = ?1, updated_at = ?2
             WHERE installment_id = ?3 AND sweep_status = ?4 AND paid = 0",
            params![to.as_str(), ts(now), installment_id, from.as_str()],
        )?;
        Ok(changed == 1)
    }

    pub fn mark_severe_notified(
        &self,
        installment_id: InstallmentId,
        now: DateTime<Utc>,
    ) -> CreditResult<()> {
        self.conn.execute(
            "UPDATE installment SET severe_notified = 1, updated_at = ?1
             WHERE installment_id = ?2",
            params![ts(now), installment_id],
        )?;
        Ok(())
    }
}

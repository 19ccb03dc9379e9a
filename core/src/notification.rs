//! Outbound borrower notices raised by the collections sweep.
//!
//! Delivery is best-effort: the sweep counts and logs failures and moves on.

use crate::{customer::Customer, loans::{Installment, Loan}};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("notification channel unavailable: {0}")]
    Unavailable(String),

    #[error("recipient {customer_id} rejected: {reason}")]
    Rejected { customer_id: i64, reason: String },
}

pub trait Notifier: Send + Sync {
    fn upcoming_reminder(
        &self,
        customer: &Customer,
        installment: &Installment,
        loan: &Loan,
    ) -> Result<(), NotificationError>;

    fn overdue(
        &self,
        customer: &Customer,
        installment: &Installment,
        loan: &Loan,
        days_overdue: i64,
    ) -> Result<(), NotificationError>;

    fn severe_overdue(
        &self,
        customer: &Customer,
        installment: &Installment,
        loan: &Loan,
        days_overdue: i64,
    ) -> Result<(), NotificationError>;
}

impl<N: Notifier + ?Sized> Notifier for Arc<N> {
    fn upcoming_reminder(&self, customer: &Customer, installment: &Installment, loan: &Loan) -> Result<(), NotificationError> {
        (**self).upcoming_reminder(customer, installment, loan)
    }

    fn overdue(&self, customer: &Customer, installment: &Installment, loan: &Loan, days_overdue: i64) -> Result<(), NotificationError> {
        (**self).overdue(customer, installment, loan, days_overdue)
    }

    fn severe_overdue(&self, customer: &Customer, installment: &Installment, loan: &Loan, days_overdue: i64) -> Result<(), NotificationError> {
        (**self).severe_overdue(customer, installment, loan, days_overdue)
    }
}

pub fn reminder_text(customer: &Customer, installment: &Installment) -> String {
    format!(
        "Hi {}, installment {} of {} is due on {}.",
        customer.name,
        installment.sequence,
        installment.amount,
        installment.due_date.format("%Y-%m-%d")
    )
}

pub fn overdue_text(customer: &Customer, installment: &Installment, days_overdue: i64, severe: bool) -> String {
    let urgency = if severe { "URGENT: " } else { "" };
    format!(
        "{urgency}Hi {}, installment {} of {} is {days_overdue} day(s) overdue. Please pay to protect your credit limit.",
        customer.name, installment.sequence, installment.amount
    )
}

/// Writes every notice to the log instead of a delivery channel.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn upcoming_reminder(
        &self,
        customer: &Customer,
        installment: &Installment,
        loan: &Loan,
    ) -> Result<(), NotificationError> {
        log::info!(
            "notify phone={} loan={}: {}",
            customer.phone,
            loan.loan_id,
            reminder_text(customer, installment)
        );
        Ok(())
    }

    fn overdue(
        &self,
        customer: &Customer,
        installment: &Installment,
        loan: &Loan,
        days_overdue: i64,
    ) -> Result<(), NotificationError> {
        log::info!(
            "notify phone={} loan={}: {}",
            customer.phone,
            loan.loan_id,
            overdue_text(customer, installment, days_overdue, false)
        );
        Ok(())
    }

    fn severe_overdue(
        &self,
        customer: &Customer,
        installment: &Installment,
        loan: &Loan,
        days_overdue: i64,
    ) -> Result<(), NotificationError> {
        log::warn!(
            "notify phone={} loan={}: {}",
            customer.phone,
            loan.loan_id,
            overdue_text(customer, installment, days_overdue, true)
        );
        Ok(())
    }
}

//! Registered borrowers. Identity and contact details only; everything
//! credit-related hangs off the profile.

use crate::{
    error::{CreditError, CreditResult},
    types::UserId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Customer {
    pub customer_id: UserId,
    pub name:        String,
    pub phone:       String,
    pub created_at:  DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCustomer {
    pub name:  String,
    pub phone: String,
}

impl NewCustomer {
    pub fn validate(&self) -> CreditResult<()> {
        if self.name.trim().is_empty() {
            return Err(CreditError::Validation("customer name is required".into()));
        }
        let digits = self.phone.chars().filter(|c| c.is_ascii_digit()).count();
        if digits < 7 {
            return Err(CreditError::Validation(format!(
                "phone '{}' is not a dialable number",
                self.phone
            )));
        }
        Ok(())
    }
}

/// Reject identifiers that can never refer to a stored row.
pub(crate) fn validate_id(entity: &'static str, id: i64) -> CreditResult<()> {
    if id <= 0 {
        return Err(CreditError::Validation(format!("{entity} id must be positive, got {id}")));
    }
    Ok(())
}

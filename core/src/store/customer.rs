use super::{require, timestamp, ts, CreditStore};
use crate::{customer::Customer, error::CreditResult, types::UserId};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

impl CreditStore {
    // ── Customer ──────────────────────────────────────────────────

    pub fn insert_customer(
        &self,
        name: &str,
        phone: &str,
        now: DateTime<Utc>,
    ) -> CreditResult<Customer> {
        self.conn.execute(
            "INSERT INTO customer (name, phone, created_at) VALUES (?1, ?2, ?3)",
            params![name, phone, ts(now)],
        )?;
        let customer_id = self.conn.last_insert_rowid();
        self.customer(customer_id)
    }

    pub fn find_customer(&self, customer_id: UserId) -> CreditResult<Option<Customer>> {
        let found = self
            .conn
            .query_row(
                "SELECT customer_id, name, phone, created_at
                 FROM customer WHERE customer_id = ?1",
                params![customer_id],
                |row| {
                    Ok(Customer {
                        customer_id: row.get(0)?,
                        name:        row.get(1)?,
                        phone:       row.get(2)?,
                        created_at:  timestamp(row, 3)?,
                    })
                },
            )
            .optional()?;
        Ok(found)
    }

    pub fn customer(&self, customer_id: UserId) -> CreditResult<Customer> {
        require(self.find_customer(customer_id)?, "customer", customer_id)
    }
}

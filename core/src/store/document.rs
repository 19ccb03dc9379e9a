//! Store methods for uploaded credit documents.

use super::{opt_timestamp, parsed, require, timestamp, ts, CreditStore};
use crate::{
    documents::CreditDocument,
    error::CreditResult,
    types::{DocumentId, DocumentStatus, DocumentType, UserId},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

const DOCUMENT_COLUMNS: &str =
    "document_id, user_id, document_type, status, uploaded_at, reviewed_at";

fn document_from_row(row: &Row<'_>) -> rusqlite::Result<CreditDocument> {
    Ok(CreditDocument {
        document_id:   row.get(0)?,
        user_id:       row.get(1)?,
        document_type: parsed(row, 2)?,
        status:        parsed(row, 3)?,
        uploaded_at:   timestamp(row, 4)?,
        reviewed_at:   opt_timestamp(row, 5)?,
    })
}

impl CreditStore {
    pub fn insert_document(
        &self,
        user_id: UserId,
        document_type: DocumentType,
        now: DateTime<Utc>,
    ) -> CreditResult<CreditDocument> {
        self.conn.execute(
            "INSERT INTO credit_document (user_id, document_type, status, uploaded_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                user_id,
                document_type.as_str(),
                DocumentStatus::Pending.as_str(),
                ts(now)
            ],
        )?;
        self.document(self.conn.last_insert_rowid())
    }

    pub fn find_document(&self, document_id: DocumentId) -> CreditResult<Option<CreditDocument>> {
        let sql = format!("SELECT {DOCUMENT_COLUMNS} FROM credit_document WHERE document_id = ?1");
        let found = self
            .conn
            .query_row(&sql, params![document_id], document_from_row)
            .optional()?;
        Ok(found)
    }

    pub fn document(&self, document_id: DocumentId) -> CreditResult<CreditDocument> {
        require(self.find_document(document_id)?, "document", document_id)
    }

    pub fn documents_for_user(&self, user_id: UserId) -> CreditResult<Vec<CreditDocument>> {
        let sql = format!(
            "SELECT {DOCUMENT_COLUMNS} FROM credit_document
             WHERE user_id = ?1 ORDER BY document_id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![user_id], document_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn approved_documents(&self, user_id: UserId) -> CreditResult<Vec<CreditDocument>> {
        let sql = format!(
            "SELECT {DOCUMENT_COLUMNS} FROM credit_document
             WHERE user_id = ?1 AND status = ?2 ORDER BY document_id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![user_id, DocumentStatus::Approved.as_str()],
            document_from_row,
        )?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Move a document out of `from`. Returns false when the row was no
    /// longer in `from`, so two reviewers cannot both win.
    pub fn transition_document(
        &self,
        document_id: DocumentId,
        from: DocumentStatus,
        to: DocumentStatus,
        now: DateTime<Utc>,
    ) -> CreditResult<bool> {
        let changed = self.conn.execute(
            "UPDATE credit_document SET status = ?1, reviewed_at = ?2
             WHERE document_id = ?3 AND status = ?4",
            params![to.as_str(), ts(now), document_id, from.as_str()],
        )?;
        Ok(changed == 1)
    }
}

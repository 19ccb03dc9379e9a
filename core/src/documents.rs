//! Document scoring: turns a document approval into a ledger delta.
//!
//! The review transition (PENDING -> APPROVED | REJECTED) happens at most
//! once per document and is the only caller of `handle_document_approved`.
//! Approvals of the catch-all OTHER type share a cumulative cap; an
//! approval that would push past the cap writes nothing.

use crate::{
    customer::validate_id,
    error::{CreditError, CreditResult},
    ledger::{CreditProfile, CreditScoreEvent, ScoreLedger, ScoreOutcome},
    store::ledger::{document_points_granted, has_event_with},
    types::{DocumentId, DocumentStatus, DocumentType, ScoreEventType, UserId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreditDocument {
    pub document_id:   DocumentId,
    pub user_id:       UserId,
    pub document_type: DocumentType,
    pub status:        DocumentStatus,
    pub uploaded_at:   DateTime<Utc>,
    pub reviewed_at:   Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewOutcome {
    pub document: CreditDocument,
    pub profile:  CreditProfile,
    /// The ledger row written for an approval, if any.
    pub event:    Option<CreditScoreEvent>,
}

/// One line of the per-type upload checklist.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChecklistEntry {
    pub document_type: DocumentType,
    pub weight:        i32,
    pub document_id:   Option<DocumentId>,
    pub status:        Option<DocumentStatus>,
}

pub struct DocumentScorer<'a> {
    ledger: ScoreLedger<'a>,
}

impl<'a> DocumentScorer<'a> {
    pub fn new(ledger: ScoreLedger<'a>) -> Self {
        Self { ledger }
    }

    /// Record an upload awaiting review.
    pub fn submit(&self, user_id: UserId, document_type: DocumentType) -> CreditResult<CreditDocument> {
        validate_id("user", user_id)?;
        self.ledger.store().customer(user_id)?;
        let doc = self
            .ledger
            .store()
            .insert_document(user_id, document_type, self.ledger.now())?;
        log::debug!(
            "user={user_id} submitted document={} type={document_type}",
            doc.document_id
        );
        Ok(doc)
    }

    /// Review a pending document. Approval feeds the ledger exactly once;
    /// the status change and its ledger row commit together.
    pub fn review(&self, document_id: DocumentId, decision: DocumentStatus) -> CreditResult<ReviewOutcome> {
        validate_id("document", document_id)?;
        if decision == DocumentStatus::Pending {
            return Err(CreditError::Validation(
                "a review decision must be APPROVED or REJECTED".into(),
            ));
        }

        let store = self.ledger.store();
        let (document, ScoreOutcome { profile, event }) = store.in_transaction(|| {
            let current = store.document(document_id)?;
            if !current.status.can_transition_to(decision) {
                return Err(CreditError::transition("document", document_id, current.status, decision));
            }
            if !store.transition_document(document_id, current.status, decision, self.ledger.now())? {
                let now_status = store.document(document_id)?.status;
                return Err(CreditError::transition("document", document_id, now_status, decision));
            }
            let document = store.document(document_id)?;
            let outcome = if decision == DocumentStatus::Approved {
                self.handle_document_approved(&document)?
            } else {
                ScoreOutcome {
                    profile: self.ledger.get_or_create_profile(document.user_id)?,
                    event:   None,
                }
            };
            Ok((document, outcome))
        })?;
        log::info!(
            "document={document_id} user={} type={} reviewed: {decision}",
            document.user_id,
            document.document_type
        );
        Ok(ReviewOutcome { document, profile, event })
    }

    /// Credit an approved document. Writes nothing when the document was
    /// already credited, carries no weight, or would exceed the OTHER cap.
    pub fn handle_document_approved(
        &self,
        document: &CreditDocument,
    ) -> CreditResult<ScoreOutcome> {
        if document.status != DocumentStatus::Approved {
            return Err(CreditError::Validation(format!(
                "document {} is {}, only approved documents are scored",
                document.document_id, document.status
            )));
        }

        let docs = &self.ledger.config().documents;
        let weight = docs.weight(document.document_type);
        let cap = docs.max_other_points as i64;
        let document_id = document.document_id;
        let user_id = document.user_id;
        let document_type = document.document_type;

        self.ledger.apply_planned(
            user_id,
            ScoreEventType::DocumentApproved,
            json!({
                "document_id": document_id,
                "document_type": document_type.as_str(),
            }),
            |conn, _| {
                if has_event_with(conn, user_id, ScoreEventType::DocumentApproved, "document_id", document_id)? {
                    log::warn!("document={document_id} already credited, ignoring repeat approval");
                    return Ok(None);
                }
                if weight <= 0 {
                    return Ok(None);
                }
                if document_type == DocumentType::Other {
                    let granted = document_points_granted(conn, user_id, DocumentType::Other.as_str())?;
                    if granted + weight as i64 > cap {
                        log::warn!(
                            "user={user_id} document={document_id} OTHER cap reached ({granted}/{cap}), no credit"
                        );
                        return Ok(None);
                    }
                }
                Ok(Some(weight))
            },
        )
    }

    /// Latest document per type, with the weight an approval would carry.
    pub fn checklist(&self, user_id: UserId) -> CreditResult<Vec<ChecklistEntry>> {
        validate_id("user", user_id)?;
        let store = self.ledger.store();
        store.customer(user_id)?;
        let docs = store.documents_for_user(user_id)?;
        let weights = &self.ledger.config().documents;

        Ok(DocumentType::ALL
            .iter()
            .map(|&document_type| {
                let latest = docs.iter().rev().find(|d| d.document_type == document_type);
                ChecklistEntry {
                    document_type,
                    weight: weights.weight(document_type),
                    document_id: latest.map(|d| d.document_id),
                    status: latest.map(|d| d.status),
                }
            })
            .collect())
    }
}

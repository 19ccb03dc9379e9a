//! Document scoring tests: approval credit, the OTHER cap, review guards.

mod common;

use bnpl_credit_core::{
    error::CreditError,
    types::{DocumentStatus, DocumentType, ScoreEventType, Tier},
};
use common::{allow_writes, harness, harness_at, register, reject_ledger_rows, remove_db, temp_db_path};
use rust_decimal::Decimal;

/// Approving a BANK_STATEMENT moves 300 -> 370 and stays in TIER_1.
#[test]
fn bank_statement_approval_adds_its_weight() {
    let h = harness();
    let user = register(&h.engine, "Amina");

    let doc = h.engine.submit_document(user, DocumentType::BankStatement).unwrap();
    assert_eq!(doc.status, DocumentStatus::Pending);

    let outcome = h.engine.review_document(doc.document_id, DocumentStatus::Approved).unwrap();
    assert_eq!(outcome.document.status, DocumentStatus::Approved);
    assert!(outcome.document.reviewed_at.is_some());
    assert_eq!(outcome.profile.score, 370);
    assert_eq!(outcome.profile.tier, Tier::Tier1);
    assert_eq!(outcome.profile.max_limit, Decimal::new(200_000, 0));

    let event = outcome.event.expect("approval writes a ledger row");
    assert_eq!(event.event_type, ScoreEventType::DocumentApproved);
    assert_eq!(event.delta, 70);
    assert_eq!(event.metadata["document_id"], doc.document_id);
    assert_eq!(event.metadata["document_type"], "BANK_STATEMENT");
}

#[test]
fn reviewed_document_cannot_be_reviewed_again() {
    let h = harness();
    let user = register(&h.engine, "Brian");
    let doc = h.engine.submit_document(user, DocumentType::Payslip).unwrap();
    h.engine.review_document(doc.document_id, DocumentStatus::Approved).unwrap();

    let err = h
        .engine
        .review_document(doc.document_id, DocumentStatus::Approved)
        .unwrap_err();
    assert!(matches!(err, CreditError::InvalidTransition { entity: "document", .. }), "{err}");

    let err = h
        .engine
        .review_document(doc.document_id, DocumentStatus::Rejected)
        .unwrap_err();
    assert!(matches!(err, CreditError::InvalidTransition { .. }), "{err}");

    assert_eq!(h.engine.get_or_create_profile(user).unwrap().score, 360);
    assert_eq!(h.engine.store().event_count(user).unwrap(), 1);
}

#[test]
fn repeated_approval_notice_writes_nothing() {
    let h = harness();
    let user = register(&h.engine, "Chloe");
    let doc = h.engine.submit_document(user, DocumentType::ProofOfAddress).unwrap();
    let approved = h
        .engine
        .review_document(doc.document_id, DocumentStatus::Approved)
        .unwrap()
        .document;

    let again = h.engine.handle_document_approved(&approved).unwrap();
    assert!(again.event.is_none());
    assert_eq!(again.profile.score, 330);
}

#[test]
fn rejection_scores_nothing() {
    let h = harness();
    let user = register(&h.engine, "Dembe");
    let doc = h.engine.submit_document(user, DocumentType::BankStatement).unwrap();

    let outcome = h.engine.review_document(doc.document_id, DocumentStatus::Rejected).unwrap();
    assert_eq!(outcome.document.status, DocumentStatus::Rejected);
    assert!(outcome.event.is_none());
    assert_eq!(outcome.profile.score, 300);
}

#[test]
fn other_documents_stop_scoring_at_the_cap() {
    let h = harness();
    let user = register(&h.engine, "Esther");

    let mut credited = Vec::new();
    for _ in 0..4 {
        let doc = h.engine.submit_document(user, DocumentType::Other).unwrap();
        let outcome = h.engine.review_document(doc.document_id, DocumentStatus::Approved).unwrap();
        credited.push(outcome.event.map(|e| e.delta));
    }

    assert_eq!(credited, vec![Some(10), Some(10), Some(10), None]);
    assert_eq!(h.engine.get_or_create_profile(user).unwrap().score, 330);
    assert_eq!(h.engine.store().event_count(user).unwrap(), 3);
}

#[test]
fn other_cap_does_not_limit_named_types() {
    let h = harness();
    let user = register(&h.engine, "Farid");
    for t in [DocumentType::Other, DocumentType::Other, DocumentType::Other, DocumentType::Payslip] {
        let doc = h.engine.submit_document(user, t).unwrap();
        h.engine.review_document(doc.document_id, DocumentStatus::Approved).unwrap();
    }
    assert_eq!(h.engine.get_or_create_profile(user).unwrap().score, 300 + 30 + 60);
}

#[test]
fn pending_document_is_not_scored() {
    let h = harness();
    let user = register(&h.engine, "Grace");
    let doc = h.engine.submit_document(user, DocumentType::BankStatement).unwrap();

    let err = h.engine.handle_document_approved(&doc).unwrap_err();
    assert!(matches!(err, CreditError::Validation(_)), "{err}");
}

#[test]
fn review_input_is_validated() {
    let h = harness();
    let user = register(&h.engine, "Hassan");
    let doc = h.engine.submit_document(user, DocumentType::BankStatement).unwrap();

    assert!(matches!(
        h.engine.review_document(doc.document_id, DocumentStatus::Pending).unwrap_err(),
        CreditError::Validation(_)
    ));
    assert!(matches!(
        h.engine.review_document(4242, DocumentStatus::Approved).unwrap_err(),
        CreditError::NotFound { entity: "document", .. }
    ));
    assert!(matches!(
        h.engine.submit_document(777, DocumentType::Payslip).unwrap_err(),
        CreditError::NotFound { .. }
    ));
}

#[test]
fn checklist_shows_latest_status_per_type() {
    let h = harness();
    let user = register(&h.engine, "Irene");
    let bank = h.engine.submit_document(user, DocumentType::BankStatement).unwrap();
    h.engine.review_document(bank.document_id, DocumentStatus::Approved).unwrap();
    h.engine.submit_document(user, DocumentType::Payslip).unwrap();

    let checklist = h.engine.document_checklist(user).unwrap();
    assert_eq!(checklist.len(), DocumentType::ALL.len());

    let entry = |t| checklist.iter().find(|e| e.document_type == t).unwrap();
    assert_eq!(entry(DocumentType::BankStatement).status, Some(DocumentStatus::Approved));
    assert_eq!(entry(DocumentType::BankStatement).weight, 70);
    assert_eq!(entry(DocumentType::Payslip).status, Some(DocumentStatus::Pending));
    assert_eq!(entry(DocumentType::Lc1Letter).status, None);
    assert_eq!(entry(DocumentType::Lc1Letter).document_id, None);
}

#[test]
fn failed_ledger_write_leaves_the_document_pending() {
    let path = temp_db_path("review-retry");
    let h = harness_at(&path);
    let user = register(&h.engine, "Rehema");
    let doc = h.engine.submit_document(user, DocumentType::BankStatement).unwrap();
    reject_ledger_rows(&path, user);

    let err = h.engine.review_document(doc.document_id, DocumentStatus::Approved).unwrap_err();
    assert!(matches!(err, CreditError::Persistence(_)));
    assert_eq!(h.engine.store().document(doc.document_id).unwrap().status, DocumentStatus::Pending);
    assert_eq!(h.engine.get_or_create_profile(user).unwrap().score, 300);

    allow_writes(&path, "reject_ledger_rows");
    let outcome = h.engine.review_document(doc.document_id, DocumentStatus::Approved).unwrap();
    assert_eq!(outcome.document.status, DocumentStatus::Approved);
    assert_eq!(outcome.profile.score, 370);
    assert_eq!(h.engine.store().event_count(user).unwrap(), 1);

    drop(h);
    remove_db(&path);
}

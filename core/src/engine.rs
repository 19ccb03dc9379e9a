//! The credit engine, one facade over the scoring and collections core.
//!
//! WIRING (built once, never rewired):
//!   config    immutable policy, validated at construction
//!   policy    score -> tier -> limit, derived from config
//!   store     the only owner of the database connection
//!   clock     stamps every ledger row and drives the sweep
//!   notifier  borrower notices from the sweep
//!
//! RULES:
//!   - Every score change goes through the ledger's atomic write path.
//!   - The recalculation writes the profile directly and appends nothing.
//!   - The sweep never raises; callers read its summary.

use crate::{
    clock::{Clock, SystemClock},
    collections::{DelinquencySweep, SweepSummary},
    config::CreditConfig,
    customer::{Customer, NewCustomer},
    documents::{ChecklistEntry, CreditDocument, DocumentScorer, ReviewOutcome},
    error::CreditResult,
    ledger::{ChainBreak, CreditProfile, ScoreHistory, ScoreLedger, ScoreOutcome},
    loans::{Installment, Loan, LoanBook, NewLoan, OriginatedLoan},
    notification::{LogNotifier, Notifier},
    policy::TierPolicy,
    recalculation::{Recalculator, ScoreBreakdown},
    repayment::{Classification, LoanTransition, PaymentReceipt, RepaymentScorer},
    store::CreditStore,
    types::{DocumentId, DocumentStatus, DocumentType, InstallmentId, LoanId, LoanStatus, ScoreEventType, UserId},
};
use chrono::{DateTime, Utc};

pub struct CreditEngine {
    config:   CreditConfig,
    policy:   TierPolicy,
    store:    CreditStore,
    clock:    Box<dyn Clock>,
    notifier: Box<dyn Notifier>,
}

impl CreditEngine {
    pub fn new(
        config: CreditConfig,
        store: CreditStore,
        clock: Box<dyn Clock>,
        notifier: Box<dyn Notifier>,
    ) -> CreditResult<Self> {
        let policy = TierPolicy::new(&config)?;
        Ok(Self { config, policy, store, clock, notifier })
    }

    /// Migrate the store and wire the production clock and notifier.
    /// Call this instead of new() outside tests.
    pub fn build(config: CreditConfig, store: CreditStore) -> CreditResult<Self> {
        store.migrate()?;
        Self::new(config, store, Box::new(SystemClock), Box::new(LogNotifier))
    }

    /// In-memory engine on the standard policy, for tests.
    pub fn build_test(clock: Box<dyn Clock>) -> CreditResult<Self> {
        let store = CreditStore::in_memory()?;
        store.migrate()?;
        Self::new(CreditConfig::standard(), store, clock, Box::new(LogNotifier))
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &CreditConfig {
        &self.config
    }

    pub fn policy(&self) -> &TierPolicy {
        &self.policy
    }

    pub fn store(&self) -> &CreditStore {
        &self.store
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn ledger(&self) -> ScoreLedger<'_> {
        ScoreLedger::new(&self.store, &self.policy, &self.config, self.clock.as_ref())
    }

    // ── Ledger ────────────────────────────────────────────────────

    pub fn get_or_create_profile(&self, user_id: UserId) -> CreditResult<CreditProfile> {
        self.ledger().get_or_create_profile(user_id)
    }

    pub fn apply_score_change(
        &self,
        user_id: UserId,
        delta: i32,
        event_type: ScoreEventType,
        metadata: serde_json::Value,
    ) -> CreditResult<CreditProfile> {
        self.ledger().apply_delta(user_id, delta, event_type, metadata)
    }

    pub fn score_history(&self, user_id: UserId, page: u32, page_size: u32) -> CreditResult<ScoreHistory> {
        self.ledger().history(user_id, page, page_size)
    }

    pub fn verify_ledger_chain(&self, user_id: UserId) -> CreditResult<Option<ChainBreak>> {
        self.ledger().verify_chain(user_id)
    }

    // ── Customers ─────────────────────────────────────────────────

    /// Register a borrower and open their profile at the initial score.
    pub fn register_customer(&self, name: &str, phone: &str) -> CreditResult<(Customer, CreditProfile)> {
        let new = NewCustomer { name: name.trim().to_string(), phone: phone.trim().to_string() };
        new.validate()?;
        let customer = self.store.insert_customer(&new.name, &new.phone, self.now())?;
        log::info!("customer={} registered", customer.customer_id);
        let profile = self.get_or_create_profile(customer.customer_id)?;
        Ok((customer, profile))
    }

    // ── Documents ─────────────────────────────────────────────────

    pub fn submit_document(&self, user_id: UserId, document_type: DocumentType) -> CreditResult<CreditDocument> {
        DocumentScorer::new(self.ledger()).submit(user_id, document_type)
    }

    pub fn review_document(&self, document_id: DocumentId, decision: DocumentStatus) -> CreditResult<ReviewOutcome> {
        DocumentScorer::new(self.ledger()).review(document_id, decision)
    }

    pub fn handle_document_approved(&self, document: &CreditDocument) -> CreditResult<ScoreOutcome> {
        DocumentScorer::new(self.ledger()).handle_document_approved(document)
    }

    pub fn document_checklist(&self, user_id: UserId) -> CreditResult<Vec<ChecklistEntry>> {
        DocumentScorer::new(self.ledger()).checklist(user_id)
    }

    // ── Loans & repayment ─────────────────────────────────────────

    pub fn create_loan(&self, new: &NewLoan) -> CreditResult<OriginatedLoan> {
        LoanBook::new(self.ledger()).create_loan(new)
    }

    pub fn record_installment_payment(
        &self,
        installment_id: InstallmentId,
        paid_at: DateTime<Utc>,
    ) -> CreditResult<PaymentReceipt> {
        RepaymentScorer::new(self.ledger()).record_installment_payment(installment_id, paid_at)
    }

    pub fn handle_installment_payment(
        &self,
        installment: &Installment,
        paid_at: Option<DateTime<Utc>>,
    ) -> CreditResult<(Classification, ScoreOutcome)> {
        RepaymentScorer::new(self.ledger()).handle_installment_payment(installment, paid_at)
    }

    pub fn transition_loan_status(&self, loan_id: LoanId, new: LoanStatus) -> CreditResult<LoanTransition> {
        RepaymentScorer::new(self.ledger()).transition_loan_status(loan_id, new)
    }

    pub fn handle_loan_status_change(
        &self,
        loan: &Loan,
        previous: LoanStatus,
        new: LoanStatus,
    ) -> CreditResult<ScoreOutcome> {
        RepaymentScorer::new(self.ledger()).handle_loan_status_change(loan, previous, new)
    }

    // ── Recalculation & collections ───────────────────────────────

    pub fn recalculate_full_score(&self, user_id: UserId) -> CreditResult<(CreditProfile, ScoreBreakdown)> {
        Recalculator::new(self.ledger()).recalculate_full_score(user_id)
    }

    /// Run the delinquency sweep as of the engine clock.
    pub fn run_daily_collections_sweep(&self) -> SweepSummary {
        self.run_collections_sweep_at(self.now())
    }

    pub fn run_collections_sweep_at(&self, now: DateTime<Utc>) -> SweepSummary {
        DelinquencySweep::new(self.ledger(), self.notifier.as_ref()).run(now)
    }
}

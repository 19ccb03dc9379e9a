//! Shared primitive types and the closed status vocabularies.
//!
//! Every status that the database stores as TEXT is a closed enum here,
//! so an unknown label read back from storage is a conversion error
//! rather than a silently accepted string.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identity of a registered customer (the borrower).
pub type UserId = i64;
pub type DocumentId = i64;
pub type LoanId = i64;
pub type InstallmentId = i64;
pub type EventId = i64;

/// Lowest and highest representable credit score.
pub const SCORE_MIN: i32 = 0;
pub const SCORE_MAX: i32 = 1000;

/// Clamp any intermediate score into the legal range.
pub fn clamp_score(score: i64) -> i32 {
    score.clamp(SCORE_MIN as i64, SCORE_MAX as i64) as i32
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownLabel {
    pub kind:  &'static str,
    pub label: String,
}

impl fmt::Display for UnknownLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} '{}'", self.kind, self.label)
    }
}

impl std::error::Error for UnknownLabel {}

/// Declares a closed enum with a stable SCREAMING_CASE wire label.
macro_rules! labelled_enum {
    (
        $(#[$meta:meta])*
        $name:ident : $kind:literal {
            $( $(#[$vmeta:meta])* $variant:ident => $label:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $label)] $variant ),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[ $( $name::$variant ),+ ];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $label ),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownLabel;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $label => Ok($name::$variant), )+
                    other => Err(UnknownLabel { kind: $kind, label: other.to_string() }),
                }
            }
        }
    };
}

labelled_enum! {
    /// Risk band derived from the score. Ordered from riskiest to safest.
    Tier: "tier" {
        Tier0 => "TIER_0",
        Tier1 => "TIER_1",
        Tier2 => "TIER_2",
        Tier3 => "TIER_3",
        Tier4 => "TIER_4",
    }
}

labelled_enum! {
    DocumentType: "document type" {
        MobileMoneyStatement => "MOBILE_MONEY_STATEMENT",
        BankStatement        => "BANK_STATEMENT",
        ProofOfAddress       => "PROOF_OF_ADDRESS",
        Payslip              => "PAYSLIP",
        EmploymentContract   => "EMPLOYMENT_CONTRACT",
        BusinessRegistration => "BUSINESS_REGISTRATION",
        Lc1Letter            => "LC1_LETTER",
        /// Catch-all category, subject to a cumulative cap.
        Other                => "OTHER",
    }
}

labelled_enum! {
    DocumentStatus: "document status" {
        Pending  => "PENDING",
        Approved => "APPROVED",
        Rejected => "REJECTED",
    }
}

labelled_enum! {
    LoanStatus: "loan status" {
        Pending   => "PENDING",
        Active    => "ACTIVE",
        Paid      => "PAID",
        Cancelled => "CANCELLED",
        Defaulted => "DEFAULTED",
    }
}

labelled_enum! {
    /// Collections view of an installment, maintained by the sweep and by
    /// payment recording.
    InstallmentStatus: "installment status" {
        Pending     => "PENDING",
        ReminderDue => "REMINDER_DUE",
        Overdue     => "OVERDUE",
        Paid        => "PAID",
    }
}

labelled_enum! {
    ScoreEventType: "score event type" {
        DocumentApproved    => "DOCUMENT_APPROVED",
        OnTimePayment       => "ON_TIME_PAYMENT",
        LatePayment         => "LATE_PAYMENT",
        SeverelyLatePayment => "SEVERELY_LATE_PAYMENT",
        EarlyLoanRepayment  => "EARLY_LOAN_REPAYMENT",
        LoanDefault         => "LOAN_DEFAULT",
        OverdueBatch        => "OVERDUE_BATCH",
        ManualAdjustment    => "MANUAL_ADJUSTMENT",
    }
}

impl LoanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Paid | Self::Cancelled | Self::Defaulted)
    }

    /// Legal forward moves. Terminal states accept nothing.
    pub fn can_transition_to(&self, next: LoanStatus) -> bool {
        matches!(
            (*self, next),
            (Self::Pending, Self::Active)
                | (Self::Pending, Self::Cancelled)
                | (Self::Active, Self::Paid)
                | (Self::Active, Self::Defaulted)
                | (Self::Active, Self::Cancelled)
        )
    }
}

impl DocumentStatus {
    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        matches!(
            (*self, next),
            (Self::Pending, Self::Approved) | (Self::Pending, Self::Rejected)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_parse_back() {
        for t in DocumentType::ALL {
            assert_eq!(t.as_str().parse::<DocumentType>().unwrap(), *t);
        }
        assert_eq!("TIER_3".parse::<Tier>().unwrap(), Tier::Tier3);
        assert!("TIER_9".parse::<Tier>().is_err());
    }

    #[test]
    fn serde_uses_wire_labels() {
        let json = serde_json::to_string(&ScoreEventType::OverdueBatch).unwrap();
        assert_eq!(json, "\"OVERDUE_BATCH\"");
    }

    #[test]
    fn tiers_are_ordered() {
        assert!(Tier::Tier0 < Tier::Tier1);
        assert!(Tier::Tier3 < Tier::Tier4);
    }

    #[test]
    fn defaulted_is_terminal() {
        assert!(LoanStatus::Active.can_transition_to(LoanStatus::Defaulted));
        assert!(!LoanStatus::Defaulted.can_transition_to(LoanStatus::Active));
        assert!(!LoanStatus::Paid.can_transition_to(LoanStatus::Defaulted));
        assert!(LoanStatus::Defaulted.is_terminal());
    }

    #[test]
    fn documents_are_reviewed_once() {
        assert!(DocumentStatus::Pending.can_transition_to(DocumentStatus::Approved));
        assert!(!DocumentStatus::Approved.can_transition_to(DocumentStatus::Approved));
        assert!(!DocumentStatus::Rejected.can_transition_to(DocumentStatus::Approved));
    }

    #[test]
    fn clamp_bounds_score() {
        assert_eq!(clamp_score(-40), 0);
        assert_eq!(clamp_score(1200), 1000);
        assert_eq!(clamp_score(370), 370);
    }
}

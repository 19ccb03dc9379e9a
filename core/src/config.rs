//! Static scoring and collections policy.
//!
//! Loaded once at startup and passed by value into the policy, the
//! classifiers and the sweep. Nothing here is mutated at runtime.

use crate::{
    error::{CreditError, CreditResult},
    types::{DocumentType, Tier, SCORE_MAX, SCORE_MIN},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TierBand {
    pub tier:      Tier,
    pub min_score: i32,
    pub max_score: i32,
    /// Maximum outstanding BNPL principal for this band.
    pub max_limit: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentScoringConfig {
    pub weights: HashMap<DocumentType, i32>,
    /// Ceiling on cumulative credit from OTHER-type approvals.
    pub max_other_points: i32,
}

impl DocumentScoringConfig {
    pub fn weight(&self, document_type: DocumentType) -> i32 {
        self.weights.get(&document_type).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepaymentConfig {
    pub on_time_points:        i32,
    pub max_on_time_points:    i32,
    pub streak_bonus:          i32,
    /// Number of consecutive on-time payments (including the current one)
    /// that earns the streak bonus.
    pub streak_threshold:      u32,
    /// Days past due absorbed without penalty.
    pub grace_days:            i64,
    /// Days past due beyond which a payment is severely late.
    pub severe_days:           i64,
    pub late_penalty:          i32,
    pub severe_late_penalty:   i32,
    pub default_penalty:       i32,
    pub early_bonus_small:     i32,
    pub early_bonus_medium:    i32,
    pub early_bonus_large:     i32,
    /// Loans totalling less than this earn the small bonus.
    pub early_threshold_small: Decimal,
    /// Loans totalling less than this (and at least the small threshold)
    /// earn the medium bonus; anything larger earns the large bonus.
    pub early_threshold_large: Decimal,
    pub usage_bonus_per_loan:  i32,
    pub max_usage_points:      i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionsConfig {
    /// Reminder window ahead of the due date.
    pub reminder_days:       i64,
    pub severe_overdue_days: i64,
    /// Points deducted for every newly overdue installment.
    pub overdue_penalty:     i32,
    /// Extra points deducted when the installment is already severely overdue.
    pub severe_overdue_penalty: i32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub hour:   u32,
    pub minute: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditConfig {
    pub initial_score: i32,
    pub tier_bands:    Vec<TierBand>,
    pub documents:     DocumentScoringConfig,
    pub repayment:     RepaymentConfig,
    pub collections:   CollectionsConfig,
    pub schedule:      ScheduleConfig,
}

impl CreditConfig {
    /// Load from `{data_dir}/credit_policy.json` and validate.
    /// In tests, use CreditConfig::standard().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/credit_policy.json");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: CreditConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    /// The production policy as shipped.
    pub fn standard() -> Self {
        let band = |tier, min_score, max_score, limit: i64| TierBand {
            tier,
            min_score,
            max_score,
            max_limit: Decimal::new(limit, 0),
        };

        let weights = [
            (DocumentType::MobileMoneyStatement, 40),
            (DocumentType::BankStatement, 70),
            (DocumentType::ProofOfAddress, 30),
            (DocumentType::Payslip, 60),
            (DocumentType::EmploymentContract, 50),
            (DocumentType::BusinessRegistration, 50),
            (DocumentType::Lc1Letter, 20),
            (DocumentType::Other, 10),
        ]
        .into();

        Self {
            initial_score: 300,
            tier_bands: vec![
                band(Tier::Tier0, 0, 199, 0),
                band(Tier::Tier1, 200, 399, 200_000),
                band(Tier::Tier2, 400, 599, 800_000),
                band(Tier::Tier3, 600, 799, 2_000_000),
                band(Tier::Tier4, 800, 1000, 5_000_000),
            ],
            documents: DocumentScoringConfig {
                weights,
                max_other_points: 30,
            },
            repayment: RepaymentConfig {
                on_time_points:        5,
                max_on_time_points:    100,
                streak_bonus:          10,
                streak_threshold:      3,
                grace_days:            3,
                severe_days:           30,
                late_penalty:          -10,
                severe_late_penalty:   -50,
                default_penalty:       -100,
                early_bonus_small:     15,
                early_bonus_medium:    25,
                early_bonus_large:     30,
                early_threshold_small: Decimal::new(200_000, 0),
                early_threshold_large: Decimal::new(2_000_000, 0),
                usage_bonus_per_loan:  5,
                max_usage_points:      50,
            },
            collections: CollectionsConfig {
                reminder_days:          3,
                severe_overdue_days:    30,
                overdue_penalty:        10,
                severe_overdue_penalty: 50,
            },
            schedule: ScheduleConfig { hour: 9, minute: 0 },
        }
    }

    /// Reject configurations the policy cannot evaluate totally.
    pub fn validate(&self) -> CreditResult<()> {
        let mut bands = self.tier_bands.clone();
        bands.sort_by_key(|b| b.min_score);

        let first = bands
            .first()
            .ok_or_else(|| CreditError::Config("no tier bands configured".into()))?;
        if first.min_score != SCORE_MIN {
            return Err(CreditError::Config(format!(
                "lowest band starts at {}, expected {SCORE_MIN}",
                first.min_score
            )));
        }

        let mut seen = HashSet::new();
        let mut expected_min = SCORE_MIN;
        for b in &bands {
            if !seen.insert(b.tier) {
                return Err(CreditError::Config(format!("tier {} configured twice", b.tier)));
            }
            if b.min_score != expected_min {
                return Err(CreditError::Config(format!(
                    "band {} starts at {}, expected {expected_min} (gap or overlap)",
                    b.tier, b.min_score
                )));
            }
            if b.max_score < b.min_score {
                return Err(CreditError::Config(format!("band {} is empty", b.tier)));
            }
            if b.max_limit.is_sign_negative() {
                return Err(CreditError::Config(format!("band {} has a negative limit", b.tier)));
            }
            expected_min = b.max_score + 1;
        }
        if expected_min != SCORE_MAX + 1 {
            return Err(CreditError::Config(format!(
                "bands end at {}, expected {SCORE_MAX}",
                expected_min - 1
            )));
        }

        if !(SCORE_MIN..=SCORE_MAX).contains(&self.initial_score) {
            return Err(CreditError::Config(format!(
                "initial score {} outside [{SCORE_MIN}, {SCORE_MAX}]",
                self.initial_score
            )));
        }

        let r = &self.repayment;
        if r.grace_days < 0 || r.grace_days >= r.severe_days {
            return Err(CreditError::Config(format!(
                "grace days {} must be in [0, severe days {})",
                r.grace_days, r.severe_days
            )));
        }
        if r.streak_threshold < 1 {
            return Err(CreditError::Config("streak threshold must be at least 1".into()));
        }
        for (name, penalty) in [
            ("late_penalty", r.late_penalty),
            ("severe_late_penalty", r.severe_late_penalty),
            ("default_penalty", r.default_penalty),
        ] {
            if penalty > 0 {
                return Err(CreditError::Config(format!("{name} must not be positive")));
            }
        }
        if r.early_threshold_small > r.early_threshold_large {
            return Err(CreditError::Config(
                "early repayment thresholds are out of order".into(),
            ));
        }

        let c = &self.collections;
        if c.reminder_days < 0 || c.severe_overdue_days < 1 {
            return Err(CreditError::Config("collections windows must be positive".into()));
        }
        if c.overdue_penalty < 0 || c.severe_overdue_penalty < 0 {
            return Err(CreditError::Config(
                "collections penalties are magnitudes and must not be negative".into(),
            ));
        }

        if self.schedule.hour > 23 || self.schedule.minute > 59 {
            return Err(CreditError::Config(format!(
                "invalid schedule {:02}:{:02}",
                self.schedule.hour, self.schedule.minute
            )));
        }
        Ok(())
    }
}

impl Default for CreditConfig {
    fn default() -> Self {
        Self::standard()
    }
}

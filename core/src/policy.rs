//! Tier and limit policy: score -> tier -> spending limit.
//!
//! Pure lookups over a validated band table. Construction is the only
//! fallible step; once built, both lookups are total.

use crate::{
    config::{CreditConfig, TierBand},
    error::CreditResult,
    types::{clamp_score, Tier},
};
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct TierPolicy {
    /// Sorted by `min_score`, contiguous over 0..=1000.
    bands: Vec<TierBand>,
}

impl TierPolicy {
    pub fn new(config: &CreditConfig) -> CreditResult<Self> {
        config.validate()?;
        let mut bands = config.tier_bands.clone();
        bands.sort_by_key(|b| b.min_score);
        Ok(Self { bands })
    }

    pub fn compute_tier(&self, score: i32) -> Tier {
        let score = clamp_score(score as i64);
        // Bands start at 0 and are contiguous, so at least one band
        // always satisfies min_score <= score.
        let idx = self.bands.partition_point(|b| b.min_score <= score);
        self.bands[idx.saturating_sub(1)].tier
    }

    pub fn compute_limit(&self, tier: Tier) -> Decimal {
        self.bands
            .iter()
            .find(|b| b.tier == tier)
            .map(|b| b.max_limit)
            .unwrap_or(Decimal::ZERO)
    }

    /// Tier and limit for a score in one call.
    pub fn derive(&self, score: i32) -> (Tier, Decimal) {
        let tier = self.compute_tier(score);
        (tier, self.compute_limit(tier))
    }

    pub fn bands(&self) -> &[TierBand] {
        &self.bands
    }
}

//! Fee tiers and conversion of gas-station estimates into transaction fee parameters

use crate::error::{DeployerError, DeployerResult};

use chrono::{DateTime, Utc};
use ethers::types::U256;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

const WEI_PER_GWEI: u64 = 1_000_000_000;

/// Named bucket of suggested fee parameters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FeeTier {
    Fast,
    #[default]
    Standard,
    SafeLow,
}

impl FeeTier {
    pub const ALL: [FeeTier; 3] = [FeeTier::Fast, FeeTier::Standard, FeeTier::SafeLow];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeeTier::Fast => "fast",
            FeeTier::Standard => "standard",
            FeeTier::SafeLow => "safeLow",
        }
    }

    /// Parse a tier name, treating anything unrecognised as `standard`
    pub fn from_name_lossy(name: &str) -> FeeTier {
        name.parse().unwrap_or_else(|_| {
            warn!("Unknown fee tier {:?}, using standard", name);
            FeeTier::Standard
        })
    }
}

impl fmt::Display for FeeTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeeTier {
    type Err = DeployerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fast" => Ok(FeeTier::Fast),
            "standard" => Ok(FeeTier::Standard),
            "safeLow" | "safe_low" | "safelow" => Ok(FeeTier::SafeLow),
            other => Err(DeployerError::Config(format!("Unknown fee tier: {}", other))),
        }
    }
}

/// Suggested fees for one tier, in gwei
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierFees {
    pub max_fee: Decimal,
    pub max_priority_fee: Decimal,
}

impl TierFees {
    pub fn new(max_fee: Decimal, max_priority_fee: Decimal) -> Self {
        Self {
            max_fee,
            max_priority_fee,
        }
    }
}

/// One complete fee-oracle reading. Replaced wholesale on every refresh.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeSnapshot {
    pub fast: Option<TierFees>,
    pub standard: Option<TierFees>,
    pub safe_low: Option<TierFees>,
    /// Base fee estimate reported alongside the tiers, in gwei
    pub estimated_base_fee: Option<Decimal>,
    /// Block the estimate was computed at
    pub block_number: Option<u64>,
    pub fetched_at: DateTime<Utc>,
}

impl FeeSnapshot {
    pub fn new(
        fast: Option<TierFees>,
        standard: Option<TierFees>,
        safe_low: Option<TierFees>,
    ) -> Self {
        Self {
            fast,
            standard,
            safe_low,
            estimated_base_fee: None,
            block_number: None,
            fetched_at: Utc::now(),
        }
    }

    pub fn tier(&self, tier: FeeTier) -> Option<&TierFees> {
        match tier {
            FeeTier::Fast => self.fast.as_ref(),
            FeeTier::Standard => self.standard.as_ref(),
            FeeTier::SafeLow => self.safe_low.as_ref(),
        }
    }

    pub fn is_complete(&self) -> bool {
        FeeTier::ALL.iter().all(|t| self.tier(*t).is_some())
    }
}

/// Concrete EIP-1559 fee fields for a transaction, in wei
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeParams {
    /// Tier the values were actually taken from (after fallback)
    pub tier: FeeTier,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

/// Map a tier choice onto concrete fee parameters.
///
/// An absent tier falls back to `standard`; only a snapshot without a
/// `standard` entry fails.
pub fn select(tier: FeeTier, snapshot: &FeeSnapshot) -> DeployerResult<FeeParams> {
    let (used, fees) = match snapshot.tier(tier) {
        Some(fees) => (tier, fees),
        None => {
            let fees = snapshot.standard.as_ref().ok_or_else(|| {
                DeployerError::FeeDataUnavailable(format!(
                    "no {} or standard tier in fee snapshot",
                    tier
                ))
            })?;
            debug!("Tier {} missing from snapshot, falling back to standard", tier);
            (FeeTier::Standard, fees)
        }
    };

    Ok(FeeParams {
        tier: used,
        max_fee_per_gas: gwei_to_wei(fees.max_fee)?,
        max_priority_fee_per_gas: gwei_to_wei(fees.max_priority_fee)?,
    })
}

/// Convert a gwei decimal to wei. Sub-wei fractions are truncated; negative
/// values are out of range.
pub fn gwei_to_wei(gwei: Decimal) -> DeployerResult<U256> {
    let wei = gwei
        .checked_mul(Decimal::from(WEI_PER_GWEI))
        .and_then(|w| w.trunc().to_u128())
        .ok_or_else(|| {
            DeployerError::FeeDataUnavailable(format!("fee value {} gwei out of range", gwei))
        })?;

    Ok(U256::from(wei))
}

//! Receipts and the cost/duration figures derived from them
//!
//! All fee arithmetic stays in integer wei; conversion to gwei or the native
//! unit happens only when formatting for display.

use crate::error::{DeployerError, DeployerResult};

use chrono::{DateTime, Utc};
use ethers::types::{Address, TransactionReceipt as RpcReceipt, H256, U256};
use ethers::utils::{format_ether, format_units};
use rust_decimal::Decimal;
use serde::Serialize;

/// Finalized receipt of a deployment or contract call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: H256,
    /// Present only for contract creations
    pub contract_address: Option<Address>,
    pub block_number: Option<u64>,
    pub gas_used: U256,
    /// Effective gas price paid, in wei
    pub gas_price: U256,
    /// `gas_used * gas_price`, in wei
    pub total_fee: U256,
}

impl TransactionReceipt {
    pub fn new(
        transaction_hash: H256,
        contract_address: Option<Address>,
        block_number: Option<u64>,
        gas_used: U256,
        gas_price: U256,
    ) -> Self {
        Self {
            transaction_hash,
            contract_address,
            block_number,
            gas_used,
            gas_price,
            total_fee: total_fee(gas_used, gas_price),
        }
    }

    pub fn from_rpc(receipt: &RpcReceipt) -> DeployerResult<Self> {
        let gas_used = receipt.gas_used.ok_or_else(|| {
            DeployerError::Rpc(format!(
                "receipt for {:?} has no gasUsed",
                receipt.transaction_hash
            ))
        })?;
        let gas_price = receipt.effective_gas_price.ok_or_else(|| {
            DeployerError::Rpc(format!(
                "receipt for {:?} has no effectiveGasPrice",
                receipt.transaction_hash
            ))
        })?;

        Ok(Self::new(
            receipt.transaction_hash,
            receipt.contract_address,
            receipt.block_number.map(|b| b.as_u64()),
            gas_used,
            gas_price,
        ))
    }
}

/// Exact fee in wei
pub fn total_fee(gas_used: U256, gas_price: U256) -> U256 {
    gas_used.saturating_mul(gas_price)
}

/// Durable record of one completed deploy or mint
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult {
    pub receipt: TransactionReceipt,
    pub duration_seconds: Decimal,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl OperationResult {
    pub fn gas_price_gwei(&self) -> String {
        format_units(self.receipt.gas_price, "gwei")
            .unwrap_or_else(|_| self.receipt.gas_price.to_string())
    }

    pub fn total_fee_native(&self) -> String {
        format_ether(self.receipt.total_fee)
    }

    /// Duration rounded to two decimals, e.g. `"12.35"`
    pub fn duration_display(&self) -> String {
        format!("{:.2}", self.duration_seconds.round_dp(2))
    }
}

/// Combine a receipt with the wall-clock span of the action that produced it.
///
/// `ended_at` must not precede `started_at`; if it does the duration is zero.
pub fn derive(
    receipt: TransactionReceipt,
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
) -> OperationResult {
    let micros = (ended_at - started_at)
        .num_microseconds()
        .unwrap_or(i64::MAX)
        .max(0);

    OperationResult {
        receipt,
        duration_seconds: Decimal::new(micros, 6).normalize(),
        started_at,
        ended_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::str::FromStr;

    fn receipt(gas_used: U256, gas_price: U256) -> TransactionReceipt {
        TransactionReceipt::new(
            H256::repeat_byte(0xab),
            Some(Address::repeat_byte(0xcd)),
            Some(42),
            gas_used,
            gas_price,
        )
    }

    #[test]
    fn test_transfer_fee_scenario() {
        let r = receipt(U256::from(21_000), U256::from(30_000_000_000u64));
        let start = Utc::now();
        let result = derive(r, start, start + Duration::milliseconds(1500));

        assert_eq!(
            result.receipt.total_fee,
            U256::from(630_000_000_000_000u64)
        );
        assert_eq!(result.duration_seconds, Decimal::from_str("1.5").unwrap());
        assert_eq!(result.gas_price_gwei(), "30.000000000");
        assert!(result.total_fee_native().starts_with("0.00063"));
        assert_eq!(result.duration_display(), "1.50");
    }

    #[test]
    fn test_total_fee_beyond_f64_precision() {
        // 2^53 + 1 is not representable as an f64
        let gas_used = U256::from(9_007_199_254_740_993u64);
        let gas_price = U256::from(3u64);
        let r = receipt(gas_used, gas_price);
        assert_eq!(r.total_fee, U256::from(27_021_597_764_222_979u64));

        let r = receipt(U256::from(1u64 << 40), U256::from(1u64 << 30));
        assert_eq!(r.total_fee, U256::from(1u128 << 70));
    }

    #[test]
    fn test_duration_is_monotonic() {
        let start = Utc::now();
        let r = receipt(U256::from(21_000), U256::from(1));
        let mut previous = None;
        for ms in [0i64, 1, 2, 999, 1000, 60_000] {
            let d = derive(r.clone(), start, start + Duration::milliseconds(ms)).duration_seconds;
            if let Some(p) = previous {
                assert!(d > p);
            }
            previous = Some(d);
        }
        assert_eq!(previous, Some(Decimal::from(60)));
    }

    #[test]
    fn test_reversed_clock_clamps_to_zero() {
        let start = Utc::now();
        let r = receipt(U256::from(21_000), U256::from(1));
        let result = derive(r, start, start - Duration::seconds(5));
        assert_eq!(result.duration_seconds, Decimal::ZERO);
    }

    #[test]
    fn test_from_rpc_requires_gas_fields() {
        let rpc = RpcReceipt {
            transaction_hash: H256::repeat_byte(0x01),
            gas_used: Some(U256::from(50_000)),
            ..Default::default()
        };
        assert!(TransactionReceipt::from_rpc(&rpc).is_err());

        let rpc = RpcReceipt {
            effective_gas_price: Some(U256::from(2)),
            ..rpc
        };
        let r = TransactionReceipt::from_rpc(&rpc).unwrap();
        assert_eq!(r.total_fee, U256::from(100_000));
        assert_eq!(r.contract_address, None);
    }
}

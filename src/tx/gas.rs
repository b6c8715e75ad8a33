//! Gas limit buffering and worst-case cost

use crate::fees::FeeParams;

use ethers::types::U256;
use tracing::debug;

/// Pads node gas estimates so small state changes between estimate and
/// inclusion do not run the transaction out of gas
#[derive(Debug, Clone, Copy)]
pub struct GasEstimator {
    /// Buffer percentage for gas limit (e.g., 20 = 20% buffer)
    gas_limit_buffer_percent: u64,
}

impl GasEstimator {
    pub fn new(gas_limit_buffer_percent: u64) -> Self {
        Self {
            gas_limit_buffer_percent,
        }
    }

    /// Gas limit to sign with for a given `eth_estimateGas` result
    pub fn buffered_limit(&self, estimate: U256) -> U256 {
        let buffer = estimate.saturating_mul(U256::from(self.gas_limit_buffer_percent)) / 100;
        let limit = estimate.saturating_add(buffer);
        debug!("Gas estimate {} buffered to {}", estimate, limit);
        limit
    }

    /// Most the transaction can cost: every unit of gas at the fee cap
    pub fn max_cost(gas_limit: U256, fees: &FeeParams) -> U256 {
        gas_limit.saturating_mul(fees.max_fee_per_gas)
    }
}

impl Default for GasEstimator {
    fn default() -> Self {
        Self::new(20)
    }
}

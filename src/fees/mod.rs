//! Fee oracle polling and fee tier selection

pub mod oracle;
pub mod tier;

pub use oracle::{FeeOracleClient, FeeSource, GasStationSource, PollingHandle};
pub use tier::{gwei_to_wei, select, FeeParams, FeeSnapshot, FeeTier, TierFees};

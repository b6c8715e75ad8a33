//! Error types for the token deployer

use thiserror::Error;

/// Main error type for the deployer
#[derive(Error, Debug)]
pub enum DeployerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Fee data unavailable: {0}")]
    FeeDataUnavailable(String),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("A {action} is already in flight")]
    AlreadyInFlight { action: String },

    #[error("Insufficient funds: have {have} wei, need {need} wei")]
    InsufficientFunds { have: String, need: String },

    #[error("Nonce conflict: {0}")]
    NonceConflict(String),

    #[error("Fee below network minimum: {0}")]
    Underpriced(String),

    #[error("Submission rejected: {0}")]
    Submission(String),

    #[error("Transaction {tx_hash} {}: {message}", confirmation_outcome(.reverted))]
    Confirmation {
        tx_hash: String,
        reverted: bool,
        message: String,
    },

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeployerError {
    /// Check if error is retryable by the caller without side effects
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DeployerError::Network(_) | DeployerError::Rpc(_) | DeployerError::Timeout { .. }
        )
    }

    /// True for a transaction that was mined but reverted on-chain
    pub fn is_reverted(&self) -> bool {
        matches!(self, DeployerError::Confirmation { reverted: true, .. })
    }

    /// Short label used for metrics and API responses
    pub fn category(&self) -> &'static str {
        match self {
            DeployerError::Config(_) => "configuration",
            DeployerError::Network(_) => "network",
            DeployerError::FeeDataUnavailable(_) => "fee_data_unavailable",
            DeployerError::Precondition(_) => "precondition",
            DeployerError::AlreadyInFlight { .. } => "already_in_flight",
            DeployerError::InsufficientFunds { .. }
            | DeployerError::NonceConflict(_)
            | DeployerError::Underpriced(_)
            | DeployerError::Submission(_) => "submission",
            DeployerError::Confirmation { .. } => "confirmation",
            DeployerError::Rpc(_) => "rpc",
            DeployerError::Timeout { .. } => "timeout",
            DeployerError::Internal(_) => "internal",
        }
    }
}

fn confirmation_outcome(reverted: &bool) -> &'static str {
    if *reverted {
        "reverted"
    } else {
        "was not confirmed"
    }
}

/// Result type for deployer operations
pub type DeployerResult<T> = Result<T, DeployerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmation_message_distinguishes_revert() {
        let reverted = DeployerError::Confirmation {
            tx_hash: "0xabc".to_string(),
            reverted: true,
            message: "status 0".to_string(),
        };
        let dropped = DeployerError::Confirmation {
            tx_hash: "0xabc".to_string(),
            reverted: false,
            message: "dropped from mempool".to_string(),
        };

        assert_eq!(reverted.to_string(), "Transaction 0xabc reverted: status 0");
        assert_eq!(
            dropped.to_string(),
            "Transaction 0xabc was not confirmed: dropped from mempool"
        );
        assert!(reverted.is_reverted());
        assert!(!dropped.is_reverted());
    }

    #[test]
    fn submission_variants_share_category() {
        assert_eq!(DeployerError::NonceConflict("x".into()).category(), "submission");
        assert_eq!(DeployerError::Underpriced("x".into()).category(), "submission");
        assert!(DeployerError::Network("down".into()).is_retryable());
        assert!(!DeployerError::Submission("rejected".into()).is_retryable());
    }
}

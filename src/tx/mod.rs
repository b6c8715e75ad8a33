//! Transaction submission: signing credential, nonce leases, gas limits and broadcast

mod credential;
mod gas;
mod nonce;
mod sender;

pub use credential::SigningCredential;
pub use gas::GasEstimator;
pub use nonce::{NonceLease, NonceManager};
pub use sender::{classify_rejection, TransactionSubmitter};

use chrono::{DateTime, Utc};
use ethers::types::{H256, U256};
use serde::Serialize;

/// What a submitted transaction does
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum SubmissionKind {
    /// Contract creation
    Deployment,
    /// Call of a function on a deployed contract
    Call { function: String },
}

impl SubmissionKind {
    pub fn label(&self) -> &str {
        match self {
            SubmissionKind::Deployment => "deployment",
            SubmissionKind::Call { function } => function,
        }
    }
}

/// A broadcast transaction awaiting confirmation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTransaction {
    pub hash: H256,
    pub nonce: U256,
    pub kind: SubmissionKind,
    pub submitted_at: DateTime<Utc>,
}

//! Observable session state

use crate::error::DeployerError;
use crate::fees::{FeeSnapshot, FeeTier};
use crate::outcome::OperationResult;

use chrono::{DateTime, Utc};
use ethers::types::Address;
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// The two user-triggered actions, each with its own slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Deploy,
    Mint,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Deploy => "deploy",
            ActionKind::Mint => "mint",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error recorded in a slot when its action fails
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionFailure {
    pub message: String,
    pub category: String,
    pub reverted: bool,
    pub failed_at: DateTime<Utc>,
}

impl ActionFailure {
    pub fn from_error(error: &DeployerError) -> Self {
        Self {
            message: error.to_string(),
            category: error.category().to_string(),
            reverted: error.is_reverted(),
            failed_at: Utc::now(),
        }
    }
}

/// `Idle -> InFlight -> {Succeeded, Failed}`; a new attempt goes back to
/// `InFlight` and drops the previous result or error
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum SlotState {
    #[default]
    Idle,
    InFlight {
        #[serde(rename = "startedAt")]
        started_at: DateTime<Utc>,
    },
    Succeeded {
        result: OperationResult,
    },
    Failed {
        error: ActionFailure,
    },
}

impl SlotState {
    pub fn is_in_flight(&self) -> bool {
        matches!(self, SlotState::InFlight { .. })
    }

    pub fn result(&self) -> Option<&OperationResult> {
        match self {
            SlotState::Succeeded { result } => Some(result),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&ActionFailure> {
        match self {
            SlotState::Failed { error } => Some(error),
            _ => None,
        }
    }
}

/// Everything the presentation layer renders
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub session_id: Uuid,
    /// Latest successful fee reading
    pub fees: Option<FeeSnapshot>,
    /// Most recent fee poll failure, cleared by the next success
    pub fee_error: Option<String>,
    pub tier: FeeTier,
    pub deploy: SlotState,
    pub mint: SlotState,
}

impl SessionState {
    pub fn new(tier: FeeTier) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            fees: None,
            fee_error: None,
            tier,
            deploy: SlotState::Idle,
            mint: SlotState::Idle,
        }
    }

    pub fn slot(&self, kind: ActionKind) -> &SlotState {
        match kind {
            ActionKind::Deploy => &self.deploy,
            ActionKind::Mint => &self.mint,
        }
    }

    pub fn slot_mut(&mut self, kind: ActionKind) -> &mut SlotState {
        match kind {
            ActionKind::Deploy => &mut self.deploy,
            ActionKind::Mint => &mut self.mint,
        }
    }

    /// Address of the successfully deployed token contract
    pub fn contract_address(&self) -> Option<Address> {
        self.deploy
            .result()
            .and_then(|r| r.receipt.contract_address)
    }

    /// The more recent of the two slot errors
    pub fn last_error(&self) -> Option<&ActionFailure> {
        match (self.deploy.failure(), self.mint.failure()) {
            (Some(d), Some(m)) => Some(if m.failed_at >= d.failed_at { m } else { d }),
            (d, m) => d.or(m),
        }
    }
}

//! Orchestration engine
//!
//! Deploy and mint run through the same procedure: check preconditions and
//! capture fee parameters synchronously, then submit, wait for confirmation
//! and record the outcome on a spawned task. State changes are published on a
//! `watch` channel so the presentation layer only ever sees whole snapshots.

use super::state::{ActionFailure, ActionKind, SessionState, SlotState};
use crate::artifact::ContractArtifact;
use crate::chain::ConfirmationTracker;
use crate::config::DeployerConfig;
use crate::error::{DeployerError, DeployerResult};
use crate::fees::{self, FeeOracleClient, FeeParams, FeeSnapshot, FeeTier, PollingHandle};
use crate::metrics;
use crate::outcome::{self, OperationResult};
use crate::tx::TransactionSubmitter;

use chrono::{DateTime, Utc};
use ethers::abi::Token;
use ethers::types::{Address, U256};
use ethers::utils::format_units;
use rust_decimal::prelude::ToPrimitive;
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Tokens to mint and who receives them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintRequest {
    /// Defaults to the deployer account
    pub recipient: Option<Address>,
    /// Amount in the token's smallest unit
    pub amount: U256,
}

/// Transaction an action will submit
enum Submission {
    Deployment {
        owner: Address,
    },
    Call {
        contract: Address,
        function: String,
        args: Vec<Token>,
    },
}

/// Everything an action needs, fixed when it starts
struct ActionPlan {
    kind: ActionKind,
    fees: FeeParams,
    started_at: DateTime<Utc>,
    submission: Submission,
}

/// One user session: fee tracking plus the deploy and mint slots
pub struct OrchestrationSession {
    oracle: Arc<FeeOracleClient>,
    submitter: TransactionSubmitter,
    tracker: ConfirmationTracker,
    artifact: Option<ContractArtifact>,
    config: DeployerConfig,
    state: watch::Sender<SessionState>,
}

impl OrchestrationSession {
    pub fn new(
        oracle: Arc<FeeOracleClient>,
        submitter: TransactionSubmitter,
        tracker: ConfirmationTracker,
        artifact: Option<ContractArtifact>,
        config: DeployerConfig,
    ) -> Self {
        let initial = SessionState::new(config.default_tier());
        info!(
            "Session {} created (tier {}, artifact {})",
            initial.session_id,
            initial.tier,
            if artifact.is_some() { "loaded" } else { "missing" }
        );

        let (state, _) = watch::channel(initial);

        Self {
            oracle,
            submitter,
            tracker,
            artifact,
            config,
            state,
        }
    }

    /// Current state snapshot
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state change
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Select the tier used by subsequent actions. Unknown names select `standard`.
    pub fn change_tier(&self, name: &str) -> FeeTier {
        let tier = FeeTier::from_name_lossy(name);
        self.state.send_if_modified(|state| {
            if state.tier == tier {
                return false;
            }
            state.tier = tier;
            true
        });
        info!("Fee tier set to {}", tier);
        tier
    }

    /// Poll fees on the configured interval, publishing every tick into the session
    pub fn start_fee_polling(self: &Arc<Self>) -> PollingHandle {
        let session: Weak<Self> = Arc::downgrade(self);
        Arc::clone(&self.oracle).start_polling(self.config.fee_poll_interval(), move |result| {
            if let Some(session) = session.upgrade() {
                session.apply_fee_tick(result);
            }
        })
    }

    /// Record one fee poll outcome. Failures never touch the action slots.
    pub fn apply_fee_tick(&self, result: DeployerResult<FeeSnapshot>) {
        self.state.send_modify(|state| match result {
            Ok(snapshot) => {
                state.fees = Some(snapshot);
                state.fee_error = None;
            }
            Err(e) => {
                state.fee_error = Some(e.to_string());
            }
        });
    }

    /// Start deploying the token contract, owned by the deployer account
    pub fn start_deploy(
        self: &Arc<Self>,
    ) -> DeployerResult<JoinHandle<DeployerResult<OperationResult>>> {
        let owner = self.submitter.owner_address();
        let plan = self.begin(ActionKind::Deploy, |_| {
            Ok(Submission::Deployment { owner })
        })?;
        Ok(self.spawn(plan))
    }

    /// Start minting against the deployed contract
    pub fn start_mint(
        self: &Arc<Self>,
        request: MintRequest,
    ) -> DeployerResult<JoinHandle<DeployerResult<OperationResult>>> {
        let recipient = request
            .recipient
            .unwrap_or_else(|| self.submitter.owner_address());
        let function = self.config.mint_function.clone();

        let plan = self.begin(ActionKind::Mint, |state| {
            let contract = state.contract_address().ok_or_else(|| {
                DeployerError::Precondition(
                    "Deploy the token contract before minting".to_string(),
                )
            })?;
            Ok(Submission::Call {
                contract,
                function,
                args: vec![Token::Address(recipient), Token::Uint(request.amount)],
            })
        })?;
        Ok(self.spawn(plan))
    }

    /// Move the slot to `InFlight`, or to `Failed` when a precondition does
    /// not hold. Nothing here touches the network.
    fn begin<F>(&self, kind: ActionKind, submission: F) -> DeployerResult<ActionPlan>
    where
        F: FnOnce(&SessionState) -> DeployerResult<Submission>,
    {
        let mut outcome = None;

        self.state.send_if_modified(|state| {
            if state.slot(kind).is_in_flight() {
                outcome = Some(Err(DeployerError::AlreadyInFlight {
                    action: kind.to_string(),
                }));
                return false;
            }

            match self.prepare(kind, state, submission) {
                Ok(plan) => {
                    *state.slot_mut(kind) = SlotState::InFlight {
                        started_at: plan.started_at,
                    };
                    outcome = Some(Ok(plan));
                }
                Err(e) => {
                    *state.slot_mut(kind) = SlotState::Failed {
                        error: ActionFailure::from_error(&e),
                    };
                    outcome = Some(Err(e));
                }
            }
            true
        });

        let outcome = outcome.unwrap_or_else(|| {
            Err(DeployerError::Internal(format!("{} was not started", kind)))
        });
        match &outcome {
            Ok(plan) => {
                if let Some(gwei) = to_gwei(plan.fees.max_fee_per_gas) {
                    metrics::record_selected_max_fee(gwei);
                }
                info!("Starting {} with {} fees", kind, plan.fees.tier);
            }
            Err(e @ DeployerError::AlreadyInFlight { .. }) => {
                debug!("Rejected {}: {}", kind, e);
            }
            Err(e) => {
                warn!("Cannot start {}: {}", kind, e);
                metrics::record_action_failed(kind.as_str(), e.category());
            }
        }
        outcome
    }

    fn prepare<F>(
        &self,
        kind: ActionKind,
        state: &SessionState,
        submission: F,
    ) -> DeployerResult<ActionPlan>
    where
        F: FnOnce(&SessionState) -> DeployerResult<Submission>,
    {
        if self.artifact.is_none() {
            return Err(DeployerError::Precondition(
                "Contract artifact is not loaded".to_string(),
            ));
        }
        let submission = submission(state)?;

        let snapshot = state.fees.as_ref().ok_or_else(|| {
            DeployerError::FeeDataUnavailable("No fee data has been fetched yet".to_string())
        })?;
        let fees = fees::select(state.tier, snapshot)?;

        Ok(ActionPlan {
            kind,
            fees,
            started_at: Utc::now(),
            submission,
        })
    }

    fn spawn(self: &Arc<Self>, plan: ActionPlan) -> JoinHandle<DeployerResult<OperationResult>> {
        let mut guard = SlotGuard {
            session: Arc::clone(self),
            kind: plan.kind,
            armed: true,
        };
        tokio::spawn(async move {
            let outcome = guard.session.execute(&plan).await;
            guard.armed = false;
            guard.session.finish(plan.kind, &outcome);
            outcome
        })
    }

    /// Submit, wait for confirmation and derive the result
    async fn execute(&self, plan: &ActionPlan) -> DeployerResult<OperationResult> {
        let artifact = self.artifact.as_ref();
        let pending = match &plan.submission {
            Submission::Deployment { owner } => {
                self.submitter
                    .submit_deployment(artifact, *owner, &plan.fees)
                    .await?
            }
            Submission::Call {
                contract,
                function,
                args,
            } => {
                self.submitter
                    .submit_call(artifact, Some(*contract), function, args, &plan.fees)
                    .await?
            }
        };
        metrics::record_tx_submitted(plan.kind.as_str());

        let receipt = match self.config.confirmation_timeout() {
            Some(limit) => timeout(limit, self.tracker.await_receipt(&pending))
                .await
                .map_err(|_| DeployerError::Timeout {
                    operation: format!("confirmation of {:?}", pending.hash),
                })??,
            None => self.tracker.await_receipt(&pending).await?,
        };

        Ok(outcome::derive(receipt, plan.started_at, Utc::now()))
    }

    fn finish(&self, kind: ActionKind, outcome: &DeployerResult<OperationResult>) {
        let slot = match outcome {
            Ok(result) => {
                info!(
                    "{} confirmed: {:?}, gas used {}, fee {} (took {}s)",
                    kind,
                    result.receipt.transaction_hash,
                    result.receipt.gas_used,
                    result.total_fee_native(),
                    result.duration_display()
                );
                metrics::record_tx_confirmed(
                    kind.as_str(),
                    result.duration_seconds.to_f64().unwrap_or_default(),
                );
                SlotState::Succeeded {
                    result: result.clone(),
                }
            }
            Err(e) => {
                warn!("{} failed: {}", kind, e);
                metrics::record_action_failed(kind.as_str(), e.category());
                SlotState::Failed {
                    error: ActionFailure::from_error(e),
                }
            }
        };

        self.state.send_modify(|state| *state.slot_mut(kind) = slot);
    }
}

/// Fails the slot if the action task unwinds or is aborted before recording
/// an outcome
struct SlotGuard {
    session: Arc<OrchestrationSession>,
    kind: ActionKind,
    armed: bool,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if self.armed {
            let error = DeployerError::Internal(format!("{} task ended unexpectedly", self.kind));
            self.session.finish(self.kind, &Err(error));
        }
    }
}

fn to_gwei(wei: U256) -> Option<f64> {
    format_units(wei, "gwei").ok()?.parse().ok()
}

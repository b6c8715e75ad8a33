//! Transaction submitter: builds, signs and broadcasts EIP-1559 transactions

use super::credential::SigningCredential;
use super::gas::GasEstimator;
use super::nonce::NonceManager;
use super::{PendingTransaction, SubmissionKind};
use crate::artifact::ContractArtifact;
use crate::chain::ChainClient;
use crate::error::{DeployerError, DeployerResult};
use crate::fees::FeeParams;

use chrono::Utc;
use ethers::abi::Token;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Eip1559TransactionRequest, U256};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Submits deployments and contract calls from the configured credential.
///
/// Every successful submission consumes exactly one nonce. A failure before
/// the node accepts the transaction leaves the nonce unused.
pub struct TransactionSubmitter {
    /// Chain client
    client: Arc<dyn ChainClient>,
    /// Signing key
    credential: Arc<SigningCredential>,
    /// Nonce manager
    nonce_manager: Arc<NonceManager>,
    /// Gas estimator
    gas_estimator: GasEstimator,
}

impl TransactionSubmitter {
    pub fn new(
        client: Arc<dyn ChainClient>,
        credential: Arc<SigningCredential>,
        nonce_manager: Arc<NonceManager>,
        gas_estimator: GasEstimator,
    ) -> Self {
        info!(
            "Transaction submitter initialized for {:?} on chain {}",
            credential.address(),
            client.chain_id()
        );

        Self {
            client,
            credential,
            nonce_manager,
            gas_estimator,
        }
    }

    /// Address deployments are owned by and mints default to
    pub fn owner_address(&self) -> Address {
        self.credential.address()
    }

    /// Create the token contract with `owner` as its constructor argument
    pub async fn submit_deployment(
        &self,
        artifact: Option<&ContractArtifact>,
        owner: Address,
        fees: &FeeParams,
    ) -> DeployerResult<PendingTransaction> {
        let artifact = artifact.ok_or_else(|| {
            DeployerError::Precondition("Contract artifact is not loaded".to_string())
        })?;
        let data = artifact.deployment_data(owner)?;

        self.submit(None, data, fees, SubmissionKind::Deployment)
            .await
    }

    /// Call `function(args...)` on a deployed contract
    pub async fn submit_call(
        &self,
        artifact: Option<&ContractArtifact>,
        contract: Option<Address>,
        function: &str,
        args: &[Token],
        fees: &FeeParams,
    ) -> DeployerResult<PendingTransaction> {
        let contract = contract.ok_or_else(|| {
            DeployerError::Precondition("No deployed contract address is known".to_string())
        })?;
        let artifact = artifact.ok_or_else(|| {
            DeployerError::Precondition("Contract artifact is not loaded".to_string())
        })?;
        let data = artifact.encode_call(function, args)?;

        self.submit(
            Some(contract),
            data,
            fees,
            SubmissionKind::Call {
                function: function.to_string(),
            },
        )
        .await
    }

    async fn submit(
        &self,
        to: Option<Address>,
        data: Bytes,
        fees: &FeeParams,
        kind: SubmissionKind,
    ) -> DeployerResult<PendingTransaction> {
        let from = self.credential.address();
        let chain_id = self.client.chain_id();

        // Held until the node accepts the transaction
        let lease = self
            .nonce_manager
            .reserve(from, self.client.as_ref())
            .await?;
        let nonce = lease.nonce();

        let mut tx = build_tx(from, to, data, nonce, fees, chain_id);

        let estimate = self
            .client
            .estimate_gas(&tx)
            .await
            .map_err(classify_rejection)?;
        let gas_limit = self.gas_estimator.buffered_limit(estimate);
        tx.set_gas(gas_limit);

        let need = GasEstimator::max_cost(gas_limit, fees);
        let have = self.client.balance(from).await?;
        if have < need {
            warn!(
                "Balance {} wei below worst-case cost {} wei for {}",
                have,
                need,
                kind.label()
            );
            return Err(DeployerError::InsufficientFunds {
                have: have.to_string(),
                need: need.to_string(),
            });
        }

        let raw = self.credential.sign(&tx, chain_id).await?;
        let hash = self
            .client
            .send_raw_transaction(raw)
            .await
            .map_err(classify_rejection)?;

        lease.commit();

        info!(
            "Submitted {} transaction {:?} (nonce {}, gas limit {}, tier {})",
            kind.label(),
            hash,
            nonce,
            gas_limit,
            fees.tier
        );

        Ok(PendingTransaction {
            hash,
            nonce,
            kind,
            submitted_at: Utc::now(),
        })
    }
}

fn build_tx(
    from: Address,
    to: Option<Address>,
    data: Bytes,
    nonce: U256,
    fees: &FeeParams,
    chain_id: u64,
) -> TypedTransaction {
    let mut request = Eip1559TransactionRequest::new()
        .from(from)
        .data(data)
        .nonce(nonce)
        .max_fee_per_gas(fees.max_fee_per_gas)
        .max_priority_fee_per_gas(fees.max_priority_fee_per_gas)
        .chain_id(chain_id);

    if let Some(to) = to {
        request = request.to(to);
    }

    TypedTransaction::Eip1559(request)
}

/// Map a node rejection onto the submission error it describes.
///
/// Errors other than raw RPC failures pass through untouched.
pub fn classify_rejection(error: DeployerError) -> DeployerError {
    let message = match error {
        DeployerError::Rpc(message) => message,
        other => return other,
    };
    let lower = message.to_lowercase();
    debug!("Classifying node rejection: {}", message);

    if lower.contains("insufficient funds") {
        DeployerError::InsufficientFunds {
            have: "unknown".to_string(),
            need: "unknown".to_string(),
        }
    } else if lower.contains("nonce too low")
        || lower.contains("nonce too high")
        || lower.contains("already known")
        || lower.contains("replacement transaction")
    {
        DeployerError::NonceConflict(message)
    } else if lower.contains("underpriced")
        || lower.contains("fee cap less than block base fee")
        || lower.contains("below minimum")
    {
        DeployerError::Underpriced(message)
    } else {
        DeployerError::Submission(message)
    }
}

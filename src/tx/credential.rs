//! Signing key for the deployer account

use crate::error::{DeployerError, DeployerResult};

use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes};
use std::fmt;

/// Private key used to sign every submission. Never logged or serialized.
pub struct SigningCredential {
    wallet: LocalWallet,
}

impl SigningCredential {
    /// Read a hex private key from the named environment variable
    pub fn from_env(var: &str) -> DeployerResult<Self> {
        let key = std::env::var(var).map_err(|_| {
            DeployerError::Config(format!("Signing key variable {} is not set", var))
        })?;
        Self::from_private_key(&key)
    }

    pub fn from_private_key(key: &str) -> DeployerResult<Self> {
        let key = key.trim();
        let key = key.strip_prefix("0x").unwrap_or(key);

        // parse errors can echo key material, so they are not forwarded
        let wallet = key
            .parse::<LocalWallet>()
            .map_err(|_| DeployerError::Config("Invalid signing key".to_string()))?;

        Ok(Self { wallet })
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    /// Sign for `chain_id` and return the RLP-encoded raw transaction
    pub async fn sign(&self, tx: &TypedTransaction, chain_id: u64) -> DeployerResult<Bytes> {
        let wallet = self.wallet.clone().with_chain_id(chain_id);
        let signature = wallet
            .sign_transaction(tx)
            .await
            .map_err(|e| DeployerError::Internal(format!("Failed to sign transaction: {}", e)))?;

        Ok(tx.rlp_signed(&signature))
    }
}

impl fmt::Debug for SigningCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningCredential")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

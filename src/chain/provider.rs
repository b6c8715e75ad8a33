//! Ethers HTTP provider for the configured chain

use super::ChainClient;
use crate::config::ChainConfig;
use crate::error::{DeployerError, DeployerResult};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use lazy_static::lazy_static;
use regex::Regex;
use std::time::Duration;
use tracing::info;

lazy_static! {
    /// reqwest appends `for url (...)` to transport errors
    static ref URL_IN_ERROR: Regex = Regex::new(r"url \([^)]*\)").unwrap();
}

/// Chain provider backed by a single JSON-RPC endpoint
pub struct ChainProvider {
    /// Chain configuration
    config: ChainConfig,
    /// HTTP provider
    http: Provider<Http>,
}

impl ChainProvider {
    /// Connect and verify the endpoint serves the configured chain
    pub async fn new(config: ChainConfig) -> DeployerResult<Self> {
        // the URL embeds the access key; errors and logs name the chain instead
        let http = Provider::<Http>::try_from(config.rpc_url.as_str())
            .map_err(|_| {
                DeployerError::Config(format!("Invalid RPC URL for chain {}", config.name))
            })?
            .interval(Duration::from_millis(config.receipt_poll_interval_ms));

        let remote_chain_id = http
            .get_chainid()
            .await
            .map_err(|e| {
                DeployerError::Rpc(format!(
                    "{} unreachable: {}",
                    config.name,
                    redact_endpoint(&e.to_string(), &config.rpc_url)
                ))
            })?;

        if remote_chain_id != U256::from(config.chain_id) {
            return Err(DeployerError::Config(format!(
                "RPC endpoint for {} serves chain {}, expected {}",
                config.name, remote_chain_id, config.chain_id
            )));
        }

        info!("Connected to {} (chain {})", config.name, config.chain_id);

        Ok(Self { config, http })
    }

    fn rpc_error(&self, e: ProviderError) -> DeployerError {
        DeployerError::Rpc(redact_endpoint(&e.to_string(), &self.config.rpc_url))
    }
}

/// Strip the endpoint (and the access key in its path) from an error message
fn redact_endpoint(message: &str, rpc_url: &str) -> String {
    let mut message = URL_IN_ERROR.replace_all(message, "url (<rpc endpoint>)").into_owned();
    for secret in [rpc_url, rpc_url.trim_end_matches('/')] {
        if !secret.is_empty() {
            message = message.replace(secret, "<rpc endpoint>");
        }
    }
    if let Some(key) = rpc_url.trim_end_matches('/').rsplit('/').next() {
        if key.len() >= 8 && !key.contains([':', '.']) {
            message = message.replace(key, "<redacted>");
        }
    }
    message
}
#[async_trait]
impl ChainClient for ChainProvider {
    fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    async fn transaction_count(&self, address: Address) -> DeployerResult<U256> {
        self.http
            .get_transaction_count(address, Some(BlockNumber::Pending.into()))
            .await
            .map_err(|e| self.rpc_error(e))
    }

    async fn balance(&self, address: Address) -> DeployerResult<U256> {
        self.http.get_balance(address, None).await.map_err(|e| self.rpc_error(e))
    }

    async fn estimate_gas(&self, tx: &TypedTransaction) -> DeployerResult<U256> {
        self.http.estimate_gas(tx, None).await.map_err(|e| self.rpc_error(e))
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> DeployerResult<H256> {
        let pending = self.http.send_raw_transaction(raw).await.map_err(|e| self.rpc_error(e))?;
        Ok(pending.tx_hash())
    }

    async fn transaction_receipt(&self, tx_hash: H256) -> DeployerResult<Option<TransactionReceipt>> {
        self.http
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| self.rpc_error(e))
    }

    async fn transaction_known(&self, tx_hash: H256) -> DeployerResult<bool> {
        self.http
            .get_transaction(tx_hash)
            .await
            .map(|tx| tx.is_some())
            .map_err(|e| self.rpc_error(e))
    }

    async fn block_number(&self) -> DeployerResult<u64> {
        self.http
            .get_block_number()
            .await
            .map(|b| b.as_u64())
            .map_err(|e| self.rpc_error(e))
    }
}

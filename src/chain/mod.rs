//! Chain module - the RPC seam used by the submitter and confirmation tracker
//!
//! This module provides:
//! - `ChainClient`, the narrow set of JSON-RPC calls the engine depends on
//! - `ChainProvider`, its ethers HTTP implementation
//! - `ConfirmationTracker`, which waits for receipts to reach finality

pub mod confirmation;
pub mod provider;

pub use confirmation::{recommended_confirmations, ConfirmationTracker};
pub use provider::ChainProvider;

use crate::error::DeployerResult;

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256};

/// JSON-RPC operations the engine needs from the configured chain
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Chain ID transactions are signed for
    fn chain_id(&self) -> u64;

    /// Next nonce for an account, counting pending transactions
    async fn transaction_count(&self, address: Address) -> DeployerResult<U256>;

    async fn balance(&self, address: Address) -> DeployerResult<U256>;

    async fn estimate_gas(&self, tx: &TypedTransaction) -> DeployerResult<U256>;

    /// Broadcast a signed transaction and return its hash
    async fn send_raw_transaction(&self, raw: Bytes) -> DeployerResult<H256>;

    /// Receipt for a mined transaction, `None` while pending
    async fn transaction_receipt(&self, tx_hash: H256) -> DeployerResult<Option<TransactionReceipt>>;

    /// Whether the node still knows the transaction (mempool or chain)
    async fn transaction_known(&self, tx_hash: H256) -> DeployerResult<bool>;

    async fn block_number(&self) -> DeployerResult<u64>;
}

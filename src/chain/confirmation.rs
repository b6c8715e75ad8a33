//! Confirmation tracking for submitted transactions
//!
//! A transaction is final once its receipt is `confirmation_blocks` deep,
//! counting the block it was mined in. Receipts are re-read at that depth so a
//! reorg that drops the transaction puts it back into the waiting state.

use super::ChainClient;
use crate::config::ChainConfig;
use crate::error::{DeployerError, DeployerResult};
use crate::outcome::TransactionReceipt;
use crate::tx::PendingTransaction;

use ethers::types::{TransactionReceipt as RpcReceipt, H256, U64};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// What one poll learned about a transaction
enum PollStatus {
    /// Not mined; `known` is false once the node has forgotten it
    Pending { known: bool },
    /// Mined but not yet deep enough
    Confirming { confirmations: u64 },
    /// Mined with status 0
    Reverted { block_number: Option<u64> },
    Final(RpcReceipt),
}

/// Waits for pending transactions to be finalized on the configured chain
pub struct ConfirmationTracker {
    /// Chain client
    client: Arc<dyn ChainClient>,
    /// Required depth, including the inclusion block
    confirmation_blocks: u64,
    /// Delay between receipt polls
    poll_interval: Duration,
    /// Consecutive polls a transaction may be unknown before it counts as dropped
    dropped_after_polls: u32,
}

impl ConfirmationTracker {
    pub fn new(
        client: Arc<dyn ChainClient>,
        confirmation_blocks: u64,
        poll_interval: Duration,
        dropped_after_polls: u32,
    ) -> Self {
        Self {
            client,
            confirmation_blocks: confirmation_blocks.max(1),
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            dropped_after_polls: dropped_after_polls.max(1),
        }
    }

    pub fn from_config(client: Arc<dyn ChainClient>, config: &ChainConfig) -> Self {
        let confirmation_blocks = config
            .confirmation_blocks
            .unwrap_or_else(|| recommended_confirmations(config.chain_id));

        Self::new(
            client,
            confirmation_blocks,
            Duration::from_millis(config.receipt_poll_interval_ms),
            config.dropped_after_polls,
        )
    }

    pub fn confirmation_blocks(&self) -> u64 {
        self.confirmation_blocks
    }

    /// Wait until the network resolves the transaction.
    ///
    /// No timeout is applied here. Retryable errors while polling are logged
    /// and polling continues; anything else ends the wait.
    pub async fn await_receipt(
        &self,
        pending: &PendingTransaction,
    ) -> DeployerResult<TransactionReceipt> {
        let tx_hash = pending.hash;
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut unknown_polls = 0u32;

        debug!(
            "Awaiting {} confirmation(s) for {:?}",
            self.confirmation_blocks, tx_hash
        );

        loop {
            ticker.tick().await;

            match self.poll(tx_hash).await {
                Ok(PollStatus::Final(receipt)) => {
                    info!(
                        "Transaction {:?} finalized in block {:?}",
                        tx_hash, receipt.block_number
                    );
                    return TransactionReceipt::from_rpc(&receipt);
                }
                Ok(PollStatus::Reverted { block_number }) => {
                    warn!("Transaction {:?} reverted in block {:?}", tx_hash, block_number);
                    return Err(DeployerError::Confirmation {
                        tx_hash: format!("{:?}", tx_hash),
                        reverted: true,
                        message: match block_number {
                            Some(b) => format!("execution reverted in block {}", b),
                            None => "execution reverted".to_string(),
                        },
                    });
                }
                Ok(PollStatus::Confirming { confirmations }) => {
                    unknown_polls = 0;
                    debug!(
                        "Transaction {:?} has {} / {} confirmations",
                        tx_hash, confirmations, self.confirmation_blocks
                    );
                }
                Ok(PollStatus::Pending { known: true }) => {
                    unknown_polls = 0;
                }
                Ok(PollStatus::Pending { known: false }) => {
                    unknown_polls += 1;
                    if unknown_polls >= self.dropped_after_polls {
                        warn!("Transaction {:?} dropped by the network", tx_hash);
                        return Err(DeployerError::Confirmation {
                            tx_hash: format!("{:?}", tx_hash),
                            reverted: false,
                            message: format!(
                                "dropped: unknown to the node for {} consecutive polls",
                                unknown_polls
                            ),
                        });
                    }
                }
                Err(e) if e.is_retryable() => {
                    warn!("Receipt poll for {:?} failed, retrying: {}", tx_hash, e);
                }
                Err(e) => {
                    warn!("Receipt poll for {:?} failed: {}", tx_hash, e);
                    return Err(e);
                }
            }
        }
    }

    async fn poll(&self, tx_hash: H256) -> DeployerResult<PollStatus> {
        let receipt = match self.client.transaction_receipt(tx_hash).await? {
            Some(receipt) => receipt,
            None => {
                let known = self.client.transaction_known(tx_hash).await?;
                return Ok(PollStatus::Pending { known });
            }
        };

        let mined_in = match receipt.block_number {
            Some(b) => b.as_u64(),
            None => return Ok(PollStatus::Pending { known: true }),
        };

        if receipt.status == Some(U64::zero()) {
            return Ok(PollStatus::Reverted {
                block_number: Some(mined_in),
            });
        }

        if self.confirmation_blocks <= 1 {
            return Ok(PollStatus::Final(receipt));
        }

        let current = self.client.block_number().await?;
        let confirmations = current.saturating_sub(mined_in) + 1;
        if confirmations < self.confirmation_blocks {
            return Ok(PollStatus::Confirming { confirmations });
        }

        // Verify the transaction is still included (reorg protection)
        match self.client.transaction_receipt(tx_hash).await? {
            Some(latest) if latest.block_hash == receipt.block_hash => {
                Ok(PollStatus::Final(latest))
            }
            _ => {
                warn!(
                    "Receipt for {:?} changed at block {}, possible reorg",
                    tx_hash, mined_in
                );
                Ok(PollStatus::Pending { known: true })
            }
        }
    }
}

/// Get recommended confirmation blocks for a chain
pub fn recommended_confirmations(chain_id: u64) -> u64 {
    match chain_id {
        // Ethereum mainnet
        1 => 32,
        // Ethereum testnets
        11155111 | 17000 => 12,
        // Polygon mainnet
        137 => 128,
        // Polygon Amoy
        80002 => 32,
        // Local dev chains (anvil, hardhat)
        31337 | 1337 => 1,
        // Default conservative
        _ => 64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainClient;
    use crate::tx::SubmissionKind;
    use chrono::Utc;
    use ethers::types::U256;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pending() -> PendingTransaction {
        PendingTransaction {
            hash: H256::repeat_byte(0x11),
            nonce: U256::from(7),
            kind: SubmissionKind::Deployment,
            submitted_at: Utc::now(),
        }
    }

    fn rpc_receipt(status: u64, block: u64) -> RpcReceipt {
        RpcReceipt {
            transaction_hash: H256::repeat_byte(0x11),
            block_number: Some(U64::from(block)),
            block_hash: Some(H256::repeat_byte(0x22)),
            gas_used: Some(U256::from(21_000)),
            effective_gas_price: Some(U256::from(30_000_000_000u64)),
            status: Some(U64::from(status)),
            ..Default::default()
        }
    }

    fn tracker(client: MockChainClient, blocks: u64) -> ConfirmationTracker {
        ConfirmationTracker::new(Arc::new(client), blocks, Duration::from_secs(1), 3)
    }

    #[tokio::test(start_paused = true)]
    async fn test_mined_receipt_is_returned() {
        let mut client = MockChainClient::new();
        client
            .expect_transaction_receipt()
            .returning(|_| Ok(Some(rpc_receipt(1, 100))));

        let receipt = tracker(client, 1).await_receipt(&pending()).await.unwrap();
        assert_eq!(receipt.gas_used, U256::from(21_000));
        assert_eq!(receipt.total_fee, U256::from(630_000_000_000_000u64));
        assert_eq!(receipt.block_number, Some(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_while_pending() {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        let mut client = MockChainClient::new();
        client.expect_transaction_receipt().returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Ok(None)
            } else {
                Ok(Some(rpc_receipt(1, 100)))
            }
        });
        client.expect_transaction_known().returning(|_| Ok(true));

        let receipt = tracker(client, 1).await_receipt(&pending()).await.unwrap();
        assert_eq!(receipt.transaction_hash, H256::repeat_byte(0x11));
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reverted_is_distinct() {
        let mut client = MockChainClient::new();
        client
            .expect_transaction_receipt()
            .returning(|_| Ok(Some(rpc_receipt(0, 100))));

        let err = tracker(client, 1).await_receipt(&pending()).await.unwrap_err();
        assert!(err.is_reverted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_transaction_is_not_reverted() {
        let mut client = MockChainClient::new();
        client.expect_transaction_receipt().returning(|_| Ok(None));
        client
            .expect_transaction_known()
            .times(3)
            .returning(|_| Ok(false));

        let err = tracker(client, 1).await_receipt(&pending()).await.unwrap_err();
        match err {
            DeployerError::Confirmation { reverted, message, .. } => {
                assert!(!reverted);
                assert!(message.contains("dropped"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_confirmation_depth() {
        let heads = Arc::new(AtomicUsize::new(100));
        let head = heads.clone();
        let mut client = MockChainClient::new();
        client
            .expect_transaction_receipt()
            .returning(|_| Ok(Some(rpc_receipt(1, 100))));
        client
            .expect_block_number()
            .returning(move || Ok(head.fetch_add(1, Ordering::SeqCst) as u64));

        let t = tracker(client, 3);
        let receipt = t.await_receipt(&pending()).await.unwrap();
        assert_eq!(receipt.block_number, Some(100));
        // heads 100, 101 are too shallow, 102 is the third block
        assert_eq!(heads.load(Ordering::SeqCst), 103);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rpc_errors_do_not_abort_waiting() {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        let mut client = MockChainClient::new();
        client.expect_transaction_receipt().returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(DeployerError::Rpc("429 Too Many Requests".to_string()))
            } else {
                Ok(Some(rpc_receipt(1, 100)))
            }
        });

        assert!(tracker(client, 1).await_receipt(&pending()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_poll_error_ends_wait() {
        let mut client = MockChainClient::new();
        client
            .expect_transaction_receipt()
            .times(1)
            .returning(|_| Err(DeployerError::Internal("receipt decode failed".to_string())));

        let err = tracker(client, 1).await_receipt(&pending()).await.unwrap_err();
        assert!(matches!(err, DeployerError::Internal(_)));
    }

    #[test]
    fn test_recommended_confirmations() {
        assert_eq!(recommended_confirmations(80002), 32);
        assert_eq!(recommended_confirmations(31337), 1);
        assert_eq!(recommended_confirmations(999_999), 64);
    }
}

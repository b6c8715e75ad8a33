//! Nonce serialization for the deployer account
//!
//! Each account has one async lock. A [`NonceLease`] holds it from nonce
//! assignment until the signed transaction has been accepted by the node, so
//! two submissions can never race for the same nonce.

use crate::chain::ChainClient;
use crate::error::DeployerResult;

use dashmap::DashMap;
use ethers::types::{Address, U256};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Locally tracked next nonce; `None` means re-read from the chain
#[derive(Debug, Default)]
struct AccountNonce {
    next: Option<U256>,
}

/// Hands out nonces one submission at a time per account
#[derive(Default)]
pub struct NonceManager {
    accounts: DashMap<Address, Arc<Mutex<AccountNonce>>>,
}

impl NonceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the account lock and assign the next nonce.
    ///
    /// The pending transaction count is fetched when nothing is cached.
    pub async fn reserve(
        &self,
        address: Address,
        client: &dyn ChainClient,
    ) -> DeployerResult<NonceLease> {
        let slot = self
            .accounts
            .entry(address)
            .or_insert_with(|| Arc::new(Mutex::new(AccountNonce::default())))
            .clone();

        let guard = slot.lock_owned().await;
        let nonce = match guard.next {
            Some(nonce) => nonce,
            None => {
                let nonce = client.transaction_count(address).await?;
                debug!("Fetched nonce {} for {:?}", nonce, address);
                nonce
            }
        };

        Ok(NonceLease {
            guard,
            address,
            nonce,
            committed: false,
        })
    }
}

/// Exclusive claim on an account's next nonce
#[derive(Debug)]
pub struct NonceLease {
    guard: OwnedMutexGuard<AccountNonce>,
    address: Address,
    nonce: U256,
    committed: bool,
}

impl NonceLease {
    pub fn nonce(&self) -> U256 {
        self.nonce
    }

    /// The transaction was accepted; the next lease gets `nonce + 1`
    pub fn commit(mut self) {
        self.guard.next = Some(self.nonce + 1);
        self.committed = true;
        debug!("Committed nonce {} for {:?}", self.nonce, self.address);
    }
}

impl Drop for NonceLease {
    fn drop(&mut self) {
        if !self.committed {
            self.guard.next = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainClient;
    use crate::error::DeployerError;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_commit_advances_without_refetch() {
        let mut client = MockChainClient::new();
        client
            .expect_transaction_count()
            .times(1)
            .returning(|_| Ok(U256::from(5)));

        let manager = NonceManager::new();
        let account = Address::repeat_byte(0x01);

        let lease = assert_ok!(manager.reserve(account, &client).await);
        assert_eq!(lease.nonce(), U256::from(5));
        lease.commit();

        let lease = manager.reserve(account, &client).await.unwrap();
        assert_eq!(lease.nonce(), U256::from(6));
        lease.commit();
    }

    #[tokio::test]
    async fn test_dropped_lease_forces_refetch() {
        let mut client = MockChainClient::new();
        client
            .expect_transaction_count()
            .times(2)
            .returning(|_| Ok(U256::from(9)));

        let manager = NonceManager::new();
        let account = Address::repeat_byte(0x02);

        let lease = manager.reserve(account, &client).await.unwrap();
        drop(lease);

        let lease = manager.reserve(account, &client).await.unwrap();
        assert_eq!(lease.nonce(), U256::from(9));
    }

    #[tokio::test]
    async fn test_fetch_error_propagates() {
        let mut client = MockChainClient::new();
        client
            .expect_transaction_count()
            .returning(|_| Err(DeployerError::Rpc("connection refused".to_string())));

        let manager = NonceManager::new();
        let err = assert_err!(manager.reserve(Address::zero(), &client).await);
        assert!(matches!(err, DeployerError::Rpc(_)));
    }

    #[tokio::test]
    async fn test_second_reservation_waits_for_first() {
        let mut client = MockChainClient::new();
        client
            .expect_transaction_count()
            .times(1)
            .returning(|_| Ok(U256::zero()));
        let client = Arc::new(client);

        let manager = Arc::new(NonceManager::new());
        let account = Address::repeat_byte(0x03);
        let first = manager.reserve(account, client.as_ref()).await.unwrap();

        let waiter = {
            let manager = manager.clone();
            let client = client.clone();
            tokio::spawn(async move {
                let lease = manager.reserve(account, client.as_ref()).await.unwrap();
                lease.nonce()
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        first.commit();
        assert_eq!(waiter.await.unwrap(), U256::from(1));
    }
}

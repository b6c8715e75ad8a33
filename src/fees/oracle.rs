//! Gas station client with fixed-interval background polling

use super::tier::{FeeSnapshot, FeeTier, TierFees};
use crate::config::FeeOracleConfig;
use crate::error::{DeployerError, DeployerResult};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Source of fee snapshots
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FeeSource: Send + Sync {
    async fn fetch(&self) -> DeployerResult<FeeSnapshot>;
}

/// Fee source backed by a gas-station style HTTP endpoint
pub struct GasStationSource {
    client: reqwest::Client,
    url: String,
}

impl GasStationSource {
    pub fn new(config: &FeeOracleConfig) -> DeployerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| DeployerError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }
}

#[async_trait]
impl FeeSource for GasStationSource {
    async fn fetch(&self) -> DeployerResult<FeeSnapshot> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| DeployerError::Network(e.to_string()))?;

        let body = response
            .text()
            .await
            .map_err(|e| DeployerError::Network(e.to_string()))?;

        parse_gas_station(&body)
    }
}

/// Wire shape of the gas station response
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GasStationResponse {
    fast: TierFees,
    standard: TierFees,
    safe_low: TierFees,
    #[serde(default)]
    estimated_base_fee: Option<Decimal>,
    #[serde(default)]
    block_number: Option<u64>,
}

/// Parse a gas station body. All three tiers are required and non-negative.
pub fn parse_gas_station(body: &str) -> DeployerResult<FeeSnapshot> {
    let response: GasStationResponse = serde_json::from_str(body)
        .map_err(|e| DeployerError::Network(format!("Malformed fee response: {}", e)))?;

    for (tier, fees) in [
        (FeeTier::Fast, &response.fast),
        (FeeTier::Standard, &response.standard),
        (FeeTier::SafeLow, &response.safe_low),
    ] {
        if fees.max_fee.is_sign_negative() || fees.max_priority_fee.is_sign_negative() {
            return Err(DeployerError::Network(format!(
                "Negative fee in {} tier",
                tier
            )));
        }
    }

    Ok(FeeSnapshot {
        fast: Some(response.fast),
        standard: Some(response.standard),
        safe_low: Some(response.safe_low),
        estimated_base_fee: response.estimated_base_fee,
        block_number: response.block_number,
        fetched_at: Utc::now(),
    })
}

/// Holds the latest fee snapshot and refreshes it on demand or on a timer
pub struct FeeOracleClient {
    source: Arc<dyn FeeSource>,
    latest: RwLock<Option<FeeSnapshot>>,
}

impl FeeOracleClient {
    pub fn new(source: Arc<dyn FeeSource>) -> Self {
        Self {
            source,
            latest: RwLock::new(None),
        }
    }

    /// Fetch a new snapshot. On failure the previous snapshot is kept.
    pub async fn refresh(&self) -> DeployerResult<FeeSnapshot> {
        match self.source.fetch().await {
            Ok(snapshot) => {
                *self.latest.write().await = Some(snapshot.clone());
                crate::metrics::record_fee_poll(true);
                debug!(
                    "Fee snapshot refreshed (block {:?})",
                    snapshot.block_number
                );
                if !snapshot.is_complete() {
                    warn!("Fee snapshot is missing tiers; those selections fall back to standard");
                }
                Ok(snapshot)
            }
            Err(e) => {
                crate::metrics::record_fee_poll(false);
                warn!("Fee refresh failed, keeping previous snapshot: {}", e);
                Err(e)
            }
        }
    }

    pub async fn latest(&self) -> Option<FeeSnapshot> {
        self.latest.read().await.clone()
    }

    /// Refresh immediately and then every `period`, handing each outcome to
    /// `on_tick`. A failed tick just waits for the next one.
    pub fn start_polling<F>(self: Arc<Self>, period: Duration, on_tick: F) -> PollingHandle
    where
        F: Fn(DeployerResult<FeeSnapshot>) + Send + Sync + 'static,
    {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let period = period.max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("Fee polling started every {:?}", period);

            loop {
                tokio::select! {
                    biased;

                    _ = stop_rx.changed() => break,

                    // the fetch runs inside the branch so cancelling never interrupts it
                    _ = ticker.tick() => {
                        let result = self.refresh().await;
                        on_tick(result);
                    }
                }
            }

            info!("Fee polling stopped");
        });

        PollingHandle {
            stop: stop_tx,
            task,
        }
    }
}

/// Cancellation handle for the fee poll loop. Dropping it also stops polling.
pub struct PollingHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollingHandle {
    /// Stop future ticks. A fetch already in progress completes.
    pub fn cancel(&self) {
        let _ = self.stop.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel and wait for the loop to exit
    pub async fn stop(self) {
        self.cancel();
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::U256;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const AMOY_BODY: &str = r#"{
        "safeLow": {"maxPriorityFee": 25.000000015, "maxFee": 25.000000031},
        "standard": {"maxPriorityFee": 26.4, "maxFee": 26.400000016},
        "fast": {"maxPriorityFee": 31.2, "maxFee": 31.200000016},
        "estimatedBaseFee": 0.000000016,
        "blockTime": 2,
        "blockNumber": 12345678
    }"#;

    fn snapshot(max_fee: &str) -> FeeSnapshot {
        let fees = TierFees::new(
            Decimal::from_str(max_fee).unwrap(),
            Decimal::from_str("1").unwrap(),
        );
        FeeSnapshot::new(Some(fees), Some(fees), Some(fees))
    }

    #[test]
    fn test_parse_gas_station_body() {
        let snapshot = parse_gas_station(AMOY_BODY).unwrap();
        assert!(snapshot.is_complete());
        assert_eq!(snapshot.block_number, Some(12345678));

        let params = crate::fees::select(FeeTier::SafeLow, &snapshot).unwrap();
        assert_eq!(params.max_fee_per_gas, U256::from(25_000_000_031u64));
        assert_eq!(params.max_priority_fee_per_gas, U256::from(25_000_000_015u64));
    }

    #[test]
    fn test_parse_accepts_string_values() {
        let body = r#"{
            "fast": {"maxFee": "50", "maxPriorityFee": "30"},
            "standard": {"maxFee": "30", "maxPriorityFee": "20"},
            "safeLow": {"maxFee": "20", "maxPriorityFee": "10"}
        }"#;
        let snapshot = parse_gas_station(body).unwrap();
        assert_eq!(
            snapshot.fast.unwrap().max_fee,
            Decimal::from_str("50").unwrap()
        );
        assert_eq!(snapshot.block_number, None);
    }

    #[test]
    fn test_parse_rejects_missing_tier() {
        let body = r#"{"fast": {"maxFee": 50, "maxPriorityFee": 30},
                       "standard": {"maxFee": 30, "maxPriorityFee": 20}}"#;
        assert!(matches!(
            parse_gas_station(body),
            Err(DeployerError::Network(_))
        ));
        assert!(matches!(
            parse_gas_station("<html>502</html>"),
            Err(DeployerError::Network(_))
        ));
    }

    #[test]
    fn test_parse_rejects_negative_fee() {
        let body = r#"{"fast": {"maxFee": 50, "maxPriorityFee": 30},
                       "standard": {"maxFee": -1, "maxPriorityFee": 20},
                       "safeLow": {"maxFee": 20, "maxPriorityFee": 10}}"#;
        assert!(matches!(
            parse_gas_station(body),
            Err(DeployerError::Network(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_snapshot() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut source = MockFeeSource::new();
        source.expect_fetch().returning(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(snapshot("40"))
            } else {
                Err(DeployerError::Network("connection reset".to_string()))
            }
        });

        let oracle = FeeOracleClient::new(Arc::new(source));
        assert!(oracle.latest().await.is_none());

        let first = oracle.refresh().await.unwrap();
        assert!(oracle.refresh().await.is_err());

        assert_eq!(oracle.latest().await, Some(first));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_survives_failed_ticks() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut source = MockFeeSource::new();
        source.expect_fetch().returning(move || {
            if counter.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                Ok(snapshot("40"))
            } else {
                Err(DeployerError::Network("timeout".to_string()))
            }
        });

        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let sink = outcomes.clone();
        let oracle = Arc::new(FeeOracleClient::new(Arc::new(source)));
        let handle = oracle.clone().start_polling(Duration::from_secs(30), move |r| {
            sink.lock().unwrap().push(r.is_ok());
        });

        tokio::time::sleep(Duration::from_secs(75)).await;
        handle.stop().await;

        let outcomes = outcomes.lock().unwrap().clone();
        assert!(outcomes.len() >= 2);
        assert!(outcomes[0]);
        assert!(!outcomes[1]);
        assert!(oracle.latest().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_future_ticks() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut source = MockFeeSource::new();
        source.expect_fetch().returning(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(snapshot("40"))
        });

        let oracle = Arc::new(FeeOracleClient::new(Arc::new(source)));
        let handle = oracle.start_polling(Duration::from_millis(100), |_| {});

        tokio::time::sleep(Duration::from_millis(250)).await;
        handle.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let seen = calls.load(Ordering::SeqCst);
        assert!(seen >= 1);
        assert!(handle.is_finished());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), seen);
    }
}

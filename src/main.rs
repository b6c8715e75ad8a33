//! Token Deployer - deploys and mints an ERC20 token using fee-oracle tiers
//!
//! Wires the fee oracle, chain provider and transaction pipeline into one
//! orchestration session and serves it over HTTP.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use token_deployer::api::{self, AppState};
use token_deployer::artifact::ContractArtifact;
use token_deployer::chain::{ChainClient, ChainProvider, ConfirmationTracker};
use token_deployer::config::{LoggingConfig, Settings};
use token_deployer::fees::{FeeOracleClient, GasStationSource};
use token_deployer::metrics::MetricsServer;
use token_deployer::session::OrchestrationSession;
use token_deployer::tx::{GasEstimator, NonceManager, SigningCredential, TransactionSubmitter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration before logging so the configured filter applies
    let settings = Settings::load()?;
    init_logging(&settings.logging);

    info!("Starting Token Deployer v{}", env!("CARGO_PKG_VERSION"));

    let credential = Arc::new(
        SigningCredential::from_env(&settings.wallet.private_key_env)
            .context("Failed to load signing credential")?,
    );
    info!("Deployer account: {:?}", credential.address());

    // A missing artifact is reported per action, not at startup
    let artifact = match ContractArtifact::load(&settings.contract.artifact_path) {
        Ok(artifact) => Some(artifact),
        Err(e) => {
            warn!("Contract artifact unavailable: {}", e);
            None
        }
    };

    let provider = ChainProvider::new(settings.chain.clone())
        .await
        .context("Failed to connect to chain RPC")?;
    let client: Arc<dyn ChainClient> = Arc::new(provider);

    let submitter = TransactionSubmitter::new(
        client.clone(),
        credential,
        Arc::new(NonceManager::new()),
        GasEstimator::new(settings.chain.gas_limit_buffer_percent),
    );
    let tracker = ConfirmationTracker::from_config(client.clone(), &settings.chain);
    info!(
        "Requiring {} confirmation(s) on {}",
        tracker.confirmation_blocks(),
        settings.chain.name
    );

    let fee_source = GasStationSource::new(&settings.fee_oracle)?;
    let oracle = Arc::new(FeeOracleClient::new(Arc::new(fee_source)));

    let session = Arc::new(OrchestrationSession::new(
        oracle,
        submitter,
        tracker,
        artifact,
        settings.deployer.clone(),
    ));
    let polling = session.start_fee_polling();

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let state = AppState {
            session: session.clone(),
            chain: client,
            token_decimals: settings.deployer.token_decimals,
        };
        async move {
            if let Err(e) = api::run_server(config, state).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    info!("Token Deployer is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // In-flight confirmations are abandoned
    polling.stop().await;
    api_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Token Deployer stopped");
    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.filter));

    let registry = tracing_subscriber::registry().with(filter);
    if config.json {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

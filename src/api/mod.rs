//! HTTP API: session state, tier selection and the deploy/mint triggers

use crate::chain::ChainClient;
use crate::config::ApiConfig;
use crate::error::{DeployerError, DeployerResult};
use crate::outcome::OperationResult;
use crate::session::{ActionFailure, MintRequest, OrchestrationSession, SessionState};

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use ethers::types::{Address, U256};
use ethers::utils::parse_units;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<OrchestrationSession>,
    /// Probed by `/health`
    pub chain: Arc<dyn ChainClient>,
    /// Decimals used to convert human mint amounts
    pub token_decimals: u32,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/state", get(get_state))
        .route("/tier", put(change_tier))
        .route("/deploy", post(start_deploy))
        .route("/mint", post(start_mint))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> DeployerResult<()> {
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| DeployerError::Config(format!("Cannot bind API address {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| DeployerError::Internal(format!("API server failed: {}", e)))?;

    Ok(())
}

/// Health check endpoint - liveness plus chain reachability
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let block_number = match state.chain.block_number().await {
        Ok(block) => Some(block),
        Err(e) => {
            debug!("Health check could not reach chain {}: {}", state.chain.chain_id(), e);
            None
        }
    };

    Json(HealthResponse {
        status: if block_number.is_some() { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        session_id: state.session.state().session_id.to_string(),
        chain_id: state.chain.chain_id(),
        chain_reachable: block_number.is_some(),
        block_number,
    })
}

async fn get_state(State(state): State<AppState>) -> impl IntoResponse {
    Json(StateResponse::from(state.session.state()))
}

async fn change_tier(
    State(state): State<AppState>,
    Json(body): Json<TierRequest>,
) -> impl IntoResponse {
    let tier = state.session.change_tier(&body.tier);
    Json(TierResponse {
        tier: tier.to_string(),
    })
}

async fn start_deploy(State(state): State<AppState>) -> Result<Response, ApiError> {
    state.session.start_deploy()?;
    Ok(accepted("deploy"))
}

async fn start_mint(
    State(state): State<AppState>,
    Json(body): Json<MintBody>,
) -> Result<Response, ApiError> {
    let request = body.into_request(state.token_decimals)?;
    state.session.start_mint(request)?;
    Ok(accepted("mint"))
}

fn accepted(action: &str) -> Response {
    (
        StatusCode::ACCEPTED,
        Json(ActionResponse {
            action: action.to_string(),
            status: "started".to_string(),
        }),
    )
        .into_response()
}

// Request types

#[derive(Deserialize)]
struct TierRequest {
    tier: String,
}

#[derive(Deserialize)]
struct MintBody {
    recipient: Option<String>,
    /// Human amount, e.g. "1.5" tokens
    amount: String,
}

impl MintBody {
    fn into_request(self, decimals: u32) -> Result<MintRequest, ApiError> {
        let recipient = self
            .recipient
            .map(|r| r.parse::<Address>())
            .transpose()
            .map_err(|e| ApiError::bad_input(format!("Invalid recipient address: {}", e)))?;

        let amount = self.amount.trim();
        if amount.starts_with('-') {
            return Err(ApiError::bad_input("Amount must be positive".to_string()));
        }
        let amount: U256 = parse_units(amount, decimals)
            .map_err(|e| ApiError::bad_input(format!("Invalid amount {:?}: {}", self.amount, e)))?
            .into();
        if amount.is_zero() {
            return Err(ApiError::bad_input("Amount must be positive".to_string()));
        }

        Ok(MintRequest { recipient, amount })
    }
}

// Response types

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: String,
    version: String,
    session_id: String,
    chain_id: u64,
    chain_reachable: bool,
    block_number: Option<u64>,
}

#[derive(Serialize)]
struct TierResponse {
    tier: String,
}

#[derive(Serialize)]
struct ActionResponse {
    action: String,
    status: String,
}

/// Session state plus display-unit renderings of completed results
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StateResponse {
    #[serde(flatten)]
    state: SessionState,
    last_error: Option<ActionFailure>,
    deploy_summary: Option<ResultSummary>,
    mint_summary: Option<ResultSummary>,
}

impl From<SessionState> for StateResponse {
    fn from(state: SessionState) -> Self {
        Self {
            last_error: state.last_error().cloned(),
            deploy_summary: state.deploy.result().map(ResultSummary::from),
            mint_summary: state.mint.result().map(ResultSummary::from),
            state,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResultSummary {
    gas_price_gwei: String,
    total_fee: String,
    duration_seconds: String,
}

impl From<&OperationResult> for ResultSummary {
    fn from(result: &OperationResult) -> Self {
        Self {
            gas_price_gwei: result.gas_price_gwei(),
            total_fee: result.total_fee_native(),
            duration_seconds: result.duration_display(),
        }
    }
}

/// Error response: status code plus `{error, category}` body
struct ApiError {
    status: StatusCode,
    message: String,
    category: String,
}

impl ApiError {
    fn bad_input(message: String) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message,
            category: "invalid_request".to_string(),
        }
    }
}

impl From<DeployerError> for ApiError {
    fn from(e: DeployerError) -> Self {
        let status = match &e {
            DeployerError::AlreadyInFlight { .. } => StatusCode::CONFLICT,
            DeployerError::Precondition(_) | DeployerError::FeeDataUnavailable(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
            category: e.category().to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    category: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
                category: self.category,
            }),
        )
            .into_response()
    }
}

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::{
    api::{
        error::ApiError,
        response::{created, with_total_count, ApiResponse},
    },
    models::BalancePoint,
    multisig::WalletDescriptor,
    state::AppState,
    validation::{parse_days, validate_bitcoin_address, ValidationError},
};

const DEFAULT_DAYS: &str = "30";
const DEFAULT_GENERATE_COUNT: u32 = 10;

// Query string shared by every windowed endpoint
#[derive(Deserialize, Default)]
pub struct DaysQuery {
    days: Option<String>,
}

impl DaysQuery {
    /// `(from, to)` in Unix seconds, ending now.
    fn window(&self) -> Result<(i64, i64), ValidationError> {
        let range = parse_days(self.days.as_deref().unwrap_or(DEFAULT_DAYS))?;
        let now = Utc::now();
        Ok((range.start(now).timestamp(), now.timestamp()))
    }
}

#[derive(Deserialize)]
pub struct AddressHistoryQuery {
    address: Option<String>,
    days: Option<String>,
}

#[derive(Deserialize)]
pub struct NewAddressRequest {
    address: String,
    label: Option<String>,
}

#[derive(Deserialize)]
pub struct NewAccountRequest {
    name: String,
    balance: i64,
    notes: Option<String>,
}

#[derive(Deserialize)]
pub struct BalanceUpdateRequest {
    balance: i64,
    #[serde(default = "default_verified")]
    verified: bool,
    notes: Option<String>,
}

fn default_verified() -> bool {
    true
}

#[derive(Deserialize, Default)]
pub struct GenerateRequest {
    count: Option<u32>,
}

#[derive(Serialize)]
struct AddressHistory {
    address: String,
    from: i64,
    to: i64,
    points: Vec<BalancePoint>,
}

pub fn create_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/portfolio/current", get(current_portfolio))
        .route("/api/portfolio/history", get(portfolio_history))
        .route("/api/lightning/fees", get(lightning_fees))
        .route("/api/lightning/forwards", get(lightning_forwards))
        .route("/api/onchain/addresses", get(list_addresses).post(add_address))
        .route("/api/onchain/addresses/{id}", delete(remove_address))
        .route("/api/onchain/history", get(address_history))
        .route("/api/offline/accounts", get(list_accounts).post(add_account))
        .route("/api/offline/accounts/{id}/balance", put(update_account_balance))
        .route("/api/offline/accounts/{id}", delete(delete_account))
        .route("/api/multisig/wallets", get(list_wallets).post(import_wallet))
        .route("/api/multisig/wallets/{id}", delete(delete_wallet))
        .route("/api/multisig/wallets/{id}/addresses", get(wallet_addresses))
        .route("/api/multisig/wallets/{id}/addresses/generate", post(generate_addresses))
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

// GET /api/portfolio/current
async fn current_portfolio(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let snapshot = state.aggregator.current_snapshot().await?;
    Ok(ApiResponse::new(snapshot).into_response())
}

// GET /api/portfolio/history?days=
async fn portfolio_history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DaysQuery>,
) -> Result<Response, ApiError> {
    let (from, to) = params.window()?;
    info!("Rebuilding portfolio history from {} to {}", from, to);
    let series = state.aggregator.history(from, to).await?;
    Ok(ApiResponse::new(series).into_response())
}

// GET /api/lightning/fees?days=
async fn lightning_fees(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DaysQuery>,
) -> Result<Response, ApiError> {
    let (from, to) = params.window()?;
    let days = state.store.get_forwarding_events_fees(from, to).await?;
    Ok(ApiResponse::new(days).into_response())
}

// GET /api/lightning/forwards?days=
async fn lightning_forwards(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DaysQuery>,
) -> Result<Response, ApiError> {
    let (from, to) = params.window()?;
    let events = state.store.get_forwarding_events(from, to).await?;
    let count = events.len() as i64;
    Ok(with_total_count(events, count))
}

// GET /api/onchain/addresses
async fn list_addresses(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let addresses = state.store.list_addresses_with_latest_balance().await?;
    Ok(ApiResponse::new(addresses).into_response())
}

// POST /api/onchain/addresses
async fn add_address(
    State(state): State<Arc<AppState>>,
    Json(request): Json<NewAddressRequest>,
) -> Result<Response, ApiError> {
    let address = request.address.trim();
    let network = validate_bitcoin_address(address)?;
    let label = request.label.as_deref().map(str::trim).filter(|l| !l.is_empty());

    let watched = state.store.add_onchain_address(address, label).await?;
    info!("Now tracking {} ({})", watched.address, network);

    if let Some(node) = &state.node {
        if let Err(e) = node.import_address(&watched.address, label.unwrap_or("")).await {
            warn!("Could not import {} into the node wallet: {}", watched.address, e);
        }
    }
    Ok(created(watched))
}

// DELETE /api/onchain/addresses/{id}
async fn remove_address(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let watched = state.store.get_onchain_address(id).await?;
    state.store.deactivate_onchain_address(id).await?;
    state.cache.invalidate(&watched.address).await;
    info!("Stopped tracking {}", watched.address);
    Ok(ApiResponse::new(watched.id).into_response())
}

// GET /api/onchain/history?address=&days=
async fn address_history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AddressHistoryQuery>,
) -> Result<Response, ApiError> {
    let address = params
        .address
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .ok_or_else(|| ValidationError::MissingParameter("address".to_string()))?;
    validate_bitcoin_address(address)?;

    let (from, to) = DaysQuery { days: params.days }.window()?;
    debug!("Rebuilding history of {} from {} to {}", address, from, to);
    let points = state.reconstructor().address_history(address, from, to).await?;

    Ok(ApiResponse::new(AddressHistory {
        address: address.to_string(),
        from,
        to,
        points,
    })
    .into_response())
}

// GET /api/offline/accounts
async fn list_accounts(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let accounts = state.store.get_cold_storage_entries_with_warnings().await?;
    Ok(ApiResponse::new(accounts).into_response())
}

// POST /api/offline/accounts
async fn add_account(
    State(state): State<Arc<AppState>>,
    Json(request): Json<NewAccountRequest>,
) -> Result<Response, ApiError> {
    let account = state
        .store
        .add_cold_storage_account(&request.name, request.balance, request.notes.as_deref())
        .await?;
    Ok(created(account))
}

// PUT /api/offline/accounts/{id}/balance
async fn update_account_balance(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(request): Json<BalanceUpdateRequest>,
) -> Result<Response, ApiError> {
    let account = state
        .store
        .update_cold_storage_balance(id, request.balance, request.verified, request.notes.as_deref())
        .await?;
    Ok(ApiResponse::new(account).into_response())
}

// DELETE /api/offline/accounts/{id}
async fn delete_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    state.store.delete_cold_storage_account(id).await?;
    Ok(ApiResponse::new(id).into_response())
}

// GET /api/multisig/wallets
async fn list_wallets(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let wallets = state.deriver.list_wallets().await?;
    Ok(ApiResponse::new(wallets).into_response())
}

// POST /api/multisig/wallets
async fn import_wallet(
    State(state): State<Arc<AppState>>,
    body: String,
) -> Result<Response, ApiError> {
    let descriptor = WalletDescriptor::from_json(&body)?;
    let wallet = state.deriver.import_wallet(&descriptor).await?;
    Ok(created(wallet))
}

// DELETE /api/multisig/wallets/{id}
async fn delete_wallet(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    state.deriver.delete_wallet(id).await?;
    Ok(ApiResponse::new(id).into_response())
}

// GET /api/multisig/wallets/{id}/addresses
async fn wallet_addresses(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let addresses = state.deriver.wallet_addresses(id).await?;
    Ok(ApiResponse::new(addresses).into_response())
}

// POST /api/multisig/wallets/{id}/addresses/generate
async fn generate_addresses(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    body: String,
) -> Result<Response, ApiError> {
    let request: GenerateRequest = if body.trim().is_empty() {
        GenerateRequest::default()
    } else {
        serde_json::from_str(&body)
            .map_err(|e| ApiError::BadRequest(format!("invalid generate request: {}", e)))?
    };
    let count = request.count.unwrap_or(DEFAULT_GENERATE_COUNT);
    let addresses = state.deriver.generate_addresses(id, count).await?;
    Ok(created(addresses))
}

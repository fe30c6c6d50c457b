//! # REST + WebSocket API
//!
//! Builds the axum router that exposes the bank over HTTP. Every handler
//! goes through the shared [`AppState`]; the engine itself sits behind an
//! async mutex, so operations are applied one at a time in arrival order.
//!
//! ## Endpoints
//!
//! | Method | Path                            | Description                        |
//! |--------|---------------------------------|------------------------------------|
//! | GET    | `/health`                       | Liveness probe                     |
//! | GET    | `/bank`                         | Totals, cap and state              |
//! | GET    | `/balances/:address`            | Depositor balance                  |
//! | GET    | `/assets`                       | Registered assets                  |
//! | GET    | `/assets/:asset`                | Registry record for one asset      |
//! | GET    | `/routes/:asset`                | Whether an asset is convertible    |
//! | GET    | `/preview/:asset_in/:asset_out` | Router estimate for one whole unit |
//! | POST   | `/deposits/native`              | Deposit the native asset           |
//! | POST   | `/deposits/asset`               | Deposit any supported asset        |
//! | POST   | `/withdrawals`                  | Withdraw as native                 |
//! | POST   | `/admin/assets`                 | Register an asset                  |
//! | DELETE | `/admin/assets/:asset`          | Unregister an asset                |
//! | POST   | `/admin/halt`, `/admin/resume`  | Suspend / resume operations        |
//! | POST   | `/admin/authority`              | Hand over the admin role           |
//! | POST   | `/admin/prices`                 | Publish a price round              |
//! | GET    | `/ws`                           | Live receipts and state changes    |
//!
//! Failures return `{ "error": <kind>, "message": <text> }` with a status
//! derived from the error kind.

use axum::{
    extract::{
        rejection::JsonRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use strongbox_contracts::{
    BankEngine, BankError, BankInfo, BankResult, BankState, Clock, DepositReceipt,
    FixedRateRouter, ManualPriceFeed, WithdrawalReceipt,
};
use strongbox_protocol::config::MAX_ASSET_DECIMALS;
use strongbox_protocol::{Address, Amount, AssetConfig, AssetId, FeedRef};

use crate::config::oracle_rate;
use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    /// The bank.
    pub engine: Arc<Mutex<BankEngine>>,
    /// The feed the engine's oracle reads; written by `/admin/prices`.
    pub price_feed: Arc<ManualPriceFeed>,
    /// Handle onto the engine's router book, repriced with the feed.
    pub router: FixedRateRouter,
    /// Default timestamp for published price rounds.
    pub clock: Arc<dyn Clock>,
    /// Broadcast channel for live event notifications.
    pub event_tx: broadcast::Sender<BankEvent>,
    /// Prometheus metrics.
    pub metrics: SharedMetrics,
}

impl AppState {
    /// Apply `op` to the engine, recording its outcome and latency.
    async fn apply<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&mut BankEngine) -> BankResult<T>,
    ) -> Result<T, ApiError> {
        let mut engine = self.engine.lock().await;

        let timer = self.metrics.operation_latency_seconds.start_timer();
        let result = f(&mut *engine);
        timer.observe_duration();

        match &result {
            Ok(_) => self.metrics.operations_total.with_label_values(&[op]).inc(),
            Err(e) => {
                self.metrics.rejections_total.with_label_values(&[e.kind()]).inc();
                tracing::debug!(op, error = %e, "operation rejected");
            }
        }
        if let Ok(info) = engine.bank_info() {
            self.metrics.observe_bank(&info);
        }
        result.map_err(ApiError::from)
    }

    fn publish(&self, event: BankEvent) {
        // No subscribers is not an error.
        let _ = self.event_tx.send(event);
    }
}

/// Events pushed to WebSocket subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BankEvent {
    /// A deposit was credited.
    Deposit(DepositReceipt),
    /// A withdrawal was paid out.
    Withdrawal(WithdrawalReceipt),
    /// The bank was halted or resumed.
    StateChanged { halted: bool },
    /// A price round was published to the feed.
    PriceUpdated {
        feed: FeedRef,
        answer: i64,
        decimals: u8,
        updated_at: u64,
    },
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/bank", get(bank_handler))
        .route("/balances/:address", get(balance_handler))
        .route("/assets", get(assets_handler))
        .route("/assets/:asset", get(asset_handler))
        .route("/routes/:asset", get(route_handler))
        .route("/preview/:asset_in/:asset_out", get(preview_handler))
        .route("/deposits/native", post(deposit_native_handler))
        .route("/deposits/asset", post(deposit_asset_handler))
        .route("/withdrawals", post(withdraw_handler))
        .route("/admin/assets", post(add_asset_handler))
        .route("/admin/assets/:asset", delete(remove_asset_handler))
        .route("/admin/halt", post(halt_handler))
        .route("/admin/resume", post(resume_handler))
        .route("/admin/authority", post(authority_handler))
        .route("/admin/prices", post(price_handler))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error body returned by every endpoint on failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable kind, e.g. `CapacityExceeded`.
    pub error: String,
    /// Human-readable detail.
    pub message: String,
}

/// Handler error: a rejected bank operation or a malformed request.
#[derive(Debug)]
pub enum ApiError {
    Bank(BankError),
    BadRequest(String),
}

impl From<BankError> for ApiError {
    fn from(err: BankError) -> Self {
        ApiError::Bank(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

/// HTTP status for a bank error kind.
fn status_for(err: &BankError) -> StatusCode {
    match err {
        BankError::ZeroAmount
        | BankError::InvalidAsset(_)
        | BankError::InvalidAddress(_)
        | BankError::InvalidConfig(_)
        | BankError::WithdrawalLimitExceeded { .. } => StatusCode::BAD_REQUEST,
        BankError::Unauthorized { .. } => StatusCode::FORBIDDEN,
        BankError::AlreadyRegistered(_)
        | BankError::NotRegistered(_)
        | BankError::InsufficientBalance { .. }
        | BankError::CapacityExceeded { .. } => StatusCode::CONFLICT,
        BankError::NotSupported(_)
        | BankError::NoRoute(_)
        | BankError::Oracle(_)
        | BankError::SlippageExceeded { .. }
        | BankError::DeadlineExpired { .. }
        | BankError::Exchange(_)
        | BankError::TransferFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
        BankError::Halted => StatusCode::SERVICE_UNAVAILABLE,
        BankError::ArithmeticOverflow(_)
        | BankError::InvariantViolation(_)
        | BankError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Bank(err) => (
                status_for(&err),
                ErrorResponse {
                    error: err.kind().to_string(),
                    message: err.to_string(),
                },
            ),
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error: "BadRequest".into(),
                    message,
                },
            ),
        };
        if status.is_server_error() {
            tracing::error!(kind = %body.error, message = %body.message, "request failed");
        }
        (status, Json(body)).into_response()
    }
}

fn parse_address(raw: &str) -> Result<Address, ApiError> {
    raw.parse()
        .map_err(|e| ApiError::BadRequest(format!("invalid address {raw:?}: {e}")))
}

fn parse_asset(raw: &str) -> Result<AssetId, ApiError> {
    raw.parse()
        .map_err(|e| ApiError::BadRequest(format!("invalid asset {raw:?}: {e}")))
}

// ---------------------------------------------------------------------------
// Request / Response Types
// ---------------------------------------------------------------------------

/// Body of `POST /deposits/native`.
#[derive(Debug, Deserialize)]
pub struct NativeDepositRequest {
    pub depositor: Address,
    pub amount: Amount,
}

/// Body of `POST /deposits/asset`.
#[derive(Debug, Deserialize)]
pub struct AssetDepositRequest {
    pub depositor: Address,
    pub asset: AssetId,
    pub amount: Amount,
}

/// Body of `POST /withdrawals`. `amount` is in accounting units.
#[derive(Debug, Deserialize)]
pub struct WithdrawRequest {
    pub depositor: Address,
    pub amount: Amount,
}

/// Body of `POST /admin/assets`.
#[derive(Debug, Deserialize)]
pub struct AddAssetRequest {
    pub caller: Address,
    pub asset: AssetId,
    pub decimals: u8,
    pub feed: FeedRef,
}

/// Body of admin calls that carry nothing but the caller.
#[derive(Debug, Deserialize)]
pub struct CallerRequest {
    pub caller: Address,
}

/// Body of `POST /admin/authority`.
#[derive(Debug, Deserialize)]
pub struct AuthorityRequest {
    pub caller: Address,
    pub new_authority: Address,
}

/// Body of `POST /admin/prices`. `updated_at` defaults to now.
#[derive(Debug, Deserialize)]
pub struct PriceRequest {
    pub caller: Address,
    pub feed: FeedRef,
    pub answer: i64,
    pub decimals: u8,
    pub updated_at: Option<u64>,
}

/// Response of `GET /bank`.
#[derive(Debug, Serialize)]
pub struct BankResponse {
    pub version: String,
    pub authority: Address,
    pub state: BankState,
    pub info: BankInfo,
    /// RFC 3339 time of the snapshot.
    pub as_of: String,
}

/// Response of `GET /balances/:address`.
#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub address: Address,
    pub balance: Amount,
}

/// Response of `GET /routes/:asset`.
#[derive(Debug, Serialize, Deserialize)]
pub struct RouteResponse {
    pub asset: AssetId,
    pub routable: bool,
}

/// Response of `GET /preview/:asset_in/:asset_out`.
#[derive(Debug, Serialize, Deserialize)]
pub struct PreviewResponse {
    pub asset_in: AssetId,
    pub asset_out: AssetId,
    /// Estimated `asset_out` for one whole unit of `asset_in`.
    pub amount_out: Amount,
}

// ---------------------------------------------------------------------------
// Query Handlers
// ---------------------------------------------------------------------------

/// `GET /health` — returns 200 if the node is alive.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn bank_handler(State(state): State<AppState>) -> Result<Json<BankResponse>, ApiError> {
    let engine = state.engine.lock().await;
    let info = engine.bank_info()?;
    Ok(Json(BankResponse {
        version: state.version.clone(),
        authority: engine.authority(),
        state: engine.state(),
        info,
        as_of: chrono::Utc::now().to_rfc3339(),
    }))
}

async fn balance_handler(
    Path(address): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let address = parse_address(&address)?;
    let balance = state.engine.lock().await.balance_of(&address);
    Ok(Json(BalanceResponse { address, balance }))
}

async fn assets_handler(State(state): State<AppState>) -> Json<Vec<AssetConfig>> {
    Json(state.engine.lock().await.assets())
}

/// Unknown assets answer with an unsupported placeholder, not 404.
async fn asset_handler(
    Path(asset): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<AssetConfig>, ApiError> {
    let asset = parse_asset(&asset)?;
    Ok(Json(state.engine.lock().await.asset_config(&asset)))
}

async fn route_handler(
    Path(asset): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<RouteResponse>, ApiError> {
    let asset = parse_asset(&asset)?;
    let routable = state.engine.lock().await.has_route(&asset);
    Ok(Json(RouteResponse { asset, routable }))
}

async fn preview_handler(
    Path((asset_in, asset_out)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<PreviewResponse>, ApiError> {
    let asset_in = parse_asset(&asset_in)?;
    let asset_out = parse_asset(&asset_out)?;
    let amount_out = state
        .engine
        .lock()
        .await
        .preview_conversion(&asset_in, &asset_out)?;
    Ok(Json(PreviewResponse {
        asset_in,
        asset_out,
        amount_out,
    }))
}

// ---------------------------------------------------------------------------
// Depositor Handlers
// ---------------------------------------------------------------------------

async fn deposit_native_handler(
    State(state): State<AppState>,
    payload: Result<Json<NativeDepositRequest>, JsonRejection>,
) -> Result<Json<DepositReceipt>, ApiError> {
    let Json(req) = payload?;
    let receipt = state
        .apply("deposit_native", |engine| {
            engine.deposit_native(req.depositor, req.amount)
        })
        .await?;
    state.publish(BankEvent::Deposit(receipt.clone()));
    Ok(Json(receipt))
}

async fn deposit_asset_handler(
    State(state): State<AppState>,
    payload: Result<Json<AssetDepositRequest>, JsonRejection>,
) -> Result<Json<DepositReceipt>, ApiError> {
    let Json(req) = payload?;
    let receipt = state
        .apply("deposit_asset", |engine| {
            engine.deposit_asset(req.depositor, req.asset, req.amount)
        })
        .await?;
    state.publish(BankEvent::Deposit(receipt.clone()));
    Ok(Json(receipt))
}

async fn withdraw_handler(
    State(state): State<AppState>,
    payload: Result<Json<WithdrawRequest>, JsonRejection>,
) -> Result<Json<WithdrawalReceipt>, ApiError> {
    let Json(req) = payload?;
    let receipt = state
        .apply("withdraw", |engine| engine.withdraw(req.depositor, req.amount))
        .await?;
    state.publish(BankEvent::Withdrawal(receipt.clone()));
    Ok(Json(receipt))
}

// ---------------------------------------------------------------------------
// Admin Handlers
// ---------------------------------------------------------------------------

async fn add_asset_handler(
    State(state): State<AppState>,
    payload: Result<Json<AddAssetRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let config = state
        .apply("add_asset", |engine| {
            engine.add_asset(&req.caller, req.asset, req.decimals, req.feed)
        })
        .await?;
    Ok((StatusCode::CREATED, Json(config)))
}

async fn remove_asset_handler(
    Path(asset): Path<String>,
    State(state): State<AppState>,
    payload: Result<Json<CallerRequest>, JsonRejection>,
) -> Result<Json<AssetConfig>, ApiError> {
    let asset = parse_asset(&asset)?;
    let Json(req) = payload?;
    let removed = state
        .apply("remove_asset", |engine| engine.remove_asset(&req.caller, &asset))
        .await?;
    Ok(Json(removed))
}

async fn halt_handler(
    State(state): State<AppState>,
    payload: Result<Json<CallerRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(req) = payload?;
    state.apply("halt", |engine| engine.halt(&req.caller)).await?;
    state.publish(BankEvent::StateChanged { halted: true });
    Ok(StatusCode::NO_CONTENT)
}

async fn resume_handler(
    State(state): State<AppState>,
    payload: Result<Json<CallerRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(req) = payload?;
    state.apply("resume", |engine| engine.resume(&req.caller)).await?;
    state.publish(BankEvent::StateChanged { halted: false });
    Ok(StatusCode::NO_CONTENT)
}

async fn authority_handler(
    State(state): State<AppState>,
    payload: Result<Json<AuthorityRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(req) = payload?;
    state
        .apply("transfer_authority", |engine| {
            engine.transfer_authority(&req.caller, req.new_authority)
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /admin/prices` — publish a round into the node's feed and reprice
/// every router pair quoted off that feed.
async fn price_handler(
    State(state): State<AppState>,
    payload: Result<Json<PriceRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(req) = payload?;
    if req.feed.trim().is_empty() {
        return Err(ApiError::BadRequest("feed must not be empty".into()));
    }
    if req.answer <= 0 {
        return Err(ApiError::BadRequest("answer must be positive".into()));
    }
    if req.decimals > MAX_ASSET_DECIMALS {
        return Err(ApiError::BadRequest(format!(
            "decimals must not exceed {MAX_ASSET_DECIMALS}"
        )));
    }
    let updated_at = req.updated_at.unwrap_or_else(|| state.clock.now());

    state
        .apply("update_price", |engine| {
            if req.caller != engine.authority() {
                return Err(BankError::Unauthorized { caller: req.caller });
            }
            // Nothing is written unless every pair can be priced.
            let rates = route_rates(engine, &req.feed, req.answer, req.decimals)?;
            state
                .price_feed
                .set_price(&req.feed, i128::from(req.answer), req.decimals, updated_at);
            let accounting = engine.config().accounting_asset;
            for (asset, numerator, denominator) in rates {
                state.router.set_rate(asset, accounting, numerator, denominator);
                state.router.set_rate(accounting, asset, denominator, numerator);
            }
            Ok(())
        })
        .await?;

    tracing::info!(feed = %req.feed, answer = req.answer, decimals = req.decimals, updated_at, "price published");
    state.publish(BankEvent::PriceUpdated {
        feed: req.feed,
        answer: req.answer,
        decimals: req.decimals,
        updated_at,
    });
    Ok(StatusCode::NO_CONTENT)
}

/// Router rates `(asset, numerator, denominator)` for every asset priced by
/// `feed`, quoted into the accounting asset.
fn route_rates(
    engine: &BankEngine,
    feed: &str,
    answer: i64,
    price_decimals: u8,
) -> BankResult<Vec<(AssetId, Amount, Amount)>> {
    let config = engine.config();

    let native = (config.native_feed == feed).then_some((AssetId::NATIVE, config.native_decimals));
    let tokens = engine
        .assets()
        .into_iter()
        .filter(|a| a.feed == feed)
        .map(|a| (a.asset, a.decimals));

    native
        .into_iter()
        .chain(tokens)
        .map(|(asset, decimals)| {
            let (numerator, denominator) =
                oracle_rate(answer, price_decimals, decimals, config.accounting_decimals)
                    .ok_or(BankError::ArithmeticOverflow("router rate"))?;
            Ok((asset, numerator, denominator))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// WebSocket
// ---------------------------------------------------------------------------

/// `GET /ws` — push-only stream of JSON-encoded [`BankEvent`]s.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

async fn handle_ws_connection(mut socket: WebSocket, state: AppState) {
    let mut rx = state.event_tx.subscribe();

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(ev) => {
                        let payload = match serde_json::to_string(&ev) {
                            Ok(s) => s,
                            Err(e) => {
                                tracing::warn!("failed to serialize ws event: {}", e);
                                continue;
                            }
                        };
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("ws subscriber lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

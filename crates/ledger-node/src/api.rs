use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ledger_core::{Block, CancelToken, Ledger, LedgerError, SearchHit, SharedLedger};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::task::JoinError;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MiningMode {
    /// Ledger lock held for the whole nonce search.
    CoarseLock,
    /// Search runs unlocked and commits with a tip check.
    Optimistic,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) ledger: SharedLedger,
    pub(crate) mining: MiningMode,
    pub(crate) mine_timeout: Option<Duration>,
}

#[derive(Serialize, Deserialize)]
struct Message {
    message: String,
}

#[derive(Deserialize)]
struct TxIn {
    #[serde(default)]
    tx: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Pending {
    pending_transactions: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TxAccepted {
    message: &'static str,
    pending_transactions: Vec<String>,
}

#[derive(Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
}

#[derive(Serialize)]
struct SearchResponse {
    query: String,
    count: usize,
    results: Vec<SearchHit>,
}

pub(crate) enum ApiError {
    Ledger(LedgerError),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Ledger(e) => {
                let status = match e {
                    LedgerError::EmptyTransaction
                    | LedgerError::EmptyPool
                    | LedgerError::EmptyQuery
                    | LedgerError::InvalidDifficulty { .. } => StatusCode::BAD_REQUEST,
                    LedgerError::StaleBlock { .. } | LedgerError::InvalidBlock { .. } => {
                        StatusCode::CONFLICT
                    }
                    LedgerError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
                    LedgerError::NonceExhausted { .. } => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.to_string())
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(Message { message })).into_response()
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError::Ledger(err)
    }
}

impl From<JoinError> for ApiError {
    fn from(err: JoinError) -> Self {
        ApiError::Internal(format!("ledger task failed: {err}"))
    }
}

pub(crate) fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health))
        .route("/chain", get(chain))
        .route("/pending", get(pending))
        .route("/tx", post(add_tx))
        .route("/mine", post(mine))
        .route("/search", get(search))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<Message> {
    Json(Message {
        message: "ok".to_string(),
    })
}

/// Runs a ledger call on the blocking pool. In coarse-lock mode a mining
/// request holds the lock for the whole search, and waiting for it must not
/// stall the async workers.
async fn with_ledger<R, F>(ledger: &SharedLedger, f: F) -> Result<R, ApiError>
where
    F: FnOnce(&SharedLedger) -> R + Send + 'static,
    R: Send + 'static,
{
    let ledger = ledger.clone();
    Ok(tokio::task::spawn_blocking(move || f(&ledger)).await?)
}

async fn chain(State(state): State<AppState>) -> Result<Json<Ledger>, ApiError> {
    Ok(Json(with_ledger(&state.ledger, SharedLedger::snapshot).await?))
}

async fn pending(State(state): State<AppState>) -> Result<Json<Pending>, ApiError> {
    let pending_transactions =
        with_ledger(&state.ledger, SharedLedger::pending_transactions).await?;
    Ok(Json(Pending {
        pending_transactions,
    }))
}

async fn add_tx(
    State(state): State<AppState>,
    payload: Result<Json<TxIn>, JsonRejection>,
) -> Result<Json<TxAccepted>, ApiError> {
    let Json(body) = payload.map_err(|_| ApiError::BadRequest("invalid JSON body".to_string()))?;
    let pending_transactions =
        with_ledger(&state.ledger, move |l| l.add_transaction(&body.tx)).await??;
    Ok(Json(TxAccepted {
        message: "transaction added",
        pending_transactions,
    }))
}

/// Mining is CPU-bound, so it runs on the blocking pool. In optimistic mode
/// the search is cancelled if the request is dropped or the timeout fires.
async fn mine(State(state): State<AppState>) -> Result<Json<Block>, ApiError> {
    let ledger = state.ledger.clone();
    let block = match state.mining {
        MiningMode::CoarseLock => {
            tokio::task::spawn_blocking(move || ledger.mine_next_block()).await?
        }
        MiningMode::Optimistic => {
            let token = CancelToken::new();
            let guard = token.drop_guard();
            let timer = state.mine_timeout.map(|timeout| {
                let token = token.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    warn!("mining exceeded {timeout:?}, cancelling");
                    token.cancel();
                })
            });
            let result = tokio::task::spawn_blocking(move || ledger.mine_optimistic(&token)).await;
            guard.disarm();
            if let Some(timer) = timer {
                timer.abort();
            }
            result?
        }
    }?;
    info!("block {} appended via /mine", block.index());
    Ok(Json(block))
}

async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, ApiError> {
    let query = params.q.trim().to_string();
    let results = with_ledger(&state.ledger, move |l| l.search(&params.q)).await??;
    Ok(Json(SearchResponse {
        query,
        count: results.len(),
        results,
    }))
}

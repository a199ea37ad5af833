//! # HTTP API
//!
//! Builds the axum router that exposes the node's query and submission
//! interface. All endpoints share application state through axum's `State`
//! extractor. Reads go straight to the ledger; writes go through the node's
//! event loop like any peer-submitted transaction.
//!
//! ## Endpoints
//!
//! | Method | Path                 | Description                              |
//! |--------|----------------------|------------------------------------------|
//! | GET    | `/health`            | Liveness probe                           |
//! | GET    | `/status`            | Node status summary                      |
//! | GET    | `/blocks/:id`        | Block by height or hex hash              |
//! | GET    | `/blocks`            | Newest-first page of blocks              |
//! | GET    | `/last-block`        | The local tip                            |
//! | GET    | `/txs/:hash`         | Committed transaction by hash            |
//! | GET    | `/txs`               | Newest-first page of transactions        |
//! | POST   | `/txs`               | Submit a signed transaction              |
//! | GET    | `/accounts/:address` | Account nonce and balance                |
//! | POST   | `/faucet`            | Send `FAUCET_AMOUNT` from the node key   |

use axum::{
    extract::{Path, Query, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use keel_protocol::config::FAUCET_AMOUNT;
use keel_protocol::crypto::{Address, Hash, Keypair, PublicKey, Signature};
use keel_protocol::ledger::LedgerError;
use keel_protocol::network::{NodeError, NodeHandle, PoolError};
use keel_protocol::storage::{Account, Block};
use keel_protocol::transaction::{sign_transaction, Transaction};

use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone, everything sits behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    /// Handle to the running node.
    pub node: NodeHandle,
    /// Key that funds faucet requests. `None` disables the faucet.
    pub faucet_key: Option<Arc<Keypair>>,
    pub metrics: SharedMetrics,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/blocks", get(blocks_handler))
        .route("/blocks/:id", get(block_handler))
        .route("/last-block", get(last_block_handler))
        .route("/txs", get(txs_handler).post(submit_tx_handler))
        .route("/txs/:hash", get(tx_handler))
        .route("/accounts/:address", get(account_handler))
        .route("/faucet", post(faucet_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error body for every non-2xx response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, error = %self.message, "request failed");
        }
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, format!("ledger error: {e}"))
    }
}

impl From<NodeError> for ApiError {
    fn from(e: NodeError) -> Self {
        let status = match &e {
            NodeError::InvalidTransaction(_) => StatusCode::BAD_REQUEST,
            NodeError::Pool(PoolError::AlreadyPending)
            | NodeError::Pool(PoolError::AccountHasPending(_))
            | NodeError::Pool(PoolError::Ledger(LedgerError::BadNonce { .. }))
            | NodeError::Ledger(LedgerError::Known) => StatusCode::CONFLICT,
            NodeError::Stopped => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ---------------------------------------------------------------------------
// Response Types
// ---------------------------------------------------------------------------

/// Response payload for `GET /status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub block_height: u32,
    pub last_block_hash: String,
    pub peer_count: usize,
    pub pending_transactions: usize,
    /// Address of the sealing key, if this node seals.
    pub validator: Option<String>,
    /// True while downloading, probing, or serving a peer's download.
    pub syncing: bool,
    /// RFC 3339 timestamp of the response.
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BlockDto {
    pub hash: String,
    pub version: u32,
    pub data_hash: String,
    pub prev_block_hash: String,
    pub height: u32,
    pub timestamp: u64,
    pub signer: String,
    pub signature: String,
    pub tx_count: usize,
    /// Hashes of the block's transactions, in block order.
    pub transactions: Vec<String>,
}

impl From<&Block> for BlockDto {
    fn from(block: &Block) -> Self {
        let header = block.header();
        Self {
            hash: block.hash_hex(),
            version: header.version,
            data_hash: hex::encode(header.data_hash),
            prev_block_hash: hex::encode(header.prev_block_hash),
            height: header.height,
            timestamp: header.timestamp,
            signer: block.signer().to_hex(),
            signature: block.signature().to_hex(),
            tx_count: block.tx_count(),
            transactions: block.transactions().iter().map(|t| t.hash_hex()).collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransactionDto {
    pub hash: String,
    pub nonce: u64,
    /// Set once the transaction is committed.
    pub block_height: Option<u32>,
    pub timestamp: Option<u64>,
    pub from: String,
    pub to: Option<String>,
    pub value: u64,
    /// Hex-encoded payload.
    pub data: String,
    pub signer: Option<String>,
    pub signature: Option<String>,
}

impl From<&Transaction> for TransactionDto {
    fn from(tx: &Transaction) -> Self {
        Self {
            hash: tx.hash_hex(),
            nonce: tx.nonce(),
            block_height: tx.block_height(),
            timestamp: tx.timestamp(),
            from: tx.from().to_hex(),
            to: tx.to().map(|a| a.to_hex()),
            value: tx.value(),
            data: hex::encode(tx.data()),
            signer: tx.signer().map(PublicKey::to_hex),
            signature: tx.signature().map(Signature::to_hex),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccountDto {
    pub address: String,
    pub nonce: u64,
    pub balance: u64,
}

impl From<&Account> for AccountDto {
    fn from(account: &Account) -> Self {
        Self {
            address: account.address.to_hex(),
            nonce: account.nonce,
            balance: account.balance,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BlockResponse {
    pub block: BlockDto,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BlocksResponse {
    pub blocks: Vec<BlockDto>,
    pub total_count: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransactionResponse {
    pub transaction: TransactionDto,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransactionsResponse {
    pub txs: Vec<TransactionDto>,
    pub total_count: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccountResponse {
    pub account: AccountDto,
}

/// Response to an accepted submission.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub hash: String,
}

// ---------------------------------------------------------------------------
// Request Types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct PageParams {
    /// 1-based page number.
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_size")]
    pub size: usize,
}

fn default_page() -> usize {
    1
}

fn default_size() -> usize {
    10
}

/// Body of `POST /txs`. Keys, signatures, addresses and data are hex.
#[derive(Debug, Deserialize)]
pub struct SubmitTxRequest {
    pub nonce: u64,
    pub from: String,
    pub to: Option<String>,
    pub value: u64,
    #[serde(default)]
    pub data: String,
    pub signer: String,
    pub signature: String,
}

impl SubmitTxRequest {
    fn into_transaction(self) -> Result<Transaction, ApiError> {
        let from = parse_address(&self.from)?;
        let to = self.to.as_deref().map(parse_address).transpose()?;
        let data = hex::decode(self.data.trim_start_matches("0x"))
            .map_err(|_| ApiError::bad_request("invalid data hex"))?;
        let signer = PublicKey::from_hex(&self.signer)
            .map_err(|e| ApiError::bad_request(format!("invalid signer: {e}")))?;
        let signature = Signature::from_hex(&self.signature)
            .map_err(|e| ApiError::bad_request(format!("invalid signature: {e}")))?;
        Ok(Transaction::from_signed_parts(
            self.nonce, from, to, self.value, data, signer, signature,
        ))
    }
}

/// Body of `POST /faucet`.
#[derive(Debug, Deserialize)]
pub struct FaucetRequest {
    pub address: String,
}

fn parse_address(s: &str) -> Result<Address, ApiError> {
    s.parse()
        .map_err(|e| ApiError::bad_request(format!("invalid address: {e}")))
}

fn parse_hash(s: &str) -> Result<Hash, ApiError> {
    let bytes = hex::decode(s.trim_start_matches("0x"))
        .map_err(|_| ApiError::bad_request("invalid hash hex"))?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| ApiError::bad_request("hash must be 32 bytes"))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health` — returns 200 if the node is alive.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /status` — returns node status summary.
async fn status_handler(State(state): State<AppState>) -> ApiResult<StatusResponse> {
    let node = &state.node;
    let tip = node.ledger().last_header()?;
    Ok(Json(StatusResponse {
        version: state.version.clone(),
        block_height: tip.height,
        last_block_hash: hex::encode(tip.hash()),
        peer_count: node.peer_count(),
        pending_transactions: node.pool().pending_count(),
        validator: node.validator_address().map(|a| a.to_hex()),
        syncing: node.is_syncing(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    }))
}

/// `GET /blocks/:id` — a decimal id is a height, anything else a hex hash.
async fn block_handler(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<BlockResponse> {
    let ledger = state.node.ledger();
    let block = match id.parse::<u32>() {
        Ok(height) => ledger.block_by_height(height)?,
        Err(_) => ledger.block_by_hash(&parse_hash(&id)?)?,
    };
    let block = block.ok_or_else(|| ApiError::not_found(format!("block {id} not found")))?;
    Ok(Json(BlockResponse {
        block: BlockDto::from(&block),
    }))
}

/// `GET /blocks?page&size` — newest first.
async fn blocks_handler(
    Query(params): Query<PageParams>,
    State(state): State<AppState>,
) -> ApiResult<BlocksResponse> {
    let page = state.node.ledger().blocks(params.page, params.size)?;
    Ok(Json(BlocksResponse {
        blocks: page.items.iter().map(BlockDto::from).collect(),
        total_count: page.total_count,
    }))
}

/// `GET /last-block`
async fn last_block_handler(State(state): State<AppState>) -> ApiResult<BlockResponse> {
    let block = state.node.ledger().last_block()?;
    Ok(Json(BlockResponse {
        block: BlockDto::from(&block),
    }))
}

/// `GET /txs/:hash` — committed transactions only.
async fn tx_handler(
    Path(hash): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<TransactionResponse> {
    let tx = state
        .node
        .ledger()
        .tx_by_hash(&parse_hash(&hash)?)?
        .ok_or_else(|| ApiError::not_found(format!("transaction {hash} not found")))?;
    Ok(Json(TransactionResponse {
        transaction: TransactionDto::from(&tx),
    }))
}

/// `GET /txs?page&size` — newest first.
async fn txs_handler(
    Query(params): Query<PageParams>,
    State(state): State<AppState>,
) -> ApiResult<TransactionsResponse> {
    let page = state.node.ledger().transactions(params.page, params.size)?;
    Ok(Json(TransactionsResponse {
        txs: page.items.iter().map(TransactionDto::from).collect(),
        total_count: page.total_count,
    }))
}

/// `POST /txs` — 200 when admitted, 400 when malformed or badly signed,
/// 409 when the pool or ledger already has it or the sender has one pending.
async fn submit_tx_handler(
    State(state): State<AppState>,
    Json(req): Json<SubmitTxRequest>,
) -> ApiResult<SubmitResponse> {
    let tx = req.into_transaction()?;
    let hash = tx.hash_hex();
    state.node.submit_transaction(tx).await?;
    tracing::info!(tx = %hash, "transaction submitted");
    Ok(Json(SubmitResponse { hash }))
}

/// `GET /accounts/:address`
async fn account_handler(
    Path(address): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<AccountResponse> {
    let address = parse_address(&address)?;
    let account = state
        .node
        .ledger()
        .account(&address)?
        .ok_or_else(|| ApiError::not_found("account not found"))?;
    Ok(Json(AccountResponse {
        account: AccountDto::from(&account),
    }))
}

/// `POST /faucet` — the node key sends `FAUCET_AMOUNT` to `address`.
async fn faucet_handler(
    State(state): State<AppState>,
    Json(req): Json<FaucetRequest>,
) -> ApiResult<SubmitResponse> {
    let key = state
        .faucet_key
        .as_ref()
        .ok_or_else(|| ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "faucet disabled"))?;
    let to = parse_address(&req.address)?;

    let nonce = state.node.ledger().nonce(&key.address())?.unwrap_or(0);
    let mut tx = Transaction::new(nonce, key.address(), Some(to), FAUCET_AMOUNT, Vec::new());
    sign_transaction(&mut tx, key);
    let hash = tx.hash_hex();
    state.node.submit_transaction(tx).await?;

    tracing::info!(to = %to, amount = FAUCET_AMOUNT, tx = %hash, "faucet transfer submitted");
    Ok(Json(SubmitResponse { hash }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

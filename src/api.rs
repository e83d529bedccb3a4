//! HTTP intake for exchange transaction records
//!
//! Every response body has the shape `{code, data, error}`; `data` is set on
//! success and `error` otherwise.

use axum::{
    body::Bytes,
    extract::{Request, State},
    http::{self, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::future::Future;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{error, info, warn};

use crate::error::ChainError;
use crate::persistence::Database;
use crate::pool::TransactionPool;
use crate::transaction::{Transaction, TxState};

/// Shared state of the intake routes.
#[derive(Clone)]
pub struct ApiState {
    pool: TransactionPool,
    db: Arc<Database>,
    access_token: Arc<str>,
    /// Cached last accepted sequence; the lock also serializes record intake.
    last_sequence: Arc<Mutex<Option<i64>>>,
}

impl ApiState {
    pub fn new(pool: TransactionPool, db: Arc<Database>, access_token: &str) -> Self {
        Self {
            pool,
            db,
            access_token: Arc::from(access_token),
            last_sequence: Arc::new(Mutex::new(None)),
        }
    }
}

// ============================================================================
// API Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    InvalidInput { param: String, msg: String },
    SequenceMismatch { expected: i64, actual: u64 },
    InternalError(String),
}

impl ApiError {
    fn invalid(param: &str, msg: impl Into<String>) -> Self {
        ApiError::InvalidInput {
            param: param.to_string(),
            msg: msg.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                json!({ "msg": "Authentication Error" }),
            ),
            ApiError::InvalidInput { param, msg } => {
                (StatusCode::BAD_REQUEST, json!({ "param": param, "msg": msg }))
            }
            ApiError::SequenceMismatch { expected, actual } => (
                StatusCode::EXPECTATION_FAILED,
                json!({
                    "param": "sequence",
                    "expected": expected,
                    "actual": actual,
                    "msg": "sequence is different from the expected value",
                }),
            ),
            ApiError::InternalError(msg) => {
                error!("API internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "msg": "Failed to transaction record." }),
                )
            }
        };

        (status, Json(ResponseData::failure(status, error))).into_response()
    }
}

impl From<ChainError> for ApiError {
    fn from(err: ChainError) -> Self {
        ApiError::InternalError(err.to_string())
    }
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ResponseData {
    pub code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl ResponseData {
    fn success(data: Value) -> Self {
        ResponseData {
            code: StatusCode::OK.as_u16(),
            data: Some(data),
            error: None,
        }
    }

    fn failure(status: StatusCode, error: Value) -> Self {
        ResponseData {
            code: status.as_u16(),
            data: None,
            error: Some(error),
        }
    }
}

// ============================================================================
// Field validation
// ============================================================================

fn required(body: &Map<String, Value>, param: &str) -> Result<String, ApiError> {
    let text = match body.get(param) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };
    if text.trim().is_empty() {
        return Err(ApiError::invalid(param, format!("{} is a required value", param)));
    }
    Ok(text)
}

fn numeric<T: FromStr>(body: &Map<String, Value>, param: &str) -> Result<T, ApiError> {
    required(body, param)?
        .trim()
        .parse::<T>()
        .map_err(|_| ApiError::invalid(param, format!("{} can only be numbers", param)))
}

/// Builds a transaction from a record body, reporting the first failing field.
fn parse_record(body: &Map<String, Value>) -> Result<Transaction, ApiError> {
    let sequence: u64 = numeric(body, "sequence")?;
    let trade_id = required(body, "trade_id")?;
    let user_id = required(body, "user_id")?;
    let state = required(body, "state")?.parse::<TxState>().map_err(|_| {
        ApiError::invalid(
            "state",
            "state input type error ,Enter \"0\" for charge or \"1\" for discharge",
        )
    })?;

    let amount = Some(required(body, "amount")?)
        .filter(|a| a.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|a| a.parse::<u64>().ok())
        .ok_or_else(|| ApiError::invalid("amount", "amount can only be numbers type string"))?;

    let timestamp: u32 = numeric(body, "timestamp")?;
    let exchange_user_id = required(body, "exchange_user_id")?;
    let exchange_id = required(body, "exchange_id")?;
    let signer = required(body, "signer")?;
    let signature = required(body, "signature")?;

    Ok(Transaction::new(
        trade_id,
        user_id,
        state,
        amount,
        timestamp,
        exchange_user_id,
        exchange_id,
    )
    .with_sequence(sequence)
    .with_signature(signer, signature))
}

// ============================================================================
// Utility Functions
// ============================================================================

/// Logs method, path, status and duration of every request.
async fn logging_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    info!(
        method = %method,
        path = %path,
        status = %response.status().as_u16(),
        duration_ms = %start.elapsed().as_millis(),
        "api.request"
    );

    response
}

// ============================================================================
// API Server
// ============================================================================

pub fn build_api_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods(vec![
            http::Method::GET,
            http::Method::POST,
            http::Method::OPTIONS,
        ])
        .allow_headers(vec![http::header::CONTENT_TYPE, http::header::AUTHORIZATION])
        .allow_credentials(true);

    Router::new()
        .route("/", get(health_check))
        .route("/tx/sequence", get(get_sequence))
        .route("/tx/record", post(post_transaction_record))
        .layer(middleware::from_fn(logging_middleware))
        .with_state(state)
        .layer(cors)
}

/// Serves the intake API on `addr` until `shutdown` resolves.
pub async fn run_api_server(
    state: ApiState,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ChainError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("API server listening on http://{}", addr);

    axum::serve(listener, build_api_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

// ============================================================================
// Route Handlers
// ============================================================================

async fn health_check() -> impl IntoResponse {
    Json("OK")
}

async fn get_sequence(State(state): State<ApiState>) -> Result<Json<ResponseData>, ApiError> {
    let sequence = state.db.get_last_receive_sequence()?;
    Ok(Json(ResponseData::success(json!({ "sequence": sequence }))))
}

async fn post_transaction_record(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ResponseData>, ApiError> {
    let authorized = headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|token| token == &*state.access_token)
        .unwrap_or(false);
    if !authorized {
        return Err(ApiError::Unauthorized);
    }

    let body: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::invalid("body", format!("Malformed JSON: {}", e)))?;
    let body = body
        .as_object()
        .ok_or_else(|| ApiError::invalid("body", "Request body must be a JSON object"))?;

    let tx = parse_record(body)?;
    if tx.validate_signature().is_err() {
        return Err(ApiError::invalid(
            "signature",
            "The signature value entered is not valid.",
        ));
    }

    let mut last_sequence = state.last_sequence.lock().await;
    let last = match *last_sequence {
        Some(last) => last,
        None => state.db.get_last_receive_sequence()?,
    };
    let expected = last + 1;
    if tx.sequence as i64 != expected {
        *last_sequence = Some(last);
        return Err(ApiError::SequenceMismatch {
            expected,
            actual: tx.sequence,
        });
    }

    let sequence = tx.sequence as i64;
    let hash = tx.hash();
    if state.pool.add_tx(tx)? == 0 {
        warn!(sequence, tx = %hash, "Transaction already pooled, record not added again");
    }
    state.db.set_last_receive_sequence(sequence)?;
    *last_sequence = Some(sequence);
    info!(sequence, "Accepted transaction record");

    Ok(Json(ResponseData::success(json!("SUCCESS"))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    fn record() -> Value {
        json!({
            "sequence": "0",
            "trade_id": "12345678",
            "user_id": "0x064c9Fc53d5936792845ca58778a52317fCf47F2",
            "state": "0",
            "amount": "123",
            "timestamp": 1668044556,
            "exchange_user_id": "997DE626B2D417F0361D61C09EB907A57226DB5B",
            "exchange_id": "a5c19fed89739383",
            "signer": "0x02",
            "signature": "0x00",
        })
    }

    fn failing_param(value: Value) -> String {
        match parse_record(&body(value)) {
            Err(ApiError::InvalidInput { param, .. }) => param,
            other => panic!("expected invalid input, got {:?}", other.map(|t| t.trade_id)),
        }
    }

    #[test]
    fn test_parse_record() {
        let tx = parse_record(&body(record())).unwrap();
        assert_eq!(tx.sequence, 0);
        assert_eq!(tx.amount, 123);
        assert_eq!(tx.state, TxState::Charge);
        assert_eq!(
            tx.hash().to_string(),
            "0x133f17377fc8dd6727afc80ac5428bac832deef8939c4c994c4bbc2806ed6715"
        );
    }

    #[test]
    fn test_first_failing_field_is_reported() {
        let mut value = record();
        value["trade_id"] = json!("");
        value["state"] = json!("7");
        assert_eq!(failing_param(value), "trade_id");

        let mut value = record();
        value["state"] = json!("7");
        assert_eq!(failing_param(value), "state");

        let mut value = record();
        value["amount"] = json!("1.5");
        assert_eq!(failing_param(value), "amount");

        let mut value = record();
        value["sequence"] = json!("first");
        assert_eq!(failing_param(value), "sequence");

        let mut value = record();
        value.as_object_mut().unwrap().remove("signature");
        assert_eq!(failing_param(value), "signature");
    }
}

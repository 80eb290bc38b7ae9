//! HTTP surface: an axum `Router` over `AppState`, matching the three
//! endpoints in the external interface table. Each handler performs the
//! same existence check the source's middleware chain performed, inline,
//! as an early return — axum's idiom favors plain handler functions over
//! per-route middleware structs for a check this small.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::ServiceError;
use crate::ledger::LedgerStore;
use crate::lookup::UserLookup;
use crate::models::PostedTransaction;
use crate::service::{PostTransactionRequest, TransactionService};

#[derive(Clone)]
pub struct AppState {
    pub ledger: LedgerStore,
    pub service: TransactionService,
    pub user_lookup: UserLookup,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/users/:user_id/transactions", post(post_transaction))
        .route("/api/v1/users/:user_id/balance", get(get_balance))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "healthy" }))
}

/// Request body accepts `amount` as either a JSON string or a JSON number;
/// this enum lets serde decode both without the caller needing to know
/// which one the client sent.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AmountField {
    Text(String),
    Number(serde_json::Number),
}

impl AmountField {
    fn into_string(self) -> String {
        match self {
            AmountField::Text(s) => s,
            AmountField::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PostTransactionBody {
    state: String,
    amount: AmountField,
    #[serde(rename = "transactionId")]
    transaction_id: String,
}

#[derive(Debug, Serialize)]
struct PostTransactionResponse {
    user_id: String,
    #[serde(with = "rust_decimal::serde::float")]
    balance_after: rust_decimal::Decimal,
    transaction_id: String,
    processed: bool,
}

impl From<PostedTransaction> for PostTransactionResponse {
    fn from(p: PostedTransaction) -> Self {
        Self {
            user_id: p.user_id,
            balance_after: p.balance_after,
            transaction_id: p.transaction_id,
            processed: p.processed,
        }
    }
}

async fn post_transaction(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<PostTransactionBody>,
) -> Result<Response, ServiceError> {
    if !validate_user(&state, &user_id).await? {
        return Err(ServiceError::BadRequest("invalid user".to_string()));
    }

    let source_name = headers
        .get("Source-Type")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServiceError::BadRequest("missing Source-Type header".to_string()))?
        .to_string();

    let req = PostTransactionRequest {
        transaction_id: body.transaction_id,
        state: body.state,
        amount: body.amount.into_string(),
        source_name,
    };

    let posted = state.service.process_transaction(&user_id, req).await?;
    let resp: PostTransactionResponse = posted.into();
    Ok((StatusCode::OK, Json(resp)).into_response())
}

#[derive(Debug, Serialize)]
struct BalanceResponse {
    #[serde(with = "rust_decimal::serde::float")]
    balance: rust_decimal::Decimal,
}

async fn get_balance(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Response, ServiceError> {
    if !validate_user(&state, &user_id).await? {
        return Err(ServiceError::BadRequest("invalid user".to_string()));
    }

    let balance = state
        .ledger
        .get_user_balance(&user_id)
        .await
        .map_err(ServiceError::from)?;

    Ok((StatusCode::OK, Json(BalanceResponse { balance })).into_response())
}

async fn validate_user(state: &AppState, user_id: &str) -> Result<bool, ServiceError> {
    state
        .user_lookup
        .exists_by_id(user_id)
        .await
        .map_err(|_| ServiceError::BadRequest("invalid user".to_string()))
}

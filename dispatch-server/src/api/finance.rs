//! Finance API: balance, ledger history, recharge, withdrawal, reconcile
//!
//! Every route acts on the caller's own account.

use axum::{
    Json, Router,
    extract::{Query, State},
    routing::{get, post},
};
use shared::models::Transaction;
use shared::request::{PaginationQuery, RechargeRequest, WithdrawRequest};
use shared::response::{AccountSummary, Page, ReconcileReport};

use crate::api::AppResult;
use crate::api::publisher::paginate;
use crate::auth::CurrentUser;
use crate::core::ServerState;
use crate::utils::validation::{MAX_SHORT_TEXT_LEN, validate_amount, validate_required_text};

pub fn router() -> Router<ServerState> {
    Router::new().nest("/api/finance", routes())
}

fn routes() -> Router<ServerState> {
    Router::new()
        .route("/account", get(account))
        .route("/transactions", get(transactions))
        .route("/recharge", post(recharge))
        .route("/withdraw", post(withdraw))
        .route("/reconcile", get(reconcile))
}

pub async fn account(
    State(state): State<ServerState>,
    user: CurrentUser,
) -> AppResult<Json<AccountSummary>> {
    let summary = state.settlement.account_summary(&user.id)?;
    Ok(Json(summary))
}

pub async fn transactions(
    State(state): State<ServerState>,
    user: CurrentUser,
    Query(page): Query<PaginationQuery>,
) -> AppResult<Json<Page<Transaction>>> {
    let txs = state.settlement.transactions(&user.id)?;
    Ok(Json(paginate(txs, &page)))
}

pub async fn recharge(
    State(state): State<ServerState>,
    user: CurrentUser,
    Json(payload): Json<RechargeRequest>,
) -> AppResult<Json<Transaction>> {
    validate_amount(payload.amount, "amount")?;
    validate_required_text(&payload.payment_method, "payment_method", MAX_SHORT_TEXT_LEN)?;
    let tx = state
        .settlement
        .recharge(&user.id, payload.amount, &payload.payment_method)?;
    Ok(Json(tx))
}

pub async fn withdraw(
    State(state): State<ServerState>,
    user: CurrentUser,
    Json(payload): Json<WithdrawRequest>,
) -> AppResult<Json<Transaction>> {
    validate_amount(payload.amount, "amount")?;
    validate_required_text(&payload.method, "method", MAX_SHORT_TEXT_LEN)?;
    let tx = state
        .settlement
        .request_withdrawal(&user.id, payload.amount, &payload.method)
        .await?;
    Ok(Json(tx))
}

pub async fn reconcile(
    State(state): State<ServerState>,
    user: CurrentUser,
) -> AppResult<Json<ReconcileReport>> {
    let report = state.settlement.reconcile(&user.id)?;
    Ok(Json(report))
}

//! Publisher API
//!
//! | 路径 | 方法 | 说明 |
//! |------|------|------|
//! | /api/publisher/orders | POST | 发布评论任务 |
//! | /api/publisher/account-rental | POST | 发布账号租赁 |
//! | /api/publisher/orders | GET | 我的订单 (分页) |
//! | /api/publisher/orders/{id} | GET | 订单详情 |
//! | /api/publisher/orders/{id}/cancel | POST | 取消未领取部分并退款 |
//! | /api/publisher/pending-review | GET | 待审核提交 |
//! | /api/publisher/review | POST | 审核 (发布者或管理员) |

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use shared::models::{MainOrder, SubOrder};
use shared::request::{
    CreateAccountRentalRequest, CreateCommentOrderRequest, PaginationQuery, ReviewRequest,
};
use shared::response::{OrderSummary, Page};

use crate::api::AppResult;
use crate::auth::CurrentUser;
use crate::core::ServerState;
use crate::utils::validation::{MAX_NOTE_LEN, validate_optional_text};

pub fn router() -> Router<ServerState> {
    Router::new().nest("/api/publisher", routes())
}

fn routes() -> Router<ServerState> {
    Router::new()
        .route("/orders", post(create_comment_order).get(list_orders))
        .route("/account-rental", post(create_account_rental))
        .route("/orders/{id}", get(get_order))
        .route("/orders/{id}/cancel", post(cancel_order))
        .route("/pending-review", get(pending_review))
        .route("/review", post(review))
}

pub async fn create_comment_order(
    State(state): State<ServerState>,
    user: CurrentUser,
    Json(payload): Json<CreateCommentOrderRequest>,
) -> AppResult<Json<MainOrder>> {
    let order = state.workflow.create_comment_order(&user, payload)?;
    Ok(Json(order))
}

pub async fn create_account_rental(
    State(state): State<ServerState>,
    user: CurrentUser,
    Json(payload): Json<CreateAccountRentalRequest>,
) -> AppResult<Json<MainOrder>> {
    let order = state.workflow.create_account_rental(&user, payload)?;
    Ok(Json(order))
}

pub async fn list_orders(
    State(state): State<ServerState>,
    user: CurrentUser,
    Query(page): Query<PaginationQuery>,
) -> AppResult<Json<Page<OrderSummary>>> {
    let orders = state.workflow.list_orders(&user)?;
    Ok(Json(paginate(orders, &page)))
}

pub async fn get_order(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<MainOrder>> {
    let order = state.workflow.order_detail(&user, &id)?;
    Ok(Json(order))
}

pub async fn cancel_order(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<MainOrder>> {
    let order = state.workflow.cancel_order(&user, &id)?;
    Ok(Json(order))
}

pub async fn pending_review(
    State(state): State<ServerState>,
    user: CurrentUser,
) -> AppResult<Json<Vec<SubOrder>>> {
    let subs = state.submissions.pending_reviews(&user)?;
    Ok(Json(subs))
}

pub async fn review(
    State(state): State<ServerState>,
    user: CurrentUser,
    Json(payload): Json<ReviewRequest>,
) -> AppResult<Json<SubOrder>> {
    validate_optional_text(&payload.reason, "reason", MAX_NOTE_LEN)?;
    let sub = state.submissions.review(
        &user,
        &payload.sub_order_id,
        payload.decision,
        payload.reason,
    )?;
    Ok(Json(sub))
}

/// Slice an already sorted list
pub(crate) fn paginate<T>(items: Vec<T>, query: &PaginationQuery) -> Page<T> {
    let total = items.len();
    let items = items
        .into_iter()
        .skip(query.offset())
        .take(query.limit())
        .collect();
    Page {
        items,
        total,
        page: query.page.max(1),
        per_page: query.limit() as u32,
    }
}

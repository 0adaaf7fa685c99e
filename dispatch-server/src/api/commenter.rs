//! Commenter API
//!
//! The claim cooldown lives here, in the session layer: a slot is reserved
//! before the claim and handed back when the claim fails.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use shared::models::{Role, SubOrder};
use shared::request::{EligibleFilter, SubmitEvidenceRequest};
use shared::response::{ClaimResponse, EligibleTask};
use shared::util::now_millis;

use crate::api::AppResult;
use crate::auth::CurrentUser;
use crate::core::ServerState;
use crate::utils::validation::{MAX_NOTE_LEN, MAX_URL_LEN, validate_max_len};

pub fn router() -> Router<ServerState> {
    Router::new().nest("/api/commenter", routes())
}

fn routes() -> Router<ServerState> {
    Router::new()
        .route("/tasks", get(list_tasks))
        .route("/tasks/{id}/claim", post(claim))
        .route("/tasks/{id}/submit", post(submit))
        .route("/my-tasks", get(my_tasks))
}

pub async fn list_tasks(
    State(state): State<ServerState>,
    user: CurrentUser,
    Query(filter): Query<EligibleFilter>,
) -> AppResult<Json<Vec<EligibleTask>>> {
    let tasks = state.claims.available_tasks(&user, &filter)?;
    Ok(Json(tasks))
}

pub async fn claim(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<ClaimResponse>> {
    user.require_role(Role::Commenter)?;
    let reservation = state.cooldown.reserve(&user.id, now_millis())?;
    match state.claims.claim(&user, &id) {
        Ok(claimed) => Ok(Json(claimed)),
        Err(e) => {
            reservation.release();
            Err(e.into())
        }
    }
}

pub async fn submit(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(payload): Json<SubmitEvidenceRequest>,
) -> AppResult<Json<SubOrder>> {
    validate_max_len(&payload.screenshot_url, "screenshot_url", MAX_URL_LEN)?;
    validate_max_len(&payload.comment_content, "comment_content", MAX_NOTE_LEN)?;
    let sub = state.submissions.submit(&user, &id, payload.into())?;
    Ok(Json(sub))
}

pub async fn my_tasks(
    State(state): State<ServerState>,
    user: CurrentUser,
) -> AppResult<Json<Vec<SubOrder>>> {
    let subs = state.claims.held_tasks(&user)?;
    Ok(Json(subs))
}

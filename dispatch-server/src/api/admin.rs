//! Admin maintenance routes

use axum::{Json, Router, extract::State, routing::post};
use shared::models::Role;
use shared::response::SweepReport;

use crate::api::AppResult;
use crate::auth::CurrentUser;
use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new().nest("/api/admin", routes())
}

fn routes() -> Router<ServerState> {
    Router::new().route("/claims/release-expired", post(release_expired))
}

/// Run the sweeper now instead of waiting for the next period
pub async fn release_expired(
    State(state): State<ServerState>,
    user: CurrentUser,
) -> AppResult<Json<SweepReport>> {
    user.require_role(Role::Admin)?;
    let report = state.sweep()?;
    tracing::info!(user_id = %user.id, released = report.released, "Manual sweep");
    Ok(Json(report))
}

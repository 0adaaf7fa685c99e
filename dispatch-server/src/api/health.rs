//! 健康检查
//!
//! | 路径 | 方法 | 认证 |
//! |------|------|------|
//! | /health | GET | 无 |
//!
//! Reports the settlement backlog next to liveness, so a stuck payout or
//! refund retry shows up without reading logs.

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;
use std::sync::OnceLock;
use std::time::Instant;

use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new().route("/health", get(health))
}

static STARTED: OnceLock<Instant> = OnceLock::new();

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok", or "degraded" when the order store cannot be read
    status: &'static str,
    version: &'static str,
    uptime_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pending_payouts: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pending_refunds: Option<usize>,
}

pub async fn health(State(state): State<ServerState>) -> Json<HealthResponse> {
    let uptime_seconds = STARTED.get_or_init(Instant::now).elapsed().as_secs();

    let backlog = state
        .orders
        .pending_payouts()
        .and_then(|payouts| Ok((payouts.len(), state.orders.pending_refunds()?.len())));

    let (status, pending_payouts, pending_refunds) = match backlog {
        Ok((payouts, refunds)) => ("ok", Some(payouts), Some(refunds)),
        Err(e) => {
            tracing::warn!(error = %e, "Health check could not read the order store");
            ("degraded", None, None)
        }
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds,
        pending_payouts,
        pending_refunds,
    })
}

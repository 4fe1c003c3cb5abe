mod verify;

pub use verify::*;

use axum::{Json, Router, routing::get};
use serde::Serialize;

use crate::db::AppState;
use crate::rate_limit::RateLimits;

use super::rate_limited;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn router(limits: Option<&RateLimits>) -> Router<AppState> {
    Router::new()
        .route(
            "/health",
            rate_limited(get(health), limits.map(|l| &l.relaxed)),
        )
        // Provider return URL: bounce the payer back to the site
        .route(
            "/payments/{provider}/verify",
            rate_limited(get(verify_return), limits.map(|l| &l.standard)),
        )
}

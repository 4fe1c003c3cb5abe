pub mod internal;
pub mod public;
pub mod webhooks;

use axum::{Router, routing::MethodRouter};
use tower_http::trace::TraceLayer;

use crate::db::AppState;
use crate::rate_limit::{RateLimitLayer, RateLimits};

/// Apply a rate limit tier to a route when limits are enabled.
fn rate_limited(
    route: MethodRouter<AppState>,
    layer: Option<&RateLimitLayer>,
) -> MethodRouter<AppState> {
    match layer {
        Some(layer) => route.layer(layer.clone()),
        None => route,
    }
}

/// The full HTTP surface. Pass `None` to skip rate limiting (tests).
pub fn app(state: AppState, limits: Option<RateLimits>) -> Router {
    Router::new()
        // Public endpoints (no auth)
        .merge(public::router(limits.as_ref()))
        // Webhook endpoints (provider-specific auth)
        .merge(webhooks::router())
        // Checkout creation and cancellation (internal key auth, not rate limited)
        .merge(internal::router(state.clone()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

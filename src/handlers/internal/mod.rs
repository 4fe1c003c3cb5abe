mod cancel;
mod request;

pub use cancel::*;
pub use request::*;

use axum::{
    Router, middleware,
    routing::post,
};

use crate::db::AppState;
use crate::middleware::internal_auth;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        // POST creates a checkout, GET ?uref= restarts an unpaid one
        .route(
            "/payments/{provider}/request",
            post(create_checkout).get(restart_checkout),
        )
        .route("/payments/{provider}/cancel", post(cancel_checkout))
        .route_layer(middleware::from_fn_with_state(state, internal_auth))
}

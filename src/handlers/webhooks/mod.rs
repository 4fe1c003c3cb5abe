pub mod common;
pub mod paypal;
pub mod stripe;

pub use paypal::handle_paypal_webhook;
pub use stripe::handle_stripe_webhook;

use axum::{Router, routing::post};

use crate::db::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/payments/paypal/webhook", post(handle_paypal_webhook))
        .route("/payments/stripe/webhook", post(handle_stripe_webhook))
}

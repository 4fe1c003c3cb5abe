use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::db::{AppState, queries};
use crate::error::{AppError, OptionExt, Result, msg};
use crate::extractors::{Json, Provider};

const DEFAULT_CANCEL_REASON: &str = "Cancelled by customer";

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub uref: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub uref: String,
    /// False when the checkout never had a subscription to cancel
    pub cancelled: bool,
}

pub async fn cancel_checkout(
    State(state): State<AppState>,
    Provider(provider): Provider,
    Json(request): Json<CancelRequest>,
) -> Result<Json<CancelResponse>> {
    let intent = {
        let conn = state.db.get()?;
        queries::get_checkout_intent(&conn, &request.uref)?
            .or_not_found(msg::CHECKOUT_NOT_FOUND)?
    };

    if intent.provider != provider {
        return Err(AppError::BadRequest(msg::PROVIDER_MISMATCH.into()));
    }

    let reason = request
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or(DEFAULT_CANCEL_REASON);

    let gateway = state.gateways.get(provider)?;
    let cancelled = gateway.cancel_subscription(&intent, reason).await?;

    if cancelled {
        let conn = state.db.get()?;
        queries::mark_checkout_cancelled(&conn, &intent.uref)?;
    } else {
        tracing::debug!("Checkout {} has no subscription to cancel", intent.uref);
    }

    Ok(Json(CancelResponse {
        uref: intent.uref,
        cancelled,
    }))
}

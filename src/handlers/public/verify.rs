use axum::{
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::db::{AppState, queries};
use crate::error::{OptionExt, Result, msg};
use crate::extractors::{Provider, Query};
use crate::util::append_query_params;

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    /// Checkout reference, added to the return URL at initiation
    pub sxref: String,
}

/// Provider return URL. Sends the payer on to the checkout's callback URL
/// with the reference attached; payment state is settled by webhooks, not here.
pub async fn verify_return(
    State(state): State<AppState>,
    Provider(provider): Provider,
    Query(query): Query<VerifyQuery>,
) -> Result<Response> {
    let conn = state.db.get()?;

    let intent = queries::get_checkout_intent(&conn, &query.sxref)?
        .or_not_found(msg::CHECKOUT_NOT_FOUND)?;

    if intent.provider != provider {
        tracing::debug!(
            "Checkout {} returned via {} but was started with {}",
            intent.uref,
            provider,
            intent.provider
        );
    }

    let location = append_query_params(&intent.callback_url, &[("sxref", &intent.uref)]);
    Ok((StatusCode::FOUND, [(header::LOCATION, location)]).into_response())
}

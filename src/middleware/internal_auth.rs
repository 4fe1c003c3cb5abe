use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::db::AppState;
use crate::util::extract_bearer_token;

/// Check the bearer token against the configured internal key.
///
/// With no key configured nothing is accepted.
fn authenticate_internal(expected: Option<&str>, headers: &HeaderMap) -> Result<(), StatusCode> {
    let expected = expected.ok_or(StatusCode::UNAUTHORIZED)?;
    let token = extract_bearer_token(headers).ok_or(StatusCode::UNAUTHORIZED)?;

    // Length is not secret; only the content comparison needs to be constant-time.
    if token.len() == expected.len() && bool::from(token.as_bytes().ct_eq(expected.as_bytes())) {
        Ok(())
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}

/// Guard for the internal checkout routes (`request`, `cancel`).
pub async fn internal_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if let Err(status) =
        authenticate_internal(state.internal_api_key.as_deref(), request.headers())
    {
        tracing::debug!("Rejected internal request to {}", request.uri().path());
        return Err(status);
    }
    Ok(next.run(request).await)
}

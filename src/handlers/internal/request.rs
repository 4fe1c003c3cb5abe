use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::db::{AppState, queries};
use crate::error::{AppError, OptionExt, Result, msg};
use crate::extractors::{Json, Provider, Query};
use crate::models::{
    CheckoutIntent, CompletionAction, CreateCheckoutIntent, Frequency, PaymentType,
};
use crate::payments::{
    CheckoutResult, CheckoutUrls, Gateway, MAX_PRICE_MINOR, PaymentProvider, parse_price,
};
use crate::util::{append_query_params, is_plausible_email, is_valid_callback_url};

/// Price as sent by the site builder: `"19.99"` or `19.99`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum PriceInput {
    Text(String),
    Number(serde_json::Number),
}

impl PriceInput {
    fn as_text(&self) -> String {
        match self {
            PriceInput::Text(s) => s.clone(),
            PriceInput::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub email: String,
    pub price: PriceInput,
    pub currency: String,
    pub payment_type: PaymentType,
    #[serde(default)]
    pub frequency: Option<Frequency>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub callback_url: String,
    #[serde(default)]
    pub on_success: CompletionAction,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub uref: String,
    #[serde(flatten)]
    pub result: CheckoutResult,
}

#[derive(Debug, Deserialize)]
pub struct RestartQuery {
    pub uref: String,
}

impl CheckoutRequest {
    fn validate(self, provider: PaymentProvider) -> Result<CreateCheckoutIntent> {
        let currency = self.currency.trim().to_uppercase();
        if currency.len() != 3 || !currency.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(AppError::BadRequest(msg::INVALID_CURRENCY.into()));
        }

        let price_minor = parse_price(&self.price.as_text(), &currency)
            .filter(|p| (1..=MAX_PRICE_MINOR).contains(p))
            .ok_or_else(|| AppError::BadRequest(msg::INVALID_PRICE.into()))?;

        let email = self.email.trim().to_string();
        if !is_plausible_email(&email) {
            return Err(AppError::BadRequest(msg::INVALID_EMAIL.into()));
        }

        if !is_valid_callback_url(&self.callback_url) {
            return Err(AppError::BadRequest(msg::INVALID_CALLBACK_URL.into()));
        }

        let frequency = match self.payment_type {
            PaymentType::Recurring => Some(
                self.frequency
                    .ok_or_else(|| AppError::BadRequest(msg::FREQUENCY_REQUIRED.into()))?,
            ),
            PaymentType::OneTime => None,
        };

        Ok(CreateCheckoutIntent {
            provider,
            email,
            price_minor,
            currency,
            payment_type: self.payment_type,
            frequency,
            metadata: self.metadata,
            callback_url: self.callback_url,
            on_success: self.on_success,
        })
    }
}

/// Return and cancel URLs handed to the provider.
pub fn checkout_urls(base_url: &str, intent: &CheckoutIntent) -> CheckoutUrls {
    let verify = format!(
        "{}/payments/{}/verify",
        base_url.trim_end_matches('/'),
        intent.provider
    );
    CheckoutUrls {
        return_url: append_query_params(&verify, &[("sxref", &intent.uref)]),
        cancel_url: append_query_params(
            &intent.callback_url,
            &[("sxref", &intent.uref), ("status", "cancelled")],
        ),
    }
}

/// Run the provider call and record the outcome on the checkout.
///
/// Provider failures are reported in the result (status 0, redirect to the
/// cancel URL) rather than as an HTTP error.
async fn initiate(
    state: &AppState,
    gateway: Gateway<'_>,
    intent: &CheckoutIntent,
) -> Result<CheckoutResult> {
    let urls = checkout_urls(&state.base_url, intent);

    match gateway.begin_checkout(intent, &urls).await {
        Ok(session) => {
            let conn = state.db.get()?;
            queries::set_checkout_provider_order(&conn, &intent.uref, &session.provider_ref)?;
            tracing::info!(
                "{} checkout started: checkout={}, provider_ref={}",
                gateway.provider(),
                intent.uref,
                session.provider_ref
            );
            Ok(CheckoutResult::success(session.approve_url))
        }
        Err(e) => {
            tracing::warn!("{} checkout failed for {}: {}", gateway.provider(), intent.uref, e);
            let message = match e {
                AppError::Authentication(m) | AppError::Provider(m) | AppError::BadRequest(m) => m,
                other => other.to_string(),
            };
            Ok(CheckoutResult::failure(&urls.cancel_url, message))
        }
    }
}

pub async fn create_checkout(
    State(state): State<AppState>,
    Provider(provider): Provider,
    Json(request): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>> {
    let gateway = state.gateways.get(provider)?;
    let input = request.validate(provider)?;

    let intent = {
        let conn = state.db.get()?;
        queries::create_checkout_intent(&conn, &input)?
    };

    let result = initiate(&state, gateway, &intent).await?;

    Ok(Json(CheckoutResponse {
        uref: intent.uref,
        result,
    }))
}

pub async fn restart_checkout(
    State(state): State<AppState>,
    Provider(provider): Provider,
    Query(query): Query<RestartQuery>,
) -> Result<Json<CheckoutResponse>> {
    let gateway = state.gateways.get(provider)?;

    let intent = {
        let conn = state.db.get()?;
        queries::get_checkout_intent(&conn, &query.uref)?
            .or_not_found(msg::CHECKOUT_NOT_FOUND)?
    };

    if intent.provider != provider {
        return Err(AppError::BadRequest(msg::PROVIDER_MISMATCH.into()));
    }
    if intent.paid {
        return Err(AppError::Conflict(msg::ALREADY_PAID.into()));
    }

    let result = initiate(&state, gateway, &intent).await?;

    Ok(Json(CheckoutResponse {
        uref: intent.uref,
        result,
    }))
}

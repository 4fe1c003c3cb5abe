use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};

use crate::db::{AppState, queries};
use crate::error::AppError;
use crate::payments::{
    CUSTOM_METADATA_KEY, PaymentProvider, StripeCheckoutSession, StripeClient, StripeInvoice,
    StripeWebhookEvent,
};
use crate::util::header_str;

use super::common::{
    ConfirmedPayment, WebhookEvent, WebhookProvider, WebhookResult, handle_webhook,
};

/// Stripe webhook provider implementation.
pub struct StripeWebhookProvider;

fn verify_delivery(
    client: &StripeClient,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<(), WebhookResult> {
    let signature = header_str(headers, "stripe-signature").ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            "Missing stripe-signature header".to_string(),
        )
    })?;

    match client.verify_webhook_signature(body, signature) {
        Ok(true) => Ok(()),
        Ok(false) => Err((StatusCode::UNAUTHORIZED, "Invalid signature".to_string())),
        Err(AppError::BadRequest(message)) => Err((StatusCode::BAD_REQUEST, message)),
        Err(e) => {
            tracing::error!("Stripe signature verification error: {}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Signature verification failed".to_string(),
            ))
        }
    }
}

fn checkout_completed(event: &StripeWebhookEvent) -> Result<WebhookEvent, WebhookResult> {
    let session: StripeCheckoutSession = serde_json::from_value(event.data.object.clone())
        .map_err(|e| {
            tracing::error!("Failed to parse Stripe checkout session: {}", e);
            (StatusCode::BAD_REQUEST, "Invalid checkout session".to_string())
        })?;

    if !session.is_paid() {
        tracing::debug!(
            "Stripe session {} completed with payment_status={}",
            session.id,
            session.payment_status
        );
        return Ok(WebhookEvent::Ignored);
    }

    let custom = session
        .metadata
        .get(CUSTOM_METADATA_KEY)
        .cloned()
        .or_else(|| session.client_reference_id.clone());

    match custom {
        Some(custom) => Ok(WebhookEvent::PaymentConfirmed(ConfirmedPayment {
            event_id: Some(event.id.clone()),
            custom,
            provider_subscription_id: session.subscription,
        })),
        None => {
            tracing::warn!("Stripe session {} has no checkout reference", session.id);
            Ok(WebhookEvent::Ignored)
        }
    }
}

async fn invoice_paid(
    client: &StripeClient,
    state: &AppState,
    event: &StripeWebhookEvent,
) -> Result<WebhookEvent, WebhookResult> {
    let invoice: StripeInvoice = serde_json::from_value(event.data.object.clone()).map_err(|e| {
        tracing::error!("Failed to parse Stripe invoice: {}", e);
        (StatusCode::BAD_REQUEST, "Invalid invoice".to_string())
    })?;

    let Some(subscription_id) = invoice.subscription_id() else {
        return Ok(WebhookEvent::Ignored);
    };

    let subscription = client.get_subscription(&subscription_id).await.map_err(|e| {
        tracing::warn!("Stripe subscription lookup failed for {}: {}", subscription_id, e);
        (StatusCode::BAD_REQUEST, e.to_string())
    })?;

    let custom = match subscription.metadata.get(CUSTOM_METADATA_KEY) {
        Some(custom) => Some(custom.clone()),
        None => state.db.get().ok().and_then(|conn| {
            queries::get_checkout_intent_by_subscription(
                &conn,
                PaymentProvider::Stripe,
                &subscription_id,
            )
            .ok()
            .flatten()
            .map(|intent| intent.uref)
        }),
    };

    match custom {
        Some(custom) => Ok(WebhookEvent::PaymentConfirmed(ConfirmedPayment {
            event_id: Some(event.id.clone()),
            custom,
            provider_subscription_id: Some(subscription.id),
        })),
        None => {
            tracing::warn!(
                "Stripe invoice {} for subscription {} has no checkout reference",
                invoice.id,
                subscription_id
            );
            Ok(WebhookEvent::Ignored)
        }
    }
}

impl WebhookProvider for StripeWebhookProvider {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Stripe
    }

    async fn parse_event(
        &self,
        state: &AppState,
        headers: &HeaderMap,
        body: &Bytes,
    ) -> Result<WebhookEvent, WebhookResult> {
        let Some(client) = state.gateways.stripe.as_ref() else {
            tracing::warn!("Stripe webhook received but Stripe is not configured");
            return Ok(WebhookEvent::Ignored);
        };

        verify_delivery(client, headers, body)?;

        let event: StripeWebhookEvent = match serde_json::from_slice(body) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!("Unparseable Stripe webhook body: {}", e);
                return Ok(WebhookEvent::Ignored);
            }
        };

        match event.event_type.as_str() {
            "checkout.session.completed" => checkout_completed(&event),
            "invoice.paid" => invoice_paid(client, state, &event).await,
            _ => Ok(WebhookEvent::Ignored),
        }
    }
}

pub async fn handle_stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    handle_webhook(&StripeWebhookProvider, &state, headers, body).await
}

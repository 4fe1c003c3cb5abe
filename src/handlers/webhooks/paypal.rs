use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};

use crate::db::{AppState, queries};
use crate::payments::{
    CustomField, PayPalClient, PayPalWebhookEvent, PaymentProvider, TransmissionHeaders,
};
use crate::util::header_str;

use super::common::{
    ConfirmedPayment, WebhookEvent, WebhookProvider, WebhookResult, handle_webhook,
};

/// PayPal webhook provider implementation.
pub struct PayPalWebhookProvider;

fn transmission_headers(headers: &HeaderMap) -> Option<TransmissionHeaders> {
    Some(TransmissionHeaders {
        auth_algo: header_str(headers, "paypal-auth-algo")?.to_string(),
        cert_url: header_str(headers, "paypal-cert-url")?.to_string(),
        transmission_id: header_str(headers, "paypal-transmission-id")?.to_string(),
        transmission_sig: header_str(headers, "paypal-transmission-sig")?.to_string(),
        transmission_time: header_str(headers, "paypal-transmission-time")?.to_string(),
    })
}

async fn verify_delivery(
    client: &PayPalClient,
    headers: &HeaderMap,
    raw: &serde_json::Value,
) -> Result<(), WebhookResult> {
    if client.webhook_id().is_none() {
        return Ok(());
    }

    let transmission = transmission_headers(headers).ok_or_else(|| {
        (
            StatusCode::UNAUTHORIZED,
            "Missing PayPal transmission headers".to_string(),
        )
    })?;

    match client.verify_webhook_signature(&transmission, raw).await {
        Ok(true) => Ok(()),
        Ok(false) => Err((StatusCode::UNAUTHORIZED, "Invalid signature".to_string())),
        Err(e) => {
            tracing::error!("PayPal signature verification error: {}", e);
            Err((StatusCode::BAD_REQUEST, e.to_string()))
        }
    }
}

/// `CHECKOUT.ORDER.APPROVED`: capture the order unless the checkout is already paid.
async fn order_approved(
    client: &PayPalClient,
    state: &AppState,
    event: &PayPalWebhookEvent,
) -> Result<WebhookEvent, WebhookResult> {
    let Some(order_id) = event.resource["id"].as_str() else {
        return Ok(WebhookEvent::Ignored);
    };
    let approved_custom = event.resource["purchase_units"][0]["custom_id"]
        .as_str()
        .map(str::to_string);

    // Redelivery after a successful capture: answer without capturing again.
    if let Some(custom) = approved_custom.as_deref().and_then(CustomField::decode) {
        let already_paid = state
            .db
            .get()
            .ok()
            .and_then(|conn| queries::get_checkout_intent(&conn, &custom.uref).ok().flatten())
            .is_some_and(|intent| intent.paid);
        if already_paid {
            return Ok(WebhookEvent::PaymentConfirmed(ConfirmedPayment {
                event_id: Some(event.id.clone()),
                custom: custom.uref,
                provider_subscription_id: None,
            }));
        }
    }

    let captured = client.capture_order(order_id).await.map_err(|e| {
        tracing::warn!("PayPal capture failed for order {}: {}", order_id, e);
        (StatusCode::BAD_REQUEST, e.to_string())
    })?;

    let custom = captured
        .custom_id()
        .map(str::to_string)
        .or(approved_custom);

    match custom {
        Some(custom) => Ok(WebhookEvent::PaymentConfirmed(ConfirmedPayment {
            event_id: Some(event.id.clone()),
            custom,
            provider_subscription_id: None,
        })),
        None => {
            tracing::warn!("PayPal order {} captured without a custom_id", order_id);
            Ok(WebhookEvent::Ignored)
        }
    }
}

/// `PAYMENT.SALE.COMPLETED`: a subscription charge went through.
async fn sale_completed(
    client: &PayPalClient,
    state: &AppState,
    event: &PayPalWebhookEvent,
) -> Result<WebhookEvent, WebhookResult> {
    let Some(subscription_id) = event.resource["billing_agreement_id"].as_str() else {
        // One-time sales are handled through CHECKOUT.ORDER.APPROVED
        return Ok(WebhookEvent::Ignored);
    };

    let subscription = client.get_subscription(subscription_id).await.map_err(|e| {
        tracing::warn!("PayPal subscription lookup failed for {}: {}", subscription_id, e);
        (StatusCode::BAD_REQUEST, e.to_string())
    })?;

    let custom = match subscription.custom_id.filter(|c| !c.is_empty()) {
        Some(custom) => Some(custom),
        None => state.db.get().ok().and_then(|conn| {
            queries::get_checkout_intent_by_subscription(
                &conn,
                PaymentProvider::PayPal,
                subscription_id,
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
            tracing::warn!("PayPal subscription {} has no checkout reference", subscription_id);
            Ok(WebhookEvent::Ignored)
        }
    }
}

impl WebhookProvider for PayPalWebhookProvider {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::PayPal
    }

    async fn parse_event(
        &self,
        state: &AppState,
        headers: &HeaderMap,
        body: &Bytes,
    ) -> Result<WebhookEvent, WebhookResult> {
        let Some(client) = state.gateways.paypal.as_ref() else {
            tracing::warn!("PayPal webhook received but PayPal is not configured");
            return Ok(WebhookEvent::Ignored);
        };

        let raw: serde_json::Value = match serde_json::from_slice(body) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::debug!("Unparseable PayPal webhook body: {}", e);
                return Ok(WebhookEvent::Ignored);
            }
        };

        verify_delivery(client, headers, &raw).await?;

        let event: PayPalWebhookEvent = match serde_json::from_value(raw) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!("PayPal webhook without id/event_type: {}", e);
                return Ok(WebhookEvent::Ignored);
            }
        };

        match event.event_type.as_str() {
            "CHECKOUT.ORDER.APPROVED" => order_approved(client, state, &event).await,
            "PAYMENT.SALE.COMPLETED" => sale_completed(client, state, &event).await,
            other => {
                tracing::debug!("Ignoring PayPal event {}", other);
                Ok(WebhookEvent::Ignored)
            }
        }
    }
}

pub async fn handle_paypal_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    handle_webhook(&PayPalWebhookProvider, &state, headers, body).await
}

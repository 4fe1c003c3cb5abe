//! Provider-agnostic webhook reconciliation.
//!
//! Each provider adapter authenticates the delivery and turns it into a
//! [`WebhookEvent`]. Confirmed payments then go through the same
//! transaction: record the event id, attach the subscription id, flip the
//! checkout to paid, and run its completion action.

use std::future::Future;

use axum::{
    body::Bytes,
    http::{HeaderMap, StatusCode},
};
use rusqlite::{Connection, TransactionBehavior};

use crate::completion::CompletionRegistry;
use crate::db::{AppState, queries};
use crate::payments::{CustomField, PaymentProvider};

/// Result type for webhook operations: status plus plain-text body.
pub type WebhookResult = (StatusCode, String);

/// Body sent once a delivery has been reconciled (now or previously).
pub const SUCCESSFUL: &str = "successful";

/// Acknowledge a delivery we have nothing to do for.
pub fn ignored() -> WebhookResult {
    (StatusCode::OK, String::new())
}

fn database_error(e: impl std::fmt::Display) -> WebhookResult {
    tracing::error!("Webhook database error: {}", e);
    (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
}

/// A provider reported money received for a checkout.
#[derive(Debug, Clone)]
pub struct ConfirmedPayment {
    /// Provider's event id, used to drop redeliveries
    pub event_id: Option<String>,
    /// Custom field as echoed back by the provider
    pub custom: String,
    pub provider_subscription_id: Option<String>,
}

/// Parsed webhook event with provider-agnostic data.
#[derive(Debug)]
pub enum WebhookEvent {
    PaymentConfirmed(ConfirmedPayment),
    /// Event type or state not relevant to checkouts
    Ignored,
}

/// What reconciliation did with a confirmed payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// This delivery flipped the checkout to paid and ran its action.
    Paid { uref: String },
    /// Already reconciled by an earlier delivery.
    AlreadyProcessed { uref: String },
    /// No checkout matches the custom field.
    UnknownCheckout,
}

impl ReconcileOutcome {
    pub fn into_response(self) -> WebhookResult {
        match self {
            Self::Paid { .. } | Self::AlreadyProcessed { .. } => {
                (StatusCode::OK, SUCCESSFUL.to_string())
            }
            Self::UnknownCheckout => ignored(),
        }
    }
}

/// Provider-specific authentication and parsing.
pub trait WebhookProvider: Send + Sync {
    fn provider(&self) -> PaymentProvider;

    /// Authenticate the delivery and parse it into a provider-agnostic event.
    ///
    /// May call the provider API (capture, subscription lookup). Errors are
    /// returned as ready-made responses.
    fn parse_event(
        &self,
        state: &AppState,
        headers: &HeaderMap,
        body: &Bytes,
    ) -> impl Future<Output = Result<WebhookEvent, WebhookResult>> + Send;
}

/// Shared entry point for all provider webhook routes.
pub async fn handle_webhook<P: WebhookProvider>(
    provider: &P,
    state: &AppState,
    headers: HeaderMap,
    body: Bytes,
) -> WebhookResult {
    if body.iter().all(u8::is_ascii_whitespace) {
        return ignored();
    }

    let event = match provider.parse_event(state, &headers, &body).await {
        Ok(event) => event,
        Err(response) => return response,
    };

    let payment = match event {
        WebhookEvent::PaymentConfirmed(payment) => payment,
        WebhookEvent::Ignored => return ignored(),
    };

    let mut conn = match state.db.get() {
        Ok(conn) => conn,
        Err(e) => return database_error(e),
    };

    match process_confirmed_payment(&mut conn, &state.completions, provider.provider(), &payment) {
        Ok(outcome) => outcome.into_response(),
        Err(response) => response,
    }
}

/// Reconcile a confirmed payment against its checkout.
///
/// Everything happens in one transaction, so a failed completion action
/// leaves no trace and the provider's redelivery gets a clean retry.
pub fn process_confirmed_payment(
    conn: &mut Connection,
    completions: &CompletionRegistry,
    provider: PaymentProvider,
    payment: &ConfirmedPayment,
) -> Result<ReconcileOutcome, WebhookResult> {
    let Some(custom) = CustomField::decode(&payment.custom) else {
        tracing::warn!("{} webhook carried an unreadable custom field", provider);
        return Ok(ReconcileOutcome::UnknownCheckout);
    };
    let uref = custom.uref;

    let intent = match queries::get_checkout_intent(conn, &uref) {
        Ok(Some(intent)) if intent.provider == provider => intent,
        Ok(Some(intent)) => {
            tracing::warn!(
                "{} webhook for checkout {} which belongs to {}",
                provider,
                uref,
                intent.provider
            );
            return Ok(ReconcileOutcome::UnknownCheckout);
        }
        Ok(None) => {
            tracing::warn!("{} webhook for unknown checkout {}", provider, uref);
            return Ok(ReconcileOutcome::UnknownCheckout);
        }
        Err(e) => return Err(database_error(e)),
    };

    if intent.paid && payment.provider_subscription_id.is_none() {
        return Ok(ReconcileOutcome::AlreadyProcessed { uref });
    }

    // Write lock up front; concurrent deliveries wait on the busy timeout.
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(database_error)?;

    // 1. Replay prevention (rolls back with everything else)
    if let Some(event_id) = payment.event_id.as_deref() {
        match queries::try_record_webhook_event(&tx, provider.as_str(), event_id) {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!("{} event {} already processed", provider, event_id);
                return Ok(ReconcileOutcome::AlreadyProcessed { uref });
            }
            Err(e) => return Err(database_error(e)),
        }
    }

    // 2. Subscription id, for recurring payments
    if let Some(subscription_id) = payment.provider_subscription_id.as_deref() {
        queries::set_checkout_subscription(&tx, &uref, subscription_id)
            .map_err(database_error)?;
    }

    // 3. Compare-and-swap on paid. Losers commit whatever step 2 changed and stop.
    let won = queries::try_mark_checkout_paid(&tx, &uref).map_err(database_error)?;
    if !won {
        tx.commit().map_err(database_error)?;
        return Ok(ReconcileOutcome::AlreadyProcessed { uref });
    }

    // 4. Completion action sees the row as it is now
    let intent = match queries::get_checkout_intent(&tx, &uref) {
        Ok(Some(updated)) => updated,
        Ok(None) => intent,
        Err(e) => return Err(database_error(e)),
    };
    if let Err(e) = completions.dispatch(&tx, &intent) {
        tracing::error!("Completion action failed for {}: {}", uref, e);
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            "Completion action failed".to_string(),
        ));
    }

    tx.commit().map_err(database_error)?;

    tracing::info!(
        "{} payment confirmed: checkout={}, subscription={:?}",
        provider,
        uref,
        payment.provider_subscription_id
    );

    Ok(ReconcileOutcome::Paid { uref })
}

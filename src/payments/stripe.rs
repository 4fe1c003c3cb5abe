use std::collections::HashMap;

use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::config::StripeConfig;
use crate::error::{AppError, Result, msg};
use crate::models::{CheckoutIntent, Frequency, PaymentType};

use super::{
    CheckoutSession, CheckoutUrls, CustomField, PaymentProvider, STRIPE_CUSTOM_FIELD_LIMIT,
    provider_error,
};

type HmacSha256 = Hmac<Sha256>;

/// Metadata key the custom field travels under.
pub const CUSTOM_METADATA_KEY: &str = "custom";

#[derive(Debug, Deserialize)]
struct CreateCheckoutSessionResponse {
    id: String,
    url: String,
}

/// Amount as Stripe wants it in `unit_amount`.
///
/// JPY is zero-decimal on Stripe too. HUF and TWD are sent in hundredths
/// even though they are charged in whole units.
pub fn stripe_unit_amount(price_minor: i64, currency: &str) -> Result<i64> {
    let amount = match currency.to_ascii_uppercase().as_str() {
        "HUF" | "TWD" => price_minor.checked_mul(100),
        _ => Some(price_minor),
    };
    amount.ok_or_else(|| AppError::BadRequest(msg::INVALID_PRICE.into()))
}

#[derive(Debug, Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: String,
    webhook_secret: String,
    api_base: String,
}

impl StripeClient {
    pub fn new(config: &StripeConfig, client: Client) -> Self {
        Self {
            client,
            secret_key: config.secret_key.clone(),
            webhook_secret: config.webhook_secret.clone(),
            api_base: config.api_base().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    /// Create a hosted Checkout Session priced inline from the checkout.
    pub async fn create_checkout_session(
        &self,
        intent: &CheckoutIntent,
        urls: &CheckoutUrls,
    ) -> Result<CheckoutSession> {
        let custom = CustomField::from_intent(intent).encode_for(STRIPE_CUSTOM_FIELD_LIMIT)?;
        let unit_amount = stripe_unit_amount(intent.price_minor, &intent.currency)?.to_string();
        let currency = intent.currency.to_lowercase();
        let name = intent.plan_name();

        let mut form: Vec<(&str, &str)> = vec![
            ("success_url", urls.return_url.as_str()),
            ("cancel_url", urls.cancel_url.as_str()),
            ("client_reference_id", intent.uref.as_str()),
            ("customer_email", intent.email.as_str()),
            ("line_items[0][quantity]", "1"),
            ("line_items[0][price_data][currency]", currency.as_str()),
            ("line_items[0][price_data][unit_amount]", unit_amount.as_str()),
            ("line_items[0][price_data][product_data][name]", name.as_str()),
            ("metadata[custom]", custom.as_str()),
        ];

        match (intent.payment_type, intent.frequency) {
            (PaymentType::OneTime, _) => {
                form.push(("mode", "payment"));
                form.push(("payment_intent_data[metadata][custom]", custom.as_str()));
            }
            (PaymentType::Recurring, Some(frequency)) => {
                let interval = match frequency {
                    Frequency::Monthly => "month",
                    Frequency::Annually => "year",
                };
                form.push(("mode", "subscription"));
                form.push(("line_items[0][price_data][recurring][interval]", interval));
                form.push(("subscription_data[metadata][custom]", custom.as_str()));
            }
            (PaymentType::Recurring, None) => {
                return Err(AppError::BadRequest(msg::FREQUENCY_REQUIRED.into()));
            }
        }

        let response = self
            .client
            .post(self.url("/v1/checkout/sessions"))
            .basic_auth(&self.secret_key, None::<&str>)
            .form(&form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(provider_error(PaymentProvider::Stripe, response).await);
        }

        let session: CreateCheckoutSessionResponse = response.json().await?;
        tracing::debug!("Created Stripe session {} for {}", session.id, intent.uref);

        Ok(CheckoutSession {
            provider_ref: session.id,
            approve_url: session.url,
        })
    }

    pub async fn get_subscription(&self, subscription_id: &str) -> Result<StripeSubscription> {
        let response = self
            .client
            .get(self.url(&format!("/v1/subscriptions/{}", subscription_id)))
            .basic_auth(&self.secret_key, None::<&str>)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(provider_error(PaymentProvider::Stripe, response).await);
        }

        Ok(response.json().await?)
    }

    pub async fn cancel_subscription(&self, subscription_id: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("/v1/subscriptions/{}", subscription_id)))
            .basic_auth(&self.secret_key, None::<&str>)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(provider_error(PaymentProvider::Stripe, response).await);
        }

        tracing::info!("Cancelled Stripe subscription {}", subscription_id);
        Ok(())
    }

    /// Maximum age of a webhook timestamp before it's rejected (in seconds).
    /// Stripe recommends 300 seconds (5 minutes).
    const WEBHOOK_TIMESTAMP_TOLERANCE_SECS: i64 = 300;

    /// Check a `Stripe-Signature` header (`t=...,v1=...`) against the raw body.
    pub fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> Result<bool> {
        let mut timestamp = None;
        let mut candidates = Vec::new();

        for part in signature.split(',') {
            let part = part.trim();
            if let Some(t) = part.strip_prefix("t=") {
                timestamp = Some(t);
            } else if let Some(s) = part.strip_prefix("v1=") {
                candidates.push(s);
            }
        }

        let timestamp_str =
            timestamp.ok_or_else(|| AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()))?;
        if candidates.is_empty() {
            return Err(AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()));
        }

        let timestamp: i64 = timestamp_str
            .parse()
            .map_err(|_| AppError::BadRequest(msg::INVALID_TIMESTAMP_IN_SIGNATURE.into()))?;

        let age = chrono::Utc::now().timestamp() - timestamp;
        if age > Self::WEBHOOK_TIMESTAMP_TOLERANCE_SECS {
            tracing::warn!(
                "Stripe webhook rejected: timestamp too old (age={}s, max={}s)",
                age,
                Self::WEBHOOK_TIMESTAMP_TOLERANCE_SECS
            );
            return Ok(false);
        }
        // Clock skew tolerance: 60 seconds
        if age < -60 {
            tracing::warn!("Stripe webhook rejected: timestamp in the future (age={}s)", age);
            return Ok(false);
        }

        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())
            .map_err(|_| AppError::Internal(msg::INVALID_WEBHOOK_SECRET.into()))?;
        mac.update(timestamp_str.as_bytes());
        mac.update(b".");
        mac.update(payload);
        let expected = hex::encode(mac.finalize().into_bytes());
        let expected = expected.as_bytes();

        // Stripe sends one v1 entry per active secret during rotation.
        Ok(candidates.iter().any(|candidate| {
            let provided = candidate.as_bytes();
            provided.len() == expected.len() && bool::from(expected.ct_eq(provided))
        }))
    }
}

/// Generic Stripe webhook event; `data.object` is parsed based on `event_type`.
#[derive(Debug, Deserialize)]
pub struct StripeWebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

// ============ checkout.session.completed ============

#[derive(Debug, Deserialize)]
pub struct StripeCheckoutSession {
    pub id: String,
    pub mode: Option<String>, // "payment" or "subscription"
    pub payment_status: String,
    pub client_reference_id: Option<String>,
    pub subscription: Option<String>, // Present for subscription mode
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl StripeCheckoutSession {
    pub fn is_paid(&self) -> bool {
        matches!(self.payment_status.as_str(), "paid" | "no_payment_required")
    }
}

// ============ invoice.paid ============

#[derive(Debug, Deserialize)]
pub struct StripeInvoice {
    pub id: String,
    pub subscription: Option<String>,
    pub billing_reason: Option<String>, // "subscription_create", "subscription_cycle", etc.
    pub status: Option<String>,         // "paid", "open", etc.
    #[serde(default)]
    pub parent: Option<serde_json::Value>,
}

impl StripeInvoice {
    /// Subscription id, from the top-level field or the newer `parent` block.
    pub fn subscription_id(&self) -> Option<String> {
        self.subscription.clone().or_else(|| {
            self.parent
                .as_ref()?
                .pointer("/subscription_details/subscription")?
                .as_str()
                .map(str::to_string)
        })
    }
}

// ============ GET /v1/subscriptions/{id} ============

#[derive(Debug, Deserialize)]
pub struct StripeSubscription {
    pub id: String,
    pub status: String, // "active", "canceled", etc.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

mod custom_field;
mod paypal;
mod price;
mod stripe;
mod token_cache;

pub use custom_field::*;
pub use paypal::*;
pub use price::*;
pub use stripe::*;
pub use token_cache::*;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{AppError, Result, msg};
use crate::models::CheckoutIntent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentProvider {
    PayPal,
    Stripe,
}

impl PaymentProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PayPal => "paypal",
            Self::Stripe => "stripe",
        }
    }
}

impl std::str::FromStr for PaymentProvider {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "paypal" => Ok(Self::PayPal),
            "stripe" => Ok(Self::Stripe),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for PaymentProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of starting a hosted checkout, in the shape callers already consume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutResult {
    pub redirect: String,
    /// 1 on success, 0 on failure
    pub status: u8,
    pub response: String,
}

impl CheckoutResult {
    pub fn success(redirect: String) -> Self {
        Self {
            redirect,
            status: 1,
            response: "success".to_string(),
        }
    }

    pub fn failure(cancel_url: &str, message: String) -> Self {
        Self {
            redirect: cancel_url.to_string(),
            status: 0,
            response: message,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 1
    }
}

/// Where the provider sends the payer back to.
#[derive(Debug, Clone)]
pub struct CheckoutUrls {
    pub return_url: String,
    pub cancel_url: String,
}

/// A provider-side checkout that the payer must now approve.
#[derive(Debug, Clone)]
pub struct CheckoutSession {
    /// PayPal order/subscription id or Stripe checkout session id
    pub provider_ref: String,
    pub approve_url: String,
}

/// Configured provider clients.
#[derive(Debug, Clone, Default)]
pub struct Gateways {
    pub paypal: Option<PayPalClient>,
    pub stripe: Option<StripeClient>,
}

impl Gateways {
    pub fn from_config(config: &Config, http: reqwest::Client, tokens: Arc<TokenCache>) -> Self {
        Self {
            paypal: config
                .paypal
                .as_ref()
                .map(|c| PayPalClient::new(c, http.clone(), tokens)),
            stripe: config
                .stripe
                .as_ref()
                .map(|c| StripeClient::new(c, http.clone())),
        }
    }

    pub fn get(&self, provider: PaymentProvider) -> Result<Gateway<'_>> {
        let gateway = match provider {
            PaymentProvider::PayPal => self.paypal.as_ref().map(Gateway::PayPal),
            PaymentProvider::Stripe => self.stripe.as_ref().map(Gateway::Stripe),
        };
        gateway.ok_or_else(|| AppError::BadRequest(msg::PROVIDER_NOT_CONFIGURED.into()))
    }
}

/// A single provider client, borrowed from [`Gateways`].
#[derive(Debug, Clone, Copy)]
pub enum Gateway<'a> {
    PayPal(&'a PayPalClient),
    Stripe(&'a StripeClient),
}

impl Gateway<'_> {
    pub fn provider(&self) -> PaymentProvider {
        match self {
            Gateway::PayPal(_) => PaymentProvider::PayPal,
            Gateway::Stripe(_) => PaymentProvider::Stripe,
        }
    }

    /// Create the provider-side order or subscription for this checkout.
    pub async fn begin_checkout(
        &self,
        intent: &CheckoutIntent,
        urls: &CheckoutUrls,
    ) -> Result<CheckoutSession> {
        match self {
            Gateway::PayPal(client) => client.begin_checkout(intent, urls).await,
            Gateway::Stripe(client) => client.create_checkout_session(intent, urls).await,
        }
    }

    /// Cancel the checkout's recurring subscription at the provider.
    ///
    /// Returns `Ok(false)` without any outbound call when the checkout never
    /// got a subscription id.
    pub async fn cancel_subscription(&self, intent: &CheckoutIntent, reason: &str) -> Result<bool> {
        let Some(subscription_id) = intent.provider_subscription_id.as_deref() else {
            return Ok(false);
        };

        match self {
            Gateway::PayPal(client) => client.cancel_subscription(subscription_id, reason).await?,
            Gateway::Stripe(client) => client.cancel_subscription(subscription_id).await?,
        }
        Ok(true)
    }
}

/// Build a `Provider` error from a non-2xx response, preferring the provider's own message.
pub(crate) async fn provider_error(provider: PaymentProvider, response: reqwest::Response) -> AppError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    AppError::Provider(format!(
        "{} returned {}: {}",
        provider,
        status.as_u16(),
        error_message(&body).unwrap_or(body)
    ))
}

/// Pull a readable message out of a PayPal or Stripe error body.
fn error_message(body: &str) -> Option<String> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    let message = json["message"]
        .as_str()
        .or_else(|| json["error"]["message"].as_str())
        .or_else(|| json["error_description"].as_str())?;

    match json["details"][0]["description"].as_str() {
        Some(detail) => Some(format!("{} ({})", message, detail)),
        None => Some(message.to_string()),
    }
}

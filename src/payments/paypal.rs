use std::sync::Arc;

use chrono::{Duration, SecondsFormat, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::PayPalConfig;
use crate::error::{AppError, Result, msg};
use crate::models::{CheckoutIntent, Frequency, PaymentType};

use super::{
    CheckoutSession, CheckoutUrls, CustomField, FetchedToken, PAYPAL_CUSTOM_FIELD_LIMIT,
    PaymentProvider, TokenCache, derive_product_id, format_price, provider_error,
};

// ============ Request payloads ============

#[derive(Debug, Serialize)]
struct Money {
    currency_code: String,
    value: String,
}

#[derive(Debug, Serialize)]
struct ApplicationContext<'a> {
    brand_name: &'a str,
    return_url: &'a str,
    cancel_url: &'a str,
    user_action: &'static str,
    shipping_preference: &'static str,
}

#[derive(Debug, Serialize)]
struct CreateOrderRequest<'a> {
    intent: &'static str,
    purchase_units: Vec<PurchaseUnit<'a>>,
    application_context: ApplicationContext<'a>,
}

#[derive(Debug, Serialize)]
struct PurchaseUnit<'a> {
    reference_id: &'a str,
    description: &'a str,
    custom_id: String,
    amount: Amount,
    items: Vec<Item<'a>>,
}

#[derive(Debug, Serialize)]
struct Amount {
    currency_code: String,
    value: String,
    breakdown: Breakdown,
}

#[derive(Debug, Serialize)]
struct Breakdown {
    item_total: Money,
}

#[derive(Debug, Serialize)]
struct Item<'a> {
    name: &'a str,
    quantity: &'static str,
    unit_amount: Money,
    category: &'static str,
}

#[derive(Debug, Serialize)]
struct CreateProductRequest<'a> {
    id: &'a str,
    name: &'a str,
    #[serde(rename = "type")]
    product_type: &'static str,
    category: &'static str,
}

#[derive(Debug, Serialize)]
struct CreatePlanRequest<'a> {
    product_id: &'a str,
    name: &'a str,
    status: &'static str,
    billing_cycles: Vec<BillingCycle>,
    payment_preferences: PaymentPreferences,
}

#[derive(Debug, Serialize)]
struct BillingCycle {
    frequency: BillingFrequency,
    tenure_type: &'static str,
    sequence: u32,
    total_cycles: u32,
    pricing_scheme: PricingScheme,
}

#[derive(Debug, Serialize)]
struct BillingFrequency {
    interval_unit: &'static str,
    interval_count: u32,
}

#[derive(Debug, Serialize)]
struct PricingScheme {
    fixed_price: Money,
}

#[derive(Debug, Serialize)]
struct PaymentPreferences {
    auto_bill_outstanding: bool,
    setup_fee_failure_action: &'static str,
    payment_failure_threshold: u32,
}

#[derive(Debug, Serialize)]
struct CreateSubscriptionRequest<'a> {
    plan_id: &'a str,
    start_time: String,
    custom_id: String,
    subscriber: Subscriber<'a>,
    application_context: ApplicationContext<'a>,
}

#[derive(Debug, Serialize)]
struct Subscriber<'a> {
    email_address: &'a str,
}

#[derive(Debug, Serialize)]
struct CancelSubscriptionRequest<'a> {
    reason: &'a str,
}

#[derive(Debug, Serialize)]
struct VerifySignatureRequest<'a> {
    auth_algo: &'a str,
    cert_url: &'a str,
    transmission_id: &'a str,
    transmission_sig: &'a str,
    transmission_time: &'a str,
    webhook_id: &'a str,
    webhook_event: &'a serde_json::Value,
}

// ============ Responses ============

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Default, Deserialize)]
struct TokenErrorResponse {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayPalLink {
    pub href: String,
    pub rel: String,
}

/// Order or subscription as returned on creation.
#[derive(Debug, Deserialize)]
struct CreatedResource {
    id: String,
    #[serde(default)]
    links: Vec<PayPalLink>,
}

#[derive(Debug, Deserialize)]
struct CreatedPlan {
    id: String,
}

#[derive(Debug, Deserialize)]
pub struct CapturedOrder {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub purchase_units: Vec<CapturedPurchaseUnit>,
}

#[derive(Debug, Deserialize)]
pub struct CapturedPurchaseUnit {
    pub custom_id: Option<String>,
    pub payments: Option<CapturedPayments>,
}

#[derive(Debug, Deserialize)]
pub struct CapturedPayments {
    #[serde(default)]
    pub captures: Vec<Capture>,
}

#[derive(Debug, Deserialize)]
pub struct Capture {
    pub id: String,
    pub status: String,
    pub custom_id: Option<String>,
}

impl CapturedOrder {
    /// Custom field echoed back by the capture, falling back to the purchase unit.
    pub fn custom_id(&self) -> Option<&str> {
        let unit = self.purchase_units.first()?;
        unit.payments
            .as_ref()
            .and_then(|p| p.captures.first())
            .and_then(|c| c.custom_id.as_deref())
            .or(unit.custom_id.as_deref())
    }
}

#[derive(Debug, Deserialize)]
pub struct PayPalSubscription {
    pub id: String,
    pub status: String,
    pub custom_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VerifySignatureResponse {
    verification_status: String,
}

/// `PAYPAL-*` headers PayPal signs each webhook delivery with.
#[derive(Debug, Clone)]
pub struct TransmissionHeaders {
    pub auth_algo: String,
    pub cert_url: String,
    pub transmission_id: String,
    pub transmission_sig: String,
    pub transmission_time: String,
}

// ============ Client ============

#[derive(Debug, Clone)]
pub struct PayPalClient {
    client: Client,
    config: PayPalConfig,
    tokens: Arc<TokenCache>,
}

impl PayPalClient {
    pub fn new(config: &PayPalConfig, client: Client, tokens: Arc<TokenCache>) -> Self {
        Self {
            client,
            config: config.clone(),
            tokens,
        }
    }

    /// Webhook id to verify deliveries against, if one is configured.
    pub fn webhook_id(&self) -> Option<&str> {
        self.config.webhook_id.as_deref()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base().trim_end_matches('/'), path)
    }

    /// OAuth bearer token, served from the shared cache while it is fresh.
    pub async fn access_token(&self) -> Result<String> {
        self.tokens
            .get_or_fetch(PaymentProvider::PayPal, self.config.mode, || {
                self.fetch_access_token()
            })
            .await
    }

    async fn fetch_access_token(&self) -> Result<FetchedToken> {
        let response = self
            .client
            .post(self.url("/v1/oauth2/token"))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        if response.status().is_client_error() || response.status().is_server_error() {
            let body: TokenErrorResponse = response.json().await.unwrap_or_default();
            let message = format!("{} {}", body.error, body.error_description);
            return Err(AppError::Authentication(message.trim().to_string()));
        }

        let token: TokenResponse = response.json().await?;
        Ok(FetchedToken {
            access_token: token.access_token,
            expires_in: token.expires_in,
        })
    }

    /// Map a non-2xx API response to an error, forgetting the token if PayPal rejected it.
    async fn api_error(&self, response: reqwest::Response) -> AppError {
        if response.status() == StatusCode::UNAUTHORIZED {
            self.tokens
                .invalidate(PaymentProvider::PayPal, self.config.mode)
                .await;
        }
        provider_error(PaymentProvider::PayPal, response).await
    }

    fn application_context<'a>(
        &'a self,
        urls: &'a CheckoutUrls,
        user_action: &'static str,
    ) -> ApplicationContext<'a> {
        ApplicationContext {
            brand_name: &self.config.brand_name,
            return_url: &urls.return_url,
            cancel_url: &urls.cancel_url,
            user_action,
            shipping_preference: "NO_SHIPPING",
        }
    }

    /// Start a hosted checkout: an order for one-time payments, a subscription otherwise.
    pub async fn begin_checkout(
        &self,
        intent: &CheckoutIntent,
        urls: &CheckoutUrls,
    ) -> Result<CheckoutSession> {
        match (intent.payment_type, intent.frequency) {
            (PaymentType::OneTime, _) => self.create_order(intent, urls).await,
            (PaymentType::Recurring, Some(frequency)) => {
                self.create_subscription_checkout(intent, frequency, urls)
                    .await
            }
            (PaymentType::Recurring, None) => {
                Err(AppError::BadRequest(msg::FREQUENCY_REQUIRED.into()))
            }
        }
    }

    pub async fn create_order(
        &self,
        intent: &CheckoutIntent,
        urls: &CheckoutUrls,
    ) -> Result<CheckoutSession> {
        let token = self.access_token().await?;
        let price = format_price(intent.price_minor, &intent.currency);
        let name = intent.plan_name();
        let money = || Money {
            currency_code: intent.currency.clone(),
            value: price.clone(),
        };

        let request = CreateOrderRequest {
            intent: "CAPTURE",
            purchase_units: vec![PurchaseUnit {
                reference_id: &intent.uref,
                description: &name,
                custom_id: CustomField::from_intent(intent).encode_for(PAYPAL_CUSTOM_FIELD_LIMIT)?,
                amount: Amount {
                    currency_code: intent.currency.clone(),
                    value: price.clone(),
                    breakdown: Breakdown {
                        item_total: money(),
                    },
                },
                items: vec![Item {
                    name: &name,
                    quantity: "1",
                    unit_amount: money(),
                    category: "DIGITAL_GOODS",
                }],
            }],
            application_context: self.application_context(urls, "PAY_NOW"),
        };

        let response = self
            .client
            .post(self.url("/v2/checkout/orders"))
            .bearer_auth(&token)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.api_error(response).await);
        }

        let order: CreatedResource = response.json().await?;
        let approve_url = approve_link(&order.links, 1)?;
        tracing::debug!("Created PayPal order {} for {}", order.id, intent.uref);

        Ok(CheckoutSession {
            provider_ref: order.id,
            approve_url,
        })
    }

    async fn create_subscription_checkout(
        &self,
        intent: &CheckoutIntent,
        frequency: Frequency,
        urls: &CheckoutUrls,
    ) -> Result<CheckoutSession> {
        let price = format_price(intent.price_minor, &intent.currency);
        let name = intent.plan_name();
        let product_id = derive_product_id(&name, intent.payment_type, &price, &intent.currency);

        self.ensure_product(&product_id, &name).await?;
        let plan_id = self
            .create_plan(&product_id, &name, &price, &intent.currency, frequency)
            .await?;
        self.create_subscription(&plan_id, intent, frequency, urls)
            .await
    }

    /// Make sure the catalog product exists, creating it on first use.
    pub async fn ensure_product(&self, product_id: &str, name: &str) -> Result<()> {
        let token = self.access_token().await?;

        let response = self
            .client
            .get(self.url(&format!("/v1/catalogs/products/{}", product_id)))
            .bearer_auth(&token)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => return Ok(()),
            StatusCode::NOT_FOUND => {}
            _ => return Err(self.api_error(response).await),
        }

        let response = self
            .client
            .post(self.url("/v1/catalogs/products"))
            .bearer_auth(&token)
            .json(&CreateProductRequest {
                id: product_id,
                name,
                product_type: "SERVICE",
                category: "SOFTWARE",
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.api_error(response).await);
        }

        tracing::info!("Created PayPal product {} ({})", product_id, name);
        Ok(())
    }

    pub async fn create_plan(
        &self,
        product_id: &str,
        name: &str,
        price: &str,
        currency: &str,
        frequency: Frequency,
    ) -> Result<String> {
        let token = self.access_token().await?;

        let request = CreatePlanRequest {
            product_id,
            name,
            status: "ACTIVE",
            billing_cycles: vec![BillingCycle {
                frequency: BillingFrequency {
                    interval_unit: "DAY",
                    interval_count: frequency.interval_days(),
                },
                tenure_type: "REGULAR",
                sequence: 1,
                total_cycles: frequency.total_cycles(),
                pricing_scheme: PricingScheme {
                    fixed_price: Money {
                        currency_code: currency.to_string(),
                        value: price.to_string(),
                    },
                },
            }],
            payment_preferences: PaymentPreferences {
                auto_bill_outstanding: true,
                setup_fee_failure_action: "CONTINUE",
                payment_failure_threshold: 3,
            },
        };

        let response = self
            .client
            .post(self.url("/v1/billing/plans"))
            .bearer_auth(&token)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.api_error(response).await);
        }

        let plan: CreatedPlan = response.json().await?;
        Ok(plan.id)
    }

    /// Create the subscription. Billing starts one full period from now.
    pub async fn create_subscription(
        &self,
        plan_id: &str,
        intent: &CheckoutIntent,
        frequency: Frequency,
        urls: &CheckoutUrls,
    ) -> Result<CheckoutSession> {
        let token = self.access_token().await?;
        let start_time = (Utc::now() + Duration::days(i64::from(frequency.interval_days())))
            .to_rfc3339_opts(SecondsFormat::Secs, true);

        let request = CreateSubscriptionRequest {
            plan_id,
            start_time,
            custom_id: CustomField::from_intent(intent).encode_for(PAYPAL_CUSTOM_FIELD_LIMIT)?,
            subscriber: Subscriber {
                email_address: &intent.email,
            },
            application_context: self.application_context(urls, "SUBSCRIBE_NOW"),
        };

        let response = self
            .client
            .post(self.url("/v1/billing/subscriptions"))
            .bearer_auth(&token)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.api_error(response).await);
        }

        let subscription: CreatedResource = response.json().await?;
        let approve_url = approve_link(&subscription.links, 0)?;
        tracing::debug!(
            "Created PayPal subscription {} for {}",
            subscription.id,
            intent.uref
        );

        Ok(CheckoutSession {
            provider_ref: subscription.id,
            approve_url,
        })
    }

    /// Capture an approved order.
    ///
    /// The request id is derived from the order id, so a retried capture
    /// returns the original result instead of charging twice.
    pub async fn capture_order(&self, order_id: &str) -> Result<CapturedOrder> {
        let token = self.access_token().await?;

        let response = self
            .client
            .post(self.url(&format!("/v2/checkout/orders/{}/capture", order_id)))
            .bearer_auth(&token)
            .header("PayPal-Request-Id", format!("capture-{}", order_id))
            .header("Prefer", "return=representation")
            .json(&serde_json::json!({}))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.api_error(response).await);
        }

        Ok(response.json().await?)
    }

    pub async fn get_subscription(&self, subscription_id: &str) -> Result<PayPalSubscription> {
        let token = self.access_token().await?;

        let response = self
            .client
            .get(self.url(&format!("/v1/billing/subscriptions/{}", subscription_id)))
            .bearer_auth(&token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.api_error(response).await);
        }

        Ok(response.json().await?)
    }

    pub async fn cancel_subscription(&self, subscription_id: &str, reason: &str) -> Result<()> {
        let token = self.access_token().await?;

        let response = self
            .client
            .post(self.url(&format!(
                "/v1/billing/subscriptions/{}/cancel",
                subscription_id
            )))
            .bearer_auth(&token)
            .json(&CancelSubscriptionRequest { reason })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.api_error(response).await);
        }

        tracing::info!("Cancelled PayPal subscription {}", subscription_id);
        Ok(())
    }

    /// Ask PayPal whether a webhook delivery is authentic.
    ///
    /// Returns `Ok(false)` when no webhook id is configured; callers decide
    /// whether that means "skip" or "reject".
    pub async fn verify_webhook_signature(
        &self,
        headers: &TransmissionHeaders,
        event: &serde_json::Value,
    ) -> Result<bool> {
        let Some(webhook_id) = self.webhook_id() else {
            return Ok(false);
        };
        let token = self.access_token().await?;

        let response = self
            .client
            .post(self.url("/v1/notifications/verify-webhook-signature"))
            .bearer_auth(&token)
            .json(&VerifySignatureRequest {
                auth_algo: &headers.auth_algo,
                cert_url: &headers.cert_url,
                transmission_id: &headers.transmission_id,
                transmission_sig: &headers.transmission_sig,
                transmission_time: &headers.transmission_time,
                webhook_id,
                webhook_event: event,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.api_error(response).await);
        }

        let verification: VerifySignatureResponse = response.json().await?;
        Ok(verification.verification_status == "SUCCESS")
    }
}

/// Pick the URL the payer must visit to approve.
///
/// Prefers the `approve`/`payer-action` link, then the link at `fallback_index`.
fn approve_link(links: &[PayPalLink], fallback_index: usize) -> Result<String> {
    links
        .iter()
        .find(|l| l.rel == "approve" || l.rel == "payer-action")
        .or_else(|| links.get(fallback_index))
        .or_else(|| links.first())
        .map(|l| l.href.clone())
        .ok_or_else(|| AppError::Provider("PayPal response has no approval link".into()))
}

// ============ Webhook payloads ============

#[derive(Debug, Deserialize)]
pub struct PayPalWebhookEvent {
    pub id: String,
    pub event_type: String,
    #[serde(default)]
    pub resource: serde_json::Value,
}

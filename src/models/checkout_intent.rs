use serde::{Deserialize, Serialize};

use super::CompletionAction;
use crate::payments::PaymentProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentType {
    #[serde(rename = "onetime", alias = "one-time", alias = "one_time")]
    OneTime,
    Recurring,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneTime => "onetime",
            Self::Recurring => "recurring",
        }
    }
}

impl std::str::FromStr for PaymentType {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "onetime" | "one-time" | "one_time" => Ok(Self::OneTime),
            "recurring" => Ok(Self::Recurring),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for PaymentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Monthly,
    #[serde(alias = "yearly")]
    Annually,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Annually => "annually",
        }
    }

    /// Length of one billing period in days.
    pub fn interval_days(&self) -> u32 {
        match self {
            Self::Monthly => 30,
            Self::Annually => 365,
        }
    }

    /// Number of billing cycles before the subscription ends (about five years either way).
    pub fn total_cycles(&self) -> u32 {
        match self {
            Self::Monthly => 60,
            Self::Annually => 5,
        }
    }
}

impl std::str::FromStr for Frequency {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "monthly" => Ok(Self::Monthly),
            "annually" | "yearly" => Ok(Self::Annually),
            _ => Err(()),
        }
    }
}

/// A purchase attempt, keyed by its reference token.
///
/// `paid` only ever moves from false to true, through
/// `queries::try_mark_checkout_paid`. Rows are never deleted.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutIntent {
    pub uref: String,
    pub provider: PaymentProvider,
    pub email: String,
    /// Amount in the currency's minor unit (major unit for zero-decimal currencies)
    pub price_minor: i64,
    pub currency: String,
    pub payment_type: PaymentType,
    pub frequency: Option<Frequency>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub callback_url: String,
    pub on_success: CompletionAction,
    pub provider_subscription_id: Option<String>,
    /// PayPal order/subscription id or Stripe checkout session id
    pub provider_order_id: Option<String>,
    pub paid: bool,
    pub paid_at: Option<i64>,
    pub cancelled_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl CheckoutIntent {
    /// Display name for provider line items and products.
    /// Falls back through `title` and `name` metadata keys.
    pub fn plan_name(&self) -> String {
        ["title", "name"]
            .iter()
            .find_map(|key| self.metadata.get(*key).and_then(|v| v.as_str()))
            .map(str::to_string)
            .unwrap_or_else(|| format!("Checkout {}", self.uref))
    }
}

#[derive(Debug, Clone)]
pub struct CreateCheckoutIntent {
    pub provider: PaymentProvider,
    pub email: String,
    pub price_minor: i64,
    pub currency: String,
    pub payment_type: PaymentType,
    pub frequency: Option<Frequency>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub callback_url: String,
    pub on_success: CompletionAction,
}

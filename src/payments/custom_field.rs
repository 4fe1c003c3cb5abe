use crate::error::{AppError, Result, msg};
use crate::models::{CheckoutIntent, PaymentType};

use super::format_price;

/// PayPal `custom_id` limit.
pub const PAYPAL_CUSTOM_FIELD_LIMIT: usize = 127;
/// Stripe metadata value limit.
pub const STRIPE_CUSTOM_FIELD_LIMIT: usize = 500;

/// Correlation payload carried through the provider and echoed back in webhooks.
///
/// Wire form is `uref&payment_type&frequency&price&email`. Inside a field
/// `%` is written `%25` and `&` is written `%26`, so plain values encode
/// unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CustomField {
    pub uref: String,
    pub payment_type: String,
    pub frequency: String,
    pub price: String,
    pub email: String,
}

fn escape(value: &str) -> String {
    value.replace('%', "%25").replace('&', "%26")
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if let Some(after) = tail.strip_prefix("%25") {
            out.push('%');
            rest = after;
        } else if let Some(after) = tail.strip_prefix("%26") {
            out.push('&');
            rest = after;
        } else {
            out.push('%');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}

impl CustomField {
    pub fn from_intent(intent: &CheckoutIntent) -> Self {
        Self {
            uref: intent.uref.clone(),
            payment_type: intent.payment_type.as_str().to_string(),
            frequency: match intent.payment_type {
                PaymentType::Recurring => intent
                    .frequency
                    .map(|f| f.as_str().to_string())
                    .unwrap_or_default(),
                PaymentType::OneTime => String::new(),
            },
            price: format_price(intent.price_minor, &intent.currency),
            email: intent.email.clone(),
        }
    }

    pub fn encode(&self) -> String {
        [
            &self.uref,
            &self.payment_type,
            &self.frequency,
            &self.price,
            &self.email,
        ]
        .iter()
        .map(|field| escape(field))
        .collect::<Vec<_>>()
        .join("&")
    }

    /// Encode, dropping optional fields until the result fits in `limit` bytes.
    ///
    /// Email goes first, then price and frequency. Only the uref is
    /// required to reconcile a payment.
    pub fn encode_for(&self, limit: usize) -> Result<String> {
        let mut field = self.clone();
        let encoded = field.encode();
        if encoded.len() <= limit {
            return Ok(encoded);
        }

        field.email.clear();
        let encoded = field.encode();
        if encoded.len() <= limit {
            return Ok(encoded);
        }

        field.price.clear();
        field.frequency.clear();
        let encoded = field.encode();
        if encoded.len() <= limit {
            return Ok(encoded);
        }

        Err(AppError::BadRequest(msg::CUSTOM_FIELD_TOO_LONG.into()))
    }

    /// Decode a value echoed back by a provider. Returns `None` if no uref is present.
    pub fn decode(raw: &str) -> Option<Self> {
        let mut parts = raw.split('&').map(unescape);
        let uref = parts.next()?.trim().to_string();
        if uref.is_empty() {
            return None;
        }
        let mut next = || parts.next().unwrap_or_default();
        Some(Self {
            uref,
            payment_type: next(),
            frequency: next(),
            price: next(),
            email: next(),
        })
    }
}

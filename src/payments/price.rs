use sha2::{Digest, Sha256};

use crate::models::PaymentType;

/// Largest accepted amount in minor units (999,999,999.99 in a decimal currency).
pub const MAX_PRICE_MINOR: i64 = 99_999_999_999;

/// Currencies whose smallest unit is the major unit.
pub const ZERO_DECIMAL_CURRENCIES: &[&str] = &["JPY", "TWD", "HUF"];

pub fn is_zero_decimal(currency: &str) -> bool {
    ZERO_DECIMAL_CURRENCIES
        .iter()
        .any(|c| c.eq_ignore_ascii_case(currency))
}

/// Format a minor-unit amount the way providers expect it in payloads.
///
/// `format_price(1999, "USD") == "19.99"`, `format_price(1500, "JPY") == "1500"`.
pub fn format_price(price_minor: i64, currency: &str) -> String {
    if is_zero_decimal(currency) {
        return price_minor.to_string();
    }
    let sign = if price_minor < 0 { "-" } else { "" };
    let abs = price_minor.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

/// Parse a user-supplied decimal amount into minor units.
///
/// Decimal currencies accept at most two fraction digits. Zero-decimal
/// currencies round half-up to a whole unit. Negative and empty input is rejected.
pub fn parse_price(text: &str, currency: &str) -> Option<i64> {
    let text = text.trim();
    let (whole, fraction) = match text.split_once('.') {
        Some((w, f)) => (w, f),
        None => (text, ""),
    };

    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(whole) || !all_digits(fraction) {
        return None;
    }

    let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };

    if is_zero_decimal(currency) {
        let round_up = fraction.bytes().next().is_some_and(|b| b >= b'5');
        return whole.checked_add(i64::from(round_up));
    }

    if fraction.len() > 2 {
        return None;
    }
    let cents: i64 = match fraction.len() {
        0 => 0,
        1 => fraction.parse::<i64>().ok()? * 10,
        _ => fraction.parse().ok()?,
    };
    whole.checked_mul(100)?.checked_add(cents)
}

/// Deterministic provider product id for a recurring plan.
///
/// Same plan, type, formatted price and currency always map to the same
/// product, so repeated checkouts reuse it instead of creating duplicates.
pub fn derive_product_id(
    plan_name: &str,
    payment_type: PaymentType,
    formatted_price: &str,
    currency: &str,
) -> String {
    let seed = format!(
        "{}_{}_{}_{}",
        plan_name,
        payment_type.as_str(),
        formatted_price,
        currency
    );
    let digest = hex::encode(Sha256::digest(seed.as_bytes()));
    digest[..32].to_string()
}

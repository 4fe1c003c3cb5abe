use chrono::Utc;
use rusqlite::{Connection, params};

use crate::error::Result;
use crate::id::generate_uref;
use crate::models::*;
use crate::payments::PaymentProvider;

use super::from_row::{
    BOOKING_PAYMENT_COLS, CHECKOUT_INTENT_COLS, COURSE_ENROLLMENT_COLS, PLAN_SUBSCRIPTION_COLS,
    query_all, query_one,
};

fn now() -> i64 {
    Utc::now().timestamp()
}

// ============ Checkout Intents ============

pub fn create_checkout_intent(
    conn: &Connection,
    input: &CreateCheckoutIntent,
) -> Result<CheckoutIntent> {
    create_checkout_intent_with_uref(conn, &generate_uref(), input)
}

/// Create a checkout intent under a caller-chosen reference.
/// Fails with a constraint error if the uref is already taken.
pub fn create_checkout_intent_with_uref(
    conn: &Connection,
    uref: &str,
    input: &CreateCheckoutIntent,
) -> Result<CheckoutIntent> {
    let now = now();
    let metadata = serde_json::to_string(&input.metadata)?;
    let on_success = serde_json::to_string(&input.on_success)?;
    let currency = input.currency.to_uppercase();

    conn.execute(
        "INSERT INTO checkout_intents
            (uref, provider, email, price_minor, currency, payment_type, frequency, metadata,
             callback_url, on_success, paid, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, ?11, ?11)",
        params![
            uref,
            input.provider.as_str(),
            &input.email,
            input.price_minor,
            &currency,
            input.payment_type.as_str(),
            input.frequency.map(|f| f.as_str()),
            metadata,
            &input.callback_url,
            on_success,
            now,
        ],
    )?;

    Ok(CheckoutIntent {
        uref: uref.to_string(),
        provider: input.provider,
        email: input.email.clone(),
        price_minor: input.price_minor,
        currency,
        payment_type: input.payment_type,
        frequency: input.frequency,
        metadata: input.metadata.clone(),
        callback_url: input.callback_url.clone(),
        on_success: input.on_success.clone(),
        provider_subscription_id: None,
        provider_order_id: None,
        paid: false,
        paid_at: None,
        cancelled_at: None,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_checkout_intent(conn: &Connection, uref: &str) -> Result<Option<CheckoutIntent>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM checkout_intents WHERE uref = ?1",
            CHECKOUT_INTENT_COLS
        ),
        &[&uref],
    )
}

/// Find the checkout that started a provider subscription.
pub fn get_checkout_intent_by_subscription(
    conn: &Connection,
    provider: PaymentProvider,
    subscription_id: &str,
) -> Result<Option<CheckoutIntent>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM checkout_intents WHERE provider = ?1 AND provider_subscription_id = ?2
             ORDER BY created_at ASC LIMIT 1",
            CHECKOUT_INTENT_COLS
        ),
        &[&provider.as_str(), &subscription_id],
    )
}

/// Remember the provider-side order/session created for this checkout.
pub fn set_checkout_provider_order(conn: &Connection, uref: &str, order_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE checkout_intents SET provider_order_id = ?1, updated_at = ?2 WHERE uref = ?3",
        params![order_id, now(), uref],
    )?;
    Ok(())
}

/// Record the provider subscription id. Returns true if the stored value changed.
pub fn set_checkout_subscription(
    conn: &Connection,
    uref: &str,
    subscription_id: &str,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE checkout_intents SET provider_subscription_id = ?1, updated_at = ?2
         WHERE uref = ?3 AND (provider_subscription_id IS NULL OR provider_subscription_id != ?1)",
        params![subscription_id, now(), uref],
    )?;
    Ok(affected > 0)
}

/// Atomically mark a checkout as paid, returning whether this call made the transition.
///
/// Compare-and-swap: concurrent or repeated webhook deliveries race on this
/// update and exactly one of them sees `Ok(true)`. Only that caller may run
/// the completion action.
///
/// Returns `Ok(false)` if the checkout was already paid or does not exist.
pub fn try_mark_checkout_paid(conn: &Connection, uref: &str) -> Result<bool> {
    let now = now();
    let affected = conn.execute(
        "UPDATE checkout_intents SET paid = 1, paid_at = ?1, updated_at = ?1
         WHERE uref = ?2 AND paid = 0",
        params![now, uref],
    )?;
    Ok(affected > 0)
}

/// Stamp the local record after a provider-side cancellation.
/// `paid` and the subscription id are left as they are.
pub fn mark_checkout_cancelled(conn: &Connection, uref: &str) -> Result<bool> {
    let now = now();
    let affected = conn.execute(
        "UPDATE checkout_intents SET cancelled_at = ?1, updated_at = ?1
         WHERE uref = ?2 AND cancelled_at IS NULL",
        params![now, uref],
    )?;
    Ok(affected > 0)
}

// ============ Webhook Event Deduplication ============

/// Atomically record a webhook event, returning true if this is a new event.
/// Returns false if the event was already processed.
///
/// Uses INSERT OR IGNORE for atomicity - if the (provider, event_id) pair
/// already exists, the insert is silently ignored and we return false.
pub fn try_record_webhook_event(conn: &Connection, provider: &str, event_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO webhook_events (provider, event_id, created_at) VALUES (?1, ?2, ?3)",
        params![provider, event_id, now()],
    )?;
    Ok(affected > 0)
}

/// Purge webhook events beyond the retention period.
/// Providers stop redelivering after a few days, so old entries are dead weight.
pub fn purge_old_webhook_events(conn: &Connection, retention_days: i64) -> Result<usize> {
    let cutoff = now() - (retention_days * 86400);
    let deleted = conn.execute(
        "DELETE FROM webhook_events WHERE created_at < ?1",
        params![cutoff],
    )?;
    Ok(deleted)
}

// ============ Completion Effects ============

/// Activate a plan for the checkout's payer. Re-running only fills in a
/// subscription id that was missing the first time.
pub fn activate_plan_subscription(
    conn: &Connection,
    intent: &CheckoutIntent,
    plan_id: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO plan_subscriptions (uref, email, plan_id, provider_subscription_id, activated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(uref) DO UPDATE SET provider_subscription_id =
            COALESCE(plan_subscriptions.provider_subscription_id, excluded.provider_subscription_id)",
        params![
            &intent.uref,
            &intent.email,
            plan_id,
            &intent.provider_subscription_id,
            now()
        ],
    )?;
    Ok(())
}

pub fn get_plan_subscription(conn: &Connection, uref: &str) -> Result<Option<PlanSubscription>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM plan_subscriptions WHERE uref = ?1",
            PLAN_SUBSCRIPTION_COLS
        ),
        &[&uref],
    )
}

/// Enroll a payer in a course. Returns false if they were already enrolled.
pub fn grant_course_access(
    conn: &Connection,
    course_id: &str,
    email: &str,
    uref: &str,
) -> Result<bool> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO course_enrollments (course_id, email, uref, enrolled_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![course_id, email, uref, now()],
    )?;
    Ok(affected > 0)
}

pub fn list_course_enrollments(conn: &Connection, course_id: &str) -> Result<Vec<CourseEnrollment>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM course_enrollments WHERE course_id = ?1 ORDER BY enrolled_at",
            COURSE_ENROLLMENT_COLS
        ),
        &[&course_id],
    )
}

/// Mark a booking as paid. Returns false if it was already confirmed.
pub fn confirm_booking_payment(conn: &Connection, booking_id: &str, uref: &str) -> Result<bool> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO booking_payments (booking_id, uref, paid_at) VALUES (?1, ?2, ?3)",
        params![booking_id, uref, now()],
    )?;
    Ok(affected > 0)
}

pub fn get_booking_payment(conn: &Connection, booking_id: &str) -> Result<Option<BookingPayment>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM booking_payments WHERE booking_id = ?1",
            BOOKING_PAYMENT_COLS
        ),
        &[&booking_id],
    )
}

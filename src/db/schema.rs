use rusqlite::Connection;

/// Initialize the database schema. Safe to run on every startup.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- Purchase attempts. Append-only: rows are never deleted.
        -- paid flips 0 -> 1 exactly once (compare-and-swap in queries).
        CREATE TABLE IF NOT EXISTS checkout_intents (
            uref TEXT PRIMARY KEY,
            provider TEXT NOT NULL CHECK (provider IN ('paypal', 'stripe')),
            email TEXT NOT NULL,
            price_minor INTEGER NOT NULL CHECK (price_minor >= 0),
            currency TEXT NOT NULL,
            payment_type TEXT NOT NULL CHECK (payment_type IN ('onetime', 'recurring')),
            frequency TEXT CHECK (frequency IS NULL OR frequency IN ('monthly', 'annually')),
            metadata TEXT NOT NULL DEFAULT '{}',
            callback_url TEXT NOT NULL,
            on_success TEXT NOT NULL,
            provider_subscription_id TEXT,
            provider_order_id TEXT,
            paid INTEGER NOT NULL DEFAULT 0,
            paid_at INTEGER,
            cancelled_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_checkout_intents_subscription
            ON checkout_intents(provider, provider_subscription_id)
            WHERE provider_subscription_id IS NOT NULL;
        CREATE INDEX IF NOT EXISTS idx_checkout_intents_email ON checkout_intents(email);

        -- Webhook deliveries already reconciled (replay / redelivery guard).
        CREATE TABLE IF NOT EXISTS webhook_events (
            provider TEXT NOT NULL,
            event_id TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (provider, event_id)
        );
        CREATE INDEX IF NOT EXISTS idx_webhook_events_created ON webhook_events(created_at);

        -- Completion effects. Each table is keyed so re-running an action is a no-op.
        CREATE TABLE IF NOT EXISTS plan_subscriptions (
            uref TEXT PRIMARY KEY REFERENCES checkout_intents(uref),
            email TEXT NOT NULL,
            plan_id TEXT NOT NULL,
            provider_subscription_id TEXT,
            activated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_plan_subscriptions_email ON plan_subscriptions(email);

        CREATE TABLE IF NOT EXISTS course_enrollments (
            course_id TEXT NOT NULL,
            email TEXT NOT NULL,
            uref TEXT NOT NULL REFERENCES checkout_intents(uref),
            enrolled_at INTEGER NOT NULL,
            PRIMARY KEY (course_id, email)
        );

        CREATE TABLE IF NOT EXISTS booking_payments (
            booking_id TEXT PRIMARY KEY,
            uref TEXT NOT NULL REFERENCES checkout_intents(uref),
            paid_at INTEGER NOT NULL
        );
        "#,
    )
}

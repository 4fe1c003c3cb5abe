use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use std::sync::Arc;
use std::time::Duration;

use paygate::completion::CompletionRegistry;
use paygate::config::Config;
use paygate::db::{AppState, create_pool, init_db, queries};
use paygate::handlers;
use paygate::models::{CompletionAction, CreateCheckoutIntent, PaymentType};
use paygate::payments::{Gateways, PaymentProvider, TokenCache};
use paygate::rate_limit::RateLimits;

#[derive(Parser, Debug)]
#[command(name = "paygate")]
#[command(about = "Hosted checkout and webhook reconciliation for PayPal and Stripe")]
struct Cli {
    /// Create a demo checkout and print its URLs (dev mode only)
    #[arg(long)]
    seed: bool,

    /// Delete the database on exit (dev mode only, useful for fresh starts)
    #[arg(long)]
    ephemeral: bool,
}

/// Seeds a one-time checkout so the verify redirect can be tried by hand.
fn seed_dev_data(state: &AppState, provider: PaymentProvider) {
    let conn = state.db.get().expect("Failed to get db connection for seeding");

    let mut metadata = serde_json::Map::new();
    metadata.insert("title".into(), "Demo Course".into());

    let intent = queries::create_checkout_intent(
        &conn,
        &CreateCheckoutIntent {
            provider,
            email: "dev@paygate.local".to_string(),
            price_minor: 1999,
            currency: "USD".to_string(),
            payment_type: PaymentType::OneTime,
            frequency: None,
            metadata,
            callback_url: "http://localhost:8080/thanks".to_string(),
            on_success: CompletionAction::GrantCourseAccess {
                course_id: "demo-course".to_string(),
            },
        },
    )
    .expect("Failed to create demo checkout");

    tracing::info!("============================================");
    tracing::info!("SEEDED DEMO CHECKOUT");
    tracing::info!("============================================");

    println!();
    println!("--- COPY FROM HERE ---");
    println!("  uref: {}", intent.uref);
    println!(
        "  verify_url: {}/payments/{}/verify?sxref={}",
        state.base_url, provider, intent.uref
    );
    println!(
        "  restart_url: {}/payments/{}/request?uref={}",
        state.base_url, provider, intent.uref
    );
    println!("--- END COPY ---");
    println!();
}

/// Spawns a background task that periodically purges stale webhook event ids
/// and expired provider tokens. Runs every 5 minutes.
fn spawn_cleanup_task(state: AppState, retention_days: i64) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(5 * 60); // 5 minutes

        loop {
            tokio::time::sleep(interval).await;

            match state.db.get() {
                Ok(conn) => match queries::purge_old_webhook_events(&conn, retention_days) {
                    Ok(count) if count > 0 => {
                        tracing::debug!("Purged {} old webhook events", count);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("Failed to purge webhook events: {}", e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to get db connection for cleanup: {}", e);
                }
            }

            let expired = state.token_cache.purge_expired().await;
            if expired > 0 {
                tracing::debug!("Dropped {} expired provider tokens", expired);
            }
        }
    });

    tracing::info!("Background cleanup task started (runs every 5 minutes)");
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "paygate=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }

    // Provider clients share one HTTP client and one token cache
    let token_cache = Arc::new(TokenCache::new());
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .expect("Failed to build HTTP client");
    let gateways = Gateways::from_config(&config, http, token_cache.clone());

    match &config.paypal {
        Some(paypal) => {
            tracing::info!("PayPal enabled ({} mode)", paypal.mode.as_str());
            if paypal.webhook_id.is_none() {
                tracing::warn!(
                    "PAYPAL_WEBHOOK_ID not set: PayPal webhook signatures will NOT be verified"
                );
            }
        }
        None => tracing::info!("PayPal disabled (PAYPAL_CLIENT_ID/PAYPAL_CLIENT_SECRET not set)"),
    }
    match &config.stripe {
        Some(stripe) => tracing::info!("Stripe enabled ({} mode)", stripe.mode().as_str()),
        None => tracing::info!("Stripe disabled (STRIPE_SECRET_KEY/STRIPE_WEBHOOK_SECRET not set)"),
    }
    if config.internal_api_key.is_none() {
        tracing::warn!("INTERNAL_API_KEY not set: checkout request and cancel routes will reject all calls");
    }

    let state = AppState {
        db: db_pool,
        base_url: config.base_url.clone(),
        internal_api_key: config.internal_api_key.clone(),
        gateways,
        token_cache,
        completions: Arc::new(CompletionRegistry::with_defaults()),
    };

    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set PAYGATE_ENV=dev)");
        } else {
            let provider = if config.paypal.is_none() && config.stripe.is_some() {
                PaymentProvider::Stripe
            } else {
                PaymentProvider::PayPal
            };
            seed_dev_data(&state, provider);
        }
    }

    spawn_cleanup_task(state.clone(), config.webhook_event_retention_days);

    let app = handlers::app(state, Some(RateLimits::new(config.rate_limit)));

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    let cleanup_on_exit = cli.ephemeral && config.dev_mode;
    let db_path = config.database_path.clone();

    if cleanup_on_exit {
        tracing::info!("EPHEMERAL MODE: database will be deleted on exit");
    }

    tracing::info!("Paygate listening on {}", addr);

    // Connect info is required for per-IP rate limiting
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Failed to start server");

    if cleanup_on_exit {
        tracing::info!("Cleaning up ephemeral database...");
        if let Err(e) = std::fs::remove_file(&db_path) {
            tracing::warn!("Failed to remove {}: {}", db_path, e);
        } else {
            tracing::info!("Removed {}", db_path);
        }
        let _ = std::fs::remove_file(format!("{}-wal", db_path));
        let _ = std::fs::remove_file(format!("{}-shm", db_path));
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}

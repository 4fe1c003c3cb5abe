use std::env;

/// Live vs sandbox credentials for a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderMode {
    Sandbox,
    Live,
}

impl ProviderMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sandbox => "sandbox",
            Self::Live => "live",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PayPalConfig {
    pub client_id: String,
    pub client_secret: String,
    pub mode: ProviderMode,
    /// Webhook id from the PayPal dashboard. Without it, webhook signatures are not verified.
    pub webhook_id: Option<String>,
    /// Shown on the hosted checkout page.
    pub brand_name: String,
    /// Overrides the sandbox/live API host (used by tests and proxies).
    pub api_base_override: Option<String>,
}

impl PayPalConfig {
    pub fn api_base(&self) -> &str {
        if let Some(ref base) = self.api_base_override {
            return base;
        }
        match self.mode {
            ProviderMode::Live => "https://api-m.paypal.com",
            ProviderMode::Sandbox => "https://api-m.sandbox.paypal.com",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub api_base_override: Option<String>,
}

impl StripeConfig {
    pub fn api_base(&self) -> &str {
        self.api_base_override
            .as_deref()
            .unwrap_or("https://api.stripe.com")
    }

    /// Stripe encodes live/test in the key prefix.
    pub fn mode(&self) -> ProviderMode {
        if self.secret_key.starts_with("sk_live_") {
            ProviderMode::Live
        } else {
            ProviderMode::Sandbox
        }
    }
}

/// Per-IP request budgets for public endpoints (requests per minute).
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub standard_rpm: u32,
    pub relaxed_rpm: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            standard_rpm: 30,
            relaxed_rpm: 60,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub base_url: String,
    pub dev_mode: bool,
    /// Bearer key for the internal request/cancel routes. `None` locks them.
    pub internal_api_key: Option<String>,
    pub paypal: Option<PayPalConfig>,
    pub stripe: Option<StripeConfig>,
    pub rate_limit: RateLimitConfig,
    pub webhook_event_retention_days: i64,
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_rpm(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("PAYGATE_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let base_url = env::var("BASE_URL")
            .unwrap_or_else(|_| format!("http://{}:{}", host, port));

        let paypal = match (env_opt("PAYPAL_CLIENT_ID"), env_opt("PAYPAL_CLIENT_SECRET")) {
            (Some(client_id), Some(client_secret)) => Some(PayPalConfig {
                client_id,
                client_secret,
                mode: match env::var("PAYPAL_MODE").as_deref() {
                    Ok("live") => ProviderMode::Live,
                    _ => ProviderMode::Sandbox,
                },
                webhook_id: env_opt("PAYPAL_WEBHOOK_ID"),
                brand_name: env::var("PAYPAL_BRAND_NAME").unwrap_or_else(|_| "Paygate".to_string()),
                api_base_override: env_opt("PAYPAL_API_BASE"),
            }),
            _ => None,
        };

        let stripe = match (env_opt("STRIPE_SECRET_KEY"), env_opt("STRIPE_WEBHOOK_SECRET")) {
            (Some(secret_key), Some(webhook_secret)) => Some(StripeConfig {
                secret_key,
                webhook_secret,
                api_base_override: env_opt("STRIPE_API_BASE"),
            }),
            _ => None,
        };

        let defaults = RateLimitConfig::default();

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "paygate.db".to_string()),
            base_url,
            dev_mode,
            internal_api_key: env_opt("INTERNAL_API_KEY"),
            paypal,
            stripe,
            rate_limit: RateLimitConfig {
                standard_rpm: env_rpm("RATE_LIMIT_STANDARD_RPM", defaults.standard_rpm),
                relaxed_rpm: env_rpm("RATE_LIMIT_RELAXED_RPM", defaults.relaxed_rpm),
            },
            webhook_event_retention_days: env::var("WEBHOOK_EVENT_RETENTION_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(7),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

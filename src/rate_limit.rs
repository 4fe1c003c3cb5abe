//! Per-IP rate limiting for the public HTTP surface.
//!
//! Tiers:
//! - Standard: `/payments/{provider}/verify`
//! - Relaxed: `/health`
//!
//! Webhook routes are not limited; providers retry on 429 and a burst of
//! redeliveries is normal. Internal routes are not limited either: the site
//! builder calls them from one address on behalf of every tenant, and the
//! bearer key already gates them.
//!
//! Configured by `RATE_LIMIT_{STANDARD,RELAXED}_RPM`.

use std::sync::Arc;
use std::time::Duration;
use tower_governor::GovernorLayer;
use tower_governor::governor::GovernorConfigBuilder;

use crate::config::RateLimitConfig;

/// Rate limiter layer type alias using governor types directly
pub type RateLimitLayer = GovernorLayer<
    tower_governor::key_extractor::PeerIpKeyExtractor,
    governor::middleware::NoOpMiddleware<governor::clock::QuantaInstant>,
    axum::body::Body,
>;

/// Replenish one request every `60 / rpm` seconds, with a burst of `rpm`.
fn create_layer(requests_per_minute: u32) -> RateLimitLayer {
    let requests_per_minute = requests_per_minute.max(1);
    let period_secs = (60 / u64::from(requests_per_minute)).max(1);

    let config = GovernorConfigBuilder::default()
        .period(Duration::from_secs(period_secs))
        .burst_size(requests_per_minute)
        .finish()
        .expect("period and burst are clamped to at least 1");

    GovernorLayer::new(Arc::new(config))
}

/// The tiers, built once from config.
#[derive(Clone)]
pub struct RateLimits {
    pub standard: RateLimitLayer,
    pub relaxed: RateLimitLayer,
}

impl RateLimits {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            standard: create_layer(config.standard_rpm),
            relaxed: create_layer(config.relaxed_rpm),
        }
    }
}

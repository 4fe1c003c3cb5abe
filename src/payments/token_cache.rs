use std::collections::HashMap;
use std::future::Future;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::config::ProviderMode;
use crate::error::Result;

use super::PaymentProvider;

/// Tokens are treated as expired this long before the provider says they are.
pub const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone)]
pub struct CachedToken {
    pub access_token: String,
    pub expires_at: i64,
}

impl CachedToken {
    fn is_fresh(&self, now: i64) -> bool {
        now < self.expires_at
    }
}

/// Token as returned by a provider's OAuth endpoint.
#[derive(Debug, Clone)]
pub struct FetchedToken {
    pub access_token: String,
    pub expires_in: i64,
}

/// Process-wide cache of provider OAuth tokens, keyed by provider and mode.
///
/// The lock is held across a fetch, so concurrent callers wait for the
/// first fetch instead of each requesting their own token.
#[derive(Debug, Default)]
pub struct TokenCache {
    entries: Mutex<HashMap<(PaymentProvider, ProviderMode), CachedToken>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a cached token, or run `fetch` and cache what it returns.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        provider: PaymentProvider,
        mode: ProviderMode,
        fetch: F,
    ) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<FetchedToken>>,
    {
        let mut entries = self.entries.lock().await;
        let key = (provider, mode);

        let now = Utc::now().timestamp();
        if let Some(token) = entries.get(&key).filter(|t| t.is_fresh(now)) {
            return Ok(token.access_token.clone());
        }

        let fetched = fetch().await?;
        let expires_at = Utc::now().timestamp() + fetched.expires_in - TOKEN_EXPIRY_MARGIN_SECS;
        tracing::debug!(
            "Cached {} {} access token (expires in {}s)",
            provider,
            mode.as_str(),
            fetched.expires_in
        );
        entries.insert(
            key,
            CachedToken {
                access_token: fetched.access_token.clone(),
                expires_at,
            },
        );
        Ok(fetched.access_token)
    }

    /// Forget a token the provider rejected.
    pub async fn invalidate(&self, provider: PaymentProvider, mode: ProviderMode) {
        self.entries.lock().await.remove(&(provider, mode));
    }

    /// Drop expired entries. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now().timestamp();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, token| token.is_fresh(now));
        before - entries.len()
    }
}

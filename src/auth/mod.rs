//! Access-token caching on top of a long-lived stored credential.

use std::collections::HashMap;
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::core::error::ProviderError;
use crate::core::traits::{CredentialStore, TokenProvider};
use crate::core::types::{AdapterContext, CredentialRecord, ProviderId};
use crate::transport::http::cancellable;

pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Short-lived upstream access token. Never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct CachedToken {
    pub token: String,
    pub expires_at: SystemTime,
}

impl CachedToken {
    pub fn new(token: impl Into<String>, expires_at: SystemTime) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// Builds a token from an absolute expiry in epoch seconds. Negative
    /// values clamp to the epoch, which reads as already expired.
    pub fn from_epoch_seconds(token: impl Into<String>, expires_at: i64) -> Self {
        let seconds = u64::try_from(expires_at).unwrap_or(0);
        Self::new(token, UNIX_EPOCH + Duration::from_secs(seconds))
    }

    /// True when the token outlives `now + margin`.
    pub fn is_fresh(&self, margin: Duration) -> bool {
        SystemTime::now()
            .checked_add(margin)
            .is_some_and(|deadline| deadline < self.expires_at)
    }
}

impl std::fmt::Debug for CachedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Trades a stored long-lived credential for a short-lived access token.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    async fn exchange(
        &self,
        credential: &CredentialRecord,
        ctx: &AdapterContext,
    ) -> Result<CachedToken, ProviderError>;
}

/// Caches one provider's access token and refreshes it on demand.
///
/// Readers share the lock while the cached token is fresh. A stale token
/// sends callers to the write lock, where the freshness check repeats so that
/// only the first writer performs the exchange and the rest reuse its result.
/// A failed refresh leaves the cache as it was.
pub struct TokenBroker<E> {
    provider: ProviderId,
    store: Arc<dyn CredentialStore>,
    exchanger: E,
    refresh_margin: Duration,
    cached: RwLock<Option<CachedToken>>,
}

impl<E> TokenBroker<E>
where
    E: TokenExchanger,
{
    pub fn new(provider: ProviderId, store: Arc<dyn CredentialStore>, exchanger: E) -> Self {
        Self {
            provider,
            store,
            exchanger,
            refresh_margin: DEFAULT_REFRESH_MARGIN,
            cached: RwLock::new(None),
        }
    }

    pub fn with_refresh_margin(mut self, refresh_margin: Duration) -> Self {
        self.refresh_margin = refresh_margin;
        self
    }

    pub async fn access_token(&self, ctx: &AdapterContext) -> Result<String, ProviderError> {
        {
            let cached = cancellable(&self.provider, ctx, self.cached.read()).await?;
            if let Some(token) = fresh_token(cached.as_ref(), self.refresh_margin) {
                return Ok(token);
            }
        }

        // A concurrent refresh holds the write lock for a whole exchange.
        let mut cached = cancellable(&self.provider, ctx, self.cached.write()).await?;
        if let Some(token) = fresh_token(cached.as_ref(), self.refresh_margin) {
            return Ok(token);
        }

        tracing::debug!(provider = %self.provider, "refreshing upstream access token");
        let credential = self.store.get_credentials(&self.provider)?;
        let refreshed = self.exchanger.exchange(&credential, ctx).await?;
        let token = refreshed.token.clone();
        *cached = Some(refreshed);
        tracing::debug!(provider = %self.provider, "upstream access token refreshed");

        Ok(token)
    }
}

fn fresh_token(cached: Option<&CachedToken>, margin: Duration) -> Option<String> {
    cached
        .filter(|token| token.is_fresh(margin))
        .map(|token| token.token.clone())
}

#[async_trait]
impl<E> TokenProvider for TokenBroker<E>
where
    E: TokenExchanger,
{
    async fn access_token(&self, ctx: &AdapterContext) -> Result<String, ProviderError> {
        TokenBroker::access_token(self, ctx).await
    }
}

/// Process-local credential store.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    records: StdRwLock<HashMap<ProviderId, CredentialRecord>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get_credentials(&self, provider: &ProviderId) -> Result<CredentialRecord, ProviderError> {
        self.records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(provider)
            .cloned()
            .ok_or_else(|| ProviderError::CredentialMissing {
                provider: provider.clone(),
                message: "no credentials stored".to_string(),
            })
    }

    fn set_credentials(
        &self,
        provider: &ProviderId,
        record: CredentialRecord,
    ) -> Result<(), ProviderError> {
        self.records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(provider.clone(), record);
        Ok(())
    }
}

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::models::User;
use crate::services::cache::TtlCache;
use crate::services::claims::{Claims, ClaimsTokenService};
use crate::services::error::ResolveError;
use crate::services::registry::ProviderRegistry;

const BEARER_PREFIX: &str = "Bearer ";

pub fn identity_cache_key(subject: &str) -> String {
    format!("identity:{}", subject)
}

/// Identity attached to an authenticated request.
#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    pub user: User,
    pub claims: Claims,
}

/// Turns a bearer token into an identity, cache first.
///
/// Cache misses for one subject are serialized so a burst of requests
/// after expiry reaches the registry once.
pub struct IdentityResolver {
    tokens: ClaimsTokenService,
    registry: Arc<dyn ProviderRegistry>,
    cache: Arc<dyn TtlCache>,
    ttl_seconds: u64,
    refetch_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl IdentityResolver {
    pub fn new(
        tokens: ClaimsTokenService,
        registry: Arc<dyn ProviderRegistry>,
        cache: Arc<dyn TtlCache>,
        ttl_seconds: u64,
    ) -> Self {
        Self {
            tokens,
            registry,
            cache,
            ttl_seconds,
            refetch_locks: DashMap::new(),
        }
    }

    pub async fn resolve(
        &self,
        authorization: Option<&str>,
    ) -> Result<ResolvedIdentity, ResolveError> {
        let token = authorization
            .and_then(|value| value.strip_prefix(BEARER_PREFIX))
            .filter(|token| !token.is_empty())
            .ok_or(ResolveError::MissingBearer)?;

        let claims = self.tokens.validate(token)?;
        let subject = claims
            .get("sub")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or(ResolveError::MissingSubject)?
            .to_string();

        let user = self.lookup(&subject).await?;
        Ok(ResolvedIdentity { user, claims })
    }

    async fn lookup(&self, subject: &str) -> Result<User, ResolveError> {
        let key = identity_cache_key(subject);

        if let Some(user) = self.cached(&key).await {
            metrics::counter!("identity_cache_lookups_total", "result" => "hit").increment(1);
            return Ok(user);
        }

        let lock = self.refetch_locks.entry(key.clone()).or_default().clone();
        let result = {
            let _guard = lock.lock().await;
            self.fill(&key, subject).await
        };
        drop(lock);
        self.refetch_locks
            .remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);

        result
    }

    /// Runs under the per-key lock: a waiter that queued behind the first
    /// miss finds the entry already written.
    async fn fill(&self, key: &str, subject: &str) -> Result<User, ResolveError> {
        if let Some(user) = self.cached(key).await {
            metrics::counter!("identity_cache_lookups_total", "result" => "hit").increment(1);
            return Ok(user);
        }
        metrics::counter!("identity_cache_lookups_total", "result" => "miss").increment(1);

        let user = self
            .registry
            .get_user(subject)
            .await?
            .ok_or(ResolveError::UnknownSubject)?;

        match serde_json::to_string(&user) {
            Ok(raw) => {
                if let Err(e) = self.cache.set(key, &raw, self.ttl_seconds).await {
                    tracing::warn!(subject = %subject, error = %e, "Failed to cache identity");
                }
            }
            Err(e) => tracing::error!(subject = %subject, error = %e, "Failed to serialize identity"),
        }

        tracing::debug!(subject = %subject, "Identity loaded from registry");
        Ok(user)
    }

    async fn cached(&self, key: &str) -> Option<User> {
        match self.cache.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(user) => Some(user),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Discarding unreadable cached identity");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Identity cache read failed");
                None
            }
        }
    }
}

use std::sync::Arc;

use crate::models::AuthProvider;
use crate::services::cache::TtlCache;
use crate::services::registry::ProviderRegistry;

pub fn provider_cache_key(provider_id: &str) -> String {
    format!("authp:{}", provider_id)
}

/// Read-through view of auth-provider configuration.
///
/// Entries live under `authp:{id}` and are dropped by the cache invalidator
/// whenever the registry announces a change.
#[derive(Clone)]
pub struct ProviderDirectory {
    registry: Arc<dyn ProviderRegistry>,
    cache: Arc<dyn TtlCache>,
    ttl_seconds: u64,
}

impl ProviderDirectory {
    pub fn new(
        registry: Arc<dyn ProviderRegistry>,
        cache: Arc<dyn TtlCache>,
        ttl_seconds: u64,
    ) -> Self {
        Self {
            registry,
            cache,
            ttl_seconds,
        }
    }

    pub async fn get(&self, provider_id: &str) -> Result<Option<AuthProvider>, anyhow::Error> {
        let key = provider_cache_key(provider_id);

        match self.cache.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<AuthProvider>(&raw) {
                Ok(provider) => return Ok(Some(provider)),
                Err(e) => {
                    tracing::warn!(provider_id = %provider_id, error = %e, "Discarding unreadable cached provider");
                }
            },
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(provider_id = %provider_id, error = %e, "Provider cache read failed, using registry");
            }
        }

        let provider = self.registry.get_auth_provider(provider_id).await?;
        if let Some(provider) = &provider {
            self.store(provider).await;
        }
        Ok(provider)
    }

    /// Reload every provider from the registry into the cache.
    pub async fn refresh_all(&self) -> Result<usize, anyhow::Error> {
        let providers = self.registry.list_auth_providers().await?;
        for provider in &providers {
            self.store(provider).await;
        }
        Ok(providers.len())
    }

    async fn store(&self, provider: &AuthProvider) {
        let raw = match serde_json::to_string(provider) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!(provider_id = %provider.id, error = %e, "Failed to serialize provider");
                return;
            }
        };
        if let Err(e) = self
            .cache
            .set(&provider_cache_key(&provider.id), &raw, self.ttl_seconds)
            .await
        {
            tracing::warn!(provider_id = %provider.id, error = %e, "Failed to cache provider");
        }
    }
}

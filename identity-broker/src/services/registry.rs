//! Provider Registry contract and the in-process implementation.
//!
//! The registry owns clients, auth providers and federated identities. The
//! broker only reads clients/providers and upserts identities; lifecycle
//! changes are announced on the [`EventBus`].

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

use crate::models::{AuthProvider, Client, FederatedIdentity, User};
use crate::services::events::{DomainEvent, EventBus};

#[async_trait]
pub trait ProviderRegistry: Send + Sync {
    async fn get_client(&self, client_id: &str) -> Result<Option<Client>, anyhow::Error>;
    async fn get_auth_provider(
        &self,
        provider_id: &str,
    ) -> Result<Option<AuthProvider>, anyhow::Error>;
    async fn list_auth_providers(&self) -> Result<Vec<AuthProvider>, anyhow::Error>;
    async fn get_user(&self, user_id: &str) -> Result<Option<User>, anyhow::Error>;
    /// Create the identity on first federation, refresh its profile after.
    async fn upsert_identity(&self, identity: &FederatedIdentity) -> Result<User, anyhow::Error>;
}

/// Registry backed by concurrent maps; emits lifecycle events on every
/// client/provider write.
pub struct InMemoryRegistry {
    clients: DashMap<String, Client>,
    providers: DashMap<String, AuthProvider>,
    users: DashMap<String, User>,
    // (provider_id, subject) -> user id
    subjects: DashMap<(String, String), String>,
    events: Arc<EventBus>,
}

impl InMemoryRegistry {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            clients: DashMap::new(),
            providers: DashMap::new(),
            users: DashMap::new(),
            subjects: DashMap::new(),
            events,
        }
    }

    pub async fn create_client(&self, client: Client) -> Result<(), anyhow::Error> {
        match self.clients.entry(client.id.clone()) {
            Entry::Occupied(_) => {
                return Err(anyhow::anyhow!("Client {} already exists", client.id));
            }
            Entry::Vacant(vacant) => {
                vacant.insert(client.clone());
            }
        }
        tracing::info!(client_id = %client.id, bootstrap = client.is_bootstrap, "Client created");
        self.events.emit(&DomainEvent::ClientCreated(client)).await?;
        Ok(())
    }

    pub async fn update_client(&self, mut client: Client) -> Result<(), anyhow::Error> {
        if !self.clients.contains_key(&client.id) {
            return Err(anyhow::anyhow!("Client {} does not exist", client.id));
        }
        client.audit.touch();
        self.clients.insert(client.id.clone(), client.clone());
        tracing::info!(client_id = %client.id, "Client updated");
        self.events.emit(&DomainEvent::ClientUpdated(client)).await?;
        Ok(())
    }

    pub async fn delete_client(&self, client_id: &str) -> Result<(), anyhow::Error> {
        let (_, client) = self
            .clients
            .remove(client_id)
            .ok_or_else(|| anyhow::anyhow!("Client {} does not exist", client_id))?;
        tracing::info!(client_id = %client_id, "Client deleted");
        self.events.emit(&DomainEvent::ClientDeleted(client)).await?;
        Ok(())
    }

    pub async fn put_auth_provider(&self, provider: AuthProvider) -> Result<(), anyhow::Error> {
        self.providers.insert(provider.id.clone(), provider.clone());
        tracing::info!(provider_id = %provider.id, "Auth provider stored");
        self.events
            .emit(&DomainEvent::AuthProviderUpdated(provider))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ProviderRegistry for InMemoryRegistry {
    async fn get_client(&self, client_id: &str) -> Result<Option<Client>, anyhow::Error> {
        Ok(self.clients.get(client_id).map(|c| c.clone()))
    }

    async fn get_auth_provider(
        &self,
        provider_id: &str,
    ) -> Result<Option<AuthProvider>, anyhow::Error> {
        Ok(self.providers.get(provider_id).map(|p| p.clone()))
    }

    async fn list_auth_providers(&self) -> Result<Vec<AuthProvider>, anyhow::Error> {
        Ok(self.providers.iter().map(|p| p.value().clone()).collect())
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<User>, anyhow::Error> {
        Ok(self.users.get(user_id).map(|u| u.clone()))
    }

    async fn upsert_identity(&self, identity: &FederatedIdentity) -> Result<User, anyhow::Error> {
        let subject_key = (identity.provider_id.clone(), identity.subject.clone());

        // The subject entry is held for the whole upsert so two concurrent
        // first logins of one subject cannot create two users. Guards are
        // released before emitting.
        let (user, refreshed) = match self.subjects.entry(subject_key) {
            Entry::Occupied(occupied) => {
                let mut user = self
                    .users
                    .get_mut(occupied.get())
                    .ok_or_else(|| anyhow::anyhow!("Identity index points at missing user"))?;
                user.apply(identity);
                (user.clone(), true)
            }
            Entry::Vacant(vacant) => {
                let user = User::from_federated(identity);
                self.users.insert(user.id.clone(), user.clone());
                vacant.insert(user.id.clone());
                (user, false)
            }
        };

        if !refreshed {
            tracing::info!(user_id = %user.id, provider_id = %identity.provider_id, "Identity created");
            return Ok(user);
        }

        // Login succeeds even when the refresh is not propagated.
        if let Err(e) = self
            .events
            .emit(&DomainEvent::IdentityUpdated(user.clone()))
            .await
        {
            tracing::warn!(user_id = %user.id, error = %e, "Identity refresh not propagated");
        }
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(subject: &str, name: &str) -> FederatedIdentity {
        FederatedIdentity {
            provider_id: "github".to_string(),
            subject: subject.to_string(),
            email: Some(format!("{}@example.com", subject)),
            name: Some(name.to_string()),
        }
    }

    #[tokio::test]
    async fn upsert_creates_then_updates_same_user() {
        let registry = InMemoryRegistry::new(Arc::new(EventBus::new()));

        let first = registry.upsert_identity(&identity("42", "Ada")).await.unwrap();
        let second = registry
            .upsert_identity(&identity("42", "Ada Lovelace"))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(
            registry.get_user(&first.id).await.unwrap().unwrap().name,
            second.name
        );
    }

    #[tokio::test]
    async fn distinct_subjects_get_distinct_users() {
        let registry = InMemoryRegistry::new(Arc::new(EventBus::new()));
        let a = registry.upsert_identity(&identity("1", "A")).await.unwrap();
        let b = registry.upsert_identity(&identity("2", "B")).await.unwrap();
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn duplicate_client_is_rejected() {
        let registry = InMemoryRegistry::new(Arc::new(EventBus::new()));
        let client = Client::new(
            "c1".to_string(),
            "Console".to_string(),
            "enc".to_string(),
            vec![],
            "p1".to_string(),
        );
        registry.create_client(client.clone()).await.unwrap();
        assert!(registry.create_client(client).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creates_of_one_client_admit_exactly_one() {
        let registry = Arc::new(InMemoryRegistry::new(Arc::new(EventBus::new())));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    let client = Client::new(
                        "shared".to_string(),
                        format!("Console {}", i),
                        "enc".to_string(),
                        vec![],
                        "p1".to_string(),
                    );
                    registry.create_client(client).await.is_ok()
                })
            })
            .collect();

        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap() {
                created += 1;
            }
        }
        assert_eq!(created, 1);
    }

    #[tokio::test]
    async fn refreshing_an_identity_drops_its_cached_resolution() {
        use crate::services::cache::{InMemoryCache, TtlCache};
        use crate::services::events::{EventKind, IdentityCacheInvalidator, Subscriber};
        use crate::services::identity::identity_cache_key;

        let cache = Arc::new(InMemoryCache::new());
        let bus = Arc::new(EventBus::new());
        bus.subscribe(
            EventKind::IdentityUpdated,
            Arc::new(Subscriber::IdentityInvalidator(IdentityCacheInvalidator::new(
                cache.clone(),
            ))),
        );
        let registry = InMemoryRegistry::new(bus);

        let user = registry.upsert_identity(&identity("9", "Old")).await.unwrap();
        cache
            .set(&identity_cache_key(&user.id), "stale", 60)
            .await
            .unwrap();

        registry.upsert_identity(&identity("9", "New")).await.unwrap();

        assert_eq!(cache.get(&identity_cache_key(&user.id)).await.unwrap(), None);
    }
}

//! In-process publish/subscribe for registry lifecycle events.
//!
//! The bus is an explicit instance created by the composition root and
//! handed to every emitter; subscribers are a closed set of roles.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;

use crate::models::{AuthProvider, Client, User};
use crate::services::cache::TtlCache;
use crate::services::directory::provider_cache_key;
use crate::services::identity::identity_cache_key;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ClientCreated,
    ClientUpdated,
    ClientDeleted,
    AuthProviderUpdated,
    IdentityUpdated,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ClientCreated => "client_created",
            EventKind::ClientUpdated => "client_updated",
            EventKind::ClientDeleted => "client_deleted",
            EventKind::AuthProviderUpdated => "auth_provider_updated",
            EventKind::IdentityUpdated => "identity_updated",
        }
    }
}

#[derive(Debug, Clone)]
pub enum DomainEvent {
    ClientCreated(Client),
    ClientUpdated(Client),
    ClientDeleted(Client),
    AuthProviderUpdated(AuthProvider),
    /// An existing user's profile was refreshed from its provider.
    IdentityUpdated(User),
}

impl DomainEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DomainEvent::ClientCreated(_) => EventKind::ClientCreated,
            DomainEvent::ClientUpdated(_) => EventKind::ClientUpdated,
            DomainEvent::ClientDeleted(_) => EventKind::ClientDeleted,
            DomainEvent::AuthProviderUpdated(_) => EventKind::AuthProviderUpdated,
            DomainEvent::IdentityUpdated(_) => EventKind::IdentityUpdated,
        }
    }
}

/// Process-wide "is an auth client configured?" flag.
///
/// Starts unenforced and can only move to enforced.
#[derive(Clone, Default)]
pub struct AuthEnforcement {
    enforced: Arc<AtomicBool>,
}

impl AuthEnforcement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_enforced(&self) -> bool {
        self.enforced.load(Ordering::Acquire)
    }

    /// Returns `true` only for the call that performed the transition.
    pub fn enforce(&self) -> bool {
        self.enforced
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Flips [`AuthEnforcement`] once an enabled bootstrap client exists.
pub struct BootstrapTracker {
    enforcement: AuthEnforcement,
}

impl BootstrapTracker {
    pub fn new(enforcement: AuthEnforcement) -> Self {
        Self { enforcement }
    }

    fn handle(&self, event: &DomainEvent) {
        let client = match event {
            DomainEvent::ClientCreated(client) | DomainEvent::ClientUpdated(client) => client,
            _ => return,
        };

        if client.is_bootstrap && client.enabled && self.enforcement.enforce() {
            tracing::info!(
                client_id = %client.id,
                "Bootstrap client configured, bearer authentication is now enforced"
            );
        }
    }
}

/// Drops cached provider metadata tied to a changed client or provider.
pub struct ProviderCacheInvalidator {
    cache: Arc<dyn TtlCache>,
}

impl ProviderCacheInvalidator {
    pub fn new(cache: Arc<dyn TtlCache>) -> Self {
        Self { cache }
    }

    async fn handle(&self, event: &DomainEvent) -> Result<(), anyhow::Error> {
        let provider_id = match event {
            DomainEvent::ClientCreated(client)
            | DomainEvent::ClientUpdated(client)
            | DomainEvent::ClientDeleted(client) => client.default_auth_provider_id.as_deref(),
            DomainEvent::AuthProviderUpdated(provider) => Some(provider.id.as_str()),
            DomainEvent::IdentityUpdated(_) => None,
        };

        if let Some(provider_id) = provider_id {
            self.cache.delete(&provider_cache_key(provider_id)).await?;
            tracing::debug!(provider_id = %provider_id, "Invalidated cached provider metadata");
        }
        Ok(())
    }
}

/// Drops the cached resolved identity of a refreshed user so protected
/// routes see the new profile.
pub struct IdentityCacheInvalidator {
    cache: Arc<dyn TtlCache>,
}

impl IdentityCacheInvalidator {
    pub fn new(cache: Arc<dyn TtlCache>) -> Self {
        Self { cache }
    }

    async fn handle(&self, event: &DomainEvent) -> Result<(), anyhow::Error> {
        if let DomainEvent::IdentityUpdated(user) = event {
            self.cache.delete(&identity_cache_key(&user.id)).await?;
            tracing::debug!(user_id = %user.id, "Invalidated cached identity");
        }
        Ok(())
    }
}

pub enum Subscriber {
    BootstrapTracker(BootstrapTracker),
    CacheInvalidator(ProviderCacheInvalidator),
    IdentityInvalidator(IdentityCacheInvalidator),
}

impl Subscriber {
    pub fn name(&self) -> &'static str {
        match self {
            Subscriber::BootstrapTracker(_) => "bootstrap_tracker",
            Subscriber::CacheInvalidator(_) => "provider_cache_invalidator",
            Subscriber::IdentityInvalidator(_) => "identity_cache_invalidator",
        }
    }

    pub async fn handle(&self, event: &DomainEvent) -> Result<(), anyhow::Error> {
        match self {
            Subscriber::BootstrapTracker(tracker) => {
                tracker.handle(event);
                Ok(())
            }
            Subscriber::CacheInvalidator(invalidator) => invalidator.handle(event).await,
            Subscriber::IdentityInvalidator(invalidator) => invalidator.handle(event).await,
        }
    }
}

#[derive(Debug)]
pub struct SubscriberFailure {
    pub subscriber: &'static str,
    pub error: anyhow::Error,
}

#[derive(Debug, Error)]
#[error("{} subscriber(s) failed handling {}: {}", failures.len(), kind.as_str(), summary(failures))]
pub struct EmitError {
    pub kind: EventKind,
    pub failures: Vec<SubscriberFailure>,
}

fn summary(failures: &[SubscriberFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.subscriber, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<HashMap<EventKind, Vec<Arc<Subscriber>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, kind: EventKind, subscriber: Arc<Subscriber>) {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        tracing::debug!(kind = kind.as_str(), subscriber = subscriber.name(), "Subscribed");
        subscribers.entry(kind).or_default().push(subscriber);
    }

    /// Deliver `event` to its kind's subscribers in registration order.
    ///
    /// Every subscriber runs even if an earlier one fails; failures are logged
    /// and returned together.
    pub async fn emit(&self, event: &DomainEvent) -> Result<(), EmitError> {
        let kind = event.kind();
        let snapshot: Vec<Arc<Subscriber>> = {
            let subscribers = self
                .subscribers
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            subscribers.get(&kind).cloned().unwrap_or_default()
        };

        let mut failures = Vec::new();
        for subscriber in snapshot {
            if let Err(error) = subscriber.handle(event).await {
                tracing::error!(
                    kind = kind.as_str(),
                    subscriber = subscriber.name(),
                    error = %error,
                    "Event subscriber failed"
                );
                failures.push(SubscriberFailure {
                    subscriber: subscriber.name(),
                    error,
                });
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(EmitError { kind, failures })
        }
    }
}
